//! Directive tokenizer - single left-to-right scan over masked markup.

use super::ParseError;

/// Sentinel delimiting a masked interpolation. Private-use codepoint:
/// cannot collide with template text, contains no directive syntax.
const MASK_MARK: char = '\u{E000}';

/// Flat token stream produced by the scan. Literal runs carry their
/// interpolations restored verbatim.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
    Text(String),
    OpenConditional { condition: String, offset: usize },
    OpenLoop { item: String, list_expr: String, offset: usize },
    Else { offset: usize },
    Empty { offset: usize },
    BlockOpen { offset: usize },
    BlockClose { offset: usize },
}

/// Replace every `{{ ... }}` with an opaque placeholder, returning the
/// masked text and the original marker slices for restoration.
///
/// An unterminated `{{` is left in place; its brace then tokenizes as a
/// block delimiter and surfaces as a structural parse error.
fn mask_interpolations(template: &str) -> (String, Vec<String>) {
    let mut masked = String::with_capacity(template.len());
    let mut markers = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        match rest[start + 2..].find("}}") {
            Some(len) => {
                let end = start + 2 + len + 2;
                masked.push_str(&rest[..start]);
                masked.push(MASK_MARK);
                masked.push_str(&markers.len().to_string());
                masked.push(MASK_MARK);
                markers.push(rest[start..end].to_string());
                rest = &rest[end..];
            }
            None => break,
        }
    }
    masked.push_str(rest);
    (masked, markers)
}

/// Restore masked interpolation markers verbatim.
fn restore_interpolations(text: &str, markers: &[String]) -> String {
    let mut restored = String::with_capacity(text.len());
    let mut chars = text.char_indices();

    while let Some((_, ch)) = chars.next() {
        if ch != MASK_MARK {
            restored.push(ch);
            continue;
        }
        let mut index = 0usize;
        for (_, digit) in chars.by_ref() {
            if digit == MASK_MARK {
                break;
            }
            index = index * 10 + digit.to_digit(10).unwrap_or(0) as usize;
        }
        if let Some(marker) = markers.get(index) {
            restored.push_str(marker);
        }
    }
    restored
}

/// Scan the bracketed header following a directive keyword, honoring
/// nested `[` / `]` pairs (index expressions). Returns the header content
/// and the offset just past the closing bracket.
fn scan_bracketed(
    source: &str,
    open: usize,
    directive: &'static str,
) -> Result<(String, usize), ParseError> {
    let mut depth = 0usize;
    for (position, ch) in source[open..].char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    let content = &source[open + 1..open + position];
                    return Ok((content.to_string(), open + position + 1));
                }
            }
            _ => {}
        }
    }
    Err(ParseError::UnterminatedDirective {
        directive,
        offset: open,
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_alphanumeric() || ch == '_')
}

/// Split a loop header into its binding name and list expression.
fn split_loop_header(header: &str, offset: usize) -> Result<(String, String), ParseError> {
    let invalid = ParseError::InvalidLoopHeader {
        header: header.to_string(),
        offset,
    };
    let Some((item, list_expr)) = header.split_once(" of ") else {
        return Err(invalid);
    };
    let item = item.trim();
    let list_expr = list_expr.trim();
    if !is_identifier(item) || list_expr.is_empty() {
        return Err(invalid);
    }
    Ok((item.to_string(), list_expr.to_string()))
}

/// True when the keyword at `position` ends at a word boundary, so
/// `@elsewhere` stays literal text.
fn at_word_boundary(source: &str, position: usize) -> bool {
    source[position..]
        .chars()
        .next()
        .is_none_or(|ch| !ch.is_alphanumeric() && ch != '_')
}

/// Tokenize a raw template into the directive token stream.
pub(super) fn tokenize(template: &str) -> Result<Vec<Token>, ParseError> {
    let (masked, markers) = mask_interpolations(template);
    let mut tokens = Vec::new();
    let mut literal_start = 0usize;
    let mut position = 0usize;

    let mut flush_literal = |tokens: &mut Vec<Token>, from: usize, to: usize| {
        if from < to {
            tokens.push(Token::Text(restore_interpolations(&masked[from..to], &markers)));
        }
    };

    while position < masked.len() {
        let rest = &masked[position..];

        if rest.starts_with("@if[") {
            flush_literal(&mut tokens, literal_start, position);
            let (condition, next) = scan_bracketed(&masked, position + 3, "@if")?;
            tokens.push(Token::OpenConditional {
                condition: condition.trim().to_string(),
                offset: position,
            });
            position = next;
            literal_start = position;
        } else if rest.starts_with("@for[") {
            flush_literal(&mut tokens, literal_start, position);
            let (header, next) = scan_bracketed(&masked, position + 4, "@for")?;
            let (item, list_expr) = split_loop_header(&header, position)?;
            tokens.push(Token::OpenLoop {
                item,
                list_expr,
                offset: position,
            });
            position = next;
            literal_start = position;
        } else if rest.starts_with("@else") && at_word_boundary(&masked, position + 5) {
            flush_literal(&mut tokens, literal_start, position);
            tokens.push(Token::Else { offset: position });
            position += 5;
            literal_start = position;
        } else if rest.starts_with("@empty") && at_word_boundary(&masked, position + 6) {
            flush_literal(&mut tokens, literal_start, position);
            tokens.push(Token::Empty { offset: position });
            position += 6;
            literal_start = position;
        } else if rest.starts_with('{') {
            flush_literal(&mut tokens, literal_start, position);
            tokens.push(Token::BlockOpen { offset: position });
            position += 1;
            literal_start = position;
        } else if rest.starts_with('}') {
            flush_literal(&mut tokens, literal_start, position);
            tokens.push(Token::BlockClose { offset: position });
            position += 1;
            literal_start = position;
        } else {
            position += rest.chars().next().map_or(1, char::len_utf8);
        }
    }
    flush_literal(&mut tokens, literal_start, masked.len());

    Ok(tokens)
}
