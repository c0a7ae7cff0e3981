//! Recursive-descent parser over the directive token stream.
//!
//! Each recursion consumes one block and reports the position it stopped
//! at, so nesting resolves without any auxiliary stack. The normalized
//! output keeps a branch and its alternate together on the governing node.

use super::tokenizer::Token;
use super::{
    Conditional, DirectiveNode, ELSE_WRAPPER_TAG, EMPTY_WRAPPER_TAG, Element, Loop, ParseError,
};

/// Parse a full token stream into the directive tree.
pub(super) fn parse(tokens: &[Token]) -> Result<Vec<DirectiveNode>, ParseError> {
    let (nodes, _) = parse_children(tokens, 0, false)?;
    Ok(nodes)
}

/// Parse sibling nodes starting at `pos`.
///
/// Inside a block, returns at the matching `}` with the position just past
/// it; at the top level, returns at end of input. A `}` seen at the top
/// level, or end of input inside a block, is fatal.
fn parse_children(
    tokens: &[Token],
    mut pos: usize,
    inside_block: bool,
) -> Result<(Vec<DirectiveNode>, usize), ParseError> {
    let mut nodes = Vec::new();

    while let Some(token) = tokens.get(pos) {
        match token {
            Token::Text(text) => {
                nodes.push(DirectiveNode::Text(text.clone()));
                pos += 1;
            }
            Token::OpenConditional { condition, offset } => {
                let (then_branch, next) = parse_block(tokens, pos + 1, "@if", *offset)?;
                pos = next;

                let mut else_branch = None;
                if let Some((marker_pos, marker_offset)) = peek_else(tokens, pos) {
                    let (children, next) = parse_block(tokens, marker_pos + 1, "@else", marker_offset)?;
                    pos = next;
                    else_branch = Some(Box::new(Element::wrapper(ELSE_WRAPPER_TAG, children)));
                }

                nodes.push(DirectiveNode::Conditional(Conditional {
                    condition: condition.clone(),
                    then_branch,
                    else_branch,
                }));
            }
            Token::OpenLoop {
                item,
                list_expr,
                offset,
            } => {
                let (body, next) = parse_block(tokens, pos + 1, "@for", *offset)?;
                pos = next;

                let mut empty_branch = None;
                if let Some((marker_pos, marker_offset)) = peek_empty(tokens, pos) {
                    let (children, next) = parse_block(tokens, marker_pos + 1, "@empty", marker_offset)?;
                    pos = next;
                    empty_branch = Some(Box::new(Element::wrapper(EMPTY_WRAPPER_TAG, children)));
                }

                nodes.push(DirectiveNode::Loop(Loop {
                    item: item.clone(),
                    list_expr: list_expr.clone(),
                    body,
                    empty_branch,
                }));
            }
            Token::BlockClose { offset } => {
                if inside_block {
                    return Ok((nodes, pos + 1));
                }
                return Err(ParseError::UnmatchedBlockClose { offset: *offset });
            }
            Token::BlockOpen { offset } => {
                return Err(ParseError::UnexpectedBlockOpen { offset: *offset });
            }
            Token::Else { offset } => {
                return Err(ParseError::DanglingElse { offset: *offset });
            }
            Token::Empty { offset } => {
                return Err(ParseError::DanglingEmpty { offset: *offset });
            }
        }
    }

    if inside_block {
        return Err(ParseError::UnterminatedBlock);
    }
    Ok((nodes, pos))
}

/// Consume the `{ ... }` block that must follow a directive marker.
fn parse_block(
    tokens: &[Token],
    pos: usize,
    directive: &'static str,
    offset: usize,
) -> Result<(Vec<DirectiveNode>, usize), ParseError> {
    let pos = skip_blank_text(tokens, pos);
    match tokens.get(pos) {
        Some(Token::BlockOpen { .. }) => parse_children(tokens, pos + 1, true),
        _ => Err(ParseError::MissingBlock { directive, offset }),
    }
}

/// Whitespace-only literal runs between a block and its marker carry no
/// content; step over them when pairing `} @else {` / `} @empty {`.
fn skip_blank_text(tokens: &[Token], mut pos: usize) -> usize {
    while let Some(Token::Text(text)) = tokens.get(pos) {
        if !text.trim().is_empty() {
            break;
        }
        pos += 1;
    }
    pos
}

fn peek_else(tokens: &[Token], pos: usize) -> Option<(usize, usize)> {
    let pos = skip_blank_text(tokens, pos);
    match tokens.get(pos) {
        Some(Token::Else { offset }) => Some((pos, *offset)),
        _ => None,
    }
}

fn peek_empty(tokens: &[Token], pos: usize) -> Option<(usize, usize)> {
    let pos = skip_blank_text(tokens, pos);
    match tokens.get(pos) {
        Some(Token::Empty { offset }) => Some((pos, *offset)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::super::compile;
    use super::*;

    fn text(content: &str) -> DirectiveNode {
        DirectiveNode::Text(content.to_string())
    }

    #[test]
    fn test_conditional_with_else() {
        let tree = compile("@if[ready]{<b>on</b>}@else{<i>off</i>}").unwrap();
        assert_eq!(
            tree,
            vec![DirectiveNode::Conditional(Conditional {
                condition: "ready".to_string(),
                then_branch: vec![text("<b>on</b>")],
                else_branch: Some(Box::new(Element::wrapper(
                    ELSE_WRAPPER_TAG,
                    vec![text("<i>off</i>")],
                ))),
            })]
        );
    }

    #[test]
    fn test_conditional_without_else() {
        let tree = compile("@if[ready]{on}").unwrap();
        let DirectiveNode::Conditional(conditional) = &tree[0] else {
            panic!("expected a conditional, got {tree:?}");
        };
        assert!(conditional.else_branch.is_none());
    }

    #[test]
    fn test_loop_with_empty_branch() {
        let tree = compile("@for[x of items]{<span>{{x}}</span>}@empty{<p>none</p>}").unwrap();
        assert_eq!(
            tree,
            vec![DirectiveNode::Loop(Loop {
                item: "x".to_string(),
                list_expr: "items".to_string(),
                body: vec![text("<span>{{x}}</span>")],
                empty_branch: Some(Box::new(Element::wrapper(
                    EMPTY_WRAPPER_TAG,
                    vec![text("<p>none</p>")],
                ))),
            })]
        );
    }

    #[test]
    fn test_whitespace_between_marker_and_block() {
        let tree = compile("@if[a] {x} @else {y}").unwrap();
        let DirectiveNode::Conditional(conditional) = &tree[0] else {
            panic!("expected a conditional, got {tree:?}");
        };
        assert_eq!(conditional.then_branch, vec![text("x")]);
        assert!(conditional.else_branch.is_some());
    }

    #[test]
    fn test_blank_run_between_blocks_is_not_content() {
        // The run between `}` and `@else` is whitespace-only and vanishes;
        // a non-blank run would have kept the else from pairing.
        let tree = compile("@if[a]{x}\n  @else{y}").unwrap();
        assert_eq!(tree.len(), 1, "else must pair with its conditional");
    }

    #[test]
    fn test_unbounded_nesting() {
        let tree = compile("@if[a]{@if[b]{@for[x of xs]{<i>{{x}}</i>}}}").unwrap();
        let DirectiveNode::Conditional(outer) = &tree[0] else {
            panic!("expected outer conditional");
        };
        let DirectiveNode::Conditional(inner) = &outer.then_branch[0] else {
            panic!("expected inner conditional");
        };
        assert!(matches!(inner.then_branch[0], DirectiveNode::Loop(_)));
    }

    #[test]
    fn test_literal_runs_surround_directives() {
        let tree = compile("<ul>@for[x of xs]{<li>{{x}}</li>}</ul>").unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree[0], text("<ul>"));
        assert_eq!(tree[2], text("</ul>"));
    }

    #[test]
    fn test_marker_without_block_is_fatal() {
        let error = compile("@if[a] no block").unwrap_err();
        assert!(matches!(
            error,
            ParseError::MissingBlock { directive: "@if", .. }
        ));
    }

    #[test]
    fn test_unmatched_close_at_top_level_is_fatal() {
        let error = compile("text } more").unwrap_err();
        assert!(matches!(error, ParseError::UnmatchedBlockClose { .. }));
    }

    #[test]
    fn test_unterminated_block_is_fatal() {
        let error = compile("@if[a]{never closed").unwrap_err();
        assert_eq!(error, ParseError::UnterminatedBlock);
    }

    #[test]
    fn test_dangling_else_is_fatal() {
        let error = compile("plain @else {y}").unwrap_err();
        assert!(matches!(error, ParseError::DanglingElse { .. }));
    }

    #[test]
    fn test_dangling_empty_is_fatal() {
        let error = compile("@empty{y}").unwrap_err();
        assert!(matches!(error, ParseError::DanglingEmpty { .. }));
    }

    #[test]
    fn test_stray_open_brace_is_fatal() {
        let error = compile("a { b").unwrap_err();
        assert!(matches!(error, ParseError::UnexpectedBlockOpen { .. }));
    }
}
