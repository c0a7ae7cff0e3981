//! Lenient markup parser feeding the render tree.
//!
//! Parses the evaluated template output (plain tags, attributes, text) into
//! nodes under a given parent. Modeled on how a host page surface treats
//! content replacement: best-effort recovery, never an error - a mismatched
//! closing tag pops to the nearest matching open element or is dropped.

use super::{NodeId, Tree};

/// Elements that never take children and need no closing tag.
const VOID_TAGS: &[&str] = &["br", "hr", "img", "input", "meta", "link"];

pub(super) fn parse_into(tree: &mut Tree, parent: NodeId, markup: &str) {
    let chars: Vec<char> = markup.chars().collect();
    // Innermost open element is the last entry; `parent` is the floor and
    // is never popped.
    let mut open: Vec<NodeId> = vec![parent];
    let mut i = 0usize;

    while i < chars.len() {
        if chars[i] == '<' {
            if chars[i + 1..].starts_with(&['!', '-', '-']) {
                i = skip_comment(&chars, i);
            } else if chars.get(i + 1) == Some(&'/') {
                i = close_tag(tree, &chars, i, &mut open, parent);
            } else if chars.get(i + 1).is_some_and(|ch| ch.is_alphabetic()) {
                i = open_tag(tree, &chars, i, &mut open);
            } else {
                // Bare '<' with no tag behind it: literal text.
                append_text(tree, *open.last().unwrap_or(&parent), "<");
                i += 1;
            }
        } else {
            let start = i;
            while i < chars.len() && chars[i] != '<' {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            append_text(tree, *open.last().unwrap_or(&parent), &text);
        }
    }
}

/// Whitespace-only runs are layout noise in evaluated templates; only
/// meaningful text becomes a node.
fn append_text(tree: &mut Tree, parent: NodeId, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    let node = tree.create_text(text);
    tree.append_child(parent, node);
}

fn skip_comment(chars: &[char], mut i: usize) -> usize {
    i += 4;
    while i < chars.len() {
        if chars[i] == '>' && i >= 2 && chars[i - 1] == '-' && chars[i - 2] == '-' {
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

fn close_tag(
    tree: &mut Tree,
    chars: &[char],
    mut i: usize,
    open: &mut Vec<NodeId>,
    floor: NodeId,
) -> usize {
    i += 2;
    let start = i;
    while i < chars.len() && chars[i] != '>' {
        i += 1;
    }
    let tag: String = chars[start..i].iter().collect::<String>().trim().to_string();
    if i < chars.len() {
        i += 1;
    }

    // Pop to the matching open element; an unmatched close is dropped.
    let matching = open
        .iter()
        .rposition(|&node| node != floor && tree.tag(node) == Some(tag.as_str()));
    if let Some(position) = matching {
        open.truncate(position);
    }
    i
}

fn open_tag(tree: &mut Tree, chars: &[char], mut i: usize, open: &mut Vec<NodeId>) -> usize {
    i += 1;
    let start = i;
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '-' || chars[i] == '_') {
        i += 1;
    }
    let tag: String = chars[start..i].iter().collect();

    let node = tree.create_element(&tag);
    let parent = *open.last().expect("open stack always holds the floor");
    tree.append_child(parent, node);

    let mut self_closing = false;
    loop {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        match chars.get(i) {
            None => break,
            Some('>') => {
                i += 1;
                break;
            }
            Some('/') => {
                self_closing = true;
                i += 1;
            }
            Some(_) => {
                i = attribute(tree, chars, i, node);
            }
        }
    }

    if !self_closing && !VOID_TAGS.contains(&tag.as_str()) {
        open.push(node);
    }
    i
}

fn attribute(tree: &mut Tree, chars: &[char], mut i: usize, node: NodeId) -> usize {
    let start = i;
    while i < chars.len()
        && !chars[i].is_whitespace()
        && chars[i] != '='
        && chars[i] != '>'
        && chars[i] != '/'
    {
        i += 1;
    }
    let name: String = chars[start..i].iter().collect();
    if name.is_empty() {
        // Defensive skip so a malformed run cannot stall the scan.
        return i + 1;
    }

    if chars.get(i) != Some(&'=') {
        tree.set_attribute(node, &name, "");
        return i;
    }
    i += 1;

    let value = match chars.get(i) {
        Some(&quote) if quote == '"' || quote == '\'' => {
            i += 1;
            let start = i;
            while i < chars.len() && chars[i] != quote {
                i += 1;
            }
            let value: String = chars[start..i].iter().collect();
            if i < chars.len() {
                i += 1;
            }
            value
        }
        _ => {
            let start = i;
            while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '>' {
                i += 1;
            }
            chars[start..i].iter().collect()
        }
    };
    tree.set_attribute(node, &name, &value);
    i
}
