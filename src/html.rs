//! Minimal tolerant HTML scanning.
//!
//! Real-world blog HTML is rarely well-formed XML, so this module provides a
//! forgiving tag tokenizer plus the few tree-ish helpers the feed parser and
//! the content extractor need: locating elements by name/attribute, pulling
//! attribute values, decoding entities, and collapsing whitespace. It never
//! fails; unparseable input degrades to text.

use std::ops::Range;

/// Elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is raw text (no nested markup).
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone)]
pub struct Tag {
    /// Lowercased element name.
    pub name: String,
    /// Raw attribute substring, unparsed.
    pub attrs: String,
    /// True for `<br/>`-style tags and void elements.
    pub self_closing: bool,
}

#[derive(Debug)]
pub enum Token<'a> {
    Open(Tag),
    Close(String),
    Text(&'a str),
}

/// Streaming tokenizer over an HTML document.
///
/// Emits open/close/text tokens with their byte ranges. Comments, doctypes,
/// and processing instructions are skipped. Script and style bodies are
/// consumed whole so `<` inside code cannot derail scanning; their text is
/// never emitted.
pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
    /// Close tag for a raw-text element whose body was already consumed.
    pending_close: Option<(String, Range<usize>)>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            pending_close: None,
        }
    }

    pub fn next_token(&mut self) -> Option<(Token<'a>, Range<usize>)> {
        if let Some((name, range)) = self.pending_close.take() {
            return Some((Token::Close(name), range));
        }

        let len = self.input.len();
        if self.pos >= len {
            return None;
        }

        if !self.input[self.pos..].starts_with('<') {
            let start = self.pos;
            let end = self.input[self.pos..]
                .find('<')
                .map(|off| self.pos + off)
                .unwrap_or(len);
            self.pos = end;
            return Some((Token::Text(&self.input[start..end]), start..end));
        }

        let start = self.pos;
        let rest = &self.input[self.pos..];

        if rest.starts_with("<!--") {
            self.pos = rest
                .find("-->")
                .map(|off| self.pos + off + 3)
                .unwrap_or(len);
            return self.next_token();
        }

        if rest.starts_with("<!") || rest.starts_with("<?") {
            self.pos = rest.find('>').map(|off| self.pos + off + 1).unwrap_or(len);
            return self.next_token();
        }

        let Some(gt) = rest.find('>') else {
            // Dangling '<' at EOF: treat the remainder as text.
            self.pos = len;
            return Some((Token::Text(&self.input[start..]), start..len));
        };
        let tag_end = self.pos + gt + 1;
        let inner = &self.input[self.pos + 1..tag_end - 1];

        if let Some(name_part) = inner.strip_prefix('/') {
            let name = name_part.trim().to_lowercase();
            self.pos = tag_end;
            return Some((Token::Close(name), start..tag_end));
        }

        let trimmed = inner.trim_end();
        let explicit_self_close = trimmed.ends_with('/');
        let body = trimmed.trim_end_matches('/');
        let (name, attrs) = match body.find(|c: char| c.is_whitespace()) {
            Some(split) => (&body[..split], body[split..].trim()),
            None => (body, ""),
        };
        let name = name.trim().to_lowercase();

        if name.is_empty() {
            self.pos = tag_end;
            return self.next_token();
        }

        let self_closing = explicit_self_close || VOID_ELEMENTS.contains(&name.as_str());
        let tag = Tag {
            name: name.clone(),
            attrs: attrs.to_string(),
            self_closing,
        };
        self.pos = tag_end;

        if !self_closing && RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            let close_pat = format!("</{}", name);
            if let Some(off) = find_ascii_ci(&self.input[self.pos..], &close_pat) {
                let close_start = self.pos + off;
                let close_end = self.input[close_start..]
                    .find('>')
                    .map(|o| close_start + o + 1)
                    .unwrap_or(len);
                self.pos = close_end;
                self.pending_close = Some((name, close_start..close_end));
            } else {
                // Unterminated raw-text element: swallow the rest.
                self.pos = len;
            }
            return Some((Token::Open(tag), start..tag_end));
        }

        Some((Token::Open(tag), start..tag_end))
    }
}

/// Byte-offset of `needle` in `haystack`, ASCII-case-insensitively.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// Extract the value of an attribute from a raw attribute string.
///
/// Handles double-quoted, single-quoted, and bare values; attribute names
/// are matched case-insensitively.
pub fn attr(attrs: &str, name: &str) -> Option<String> {
    let mut search_from = 0;

    while let Some(found) = find_ascii_ci(&attrs[search_from..], name) {
        let at = search_from + found;
        let boundary_ok = at == 0
            || attrs.as_bytes()[at - 1].is_ascii_whitespace()
            || attrs.as_bytes()[at - 1] == b'"'
            || attrs.as_bytes()[at - 1] == b'\'';
        let after = at + name.len();
        let rest = attrs[after..].trim_start();
        if boundary_ok && rest.starts_with('=') {
            let value_part = rest[1..].trim_start();
            let value = if let Some(stripped) = value_part.strip_prefix('"') {
                stripped.split('"').next().unwrap_or("")
            } else if let Some(stripped) = value_part.strip_prefix('\'') {
                stripped.split('\'').next().unwrap_or("")
            } else {
                value_part
                    .split(|c: char| c.is_whitespace())
                    .next()
                    .unwrap_or("")
            };
            return Some(decode_entities(value));
        }
        search_from = at + name.len();
    }
    None
}

/// Decode the common named entities plus numeric character references.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        // Entities are short; only look a few bytes ahead for the ';'.
        match rest.bytes().take(12).position(|b| b == b';') {
            Some(semi) => {
                let entity = &rest[1..semi];
                let decoded = match entity {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    _ => {
                        if let Some(hex) =
                            entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X"))
                        {
                            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
                        } else if let Some(dec) = entity.strip_prefix('#') {
                            dec.parse::<u32>().ok().and_then(char::from_u32)
                        } else {
                            None
                        }
                    }
                };
                match decoded {
                    Some(c) => {
                        out.push(c);
                        rest = &rest[semi + 1..];
                    }
                    None => {
                        out.push('&');
                        rest = &rest[1..];
                    }
                }
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Collapse every run of whitespace, newlines included, to a single space.
pub fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_ws = true;
    for c in input.chars() {
        if c.is_whitespace() {
            if !in_ws {
                out.push(' ');
                in_ws = true;
            }
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out.trim_end().to_string()
}

/// Find the first element matching `pred`, returning its tag and inner HTML.
pub fn find_element<'a>(html: &'a str, pred: impl Fn(&Tag) -> bool) -> Option<(Tag, &'a str)> {
    find_elements(html, pred).into_iter().next()
}

/// Find every element matching `pred` (nested matches included), returning
/// each tag with its inner HTML slice in document order. Unclosed matches
/// run to end of input.
pub fn find_elements<'a>(html: &'a str, pred: impl Fn(&Tag) -> bool) -> Vec<(Tag, &'a str)> {
    let mut tokenizer = Tokenizer::new(html);
    let mut stack: Vec<String> = Vec::new();
    // (depth the element sits at, tag, content start offset)
    let mut open_matches: Vec<(usize, Tag, usize)> = Vec::new();
    let mut results: Vec<(Tag, &str)> = Vec::new();

    while let Some((token, range)) = tokenizer.next_token() {
        match token {
            Token::Open(tag) => {
                if tag.self_closing {
                    if pred(&tag) {
                        results.push((tag, &html[range.end..range.end]));
                    }
                    continue;
                }
                let depth = stack.len();
                stack.push(tag.name.clone());
                if pred(&tag) {
                    open_matches.push((depth, tag, range.end));
                }
            }
            Token::Close(name) => {
                // Tolerant recovery: pop until the named element is closed.
                if let Some(pos) = stack.iter().rposition(|n| *n == name) {
                    while stack.len() > pos {
                        stack.pop();
                        let closed_depth = stack.len();
                        while let Some(idx) = open_matches
                            .iter()
                            .rposition(|(depth, _, _)| *depth == closed_depth)
                        {
                            let (_, tag, content_start) = open_matches.remove(idx);
                            results.push((tag, &html[content_start..range.start]));
                        }
                    }
                }
            }
            Token::Text(_) => {}
        }
    }

    for (_, tag, content_start) in open_matches {
        results.push((tag, &html[content_start..]));
    }

    // Matches finalize at close time, so nested elements would otherwise
    // come first; restore document order by content offset.
    results.sort_by_key(|(_, inner)| inner.as_ptr() as usize);
    results
}

/// Extract the visible text of an HTML fragment: script/style/noscript
/// subtrees dropped, entities decoded, whitespace collapsed.
pub fn visible_text(html: &str) -> String {
    let mut tokenizer = Tokenizer::new(html);
    let mut raw = String::new();
    let mut skip_depth: usize = 0;
    let mut skip_stack: Vec<bool> = Vec::new();

    while let Some((token, _)) = tokenizer.next_token() {
        match token {
            Token::Open(tag) => {
                let skipped = matches!(tag.name.as_str(), "script" | "style" | "noscript");
                if !tag.self_closing {
                    skip_stack.push(skipped);
                    if skipped {
                        skip_depth += 1;
                    }
                }
            }
            Token::Close(_) => {
                if let Some(was_skipped) = skip_stack.pop() {
                    if was_skipped {
                        skip_depth = skip_depth.saturating_sub(1);
                    }
                }
            }
            Token::Text(text) => {
                if skip_depth == 0 {
                    raw.push_str(&decode_entities(text));
                    raw.push(' ');
                }
            }
        }
    }

    collapse_whitespace(&raw)
}
