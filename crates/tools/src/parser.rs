//! Tool call parser: pulls `{"tool_name": ..., "parameters": {...}}` objects
//! out of free-form model text.
//!
//! The scan is permissive. One pass over the text pairs every `{` with its
//! closing `}`, respecting JSON strings and escapes inside objects, and every
//! pair is a candidate kept only if it decodes and matches the call schema.
//! A valid call nested inside (or following) a malformed fragment is still
//! found. Fenced code blocks need no special casing since the fence markers
//! are plain prose.

use seqpilot_core::tool::ToolCall;
use serde_json::Value;

/// Extract every well-formed tool call, in order of appearance.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    scan(text).into_iter().map(|(_, call)| call).collect()
}

/// The text with every recognised tool-call fragment removed and runs of
/// blank lines collapsed. Empty code fences left behind are dropped too.
pub fn strip_tool_calls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    for ((start, end), _) in scan(text) {
        out.push_str(&text[pos..start]);
        pos = end;
    }
    out.push_str(&text[pos..]);

    let mut cleaned: Vec<&str> = Vec::new();
    let lines: Vec<&str> = out.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        // An opening fence directly followed by a closing fence
        if line.starts_with("```")
            && lines
                .iter()
                .skip(i + 1)
                .find(|l| !l.trim().is_empty())
                .is_some_and(|l| l.trim() == "```")
        {
            let close = lines
                .iter()
                .enumerate()
                .skip(i + 1)
                .find(|(_, l)| !l.trim().is_empty())
                .map(|(idx, _)| idx)
                .unwrap_or(i);
            i = close + 1;
            continue;
        }
        if line.is_empty() && cleaned.last().is_some_and(|l| l.trim().is_empty()) {
            i += 1;
            continue;
        }
        cleaned.push(lines[i]);
        i += 1;
    }
    cleaned.join("\n").trim().to_string()
}

/// Whether the text ends inside an unterminated object or code fence.
///
/// A `{` inside a quoted span of prose, as in `type "use {" here`, doesn't
/// count.
pub fn has_dangling_fragment(text: &str) -> bool {
    let structure = Structure::of(text);
    structure.fences % 2 == 1 || structure.open_objects > 0
}

/// All accepted calls with their byte spans (`start..end`, end exclusive).
fn scan(text: &str) -> Vec<((usize, usize), ToolCall)> {
    let mut found = Vec::new();
    let mut pos = 0;

    for (start, end) in Structure::of(text).pairs {
        if start < pos {
            continue;
        }
        if let Some(call) = decode_call(&text[start..=end]) {
            found.push(((start, end + 1), call));
            pos = end + 1;
        }
    }

    found
}

/// Brace and fence layout of a text, from a single left-to-right pass.
struct Structure {
    /// `(open, close)` byte offsets of matched braces, ordered by `open`
    pairs: Vec<(usize, usize)>,
    /// Unmatched `{` outside quoted prose
    open_objects: usize,
    /// ```` ``` ```` markers outside JSON strings
    fences: usize,
}

impl Structure {
    fn of(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut pairs = Vec::new();
        // Open braces, and whether each sits inside quoted prose
        let mut stack: Vec<(usize, bool)> = Vec::new();
        let mut fences = 0;
        let mut in_string = false;
        let mut escaped = false;
        let mut quoted_prose = false;

        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b == b'\n' {
                // JSON strings can't hold a raw newline; prose quotes end too
                in_string = false;
                escaped = false;
                quoted_prose = false;
            } else if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
            } else {
                match b {
                    b'"' if stack.is_empty() => quoted_prose = !quoted_prose,
                    b'"' => in_string = true,
                    b'{' => stack.push((i, quoted_prose)),
                    b'}' => {
                        if let Some((open, _)) = stack.pop() {
                            pairs.push((open, i));
                        }
                    }
                    b'`' if bytes[i..].starts_with(b"```") => {
                        fences += 1;
                        i += 3;
                        continue;
                    }
                    _ => {}
                }
            }
            i += 1;
        }

        pairs.sort_unstable_by_key(|&(open, _)| open);
        let open_objects = stack.iter().filter(|(_, quoted)| !quoted).count();
        Self {
            pairs,
            open_objects,
            fences,
        }
    }
}

/// Decode one fragment, accepting only the tool-call schema.
fn decode_call(fragment: &str) -> Option<ToolCall> {
    let value: Value = serde_json::from_str(fragment).ok()?;
    let obj = value.as_object()?;
    let name = obj.get("tool_name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let parameters = obj.get("parameters")?.as_object()?.clone();
    Some(ToolCall {
        name: name.to_string(),
        parameters,
        source_text: fragment.to_string(),
    })
}
