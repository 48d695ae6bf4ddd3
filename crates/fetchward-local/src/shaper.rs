//! Response shaper: fence-aware and link-aware truncation, plus the
//! structured reply shape.

use serde::{Deserialize, Serialize};

const TRUNCATION_MARKER: &str = "...[truncated]";

/// Effective limit: `min(per_call, global)` when both
/// positive; `0` (per-call) means "use global"; `0` (global) means unlimited.
pub fn effective_limit(per_call: Option<usize>, global: usize) -> usize {
    match per_call {
        Some(0) | None => global,
        Some(n) => {
            if global == 0 {
                n
            } else {
                n.min(global)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncated {
    pub content: String,
    pub truncated: bool,
}

/// Truncate `content` to `limit` bytes, respecting fenced-code-block and
/// Markdown-link boundaries. `limit == 0` means unlimited (no truncation).
pub fn truncate(content: &str, limit: usize) -> Truncated {
    if limit == 0 || content.len() <= limit {
        return Truncated {
            content: content.to_string(),
            truncated: false,
        };
    }

    let mut cutoff = limit.saturating_sub(TRUNCATION_MARKER.len());
    cutoff = floor_char_boundary(content, cutoff);

    if let Some(c) = fence_closer(&content[..cutoff]) {
        let reserved = TRUNCATION_MARKER.len() + c.len();
        cutoff = floor_char_boundary(content, limit.saturating_sub(reserved));
    }

    cutoff = back_off_bisected_link(content, cutoff);

    let mut out = String::with_capacity(cutoff + TRUNCATION_MARKER.len() + 4);
    out.push_str(&content[..cutoff]);
    if let Some(c) = fence_closer(&content[..cutoff]) {
        out.push_str(&c);
    }
    out.push_str(TRUNCATION_MARKER);

    Truncated {
        content: out,
        truncated: true,
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Scans for line-leading runs of `` ``` `` or `~~~` (length >= 3), tracking a
/// single-entry stack. Returns the closing fence text needed if `prefix` ends
/// inside an open fence, `None` otherwise.
fn fence_closer(prefix: &str) -> Option<String> {
    let mut open: Option<(char, usize)> = None;
    for line in prefix.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n');
        let leading_ws: String = trimmed.chars().take_while(|c| c.is_whitespace()).collect();
        let rest = &trimmed[leading_ws.len()..];
        let fence_char = rest.chars().next();
        if let Some(ch) = fence_char {
            if ch == '`' || ch == '~' {
                let run_len = rest.chars().take_while(|&c| c == ch).count();
                if run_len >= 3 {
                    match open {
                        None => open = Some((ch, run_len)),
                        Some((oc, olen)) if oc == ch && run_len >= olen => open = None,
                        _ => {}
                    }
                }
            }
        }
    }
    open.map(|(ch, len)| format!("\n{}\n", ch.to_string().repeat(len)))
}

/// Byte ranges `[start, end)` of each `[text](target)` / `![text](target)`
/// span in `content`, found by simple greedy scanning (no nested-bracket
/// handling; links in normal Markdown prose don't nest).
fn find_link_spans(content: &str) -> Vec<(usize, usize)> {
    let bytes = content.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'[' {
            i += 1;
            continue;
        }
        let start = if i > 0 && bytes[i - 1] == b'!' { i - 1 } else { i };
        let Some(close_bracket) = content[i + 1..].find(']').map(|p| i + 1 + p) else {
            i += 1;
            continue;
        };
        if content[close_bracket + 1..].as_bytes().first() != Some(&b'(') {
            i = close_bracket + 1;
            continue;
        }
        let paren_start = close_bracket + 1;
        let Some(close_paren) = content[paren_start + 1..].find(')').map(|p| paren_start + 1 + p)
        else {
            i = paren_start + 1;
            continue;
        };
        spans.push((start, close_paren + 1));
        i = close_paren + 1;
    }
    spans
}

/// If `cutoff` falls inside a Markdown link/image span, move it back to just
/// before the span's opening bracket (or `!`).
fn back_off_bisected_link(content: &str, cutoff: usize) -> usize {
    for (start, end) in find_link_spans(content) {
        if start < cutoff && cutoff < end {
            return start;
        }
        if start >= cutoff {
            break;
        }
    }
    cutoff
}

/// The structured reply returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredReply {
    pub url: String,
    pub resolved_url: String,
    pub final_url: Option<String>,
    pub cache_resource_uri: Option<String>,
    pub input_url: String,
    pub title: Option<String>,
    pub metadata: serde_json::Value,
    pub markdown: String,
    pub from_cache: bool,
    pub fetched_at: u64,
    pub content_size: usize,
    pub truncated: Option<bool>,
}
