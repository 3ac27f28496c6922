//! Heuristic filters applied to chat traffic.
//!
//! Inbound messages are checked with [`validate_input`] on their raw form and
//! then cleaned with [`sanitize_input`]; the order matters, since escaping first
//! would hide `<script` and friends from the deny-list. Outbound catalog text
//! goes through [`sanitize_response`], which keeps a small set of formatting
//! tags.
//!
//! These are coarse regex heuristics, not an HTML or SQL parser.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const MAX_MESSAGE_CHARS: usize = 500;

const ENTITIES: [&str; 5] = ["&amp;", "&lt;", "&gt;", "&quot;", "&#x27;"];

const XSS_MARKERS: [&str; 7] = [
    "<script",
    "javascript:",
    "onerror=",
    "onload=",
    "<iframe",
    "<object",
    "<embed",
];

const ANCHOR_ATTRIBUTES: [&str; 2] = ["href", "class"];

static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("script block pattern"));

static EVENT_HANDLER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)on\w+\s*=").expect("event handler pattern"));

static SQL_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|EXECUTE)\b",
        r"(?i)\b(UNION|OR|AND)\s+\d+\s*=\s*\d+",
        r#"('|"|;|--|/\*|\*/)"#,
    ]
    .map(|pattern| Regex::new(pattern).expect("sql pattern"))
});

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^>]+)>").expect("tag pattern"));

static ALLOWED_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^/?(?:a|strong|em|p|br|ul|ol|li|h[1-6])\b").expect("allowed tag pattern")
});

static ANCHOR_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^a\b").expect("anchor pattern"));

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'>]+))?"#)
        .expect("attribute pattern")
});

/// Why a message was refused by [`validate_input`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRejection {
    Empty,
    SqlPattern,
    MarkupPattern,
}

impl InputRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputRejection::Empty => "empty",
            InputRejection::SqlPattern => "sql_pattern",
            InputRejection::MarkupPattern => "markup_pattern",
        }
    }
}

pub fn validate_input(text: &str) -> bool {
    rejection_reason(text).is_none()
}

pub fn rejection_reason(text: &str) -> Option<InputRejection> {
    if text.trim().is_empty() {
        return Some(InputRejection::Empty);
    }
    if SQL_PATTERNS.iter().any(|pattern| pattern.is_match(text)) {
        return Some(InputRejection::SqlPattern);
    }
    let lowered = text.to_lowercase();
    if XSS_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return Some(InputRejection::MarkupPattern);
    }
    None
}

/// Cleans a validated message for matching.
///
/// Applying it to its own output returns the same text: existing entities are
/// not escaped again and handler stripping runs to a fixed point.
pub fn sanitize_input(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let without_scripts = strip_all(&SCRIPT_BLOCK, text);
    let escaped = escape_html(&without_scripts);
    let without_handlers = strip_all(&EVENT_HANDLER, &escaped);
    truncate_escaped(&without_handlers, MAX_MESSAGE_CHARS)
        .trim()
        .to_string()
}

pub fn sanitize_response(text: &str) -> String {
    TAG.replace_all(text, |caps: &Captures| {
        let inner = &caps[1];
        if !ALLOWED_TAG.is_match(inner) {
            String::new()
        } else if ANCHOR_OPEN.is_match(inner) {
            rebuild_anchor(inner)
        } else {
            caps[0].to_string()
        }
    })
    .into_owned()
}

fn rebuild_anchor(inner: &str) -> String {
    // `inner` starts with an ASCII `a`, so slicing at 1 is on a char boundary.
    let (name, attributes) = inner.split_at(1);
    let mut rebuilt = format!("<{name}");
    for attribute in ATTRIBUTE.captures_iter(attributes) {
        let attribute_name = &attribute[1];
        if ANCHOR_ATTRIBUTES
            .iter()
            .any(|allowed| attribute_name.eq_ignore_ascii_case(allowed))
        {
            rebuilt.push(' ');
            rebuilt.push_str(&attribute[0]);
        }
    }
    rebuilt.push('>');
    rebuilt
}

fn strip_all(pattern: &Regex, text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = pattern.replace_all(&current, "").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for (index, ch) in input.char_indices() {
        match ch {
            '&' if ENTITIES
                .iter()
                .any(|entity| input[index..].starts_with(entity)) =>
            {
                escaped.push('&')
            }
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn truncate_escaped(text: &str, max_chars: usize) -> &str {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text;
    };
    let truncated = &text[..cut];
    // Every `&` in escaped text opens an entity; drop one that lost its `;`.
    match truncated.rfind('&') {
        Some(position) if !truncated[position..].contains(';') => &truncated[..position],
        _ => truncated,
    }
}
