use once_cell::sync::Lazy;
use regex::Regex;

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digits regex"));

/// Trim, collapse internal whitespace and lowercase.
pub fn normalize(text: &str) -> String {
    WS_RE.replace_all(text.trim(), " ").to_lowercase()
}

pub fn normalized_eq(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Heading level for a paragraph style name, or `None` when the style is not a heading.
///
/// A style is a heading when its name, with spaces removed, starts with `heading`
/// (case-insensitive). The level is the first run of digits in the name; `1` when absent.
pub fn heading_level(style_name: &str) -> Option<usize> {
    let compact: String = style_name.chars().filter(|c| !c.is_whitespace()).collect();
    if !compact.to_ascii_lowercase().starts_with("heading") {
        return None;
    }
    let level = DIGITS_RE
        .find(style_name)
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .unwrap_or(1);
    Some(level)
}

/// Truncate `s` to at most `max_chars` characters, appending an ellipsis when cut.
pub fn clip(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}
