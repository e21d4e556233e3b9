//! Helpers for keeping log lines and error messages short

/// Marker appended to clipped text
const ELLIPSIS: &str = "...";

/// Clip `text` to at most `max_chars` characters, ending in "..." when cut
pub fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut clipped: String = text.chars().take(keep).collect();
    clipped.push_str(ELLIPSIS);
    clipped
}

/// Clip raw process output, replacing invalid UTF-8
pub fn clip_bytes(bytes: &[u8], max_chars: usize) -> String {
    clip(&String::from_utf8_lossy(bytes), max_chars)
}
