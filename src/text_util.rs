/// Maximum number of characters shown for a result in terminal output.
pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 160;

/// Collapse runs of whitespace (including newlines) into single spaces and
/// trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate `text` to at most `max_chars` characters, appending `...` when
/// anything was cut. Never splits a multi-byte character.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Render a money amount with two decimals, e.g. `$1234.50`.
pub fn format_money(amount: f64) -> String {
    format!("${amount:.2}")
}

/// Render a quantity without a trailing `.0` for whole numbers.
pub fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 && quantity.abs() < 1e15 {
        format!("{}", quantity as i64)
    } else {
        format!("{quantity}")
    }
}
