//! Pure conversions from scraped text to typed values.
//!
//! Nothing here returns an error: malformed input becomes `None` (or `false`)
//! so that markup drift degrades single fields instead of whole pages.

use regex::Regex;
use std::sync::OnceLock;

/// Lower-case marker the site uses for free shipping ("Envío gratis").
pub const FREE_SHIPPING_KEYWORD: &str = "gratis";

/// Parses a price written with `.` thousands and `,` decimals.
///
/// `"1.503.899"` → `1503899.0`, `"$ 12.999,50"` → `12999.5`.
pub fn parse_price(raw: Option<&str>) -> Option<f64> {
    let raw = raw?;
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// First run of digits as a percentage, e.g. `"23% OFF"` → `23`.
///
/// Values above 100 are rejected rather than clamped.
pub fn parse_discount(raw: Option<&str>) -> Option<u8> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\d+").unwrap());
    let digits = re.find(raw?)?.as_str();
    digits.parse::<u8>().ok().filter(|pct| *pct <= 100)
}

/// True when any shipping fragment mentions free shipping, in any case.
pub fn is_free_shipping<'a, I>(fragments: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    let joined = fragments.into_iter().collect::<Vec<_>>().join(" ");
    joined.to_lowercase().contains(FREE_SHIPPING_KEYWORD)
}

/// Trimmed text, with blank collapsed to `None`.
pub fn clean_text(raw: Option<&str>) -> Option<String> {
    let t = raw?.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Joins trimmed, non-blank fragments with single spaces.
pub fn join_text<'a, I>(fragments: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let parts: Vec<&str> = fragments
        .into_iter()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Drops the `#...` fragment. Query parameters are kept as-is.
pub fn strip_fragment(link: Option<&str>) -> Option<String> {
    let link = link?.trim();
    let base = link.split('#').next().unwrap_or_default();
    if base.is_empty() {
        None
    } else {
        Some(base.to_string())
    }
}
