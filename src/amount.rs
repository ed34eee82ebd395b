use std::sync::LazyLock;

use regex::Regex;

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([0-9]+\.?[0-9]*)").unwrap());

const NULL_TOKENS: &[&str] = &["null", "none", "nil", "n/a"];

/// Thousands separators, currency marks and units that may wrap an amount.
const NOISE: &[&str] = &[
    ",", "，", "¥", "￥", "$", "元", "人民币", "RMB", "rmb", "CNY", "cny",
];

/// Convert free-form award text ("¥1,234.50元", "123.45万元", "null") to a number.
///
/// Total: every input yields a finite, non-negative value; anything without a
/// number in it becomes 0.
pub fn normalize(raw: Option<&str>) -> f64 {
    let Some(raw) = raw else {
        return 0.0;
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "0" {
        return 0.0;
    }
    if NULL_TOKENS.iter().any(|t| trimmed.eq_ignore_ascii_case(t)) {
        return 0.0;
    }

    let mut cleaned: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(fold_full_width)
        .collect();
    for noise in NOISE {
        if cleaned.contains(noise) {
            cleaned = cleaned.replace(noise, "");
        }
    }

    NUMBER_RE
        .captures(&cleaned)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}

/// Full-width digits and decimal point to their ASCII forms.
fn fold_full_width(c: char) -> char {
    match c {
        '０'..='９' => char::from(b'0' + (c as u32 - '０' as u32) as u8),
        '．' => '.',
        _ => c,
    }
}
