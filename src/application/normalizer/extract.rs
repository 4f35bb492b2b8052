//! Field extraction strategies and unit conversions
//!
//! Each field is resolved through the same fixed precedence: (1) the
//! explicit structured spec value when it is already clean, (2) a pattern
//! match against the raw spec text, (3) against the title, (4) against the
//! description, (5) absent. `layered` encodes that order once so every
//! field extractor stays a pair of small closures.

use once_cell::sync::Lazy;
use regex::Regex;

/// Resolve one field through the fixed source precedence.
///
/// `parse_clean` accepts the structured value only when it needs no
/// pattern work; `parse_pattern` is the heuristic applied to free text.
pub fn layered<T>(
    structured: Option<&str>,
    spec_blob: &str,
    title: &str,
    description: &str,
    parse_clean: impl Fn(&str) -> Option<T>,
    parse_pattern: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    if let Some(value) = structured {
        if let Some(parsed) = parse_clean(value.trim()) {
            return Some(parsed);
        }
        // A structured value that is not clean still beats free text
        if let Some(parsed) = parse_pattern(value) {
            return Some(parsed);
        }
    }
    parse_pattern(spec_blob)
        .or_else(|| parse_pattern(title))
        .or_else(|| parse_pattern(description))
}

/// Inches to millimeters, rounded to 2 decimals.
pub fn in_to_mm(inches: f64) -> f64 {
    (inches * 25.4 * 100.0).round() / 100.0
}

/// Millimeters to inches, rounded to 3 decimals.
///
/// Deliberately not the exact inverse of [`in_to_mm`]: downstream
/// consumers depend on the 2-vs-3 decimal rounding pair, so the
/// asymmetry must stay.
pub fn mm_to_in(mm: f64) -> f64 {
    (mm / 25.4 * 1000.0).round() / 1000.0
}

/// A bare number with nothing else around it.
pub fn clean_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

static FEET_INCHES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\d+)\s*'\s*(\d+(?:\.\d+)?)?\s*(?:"|''|”)?"#).expect("feet/inches regex")
});
static PLAIN_INCHES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\d+(?:\.\d+)?)\s*(?:"|''|”|\bin\b|\binches\b)"#).expect("plain inches regex")
});

/// Length token to total inches: `7'6"` is `7*12 + 6 = 90`, `72"` is 72.
pub fn parse_length_to_inches(text: &str) -> Option<f64> {
    if let Some(caps) = FEET_INCHES.captures(text) {
        let feet: f64 = caps.get(1)?.as_str().parse().ok()?;
        let inches: f64 = caps
            .get(2)
            .map(|m| m.as_str().parse().unwrap_or(0.0))
            .unwrap_or(0.0);
        return Some(feet * 12.0 + inches);
    }
    if let Some(caps) = PLAIN_INCHES.captures(text) {
        return caps.get(1)?.as_str().parse().ok();
    }
    None
}

static POWER_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(XXH|XH|MH|ML|UL|H|M|L)\b").expect("power code regex"));

/// Rod power code. Word spellings are folded onto the same codes before
/// the token scan so `"Medium Heavy"` and `"MH"` agree.
pub fn parse_power(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    for (phrase, code) in [
        ("extra extra heavy", "XXH"),
        ("extra heavy", "XH"),
        ("medium heavy", "MH"),
        ("medium light", "ML"),
        ("ultra light", "UL"),
        ("ultralight", "UL"),
        ("medium", "M"),
        ("heavy", "H"),
        ("light", "L"),
    ] {
        if lowered.contains(phrase) {
            return Some(code.to_string());
        }
    }
    POWER_CODE
        .captures(text)
        .map(|caps| caps[1].to_string())
}

static ACTION_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(XF|MF|F|S)\b").expect("action code regex"));

/// Rod action code. Bare `M` is never treated as an action: it collides
/// with the medium power code, and the source data always spells
/// moderate out.
pub fn parse_action(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    for (phrase, code) in [
        ("extra fast", "XF"),
        ("moderate fast", "MF"),
        ("moderate", "M"),
        ("fast", "F"),
        ("slow", "S"),
    ] {
        if lowered.contains(phrase) {
            return Some(code.to_string());
        }
    }
    ACTION_CODE
        .captures(text)
        .map(|caps| caps[1].to_string())
}

static SIZE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("size token regex"));

/// First numeric token in a sizing string like `"#6"` or `"5.5 tube"`.
pub fn parse_size_token(text: &str) -> Option<f64> {
    SIZE_TOKEN
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
}

static PIECES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*(?:pc|pcs|piece|pieces)\b").expect("pieces regex"));

/// Section count from tokens like `"2 pc"` or `"two pieces"` (digits only).
pub fn parse_pieces(text: &str) -> Option<u32> {
    PIECES.captures(text).and_then(|caps| caps[1].parse().ok())
}

/// Whether `blob` contains `keyword` with non-alphanumeric characters (or
/// string edges) on both sides. Plain `contains` is wrong for keyword
/// scans: "two piece" contains "ice".
pub fn contains_word(blob: &str, keyword: &str) -> bool {
    let bytes = blob.as_bytes();
    blob.match_indices(keyword).any(|(start, matched)| {
        let end = start + matched.len();
        let before_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let after_ok = end >= bytes.len() || !bytes[end].is_ascii_alphanumeric();
        before_ok && after_ok
    })
}

/// Title-case a free-form token: `"polished nickel"` to `"Polished Nickel"`.
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("7'6\"", 90.0)]
    #[case("7'", 84.0)]
    #[case("6'8\"", 80.0)]
    #[case("10' 6\"", 126.0)]
    #[case("72\"", 72.0)]
    #[case("40 in", 40.0)]
    fn length_tokens_convert_to_total_inches(#[case] token: &str, #[case] expected: f64) {
        assert_eq!(parse_length_to_inches(token), Some(expected));
    }

    #[test]
    fn length_parse_rejects_plain_words() {
        assert_eq!(parse_length_to_inches("medium heavy"), None);
    }

    #[rstest]
    #[case("7'6\" MH F", "MH")]
    #[case("Medium Heavy casting blank", "MH")]
    #[case("UL ice blank", "UL")]
    #[case("XXH tuna stick", "XXH")]
    fn power_codes(#[case] text: &str, #[case] expected: &str) {
        assert_eq!(parse_power(text).as_deref(), Some(expected));
    }

    #[rstest]
    #[case("7'6\" MH F", "F")]
    #[case("Extra Fast taper", "XF")]
    #[case("slow action glass", "S")]
    fn action_codes(#[case] text: &str, #[case] expected: &str) {
        assert_eq!(parse_action(text).as_deref(), Some(expected));
    }

    #[test]
    fn bare_m_is_not_an_action() {
        assert_eq!(parse_action("7' M blank"), None);
    }

    #[test]
    fn conversion_asymmetry_is_preserved() {
        let mm = in_to_mm(0.438);
        assert_eq!(mm, 11.13);
        let back = mm_to_in(mm);
        assert_eq!(back, 0.438);

        // A value that exposes the 2-decimal loss on the way to mm
        let mm_lossy = in_to_mm(0.3935);
        assert_eq!(mm_lossy, 9.99);
        assert_eq!(mm_to_in(mm_lossy), 0.393);
    }

    #[test]
    fn layered_precedence_prefers_clean_structured_value() {
        let got = layered(
            Some("90"),
            "Length: 7'2\"",
            "6' blank",
            "",
            clean_number,
            parse_length_to_inches,
        );
        assert_eq!(got, Some(90.0));
    }

    #[test]
    fn layered_precedence_falls_through_in_order() {
        // No structured value: raw spec text wins over title
        let got = layered(
            None,
            "Length: 7'2\"",
            "6' blank",
            "",
            clean_number,
            parse_length_to_inches,
        );
        assert_eq!(got, Some(86.0));

        // Only the description mentions it
        let got = layered(
            None,
            "no sizes here",
            "no sizes here either",
            "measures 40 in overall",
            clean_number,
            parse_length_to_inches,
        );
        assert_eq!(got, Some(40.0));
    }

    #[test]
    fn messy_structured_value_still_beats_free_text() {
        let got = layered(
            Some("approx 7'6\""),
            "Length: 6'",
            "",
            "",
            clean_number,
            parse_length_to_inches,
        );
        assert_eq!(got, Some(90.0));
    }

    #[test]
    fn pieces_and_size_tokens() {
        assert_eq!(parse_pieces("2 pc"), Some(2));
        assert_eq!(parse_pieces("one piece"), None);
        assert_eq!(parse_size_token("#6 ring"), Some(6.0));
        assert_eq!(parse_size_token("5.5 tube"), Some(5.5));
    }

    #[test]
    fn word_boundaries_in_keyword_scans() {
        assert!(contains_word("two piece ice blank", "ice"));
        assert!(!contains_word("two piece casting blank", "ice"));
        assert!(contains_word("full wells cork grip", "full wells"));
        assert!(!contains_word("elevation gain", "eva"));
    }

    #[test]
    fn title_case_fallback() {
        assert_eq!(title_case("polished nickel"), "Polished Nickel");
        assert_eq!(title_case("SS316"), "Ss316");
    }
}
