//! Tip-top specific normalization
//!
//! Tip-tops carry the densest heuristics: the type is read from the first
//! letter of a SKU-like code, falling back to a keyword scan of the
//! description then title, defaulting to `"Standard"`. The loop style
//! label maps 1:1 from the type, frame and ring material codes expand
//! through fixed lookup tables (title-casing anything unknown), and the
//! display title is composed from a fixed left/right template joined by
//! an en dash.

use super::extract::{contains_word, title_case};

/// SKU first letter to tip-top type.
const SKU_TYPES: &[(char, &str)] = &[
    ('H', "Heavy Duty"),
    ('F', "Fly"),
    ('B', "Boat"),
    ('M', "Micro"),
    ('S', "Standard"),
];

/// Keyword scan fallback, in priority order; first match wins.
const KEYWORD_TYPES: &[(&str, &str)] = &[
    ("heavy duty", "Heavy Duty"),
    ("heavy", "Heavy Duty"),
    ("fly", "Fly"),
    ("boat", "Boat"),
    ("roller", "Boat"),
    ("micro", "Micro"),
];

/// Loop style is a 1:1 relabeling of the type.
const LOOP_STYLES: &[(&str, &str)] = &[
    ("Heavy Duty", "Heavy Duty Loop"),
    ("Fly", "Snake Loop"),
    ("Boat", "Braced Loop"),
    ("Micro", "Micro Loop"),
    ("Standard", "Standard Loop"),
];

const FRAME_MATERIALS: &[(&str, &str)] = &[
    ("SS", "Stainless Steel"),
    ("BSS", "Black Stainless Steel"),
    ("TI", "Titanium"),
    ("CH", "Chrome"),
    ("BC", "Black Chrome"),
    ("GM", "Gunsmoke"),
];

const RING_MATERIALS: &[(&str, &str)] = &[
    ("AO", "Aluminum Oxide"),
    ("SIC", "Silicon Carbide"),
    ("ZR", "Zirconia"),
    ("HL", "Hialoy"),
    ("AG", "Agate"),
    ("CE", "Ceramic"),
];

/// Tip-top type from the first letter of a SKU-like code, falling back
/// to a keyword scan of description then title, then `"Standard"`.
pub fn derive_type(sku: Option<&str>, description: &str, title: &str) -> &'static str {
    if let Some(sku) = sku {
        if let Some(first) = sku.trim().chars().next() {
            let upper = first.to_ascii_uppercase();
            for (letter, tip_type) in SKU_TYPES {
                if *letter == upper {
                    return tip_type;
                }
            }
        }
    }

    for text in [description, title] {
        let lowered = text.to_lowercase();
        for (keyword, tip_type) in KEYWORD_TYPES {
            if contains_word(&lowered, keyword) {
                return tip_type;
            }
        }
    }

    "Standard"
}

/// Loop style label for a tip-top type.
pub fn loop_style(tip_type: &str) -> &'static str {
    for (t, style) in LOOP_STYLES {
        if *t == tip_type {
            return style;
        }
    }
    "Standard Loop"
}

fn expand(table: &[(&str, &'static str)], code: &str) -> String {
    let trimmed = code.trim();
    let upper = trimmed.to_ascii_uppercase();
    for (known, name) in table {
        if *known == upper {
            return (*name).to_string();
        }
    }
    title_case(trimmed)
}

/// Expand a frame material code; unknown codes are title-cased as-is.
pub fn expand_frame_material(code: &str) -> String {
    expand(FRAME_MATERIALS, code)
}

/// Expand a ring material code; unknown codes are title-cased as-is.
pub fn expand_ring_material(code: &str) -> String {
    expand(RING_MATERIALS, code)
}

/// Composed display title: fixed left segment describing the hardware,
/// fixed right segment describing the sizes, joined by an en dash.
pub fn display_title(
    tip_type: &str,
    frame_material: Option<&str>,
    tip_size: Option<f64>,
    tube_size: Option<f64>,
) -> String {
    let left = match frame_material {
        Some(frame) => format!("{frame} {tip_type} Tip Top"),
        None => format!("{tip_type} Tip Top"),
    };
    let right = match (tip_size, tube_size) {
        (Some(tip), Some(tube)) => format!("Size {tip} Ring, {tube} Tube"),
        (Some(tip), None) => format!("Size {tip} Ring"),
        (None, Some(tube)) => format!("{tube} Tube"),
        (None, None) => "Unsized".to_string(),
    };
    format!("{left} – {right}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("H6.5-5.5"), "", "", "Heavy Duty")]
    #[case(Some("F8"), "", "", "Fly")]
    #[case(Some("b12"), "", "", "Boat")]
    #[case(None, "heavy duty saltwater top", "", "Heavy Duty")]
    #[case(None, "", "Micro spinning top", "Micro")]
    #[case(None, "plain wire top", "nothing here", "Standard")]
    // An unmapped SKU letter falls through to the keyword scan
    #[case(Some("X99"), "fly top", "", "Fly")]
    fn type_derivation(
        #[case] sku: Option<&str>,
        #[case] description: &str,
        #[case] title: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(derive_type(sku, description, title), expected);
    }

    #[test]
    fn description_outranks_title_in_keyword_scan() {
        assert_eq!(derive_type(None, "boat style", "micro top"), "Boat");
    }

    #[test]
    fn loop_style_maps_one_to_one() {
        assert_eq!(loop_style("Heavy Duty"), "Heavy Duty Loop");
        assert_eq!(loop_style("Fly"), "Snake Loop");
        assert_eq!(loop_style("Standard"), "Standard Loop");
    }

    #[rstest]
    #[case("SS", "Stainless Steel")]
    #[case("ss", "Stainless Steel")]
    #[case("TI", "Titanium")]
    #[case("polished nickel", "Polished Nickel")]
    fn frame_material_expansion(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(expand_frame_material(code), expected);
    }

    #[rstest]
    #[case("SIC", "Silicon Carbide")]
    #[case("AO", "Aluminum Oxide")]
    #[case("mystery glass", "Mystery Glass")]
    fn ring_material_expansion(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(expand_ring_material(code), expected);
    }

    #[test]
    fn display_title_template() {
        assert_eq!(
            display_title("Heavy Duty", Some("Stainless Steel"), Some(6.5), Some(5.5)),
            "Stainless Steel Heavy Duty Tip Top – Size 6.5 Ring, 5.5 Tube"
        );
        assert_eq!(
            display_title("Standard", Some("Chrome"), None, None),
            "Chrome Standard Tip Top – Unsized"
        );
        assert_eq!(
            display_title("Micro", None, Some(4.0), None),
            "Micro Tip Top – Size 4 Ring"
        );
    }
}
