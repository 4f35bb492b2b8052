//! Family classification per part type
//!
//! Each part type carries a fixed, ordered keyword list scanned against
//! the lowercased title+description+spec blob; the first hit wins, so the
//! order of entries is part of the contract. Unmatched records fall back
//! to the part type's default family.

use super::extract::contains_word;
use crate::domain::entities::PartType;

/// Ordered (keyword, family) pairs for rod blanks. Keywords are matched
/// on word boundaries, so both the full and clipped spellings appear
/// where suppliers abbreviate.
const BLANK_FAMILIES: &[(&str, &str)] = &[
    ("fly", "Fly"),
    ("surf", "Surf"),
    ("ice", "Ice"),
    ("trolling", "Trolling"),
    ("troll", "Trolling"),
    ("jigging", "Jigging"),
    ("jig", "Jigging"),
    ("casting", "Casting"),
    ("spinning", "Spinning"),
    ("spin", "Spinning"),
];

const TIP_TOP_FAMILIES: &[(&str, &str)] = &[
    ("salt", "Saltwater"),
    ("fly", "Fly"),
    ("roller", "Roller"),
    ("micro", "Micro"),
];

const GUIDE_FAMILIES: &[(&str, &str)] = &[
    ("roller", "Roller"),
    ("fly", "Fly"),
    ("micro", "Micro"),
    ("double foot", "Double Foot"),
    ("single foot", "Single Foot"),
    ("casting", "Casting"),
    ("spinning", "Spinning"),
    ("spin", "Spinning"),
];

const REEL_SEAT_FAMILIES: &[(&str, &str)] = &[
    ("trolling", "Trolling"),
    ("troll", "Trolling"),
    ("fly", "Fly"),
    ("trigger", "Trigger"),
    ("casting", "Casting"),
    ("spinning", "Spinning"),
    ("spin", "Spinning"),
];

const GRIP_FAMILIES: &[(&str, &str)] = &[
    ("full wells", "Full Wells"),
    ("half wells", "Half Wells"),
    ("split", "Split"),
    ("fighting", "Fighting Butt"),
    ("fore", "Foregrip"),
    ("rear", "Rear Grip"),
];

const TRIM_FAMILIES: &[(&str, &str)] = &[
    ("winding check", "Winding Check"),
    ("trim ring", "Trim Ring"),
    ("hook keeper", "Hook Keeper"),
    ("decal", "Decal"),
];

const END_CAP_FAMILIES: &[(&str, &str)] = &[
    ("gimbal", "Gimbal"),
    ("fighting", "Fighting Butt"),
    ("butt", "Butt Cap"),
];

fn table_for(part_type: PartType) -> (&'static [(&'static str, &'static str)], &'static str) {
    match part_type {
        PartType::Blank => (BLANK_FAMILIES, "Spinning"),
        PartType::TipTop => (TIP_TOP_FAMILIES, "Freshwater"),
        PartType::Guide => (GUIDE_FAMILIES, "Spinning"),
        PartType::ReelSeat => (REEL_SEAT_FAMILIES, "Spinning"),
        PartType::Grip => (GRIP_FAMILIES, "Rear Grip"),
        PartType::Trim => (TRIM_FAMILIES, "Trim Ring"),
        PartType::EndCap => (END_CAP_FAMILIES, "Butt Cap"),
    }
}

/// Derive the family label for a record from its combined text blob.
pub fn derive_family(part_type: PartType, blob: &str) -> &'static str {
    let lowered = blob.to_lowercase();
    let (table, default) = table_for(part_type);
    for (keyword, family) in table {
        if contains_word(&lowered, keyword) {
            return family;
        }
    }
    default
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PartType::Blank, "RX-786 casting blank, fast action", "Casting")]
    #[case(PartType::Blank, "9' 5wt fly blank", "Fly")]
    #[case(PartType::Blank, "nondescript blank", "Spinning")]
    #[case(PartType::Grip, "EVA split grip rear section", "Split")]
    #[case(PartType::EndCap, "aluminum gimbal butt", "Gimbal")]
    #[case(PartType::Trim, "carbon winding check 13mm", "Winding Check")]
    fn family_tables(#[case] part: PartType, #[case] blob: &str, #[case] expected: &str) {
        assert_eq!(derive_family(part, blob), expected);
    }

    #[test]
    fn first_match_wins_in_table_order() {
        // Mentions both fly and casting: fly is earlier in the blank table
        assert_eq!(
            derive_family(PartType::Blank, "fly / casting crossover"),
            "Fly"
        );
        // Mentions both gimbal and butt: gimbal is earlier
        assert_eq!(
            derive_family(PartType::EndCap, "gimbal butt cap"),
            "Gimbal"
        );
    }
}
