//! Field normalizer
//!
//! Maps raw per-product title/spec text onto typed, comparable fields and
//! emits the content hash the diff engine keys on. Normalization is pure:
//! identical input always yields identical output, including the hash.
//!
//! Field extraction follows one fixed precedence (structured spec value,
//! raw spec text, title, description, absent) implemented in
//! [`extract::layered`]; each part type then runs its own sub-normalizer
//! on top of the shared fields.

pub mod extract;
pub mod families;
pub mod tip_top;

use chrono::Utc;
use regex::Regex;
use std::collections::BTreeMap;

use crate::domain::entities::{PartType, RawProduct, StagedRecord};
use extract::{
    clean_number, in_to_mm, layered, mm_to_in, parse_action, parse_length_to_inches,
    parse_pieces, parse_power,
};

/// Result of one normalization pass.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedProduct {
    pub part_type: PartType,
    pub specs: BTreeMap<String, serde_json::Value>,
    pub content_hash: String,
}

/// Blake3 digest over the ordered comparable tuple
/// `(title, part_type, specs, images)`. The spec map is a `BTreeMap`, so
/// its JSON form is already in stable key order; separators keep field
/// boundaries unambiguous.
pub fn content_hash(
    title: &str,
    part_type: PartType,
    specs: &BTreeMap<String, serde_json::Value>,
    images: &[String],
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(title.as_bytes());
    hasher.update(&[0]);
    hasher.update(part_type.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(
        serde_json::to_string(specs)
            .unwrap_or_default()
            .as_bytes(),
    );
    hasher.update(&[0]);
    for image in images {
        hasher.update(image.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Ordered material keywords shared by several part types.
const MATERIALS: &[(&str, &str)] = &[
    ("graphite", "Graphite"),
    ("carbon", "Graphite"),
    ("fiberglass", "Fiberglass"),
    ("e-glass", "Fiberglass"),
    ("glass", "Fiberglass"),
    ("composite", "Composite"),
    ("stainless", "Stainless Steel"),
    ("titanium", "Titanium"),
    ("aluminum", "Aluminum"),
    ("cork", "Cork"),
    ("eva", "EVA"),
    ("walnut", "Wood"),
    ("wood", "Wood"),
    ("rubber", "Rubber"),
];

fn parse_material(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    for (keyword, material) in MATERIALS {
        if extract::contains_word(&lowered, keyword) {
            return Some((*material).to_string());
        }
    }
    None
}

fn num(value: f64) -> serde_json::Value {
    serde_json::json!(value)
}

fn text(value: impl Into<String>) -> serde_json::Value {
    serde_json::Value::String(value.into())
}

#[derive(Debug, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize a raw record for the template's part type.
    pub fn normalize(&self, raw: &RawProduct, part_type: PartType) -> NormalizedProduct {
        let spec_blob = raw
            .spec_pairs
            .iter()
            .map(|(label, value)| format!("{label}: {value}"))
            .collect::<Vec<_>>()
            .join("\n");
        let family_blob = format!("{} {} {}", raw.title, raw.description, spec_blob);

        let mut specs: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        specs.insert(
            "family".to_string(),
            text(families::derive_family(part_type, &family_blob)),
        );

        match part_type {
            PartType::Blank => self.normalize_blank(raw, &spec_blob, &mut specs),
            PartType::TipTop => self.normalize_tip_top(raw, &spec_blob, &mut specs),
            PartType::Guide => self.normalize_guide(raw, &spec_blob, &mut specs),
            PartType::ReelSeat => self.normalize_reel_seat(raw, &spec_blob, &mut specs),
            PartType::Grip => self.normalize_grip(raw, &spec_blob, &mut specs),
            PartType::Trim => self.normalize_trim(raw, &spec_blob, &mut specs),
            PartType::EndCap => self.normalize_end_cap(raw, &spec_blob, &mut specs),
        }

        let content_hash = content_hash(&raw.title, part_type, &specs, &raw.images);

        NormalizedProduct {
            part_type,
            specs,
            content_hash,
        }
    }

    /// Normalize and assemble the full staged row in one step.
    pub fn to_staged(&self, raw: &RawProduct, part_type: PartType) -> StagedRecord {
        let normalized = self.normalize(raw, part_type);
        StagedRecord {
            supplier_id: raw.supplier_id.clone(),
            external_id: raw.external_id.clone(),
            title: raw.title.clone(),
            part_type,
            raw_specs: serde_json::json!(raw.spec_pairs),
            norm_specs: normalized.specs,
            images: raw.images.clone(),
            price_msrp: raw.price_msrp,
            price_wholesale: raw.price_wholesale,
            availability: raw.availability.clone(),
            content_hash: normalized.content_hash,
            fetched_at: Utc::now(),
        }
    }

    fn normalize_blank(
        &self,
        raw: &RawProduct,
        spec_blob: &str,
        specs: &mut BTreeMap<String, serde_json::Value>,
    ) {
        if let Some(length_in) = layered(
            raw.spec_value("length"),
            spec_blob,
            &raw.title,
            &raw.description,
            clean_number,
            parse_length_to_inches,
        ) {
            specs.insert("length_in".to_string(), num(length_in));
            specs.insert("length_mm".to_string(), num(in_to_mm(length_in)));
        }

        if let Some(power) = layered(
            raw.spec_value("power"),
            spec_blob,
            &raw.title,
            &raw.description,
            |s| parse_power(s),
            |s| parse_power(s),
        ) {
            specs.insert("power".to_string(), text(power));
        }

        if let Some(action) = layered(
            raw.spec_value("action"),
            spec_blob,
            &raw.title,
            &raw.description,
            |s| parse_action(s),
            |s| parse_action(s),
        ) {
            specs.insert("action".to_string(), text(action));
        }

        if let Some(pieces) = layered(
            raw.spec_value("pieces"),
            spec_blob,
            &raw.title,
            &raw.description,
            |s| clean_number(s).map(|n| n as u32),
            parse_pieces,
        ) {
            specs.insert("pieces".to_string(), num(f64::from(pieces)));
        }

        if let Some(material) = layered(
            raw.spec_value("material"),
            spec_blob,
            &raw.title,
            &raw.description,
            |s| parse_material(s),
            |s| parse_material(s),
        ) {
            specs.insert("material".to_string(), text(material));
        }
    }

    fn normalize_tip_top(
        &self,
        raw: &RawProduct,
        spec_blob: &str,
        specs: &mut BTreeMap<String, serde_json::Value>,
    ) {
        let tip_size = layered(
            raw.spec_value("tip size").or(raw.spec_value("ring size")),
            spec_blob,
            &raw.title,
            &raw.description,
            clean_number,
            |s| sized_token(s, &["tip size", "ring size", "tip", "ring"]),
        );
        if let Some(tip) = tip_size {
            specs.insert("tip_size".to_string(), num(tip));
        }

        let tube_size = layered(
            raw.spec_value("tube size").or(raw.spec_value("tube")),
            spec_blob,
            &raw.title,
            &raw.description,
            clean_number,
            |s| sized_token(s, &["tube size", "tube"]),
        );
        if let Some(tube) = tube_size {
            specs.insert("tube_size".to_string(), num(tube));
        }

        let type_hint = raw
            .spec_value("type")
            .or(raw.sku.as_deref());
        let tip_type = tip_top::derive_type(type_hint, &raw.description, &raw.title);
        specs.insert("tip_top_type".to_string(), text(tip_type));
        specs.insert("loop_style".to_string(), text(tip_top::loop_style(tip_type)));

        let frame = raw
            .spec_value("frame")
            .or(raw.spec_value("frame material"))
            .map(tip_top::expand_frame_material);
        if let Some(frame) = &frame {
            specs.insert("frame_material".to_string(), text(frame.clone()));
        }

        if let Some(ring) = raw
            .spec_value("ring")
            .or(raw.spec_value("ring material"))
            .map(tip_top::expand_ring_material)
        {
            specs.insert("ring_material".to_string(), text(ring));
        }

        specs.insert(
            "display_title".to_string(),
            text(tip_top::display_title(
                tip_type,
                frame.as_deref(),
                tip_size,
                tube_size,
            )),
        );
    }

    fn normalize_guide(
        &self,
        raw: &RawProduct,
        spec_blob: &str,
        specs: &mut BTreeMap<String, serde_json::Value>,
    ) {
        if let Some(ring_size) = layered(
            raw.spec_value("ring size").or(raw.spec_value("size")),
            spec_blob,
            &raw.title,
            &raw.description,
            clean_number,
            |s| sized_token(s, &["ring size", "#", "size", "ring"]),
        ) {
            specs.insert("ring_size".to_string(), num(ring_size));
        }

        if let Some(frame) = raw
            .spec_value("frame")
            .or(raw.spec_value("frame material"))
            .map(tip_top::expand_frame_material)
        {
            specs.insert("frame_material".to_string(), text(frame));
        }

        if let Some(ring) = raw
            .spec_value("ring")
            .or(raw.spec_value("ring material"))
            .map(tip_top::expand_ring_material)
        {
            specs.insert("ring_material".to_string(), text(ring));
        }
    }

    fn normalize_reel_seat(
        &self,
        raw: &RawProduct,
        spec_blob: &str,
        specs: &mut BTreeMap<String, serde_json::Value>,
    ) {
        if let Some(size) = layered(
            raw.spec_value("size"),
            spec_blob,
            &raw.title,
            &raw.description,
            clean_number,
            |s| sized_token(s, &["seat size", "size", "seat"]),
        ) {
            specs.insert("seat_size".to_string(), num(size));
        }

        if let Some(material) = layered(
            raw.spec_value("material"),
            spec_blob,
            &raw.title,
            &raw.description,
            |s| parse_material(s),
            |s| parse_material(s),
        ) {
            specs.insert("material".to_string(), text(material));
        }
    }

    fn normalize_grip(
        &self,
        raw: &RawProduct,
        spec_blob: &str,
        specs: &mut BTreeMap<String, serde_json::Value>,
    ) {
        if let Some(length_in) = layered(
            raw.spec_value("length"),
            spec_blob,
            &raw.title,
            &raw.description,
            clean_number,
            parse_length_to_inches,
        ) {
            specs.insert("length_in".to_string(), num(length_in));
            specs.insert("length_mm".to_string(), num(in_to_mm(length_in)));
        }

        if let Some(bore_in) = layered(
            raw.spec_value("bore").or(raw.spec_value("id")),
            spec_blob,
            &raw.title,
            &raw.description,
            clean_number,
            |s| sized_token(s, &["bore", "id"]),
        ) {
            specs.insert("bore_in".to_string(), num(bore_in));
            specs.insert("bore_mm".to_string(), num(in_to_mm(bore_in)));
        }

        if let Some(material) = layered(
            raw.spec_value("material"),
            spec_blob,
            &raw.title,
            &raw.description,
            |s| parse_material(s),
            |s| parse_material(s),
        ) {
            specs.insert("material".to_string(), text(material));
        }
    }

    fn normalize_trim(
        &self,
        raw: &RawProduct,
        spec_blob: &str,
        specs: &mut BTreeMap<String, serde_json::Value>,
    ) {
        // Trim parts are sized in millimeters by suppliers; the inch
        // value is derived through the inverse conversion.
        if let Some(id_mm) = layered(
            raw.spec_value("id").or(raw.spec_value("inner diameter")),
            spec_blob,
            &raw.title,
            &raw.description,
            clean_number,
            |s| sized_token(s, &["id", "mm"]),
        ) {
            specs.insert("inner_diameter_mm".to_string(), num(id_mm));
            specs.insert("inner_diameter_in".to_string(), num(mm_to_in(id_mm)));
        }

        if let Some(material) = layered(
            raw.spec_value("material"),
            spec_blob,
            &raw.title,
            &raw.description,
            |s| parse_material(s),
            |s| parse_material(s),
        ) {
            specs.insert("material".to_string(), text(material));
        }
    }

    fn normalize_end_cap(
        &self,
        raw: &RawProduct,
        spec_blob: &str,
        specs: &mut BTreeMap<String, serde_json::Value>,
    ) {
        if let Some(od_in) = layered(
            raw.spec_value("od").or(raw.spec_value("outer diameter")),
            spec_blob,
            &raw.title,
            &raw.description,
            clean_number,
            |s| sized_token(s, &["od", "outer diameter", "diameter"]),
        ) {
            specs.insert("outer_diameter_in".to_string(), num(od_in));
            specs.insert("outer_diameter_mm".to_string(), num(in_to_mm(od_in)));
        }

        if let Some(material) = layered(
            raw.spec_value("material"),
            spec_blob,
            &raw.title,
            &raw.description,
            |s| parse_material(s),
            |s| parse_material(s),
        ) {
            specs.insert("material".to_string(), text(material));
        }
    }
}

fn bounded_keyword(keyword: &str) -> String {
    let mut pattern = regex::escape(keyword);
    if keyword.chars().next().is_some_and(|c| c.is_alphanumeric()) {
        pattern = format!(r"\b{pattern}");
    }
    if keyword.chars().last().is_some_and(|c| c.is_alphanumeric()) {
        pattern = format!(r"{pattern}\b");
    }
    pattern
}

/// Numeric token adjacent to one of the given context keywords, e.g.
/// `"5.5 tube"`, `"13mm"`, or `"Tube Size: 5.5"`. Keywords are tried in
/// order, so more specific labels belong first. The number-then-keyword
/// pattern skips the leading word boundary: digits and letters share a
/// word class, so `\bmm` would never match `13mm`.
fn sized_token(text: &str, keywords: &[&str]) -> Option<f64> {
    let lowered = text.to_lowercase();
    for keyword in keywords {
        let bounded = bounded_keyword(keyword);
        let after = Regex::new(&format!(r"{bounded}\s*:?\s*#?(\d+(?:\.\d+)?)")).ok()?;
        if let Some(caps) = after.captures(&lowered) {
            return caps[1].parse().ok();
        }
        let escaped = regex::escape(keyword);
        let trailing = if keyword.chars().last().is_some_and(|c| c.is_alphanumeric()) {
            format!(r"{escaped}\b")
        } else {
            escaped
        };
        let before = Regex::new(&format!(r"(\d+(?:\.\d+)?)\s*{trailing}")).ok()?;
        if let Some(caps) = before.captures(&lowered) {
            return caps[1].parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(title: &str) -> RawProduct {
        RawProduct {
            supplier_id: "rainshadow".to_string(),
            external_id: "X-1".to_string(),
            title: title.to_string(),
            ..RawProduct::default()
        }
    }

    #[test]
    fn blank_title_yields_length_power_action() {
        let normalized = Normalizer::new().normalize(&raw("7'6\" MH F"), PartType::Blank);
        assert_eq!(normalized.specs["length_in"], serde_json::json!(90.0));
        assert_eq!(normalized.specs["power"], serde_json::json!("MH"));
        assert_eq!(normalized.specs["action"], serde_json::json!("F"));
    }

    #[test]
    fn structured_spec_value_outranks_title() {
        let mut product = raw("6' blank");
        product
            .spec_pairs
            .push(("Length".to_string(), "90".to_string()));
        let normalized = Normalizer::new().normalize(&product, PartType::Blank);
        assert_eq!(normalized.specs["length_in"], serde_json::json!(90.0));
        assert_eq!(normalized.specs["length_mm"], serde_json::json!(2286.0));
    }

    #[test]
    fn tip_top_sku_first_letter_drives_type() {
        let mut product = raw("Wire top");
        product.sku = Some("H6.5-5.5".to_string());
        let normalized = Normalizer::new().normalize(&product, PartType::TipTop);
        assert_eq!(
            normalized.specs["tip_top_type"],
            serde_json::json!("Heavy Duty")
        );
        assert_eq!(
            normalized.specs["loop_style"],
            serde_json::json!("Heavy Duty Loop")
        );
    }

    #[test]
    fn tip_top_without_hints_defaults_to_standard() {
        let normalized = Normalizer::new().normalize(&raw("Wire top"), PartType::TipTop);
        assert_eq!(
            normalized.specs["tip_top_type"],
            serde_json::json!("Standard")
        );
    }

    #[test]
    fn tip_top_composes_display_title() {
        let mut product = raw("Top");
        product.sku = Some("H7".to_string());
        product
            .spec_pairs
            .push(("Frame".to_string(), "SS".to_string()));
        product
            .spec_pairs
            .push(("Tip Size".to_string(), "7".to_string()));
        product
            .spec_pairs
            .push(("Tube Size".to_string(), "6.5".to_string()));
        let normalized = Normalizer::new().normalize(&product, PartType::TipTop);
        assert_eq!(
            normalized.specs["display_title"],
            serde_json::json!("Stainless Steel Heavy Duty Tip Top – Size 7 Ring, 6.5 Tube")
        );
        assert_eq!(
            normalized.specs["frame_material"],
            serde_json::json!("Stainless Steel")
        );
    }

    #[test]
    fn normalization_is_deterministic() {
        let mut product = raw("7'6\" MH F casting blank");
        product
            .spec_pairs
            .push(("Material".to_string(), "Graphite".to_string()));
        product.images.push("https://x/img.jpg".to_string());

        let n = Normalizer::new();
        let first = n.normalize(&product, PartType::Blank);
        let second = n.normalize(&product, PartType::Blank);
        assert_eq!(first, second);
        assert_eq!(first.content_hash, second.content_hash);
    }

    #[test]
    fn any_tuple_change_changes_the_hash() {
        let n = Normalizer::new();
        let base = raw("7'6\" MH F");
        let baseline = n.normalize(&base, PartType::Blank);

        let mut retitled = base.clone();
        retitled.title = "7'6\" MH XF".to_string();
        assert_ne!(
            baseline.content_hash,
            n.normalize(&retitled, PartType::Blank).content_hash
        );

        let mut imaged = base.clone();
        imaged.images.push("https://x/new.jpg".to_string());
        assert_ne!(
            baseline.content_hash,
            n.normalize(&imaged, PartType::Blank).content_hash
        );
    }

    #[test]
    fn trim_mm_suffix_in_title_is_parsed() {
        let normalized =
            Normalizer::new().normalize(&raw("Carbon winding check 13mm"), PartType::Trim);
        assert_eq!(
            normalized.specs["inner_diameter_mm"],
            serde_json::json!(13.0)
        );
        assert_eq!(normalized.specs["material"], serde_json::json!("Graphite"));
        assert_eq!(normalized.specs["family"], serde_json::json!("Winding Check"));
    }

    #[test]
    fn trim_sizes_round_trip_through_mm() {
        let mut product = raw("Carbon winding check");
        product
            .spec_pairs
            .push(("ID".to_string(), "13.5".to_string()));
        let normalized = Normalizer::new().normalize(&product, PartType::Trim);
        assert_eq!(
            normalized.specs["inner_diameter_mm"],
            serde_json::json!(13.5)
        );
        assert_eq!(
            normalized.specs["inner_diameter_in"],
            serde_json::json!(0.531)
        );
    }
}
