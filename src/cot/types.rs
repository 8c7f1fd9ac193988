//! Type-code translation between internal map symbol names and the CoT
//! type grammar (`<atom>-<affiliation>-<entity>-<function>-<detail>`).
//!
//! The forward direction is a fixed table. The reverse direction is NOT a
//! dictionary lookup: CoT codes are hierarchical prefixes, several distinct
//! codes fold onto one internal shape, and military affiliations match on
//! their two-segment prefix alone. Decoding walks an ordered list from most
//! specific to least specific prefix and takes the first match.

/// Internal symbol name for anything we cannot classify.
pub const SYMBOL_UNKNOWN: &str = "unknown";

/// Generic unknown-affiliation ground code, used when the forward table has
/// no entry for an internal name.
pub const COT_TYPE_UNKNOWN: &str = "a-u-G";

/// Forward table: lowercase internal shape/affiliation names → CoT type
/// codes. Mesh nodes and GPS-derived positions all export as friendly
/// ground units so cooperating tools render them with the friendly symbol
/// rather than the unknown one.
const SYMBOL_TO_COT: &[(&str, &str)] = &[
    ("friendly", "a-f-G-U-C"),
    ("hostile", "a-h-G-U-C"),
    ("neutral", "a-n-G-U-C"),
    ("unknown", "a-u-G-U-C"),
    ("pending", "a-p-G"),
    ("node", "a-f-G-U-C"),
    ("meshtastic_node", "a-f-G-U-C"),
    ("gps_position", "a-f-G-U-C"),
    ("tak_unit", "a-f-G-U-C"),
    ("marker", "b-m-p-s-m"),
    ("waypoint", "b-m-p-w"),
];

/// Reverse table, walked in order: first matching prefix wins. Ordering is
/// part of the contract — the generic `b-m-p` family must not shadow the
/// spot-marker and waypoint codes above it, and affiliation prefixes match
/// any sub-type below them (`a-f-G-I-U-T-H` is still friendly). Both the
/// drawn-circle code and the spot-marker code fold to the plain marker
/// shape; the map layer has no circle primitive.
const COT_PREFIX_TO_SYMBOL: &[(&str, &str)] = &[
    ("u-d-c-c", "marker"), // drawn circle
    ("b-m-p-s-m", "marker"),
    ("b-m-p-w", "waypoint"),
    ("b-m-p", "marker"), // any other map point
    ("a-f", "friendly"),
    ("a-h", "hostile"),
    ("a-n", "neutral"),
    ("a-p", "pending"),
    ("a-u", "unknown"),
];

/// Map an internal symbol name to its wire type code. Total: unrecognized
/// names fall back to [`COT_TYPE_UNKNOWN`].
pub fn type_code_for(internal: &str) -> &'static str {
    let normalized = internal.trim().to_ascii_lowercase();
    SYMBOL_TO_COT
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, code)| *code)
        .unwrap_or(COT_TYPE_UNKNOWN)
}

/// Map a wire type code back to an internal symbol name via the ordered
/// prefix walk. Total: no match yields [`SYMBOL_UNKNOWN`].
pub fn internal_type_for(code: &str) -> &'static str {
    let code = code.trim();
    COT_PREFIX_TO_SYMBOL
        .iter()
        .find(|(prefix, _)| code == *prefix || code.starts_with(&format!("{prefix}-")))
        .map(|(_, name)| *name)
        .unwrap_or(SYMBOL_UNKNOWN)
}

/// Affiliation encoded in a type code's second segment, or "unknown".
pub fn affiliation_of(code: &str) -> &'static str {
    let mut parts = code.split('-');
    match (parts.next(), parts.next()) {
        (Some("a"), Some("f")) => "friendly",
        (Some("a"), Some("h")) => "hostile",
        (Some("a"), Some("n")) => "neutral",
        (Some("a"), Some("p")) => "pending",
        _ => "unknown",
    }
}

/// Compose a type code from named components with safe fallbacks.
pub fn build_type(atom: &str, entity: &str, function: &str, detail: &str) -> String {
    let atom_code = match atom {
        "friendly" => "a-f",
        "hostile" => "a-h",
        "neutral" => "a-n",
        "pending" => "a-p",
        _ => "a-u",
    };
    let entity_code = match entity {
        "ground_unit" => "G",
        "aircraft" => "A",
        "space" => "P",
        "surface" => "S",
        "subsurface" => "U",
        _ => "G",
    };
    format!("{atom_code}-{entity_code}-{function}-{detail}")
}

/// Parse `#rrggbb` / `#aarrggbb` (hash optional) into the signed 32-bit
/// ARGB integer cooperating tools expect. Invalid input yields `None`.
pub fn hex_to_argb(color: &str) -> Option<i32> {
    let hex = color.trim().trim_start_matches('#');
    let argb: u32 = match hex.len() {
        6 => 0xFF00_0000 | u32::from_str_radix(hex, 16).ok()?,
        8 => u32::from_str_radix(hex, 16).ok()?,
        _ => return None,
    };
    Some(argb as i32)
}

/// Derive a team color name from the four canonical marker colors. Any
/// other color has no team equivalent.
pub fn team_for_color(color: &str) -> Option<&'static str> {
    match color.trim().to_ascii_lowercase().as_str() {
        "#ffff00" => Some("Yellow"),
        "#0000ff" => Some("Blue"),
        "#00ff00" => Some("Green"),
        "#ff0000" => Some("Red"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_table_affiliations() {
        assert_eq!(type_code_for("friendly"), "a-f-G-U-C");
        assert_eq!(type_code_for("hostile"), "a-h-G-U-C");
        assert_eq!(type_code_for("neutral"), "a-n-G-U-C");
        assert_eq!(type_code_for("unknown"), "a-u-G-U-C");
    }

    #[test]
    fn forward_table_is_case_insensitive() {
        assert_eq!(type_code_for("FRIENDLY"), "a-f-G-U-C");
        assert_eq!(type_code_for("Node"), "a-f-G-U-C");
    }

    #[test]
    fn node_exports_as_friendly_not_unknown() {
        // Mesh nodes must not surface as unknown units in cooperating tools.
        assert_eq!(type_code_for("node"), "a-f-G-U-C");
        assert_eq!(type_code_for("meshtastic_node"), "a-f-G-U-C");
        assert_eq!(type_code_for("gps_position"), "a-f-G-U-C");
    }

    #[test]
    fn unrecognized_internal_name_falls_back() {
        assert_eq!(type_code_for("dragon"), COT_TYPE_UNKNOWN);
        assert_eq!(type_code_for(""), COT_TYPE_UNKNOWN);
    }

    #[test]
    fn affiliation_prefixes_match_any_subtype() {
        assert_eq!(internal_type_for("a-f-G-U-C"), "friendly");
        assert_eq!(internal_type_for("a-f-G-I-U-T-H"), "friendly");
        assert_eq!(internal_type_for("a-h-G-U-C-I"), "hostile");
        assert_eq!(internal_type_for("a-n-G-U-C"), "neutral");
    }

    #[test]
    fn circle_and_spot_marker_fold_to_marker() {
        assert_eq!(internal_type_for("u-d-c-c"), "marker");
        assert_eq!(internal_type_for("b-m-p-s-m"), "marker");
        assert_eq!(internal_type_for("b-m-p-s-p-i"), "marker");
    }

    #[test]
    fn specific_prefixes_are_not_shadowed_by_generic_ones() {
        // b-m-p-w must resolve before the generic b-m-p family.
        assert_eq!(internal_type_for("b-m-p-w"), "waypoint");
        assert_eq!(internal_type_for("b-m-p-w-GOTO"), "waypoint");
    }

    #[test]
    fn no_match_is_unknown() {
        assert_eq!(internal_type_for("t-x-c"), SYMBOL_UNKNOWN);
        assert_eq!(internal_type_for(""), SYMBOL_UNKNOWN);
    }

    #[test]
    fn forward_of_reverse_stays_in_class() {
        for (_, code) in super::SYMBOL_TO_COT {
            let round = type_code_for(internal_type_for(code));
            assert_eq!(
                affiliation_of(round),
                affiliation_of(code),
                "class drift for {code}"
            );
        }
    }

    #[test]
    fn build_type_composes_with_fallbacks() {
        assert_eq!(build_type("friendly", "ground_unit", "U", "C"), "a-f-G-U-C");
        assert_eq!(build_type("martian", "blimp", "U", "C"), "a-u-G-U-C");
    }

    #[test]
    fn argb_conversion_matches_signed_32_bit() {
        assert_eq!(hex_to_argb("#ff0000"), Some(-65536));
        assert_eq!(hex_to_argb("#00ff00"), Some(-16711936));
        assert_eq!(hex_to_argb("#0000ff"), Some(-16776961));
        assert_eq!(hex_to_argb("ffff00"), Some(-256));
        assert_eq!(hex_to_argb("#ffff0000"), Some(-65536));
        assert_eq!(hex_to_argb("#123"), None);
        assert_eq!(hex_to_argb("#zzzzzz"), None);
    }

    #[test]
    fn team_colors() {
        assert_eq!(team_for_color("#FFFF00"), Some("Yellow"));
        assert_eq!(team_for_color("#aabbcc"), None);
    }
}
