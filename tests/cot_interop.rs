//! CoT interop properties: round trips, boundary validation and symbol
//! preservation across cooperating systems.

use meshtac::cot::{
    entity_from_event, event_from_entity, internal_type_for, looks_like_tactical_message,
    type_code_for, validate_cot_xml, CotEvent, MapEntity,
};

#[test]
fn round_trip_preserves_identity_across_the_wire() {
    let cases = [
        ("T-001", "a-f-G-U-C", 47.1234, 8.5678, "Alpha-1"),
        ("T-002", "a-h-G-U-C", -33.8688, 151.2093, "Bandit"),
        ("m-77", "b-m-p-s-m", 90.0, 180.0, "North Cap"),
        ("edge", "a-n-G", -90.0, -180.0, "South Cap"),
    ];
    for (uid, cot_type, lat, lon, callsign) in cases {
        let mut event = CotEvent::new(uid, cot_type, lat, lon);
        event.callsign = callsign.to_string();
        let back = CotEvent::from_xml(&event.to_xml())
            .unwrap_or_else(|| panic!("round trip failed for {uid}"));
        assert_eq!(back.uid, uid);
        assert_eq!(back.cot_type, cot_type);
        assert!((back.lat - lat).abs() < 1e-6);
        assert!((back.lon - lon).abs() < 1e-6);
        assert_eq!(back.callsign, callsign);
    }
}

#[test]
fn minimal_foreign_event_gets_defaults() {
    // No detail block at all: callsign falls back to the uid, remarks stay
    // empty.
    let xml = r#"<event uid="T1" type="a-f-G-U-C"><point lat="47.1" lon="8.5"/></event>"#;
    let event = CotEvent::from_xml(xml).expect("decode");
    assert_eq!(event.callsign, "T1");
    assert_eq!(event.remarks.unwrap_or_default(), "");
}

#[test]
fn encoded_event_carries_expected_attributes() {
    let mut event = CotEvent::new("T1", "a-f-G-U-C", 47.1234, 8.5678);
    event.callsign = "Alpha-1".to_string();
    let xml = event.to_xml();
    assert!(xml.contains("uid=\"T1\""));
    assert!(xml.contains("lat=\"47.1234\""));
    assert!(xml.contains("lon=\"8.5678\""));
    assert!(xml.contains("callsign=\"Alpha-1\""));
    assert!(validate_cot_xml(&xml));
    assert!(looks_like_tactical_message(&xml));
}

#[test]
fn validation_accepts_poles_and_date_line_but_not_beyond() {
    let xml = |lat: f64, lon: f64| {
        format!(
            r#"<event version="2.0" uid="b" type="a-u-G"><point lat="{lat}" lon="{lon}"/></event>"#
        )
    };
    assert!(validate_cot_xml(&xml(90.0, 180.0)));
    assert!(!validate_cot_xml(&xml(91.0, 180.0)));
    assert!(!validate_cot_xml(&xml(90.0, 181.0)));
}

#[test]
fn type_table_round_trip_stays_in_class() {
    for code in ["a-f-G-U-C", "a-h-G-U-C", "a-n-G-U-C", "a-u-G-U-C", "b-m-p-s-m"] {
        let internal = internal_type_for(code);
        let round = type_code_for(internal);
        // Same affiliation/shape class: identical two-segment prefix.
        let class = |c: &str| c.splitn(3, '-').take(2).collect::<Vec<_>>().join("-");
        assert_eq!(class(round), class(code), "class drift for {code}");
    }
}

#[test]
fn foreign_symbol_codes_survive_a_map_bounce() {
    // An event arrives with a sub-typed friendly code, is rendered, edited
    // and re-sent: the exact code must come back out.
    let xml = r#"<event uid="F-1" type="a-f-G-I-U-T-H" how="m-g"
        time="2024-01-01T00:00:00Z" start="2024-01-01T00:00:00Z" stale="2024-01-01T00:10:00Z">
        <point lat="48.0" lon="11.0" hae="250" ce="10" le="10"/>
        <detail><contact callsign="Depot"/></detail></event>"#;
    let event = CotEvent::from_xml(xml).expect("decode");
    let entity = entity_from_event(&event);
    assert_eq!(entity.cot_type.as_deref(), Some("a-f-G-I-U-T-H"));

    let resent = event_from_entity(&entity);
    assert_eq!(resent.cot_type, "a-f-G-I-U-T-H");
}

#[test]
fn locally_created_markers_derive_their_code() {
    let entity = MapEntity {
        id: "m1".to_string(),
        name: Some("OP North".to_string()),
        lat: 47.0,
        lon: 8.0,
        symbol_type: Some("marker".to_string()),
        ..Default::default()
    };
    let event = event_from_entity(&entity);
    assert_eq!(event.cot_type, "b-m-p-s-m");
    assert_eq!(event.callsign, "OP North");

    let back = entity_from_event(&event);
    assert_eq!(back.symbol_type.as_deref(), Some("marker"));
}

#[test]
fn stale_always_follows_start() {
    let event = CotEvent::new("s1", "a-f-G-U-C", 1.0, 2.0).with_stale_minutes(10);
    assert!(event.stale >= event.start);
    let back = CotEvent::from_xml(&event.to_xml()).unwrap();
    assert!(back.stale >= back.start);
}
