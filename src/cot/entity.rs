//! Adapters between [`CotEvent`] and the generic renderable map entity the
//! surrounding dashboard works with.
//!
//! The critical rule: an entity that already carries an externally supplied
//! type code (because it arrived in a foreign protocol message) keeps that
//! exact code when converted back to an event. Re-deriving it from the
//! internal taxonomy would make symbols drift as events bounce between
//! cooperating systems.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{
    affiliation_of, build_type, hex_to_argb, internal_type_for, team_for_color, type_code_for,
};
use super::{format_cot_time, CotEvent};

/// A renderable map entity: what the map layer draws and what the user
/// edits. Field names mirror the dashboard's marker records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapEntity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    pub lat: f64,
    #[serde(rename = "lng")]
    pub lon: f64,
    #[serde(default)]
    pub altitude: f64,
    /// Internal symbol name ("marker", "node", "friendly", ...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub symbol_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Marker color as `#rrggbb`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Wire type code carried verbatim when the entity came from a foreign
    /// protocol message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cot_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Affiliation guessed from a free-form status string, mirroring the
/// dashboard's marker vocabulary ("aktiv" comes from its UI).
fn affiliation_from_status(status: &str) -> &'static str {
    let status = status.to_ascii_lowercase();
    if status.contains("friendly") || status.contains("active") || status.contains("aktiv") {
        "friendly"
    } else if status.contains("hostile") || status.contains("kia") {
        "hostile"
    } else if status.contains("neutral") {
        "neutral"
    } else {
        "unknown"
    }
}

/// Build a transmittable event from a map entity. Total: every missing
/// field has a default, an empty id gets a fresh uuid.
pub fn event_from_entity(entity: &MapEntity) -> CotEvent {
    let uid = if entity.id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        entity.id.clone()
    };

    // Preserve a foreign code verbatim; otherwise derive from the internal
    // symbol name, falling back to a status-based affiliation guess.
    let cot_type = match (&entity.cot_type, &entity.symbol_type) {
        (Some(code), _) if !code.is_empty() => code.clone(),
        (_, Some(symbol)) if !symbol.is_empty() => type_code_for(symbol).to_string(),
        _ => {
            let affiliation =
                affiliation_from_status(entity.status.as_deref().unwrap_or("unknown"));
            build_type(affiliation, "ground_unit", "U", "C")
        }
    };

    let mut event = CotEvent::new(uid, cot_type, entity.lat, entity.lon);
    event.hae = entity.altitude;
    if let Some(callsign) = entity.name.as_ref().or(entity.callsign.as_ref()) {
        if !callsign.is_empty() {
            event.callsign = callsign.clone();
        }
    }
    event.remarks = entity.description.clone();
    // Explicit team assignment wins over the color-derived one.
    event.team_name = entity
        .team
        .clone()
        .or_else(|| {
            entity
                .color
                .as_deref()
                .and_then(team_for_color)
                .map(str::to_string)
        });
    event.team_role = entity.role.clone();
    event.color = entity.color.as_deref().and_then(hex_to_argb);
    event
}

/// Project an event onto a map entity for rendering. The wire type code is
/// kept verbatim in `cot_type`; `symbol_type` is the internal shape the map
/// layer draws.
pub fn entity_from_event(event: &CotEvent) -> MapEntity {
    let affiliation = affiliation_of(&event.cot_type);

    // Relayed mesh nodes and human/GPS-entered friendly units get their own
    // symbols; everything else goes through the ordered prefix table.
    let symbol_type = if event.has_meshtastic_detail {
        "meshtastic_node"
    } else if affiliation == "friendly" && event.how.starts_with("h-") {
        "tak_unit"
    } else {
        internal_type_for(&event.cot_type)
    };

    MapEntity {
        id: event.uid.clone(),
        name: Some(event.callsign.clone()),
        callsign: Some(event.callsign.clone()),
        lat: event.lat,
        lon: event.lon,
        altitude: event.hae,
        symbol_type: Some(symbol_type.to_string()),
        status: Some(affiliation.to_string()),
        color: None,
        description: event.remarks.clone(),
        team: event.team_name.clone(),
        role: event.team_role.clone(),
        cot_type: Some(event.cot_type.clone()),
        timestamp: Some(format_cot_time(&event.time)),
        source: Some("cot".to_string()),
    }
}
