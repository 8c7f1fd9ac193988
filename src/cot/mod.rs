//! # Cursor-on-Target Event Codec
//!
//! Stateless translation between CoT XML documents and in-memory
//! [`CotEvent`]s, for interoperability with ATAK/WinTAK-class
//! situational-awareness tools.
//!
//! ## Features
//!
//! - **Encoding**: [`CotEvent::to_xml`] emits a version 2.0 event with
//!   point, contact, group, remarks and motion placeholder details
//! - **Decoding**: [`CotEvent::from_xml`] parses foreign events with
//!   defensive defaults for every optional field
//! - **Type codes**: forward and ordered-prefix reverse translation
//!   between internal symbol names and the CoT type grammar ([`types`])
//! - **Map adapters**: conversion to and from generic map entities
//!   ([`entity`])
//!
//! ## Error Handling
//!
//! Every operation is total. Malformed XML, missing required attributes,
//! or non-numeric coordinates yield `None`/`false` plus a `log::warn!`
//! diagnostic; no error ever propagates out of this module and no input
//! can panic the caller.

use chrono::{DateTime, Duration, Utc};
use log::warn;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

pub mod entity;
pub mod types;

pub use entity::{entity_from_event, event_from_entity, MapEntity};
pub use types::{affiliation_of, build_type, internal_type_for, type_code_for};

/// Sentinel for an unknown circular/linear error bound, in meters.
pub const UNKNOWN_PRECISION: f64 = 9_999_999.0;

/// Minutes until an event goes stale when the sender does not say.
pub const DEFAULT_STALE_MINUTES: i64 = 5;

/// How-code for machine-generated events.
pub const HOW_MACHINE: &str = "m-g";

/// A Cursor-on-Target event: a positioned, timestamped unit of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CotEvent {
    pub uid: String,
    #[serde(rename = "type")]
    pub cot_type: String,
    pub lat: f64,
    pub lon: f64,
    /// Height above ellipsoid, meters.
    pub hae: f64,
    /// Circular error, meters.
    pub ce: f64,
    /// Linear error, meters.
    pub le: f64,
    pub callsign: String,
    pub remarks: Option<String>,
    pub team_name: Option<String>,
    pub team_role: Option<String>,
    /// Signed 32-bit ARGB marker color, emitted only for civilian
    /// map-point types — military affiliations carry their color in the
    /// symbol itself.
    pub color: Option<i32>,
    /// True when the sender's detail block carried a `<meshtastic>`
    /// element, marking the event as a relayed mesh node.
    pub has_meshtastic_detail: bool,
    pub time: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub stale: DateTime<Utc>,
    pub how: String,
}

impl CotEvent {
    /// New event at a position, staled [`DEFAULT_STALE_MINUTES`] from now.
    /// Callsign defaults to the uid; error bounds to unknown precision.
    pub fn new(
        uid: impl Into<String>,
        cot_type: impl Into<String>,
        lat: f64,
        lon: f64,
    ) -> Self {
        let uid = uid.into();
        let now = Utc::now();
        Self {
            callsign: uid.clone(),
            uid,
            cot_type: cot_type.into(),
            lat,
            lon,
            hae: 0.0,
            ce: UNKNOWN_PRECISION,
            le: UNKNOWN_PRECISION,
            remarks: None,
            team_name: None,
            team_role: None,
            color: None,
            has_meshtastic_detail: false,
            time: now,
            start: now,
            stale: now + Duration::minutes(DEFAULT_STALE_MINUTES),
            how: HOW_MACHINE.to_string(),
        }
    }

    pub fn with_stale_minutes(mut self, minutes: i64) -> Self {
        self.stale = self.start + Duration::minutes(minutes);
        self
    }

    fn is_military(&self) -> bool {
        self.cot_type.starts_with("a-")
    }

    /// Serialize to CoT XML. All attribute and text values are escaped for
    /// the five reserved characters; absent optional fields are omitted
    /// rather than emitted empty.
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(512);
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>");
        xml.push_str(&format!(
            "<event version=\"2.0\" uid=\"{}\" type=\"{}\" how=\"{}\" \
             time=\"{}\" start=\"{}\" stale=\"{}\">",
            escape(&self.uid),
            escape(&self.cot_type),
            escape(&self.how),
            format_cot_time(&self.time),
            format_cot_time(&self.start),
            format_cot_time(&self.stale),
        ));
        xml.push_str(&format!(
            "<point lat=\"{}\" lon=\"{}\" hae=\"{}\" ce=\"{}\" le=\"{}\"/>",
            self.lat, self.lon, self.hae, self.ce, self.le
        ));
        xml.push_str("<detail>");
        xml.push_str(&format!(
            "<contact callsign=\"{}\"/>",
            escape(&self.callsign)
        ));
        if self.team_name.is_some() || self.team_role.is_some() {
            xml.push_str("<__group");
            if let Some(name) = &self.team_name {
                xml.push_str(&format!(" name=\"{}\"", escape(name)));
            }
            if let Some(role) = &self.team_role {
                xml.push_str(&format!(" role=\"{}\"", escape(role)));
            }
            xml.push_str("/>");
        }
        if let Some(remarks) = self.remarks.as_deref().filter(|r| !r.is_empty()) {
            xml.push_str(&format!("<remarks>{}</remarks>", escape(remarks)));
        }
        if let Some(argb) = self.color.filter(|_| !self.is_military()) {
            xml.push_str(&format!("<color argb=\"{argb}\"/>"));
        }
        // Motion placeholder; live track data is out of scope.
        xml.push_str("<track speed=\"0.0\" course=\"0.0\"/>");
        if self.is_military() {
            xml.push_str("<archive/>");
        }
        xml.push_str("</detail></event>");
        xml
    }

    /// Parse a CoT XML document. Requires an `event` root with `uid` and
    /// `type` attributes and a `point` child with numeric lat/lon;
    /// everything else defaults. Malformed input yields `None` plus a
    /// diagnostic — never an error or panic.
    pub fn from_xml(xml: &str) -> Option<Self> {
        let scan = match scan_event(xml) {
            Ok(scan) => scan,
            Err(e) => {
                warn!("failed to parse CoT XML: {e}");
                return None;
            }
        };
        let Some(uid) = scan.uid else {
            warn!("CoT event missing uid attribute");
            return None;
        };
        let Some(cot_type) = scan.cot_type else {
            warn!("CoT event missing type attribute");
            return None;
        };
        if !scan.saw_point {
            warn!("CoT event missing point element");
            return None;
        }
        let (Some(lat), Some(lon)) = (scan.lat, scan.lon) else {
            warn!("CoT point missing numeric lat/lon");
            return None;
        };

        let time = scan.time.unwrap_or_else(Utc::now);
        let start = scan.start.unwrap_or(time);
        let stale = scan
            .stale
            .unwrap_or(start + Duration::minutes(DEFAULT_STALE_MINUTES));

        Some(Self {
            callsign: scan.callsign.unwrap_or_else(|| uid.clone()),
            uid,
            cot_type,
            lat,
            lon,
            hae: scan.hae.unwrap_or(0.0),
            ce: scan.ce.unwrap_or(UNKNOWN_PRECISION),
            le: scan.le.unwrap_or(UNKNOWN_PRECISION),
            remarks: scan.remarks,
            team_name: scan.team_name,
            team_role: scan.team_role,
            color: scan.color,
            has_meshtastic_detail: scan.has_meshtastic_detail,
            time,
            start,
            stale,
            how: scan.how.unwrap_or_else(|| HOW_MACHINE.to_string()),
        })
    }
}

/// Structural check without materializing an event: event root with
/// version/uid/type attributes and a point whose lat/lon are numeric and
/// within range.
pub fn validate_cot_xml(xml: &str) -> bool {
    let Ok(scan) = scan_event(xml) else {
        return false;
    };
    if !scan.root_is_event
        || scan.version.as_deref().unwrap_or("").is_empty()
        || scan.uid.as_deref().unwrap_or("").is_empty()
        || scan.cot_type.as_deref().unwrap_or("").is_empty()
        || !scan.saw_point
    {
        return false;
    }
    match (scan.lat, scan.lon) {
        (Some(lat), Some(lon)) => (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon),
        _ => false,
    }
}

/// Fast sniff used to route inbound payloads before attempting a full
/// decode: an XML declaration or an event tag at the front.
pub fn looks_like_tactical_message(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with("<?xml") || trimmed.starts_with("<event")
}

/// CoT timestamp: ISO-8601 UTC with sub-second precision stripped.
pub fn format_cot_time(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Accept RFC 3339 with or without fractional seconds.
fn parse_cot_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Flat single-pass scan of a CoT document. CoT element names are unique
/// within an event, so no nesting bookkeeping is needed beyond remarks
/// text.
#[derive(Default)]
struct EventScan {
    root_is_event: bool,
    version: Option<String>,
    uid: Option<String>,
    cot_type: Option<String>,
    how: Option<String>,
    time: Option<DateTime<Utc>>,
    start: Option<DateTime<Utc>>,
    stale: Option<DateTime<Utc>>,
    saw_point: bool,
    lat: Option<f64>,
    lon: Option<f64>,
    hae: Option<f64>,
    ce: Option<f64>,
    le: Option<f64>,
    callsign: Option<String>,
    team_name: Option<String>,
    team_role: Option<String>,
    remarks: Option<String>,
    color: Option<i32>,
    has_meshtastic_detail: bool,
}

fn scan_event(xml: &str) -> Result<EventScan, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut scan = EventScan::default();
    let mut saw_root = false;
    let mut in_remarks = false;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let name = e.name();
                let tag = name.as_ref();
                if !saw_root {
                    saw_root = true;
                    scan.root_is_event = tag == b"event";
                }
                match tag {
                    b"event" => {
                        for attr in e.attributes().flatten() {
                            let value = attr.unescape_value()?.into_owned();
                            match attr.key.as_ref() {
                                b"version" => scan.version = Some(value),
                                b"uid" => scan.uid = Some(value),
                                b"type" => scan.cot_type = Some(value),
                                b"how" => scan.how = Some(value),
                                b"time" => scan.time = parse_cot_time(&value),
                                b"start" => scan.start = parse_cot_time(&value),
                                b"stale" => scan.stale = parse_cot_time(&value),
                                _ => {}
                            }
                        }
                    }
                    b"point" => {
                        scan.saw_point = true;
                        for attr in e.attributes().flatten() {
                            let value = attr.unescape_value()?;
                            let parsed = value.parse::<f64>().ok();
                            match attr.key.as_ref() {
                                b"lat" => scan.lat = parsed,
                                b"lon" => scan.lon = parsed,
                                b"hae" => scan.hae = parsed,
                                b"ce" => scan.ce = parsed,
                                b"le" => scan.le = parsed,
                                _ => {}
                            }
                        }
                    }
                    b"contact" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"callsign" {
                                scan.callsign = Some(attr.unescape_value()?.into_owned());
                            }
                        }
                    }
                    b"__group" => {
                        for attr in e.attributes().flatten() {
                            let value = attr.unescape_value()?.into_owned();
                            match attr.key.as_ref() {
                                b"name" => scan.team_name = Some(value),
                                b"role" => scan.team_role = Some(value),
                                _ => {}
                            }
                        }
                    }
                    b"remarks" => in_remarks = true,
                    b"color" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"argb" {
                                scan.color = attr.unescape_value()?.parse::<i32>().ok();
                            }
                        }
                    }
                    b"meshtastic" => scan.has_meshtastic_detail = true,
                    _ => {}
                }
            }
            Event::Text(ref t) if in_remarks => {
                scan.remarks = Some(t.unescape()?.into_owned());
            }
            Event::End(ref e) if e.name().as_ref() == b"remarks" => in_remarks = false,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(scan)
}
