//! Graph objects emitted by the transform stage

use crate::resolver::ResolvedAddress;
use crate::types::{BoundingBox, Location};
use serde::{Deserialize, Serialize};

/// Node type of directory persons
pub const PERSON_TYPE: &str = "st:Person";

/// Relation type linking a person to a geocoded address
pub const IN_RELATION: &str = "st:in";

/// One line of graph output: `{"type": "object" | "relation" | "log", "obj": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "obj", rename_all = "lowercase")]
pub enum GraphObject {
    Object(PersonObject),
    Relation(Relation),
    Log(LogEntry),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonObject {
    /// Line record id
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub valid_since: i32,
    pub valid_until: i32,
    pub data: PersonData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
}

/// Provenance and address data carried on a person
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonData {
    pub volume_uuid: String,
    pub page_uuid: String,
    pub page_num: u32,
    pub bbox: BoundingBox,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupation: Option<String>,
    /// Address fragments as the parser reported them
    pub locations: Vec<Location>,
    /// Fragments that resolved to a known street
    pub addresses: Vec<ResolvedAddress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub geocoded: Vec<GeocodedAddress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A skipped record or soft failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub error: String,
    /// Offending input, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// 1-based input line for records that could not be read at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
}

impl LogEntry {
    pub fn new(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            error: error.into(),
            value: None,
            line: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// GeoJSON geometry, `[lon, lat]` coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point([f64; 2]),
    MultiPoint(Vec<[f64; 2]>),
}

impl Geometry {
    /// Point for one coordinate, MultiPoint for several, nothing for none
    pub fn from_points(points: &[[f64; 2]]) -> Option<Self> {
        match points {
            [] => None,
            [point] => Some(Geometry::Point(*point)),
            many => Some(Geometry::MultiPoint(many.to_vec())),
        }
    }
}

/// A resolved address placed on the map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodedAddress {
    /// Graph id of the address node a person is linked to
    pub id: String,
    pub address: String,
    pub coordinates: [f64; 2],
}

/// Optional address geocoder consulted during transform.
///
/// Errors are reported as messages and end up as log objects.
pub trait Geocoder: Send + Sync {
    fn geocode(&self, address: &ResolvedAddress) -> Result<GeocodedAddress, String>;
}
