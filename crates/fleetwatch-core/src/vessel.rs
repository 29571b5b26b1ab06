use serde::{Deserialize, Serialize};

use crate::ids::Imo;

/// A tracked vessel as stored and as sent to stream subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vessel {
    pub id: u64,
    pub name: String,
    pub imo: Imo,
    pub lat: f64,
    pub lng: f64,
    pub destination: String,
}

/// Partial update keyed by IMO. Absent fields leave the stored value alone.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VesselPatch {
    pub imo: Imo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl VesselPatch {
    pub fn new(imo: impl Into<Imo>) -> Self {
        Self {
            imo: imo.into(),
            ..Default::default()
        }
    }

    pub fn with_position(mut self, lat: f64, lng: f64) -> Self {
        self.lat = Some(lat);
        self.lng = Some(lng);
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// Mergeable vessel attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VesselField {
    Name,
    Lat,
    Lng,
    Destination,
}

impl Vessel {
    /// Merge a patch into this record and report which fields changed value.
    ///
    /// The patch IMO is not checked here; callers look the record up by IMO first.
    pub fn apply(&mut self, patch: &VesselPatch) -> Vec<VesselField> {
        let mut changed = Vec::new();

        if let Some(name) = &patch.name {
            if *name != self.name {
                self.name.clone_from(name);
                changed.push(VesselField::Name);
            }
        }
        if let Some(lat) = patch.lat {
            if lat.to_bits() != self.lat.to_bits() {
                self.lat = lat;
                changed.push(VesselField::Lat);
            }
        }
        if let Some(lng) = patch.lng {
            if lng.to_bits() != self.lng.to_bits() {
                self.lng = lng;
                changed.push(VesselField::Lng);
            }
        }
        if let Some(destination) = &patch.destination {
            if *destination != self.destination {
                self.destination.clone_from(destination);
                changed.push(VesselField::Destination);
            }
        }

        changed
    }
}
