use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::Imo;
use crate::vessel::{Vessel, VesselField};

/// A vessel record after a merge, as handed to the broadcaster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Full merged record.
    pub vessel: Vessel,
    /// Fields whose value changed in this merge.
    pub changed: Vec<VesselField>,
    pub applied_at: DateTime<Utc>,
}

impl UpdateEvent {
    pub fn new(vessel: Vessel, changed: Vec<VesselField>) -> Self {
        Self {
            vessel,
            changed,
            applied_at: Utc::now(),
        }
    }

    pub fn imo(&self) -> Imo {
        self.vessel.imo
    }

    /// JSON sent to stream subscribers: the merged record only.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.vessel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_is_the_merged_record() {
        let vessel = Vessel {
            id: 7,
            name: "Maersk Alabama".into(),
            imo: Imo(9164263),
            lat: 1.0,
            lng: 2.0,
            destination: "Mombasa".into(),
        };
        let event = UpdateEvent::new(vessel.clone(), vec![VesselField::Lat]);

        let wire: Vessel = serde_json::from_str(&event.to_wire().unwrap()).unwrap();
        assert_eq!(wire, vessel);
        assert_eq!(event.imo(), Imo(9164263));
    }
}
