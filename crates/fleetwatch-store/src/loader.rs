use std::path::Path;

use fleetwatch_core::Vessel;
use tracing::info;

use crate::error::StoreError;

/// Read the seed vessel list: a JSON array of vessel records.
pub fn load_vessels(path: &Path) -> Result<Vec<Vessel>, StoreError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| StoreError::Io(format!("read {}: {e}", path.display())))?;
    let vessels: Vec<Vessel> = serde_json::from_str(&raw)
        .map_err(|e| StoreError::Parse(format!("{}: {e}", path.display())))?;
    info!(path = %path.display(), count = vessels.len(), "vessel data loaded");
    Ok(vessels)
}
