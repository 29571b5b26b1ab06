pub mod broadcast;
pub mod events;
pub mod ids;
pub mod vessel;

pub use broadcast::{UpdateBroadcaster, UpdateSubscription};
pub use events::UpdateEvent;
pub use ids::{ClientId, Imo, SessionId};
pub use vessel::{Vessel, VesselField, VesselPatch};
