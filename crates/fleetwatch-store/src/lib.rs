pub mod error;
pub mod loader;
pub mod store;

pub use error::StoreError;
pub use loader::load_vessels;
pub use store::VesselStore;
