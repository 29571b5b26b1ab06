//! HTTP and WebSocket surface: vessel queries and updates, tracking
//! requests, and the live update stream.

pub mod client;
pub mod error;
pub mod event_bridge;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
