//! Tracking session controller.
//!
//! A session collects which vessels report updates during a primary window,
//! falls back to a grace window when nothing arrived, and finally tells an
//! upstream tracker which vessels to keep following.

pub mod backoff;
pub mod config;
pub mod continuation;
pub mod controller;
pub mod error;
pub mod session;
pub mod source;

pub use config::TrackerConfig;
pub use continuation::{ContinuationSink, HttpContinuation, LogContinuation};
pub use controller::{SessionController, TrackerHandle};
pub use error::TrackerError;
pub use session::{Phase, SessionOutcome, SessionSnapshot, TerminationReason};
pub use source::{BroadcastSource, Subscription, UpdateSource, WsUpdateSource};
