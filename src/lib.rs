// src/lib.rs
pub mod alignment;
pub mod api;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod markers;
pub mod settings;
pub mod store;
pub mod types;
pub mod views;

pub use coordinator::{CycleOutcome, RefreshCoordinator, SourceReport};
pub use errors::{DashboardError, Result};
pub use store::{RefreshSnapshot, SnapshotStore};
