pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod evaluator;
pub mod coordinator;
pub mod snapshot;
pub mod lock;
pub mod journal;
pub mod price;
pub mod notify;
pub mod service;
pub mod console;
pub mod report;

pub use coordinator::TrackingCoordinator;
pub use error::{CommandError, EngineError, SnapshotError};
pub use models::*;
pub use store::UserStore;
