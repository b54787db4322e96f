pub mod batch;
pub mod builder;
pub mod clock;
pub mod competency;
pub mod config;
pub mod db;
pub mod error;
pub mod facts;
pub mod models;
pub mod percentage;
pub mod precourse;
pub mod projection;
pub mod reconcile;
pub mod routes;
pub mod snapshot;
pub mod status;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use reconcile::{CallContext, Engine, Reconciled, Trigger};
pub use store::{MemoryStore, PgStore, ProgressStore};
