pub mod auth;
pub mod config;
pub mod db;
pub mod editing;
pub mod error;
pub mod ingestion;
pub mod maintenance;
pub mod query;
pub mod store;

pub use auth::{AccessGate, AllowAll, ApiKeyGate, AuthorizationFailure, Capability};
pub use config::SatlogConfig;
pub use editing::RecordEditor;
pub use error::{ConfigError, EditError, IngestError, QueryError, ResetError, StoreError};
pub use ingestion::{BatchReport, ImportOutcome, IngestCoordinator, IngestRequest};
pub use query::{Aggregation, Granularity, ListPage, ListParams, QueryService, StatsParams};
pub use store::{Category, DuplicatePolicy, MemoryStore, PgStore, RecordStore, StoredRecord};
