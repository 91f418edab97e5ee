//! Persistence for Cadence: in-memory stores (tests, ephemeral jobs) and a
//! SQLite store that serves workflow definitions, execution records and,
//! optionally, the job table.

pub mod memory;
pub mod seed;
pub mod sqlite;

pub use memory::{InMemoryExecutionStore, InMemoryJobStore, InMemoryWorkflowSource};
pub use seed::science_research_graph;
pub use sqlite::SqliteStore;
