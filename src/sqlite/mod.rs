/// SQLite storage for ingested simulator traces
///
/// Finalized entities are appended batch by batch into a small relational
/// schema. Stage columns of the wide cycle tables are discovered at run time.
pub mod schema;
pub mod writer;

pub use schema::{create_schema, SCHEMA_SQL, SCHEMA_VERSION};
pub use writer::{load_run_summary, run_status, CycleLayout, Row, SqliteStore};
