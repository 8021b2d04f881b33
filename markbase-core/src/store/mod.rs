pub mod documents;
pub mod ingest_state;

pub use documents::DocumentStore;
pub use ingest_state::IngestStateStore;
