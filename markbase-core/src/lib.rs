//! Core library for Markbase: folder ingestion, markdown conversion, and
//! document storage.
//!
//! The entry point is [`Ingestor`], which wires the filesystem scanner and
//! probe, the converter registry, the Postgres-backed stores, and the
//! session registry into cancellable, resumable ingestion runs that stream
//! progress events to subscribers.

pub mod config;
pub mod convert;
pub mod error;
pub mod fs;
pub mod ingest;
pub mod session;
pub mod store;

pub use config::{IngestConfig, IngestConfigSource};
pub use convert::{ConversionResult, Converter, ConverterRegistry};
pub use error::{IndexError, Result};
pub use ingest::Ingestor;
pub use session::{IngestSession, SessionRegistry, SessionSnapshot};
pub use store::{DocumentStore, IngestStateStore};
