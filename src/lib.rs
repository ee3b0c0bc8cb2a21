//! Borealis: Tiered Alert Processing Framework
//!
//! A pipeline for astronomical alert streams built around four tiers:
//!
//! - **T0**: alert ingestion and channel filtering
//! - **T1**: content-addressed state compilation
//! - **T2**: pluggable computation units with tied-dependency resolution
//! - **T3**: reactor units over per-object aggregate views
//!
//! Every tier writes journal and log documents, so each object's outcome is
//! reconstructable from the store after a run. Processing units are loaded
//! by name through a registry, configured via a layered resolver with
//! late-bound secrets, and sequenced by a topological dependency resolver
//! when they declare ties to other units' results.

pub mod config;
pub mod context;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod secret;
pub mod store;
pub mod types;
pub mod units;
pub mod view;

// Re-export the working set most callers need
pub use config::{GlobalConfig, UnitModel};
pub use context::Context;
pub use logging::RunLogger;
pub use pipeline::{PipelineError, RunSession, RunStats, TierSelection};
pub use store::{DocStore, MemStore, SledStore, StoreError};
pub use types::{
    AlertPacket, DataPoint, DocumentCode, JournalRecord, LogDocument, StateDocument, StateLink,
    StockDocument, T2Document, T2Key, T2Link,
};
pub use units::UnitLoader;
pub use view::SnapView;
