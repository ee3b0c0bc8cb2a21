//! Tier processors
//!
//! ```text
//! T0: alert ingestion      raw alerts -> filter verdicts -> datapoints
//! T1: state compilation    datapoints -> content-addressed states + T2 scheduling
//! T2: unit execution       pending docs -> dependency-ordered computation
//! T3: reaction             SnapView aggregates -> reactor units
//! ```
//!
//! Tiers are strictly ordered per object but run as independently
//! schedulable passes; all inter-tier communication goes through the store.
//! Unit-level failures become document codes and journal records; only
//! infrastructure errors and dependency cycles surface as `PipelineError`.

pub mod deps;
pub mod session;
pub mod t0;
pub mod t1;
pub mod t2;
pub mod t3;

pub use deps::{DepNode, DependencyError, execution_order};
pub use session::{RunSession, RunStats, TierSelection};
pub use t0::{AlertProcessor, T0Stats};
pub use t1::{StateCompiler, T1Stats};
pub use t2::{T2Processor, T2Stats};
pub use t3::{ReactorProcessor, T3Stats};

use crate::store::StoreError;
use thiserror::Error;

/// Failures that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Infrastructure: the store is unavailable or corrupted.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A dependency cycle among co-scheduled tied units (configuration
    /// bug, detected before execution).
    #[error(transparent)]
    Dependency(#[from] DependencyError),
}
