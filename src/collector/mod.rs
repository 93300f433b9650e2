//! Collectors turn one pull against an external source into a snapshot.
//!
//! Every collector is all-or-nothing: it either returns a complete snapshot
//! or an error, never a partial mapping.

use crate::error::Error;
use crate::graph::GraphRegistry;
use crate::metric::MetricSnapshot;

pub mod cpucredit;
pub mod postgres;

pub use self::cpucredit::CpuCreditCollector;
pub use self::postgres::PostgresCollector;

/// A single-shot source of metric snapshots.
pub trait Collector {
    /// Perform one collection pass.
    fn fetch_metrics(&mut self) -> Result<MetricSnapshot, Error>;
    /// The graph metadata describing every key `fetch_metrics` may return.
    fn graphs(&self) -> GraphRegistry;
}
