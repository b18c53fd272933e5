//! Persistent log of terminal training results.
//!
//! Provides the [`ResultSink`] trait. The primary implementation,
//! [`JsonlResultWriter`], appends JSONL records to one file per UTC day.

pub mod writer;

use crate::models::result::TrainingResult;

/// Stores terminal training results.
///
/// Implementations must be [`Send`] and [`Sync`] so a single sink can be
/// shared by every session task via [`std::sync::Arc`].
pub trait ResultSink: Send + Sync {
    /// Record a single result.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn record(&self, result: &TrainingResult) -> crate::Result<()>;
}

pub use writer::JsonlResultWriter;
