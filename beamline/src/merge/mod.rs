//! Statistical merging of per-replica simulation output.
//!
//! Each completed task contributes one replica: the same set of named
//! estimators, each holding numbered pages of equal-length numeric
//! vectors, computed from an independent random sequence. Merging replicas
//! is a running average with equal per-replica weight (each task runs the
//! same number of requested primaries).
//!
//! Replicas from independent runs are not guaranteed to enumerate their
//! estimators or pages in the same order, so matching is positional first
//! with a by-name (and by-page-number) fallback.

mod estimator;
mod merger;

pub use estimator::{Estimator, Page};
pub use merger::MergeAccumulator;
