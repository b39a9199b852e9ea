//! Log resource kinds
//!
//! Log groups (retention and tags) and log analytics reports (asynchronous
//! query jobs with summary statistics), each an instantiation of the
//! stateline-core reconciliation protocol.

pub mod group;
pub mod report;
pub mod stats;

// Re-exports
pub use group::{LOG_GROUP, LogGroup, LogGroupApi, LogGroupIdentity, LogGroupRef, LogGroups};
pub use report::{
    QUERY_REPORT, QueryReport, ReportApi, ReportIdentity, ReportRef, ReportRow, ReportStats,
    ReportStatus, Reports,
};
pub use stats::{RowShare, percent_of_total, shares};
