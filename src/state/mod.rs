//! State module for crawl tasks and download leases
//!
//! # Components
//!
//! - `TaskKind`: The closed set of discovery edges a crawl task can follow
//! - `LeaseState`: Pending / leased / done, derived from lease timestamps

mod lease;
mod task_kind;

// Re-export main types
pub use lease::LeaseState;
pub use task_kind::TaskKind;
