//! Graph expansion
//!
//! Turns catalog results into the records to store and the follow-up tasks
//! to enqueue. Nothing here touches the store or the network; drafts are
//! returned as-is and deduplicated by the store's uniqueness constraints.

mod expansion;

pub use expansion::{expand_details, expand_listing, seed_tasks, Expansion};
