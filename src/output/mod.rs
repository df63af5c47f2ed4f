//! Output module for crawl progress reports
//!
//! This module reads queue and record counts back out of the store and
//! prints them for the `stats` command.

pub mod stats;

pub use stats::{load_statistics, print_statistics, CrawlStatistics};
