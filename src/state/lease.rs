/// Lease lifecycle shared by crawl tasks and record downloads
///
/// A work item never stores its state explicitly: it is derived from the two
/// lease timestamps so that the atomic claim can match on plain column tests.
use std::fmt;

/// Where a leased work item is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseState {
    /// Not claimed by any worker (`leased_at` absent)
    Pending,

    /// Claimed and not yet finished (`leased_at` set, `completed_at` absent)
    Leased,

    /// Finished, with or without a recorded error (`completed_at` set)
    Done,
}

impl LeaseState {
    /// Derives the state from the pair of lease timestamps
    ///
    /// `completed_at` wins over `leased_at`, so a row whose lease was never
    /// recorded but which was completed directly still counts as done.
    pub fn from_timestamps(leased_at: Option<i64>, completed_at: Option<i64>) -> Self {
        match (leased_at, completed_at) {
            (_, Some(_)) => Self::Done,
            (Some(_), None) => Self::Leased,
            (None, None) => Self::Pending,
        }
    }

    /// Oldest lease timestamp that is still valid at `now_millis`
    ///
    /// A lease is expired when it was taken strictly before the cutoff, so a
    /// lease taken at T with duration D is still valid at exactly T + D.
    pub fn expiry_cutoff(now_millis: i64, max_duration_ms: i64) -> i64 {
        now_millis.saturating_sub(max_duration_ms)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::Done => "done",
        }
    }

    pub fn all_states() -> [Self; 3] {
        [Self::Pending, Self::Leased, Self::Done]
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
