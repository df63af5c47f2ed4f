/// Discovery-edge kinds a crawl task can follow
///
/// Every task in the queue is keyed by `(kind, key)`, where the key is a
/// package id or a creator id depending on the kind.
use std::fmt;

/// The kind of discovery edge a crawl task follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    /// Find all apps the catalog lists as similar to a package
    Similar,

    /// Find all apps published by a creator
    Creator,

    /// Fetch the full details page of a single package
    Details,
}

impl TaskKind {
    /// Converts the task kind to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Similar => "CRAWL_SIMILAR",
            Self::Creator => "CRAWL_CREATOR",
            Self::Details => "CRAWL_DETAILS",
        }
    }

    /// Parses a task kind from its database string representation
    ///
    /// Returns None if the string doesn't match any known kind.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "CRAWL_SIMILAR" => Some(Self::Similar),
            "CRAWL_CREATOR" => Some(Self::Creator),
            "CRAWL_DETAILS" => Some(Self::Details),
            _ => None,
        }
    }

    /// Parses the short, case-insensitive name used on the command line
    pub fn from_cli_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "similar" => Some(Self::Similar),
            "creator" => Some(Self::Creator),
            "details" => Some(Self::Details),
            _ => Self::from_db_string(s),
        }
    }

    /// Returns all task kinds
    pub fn all_kinds() -> [Self; 3] {
        [Self::Similar, Self::Creator, Self::Details]
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_db_string() {
        for kind in TaskKind::all_kinds() {
            let parsed = TaskKind::from_db_string(kind.to_db_string());
            assert_eq!(Some(kind), parsed, "Failed roundtrip for {:?}", kind);
        }
    }

    #[test]
    fn test_from_db_string_invalid() {
        assert_eq!(TaskKind::from_db_string("CRAWL_REVIEWS"), None);
        assert_eq!(TaskKind::from_db_string("details"), None);
    }

    #[test]
    fn test_from_cli_name() {
        assert_eq!(TaskKind::from_cli_name("Details"), Some(TaskKind::Details));
        assert_eq!(TaskKind::from_cli_name("creator"), Some(TaskKind::Creator));
        assert_eq!(
            TaskKind::from_cli_name("CRAWL_SIMILAR"),
            Some(TaskKind::Similar)
        );
        assert_eq!(TaskKind::from_cli_name("reviews"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", TaskKind::Details), "CRAWL_DETAILS");
    }
}
