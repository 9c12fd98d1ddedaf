//! Activity kinds reported by source documents

use serde::{Deserialize, Serialize};

/// Kind of activity a source document reports on
///
/// Source systems identify activities by numeric code or by name. Anything
/// unrecognized is kept as `Unknown` so dispatch handles it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    /// Public events (code 1)
    Event,
    /// Funded projects (code 2)
    Project,
    /// Volunteering campaigns (code 3)
    Volunteering,
    /// Any other identifier
    #[serde(skip)]
    Unknown(String),
}

impl ActivityKind {
    /// Parse a raw identifier; never fails
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "1" | "event" => ActivityKind::Event,
            "2" | "project" => ActivityKind::Project,
            "3" | "volunteering" => ActivityKind::Volunteering,
            _ => ActivityKind::Unknown(raw.to_string()),
        }
    }

    /// Numeric code, if the kind is known
    pub fn code(&self) -> Option<u32> {
        match self {
            ActivityKind::Event => Some(1),
            ActivityKind::Project => Some(2),
            ActivityKind::Volunteering => Some(3),
            ActivityKind::Unknown(_) => None,
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityKind::Event => write!(f, "event"),
            ActivityKind::Project => write!(f, "project"),
            ActivityKind::Volunteering => write!(f, "volunteering"),
            ActivityKind::Unknown(raw) => write!(f, "unknown({})", raw),
        }
    }
}
