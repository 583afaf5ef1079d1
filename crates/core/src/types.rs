use serde::{Deserialize, Serialize};

/// Task identifiers are opaque strings (UUID v4, simple format),
/// unique for the process lifetime.
pub type TaskId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// The job category a task belongs to. Each kind has its own isolated
/// [`TaskStore`](crate::store::TaskStore); a task never migrates
/// between kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Video,
    Image,
}

impl TaskKind {
    /// Stable lowercase name used in routes, snapshots, and list views.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Video => "video",
            TaskKind::Image => "image",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(TaskKind::Video),
            "image" => Ok(TaskKind::Image),
            other => Err(crate::error::CoreError::Validation(format!(
                "Unknown task kind: \"{other}\" (expected \"video\" or \"image\")"
            ))),
        }
    }
}
