pub mod bet;
pub mod draw;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a draw.
///
/// Declared in the same order the lifecycle advances, so `Ord` follows
/// open < closed < completed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(rename_all = "lowercase", type_name = "draw_status")]
#[serde(rename_all = "lowercase")]
pub enum DrawStatus {
    Open,
    Closed,
    Completed,
}

impl DrawStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DrawStatus::Open => "open",
            DrawStatus::Closed => "closed",
            DrawStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for DrawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the three known statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl FromStr for DrawStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(DrawStatus::Open),
            "closed" => Ok(DrawStatus::Closed),
            "completed" => Ok(DrawStatus::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
