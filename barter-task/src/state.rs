//! Task states: the universal lifecycle variants plus a task kind's own phases.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt::{Debug, Display, Formatter};

/// Bounds required of a task kind's phase enum.
///
/// Blanket implemented, so a phase is any `Copy` enum deriving the usual traits plus
/// `Display` (eg/ via `derive_more::Display`).
pub trait TaskPhase:
    Copy + Eq + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> TaskPhase for T where
    T: Copy + Eq + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// State of a task.
///
/// Every task kind shares the universal variants; task specific progress lives in
/// [`TaskState::Active`] as a closed phase enum `P`, so handler dispatch is a `match`
/// checked at compile time.
///
/// `Completed` and `Cancelled` are terminal. `Error` is a trap: no handler leaves it, only
/// external intervention via `BaseTradingTask::clear_error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState<P> {
    Idle,
    Active(P),
    Paused,
    Error,
    Completed,
    Cancelled,
}

impl<P> TaskState<P> {
    /// Determines if the task will take no further action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Determines if a handler runs for this state.
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Idle | Self::Active(_))
    }

    /// Task specific phase, if the task is [`TaskState::Active`].
    pub fn phase(&self) -> Option<&P> {
        match self {
            Self::Active(phase) => Some(phase),
            _ => None,
        }
    }
}

impl<P> Display for TaskState<P>
where
    P: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active(phase) => write!(f, "{phase}"),
            Self::Paused => write!(f, "paused"),
            Self::Error => write!(f, "error"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
