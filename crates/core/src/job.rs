//! Job lifecycle phases and their public status projection.
//!
//! [`JobPhase`] is the fine-grained state the watcher drives; callers only
//! ever see the coarser [`PublicStatus`] integer.
//!
//! ```text
//! JobSubmitted -> EngineRunning -> ResultsDownloading -> Distributing -> Distributed
//!       \______________\___________________\_________________\
//!                       StopRequested -> Stopped | Error
//! Distributed | Stopped | Error -> Cleanup
//! ```

use serde::{Serialize, Serializer};

// ---------------------------------------------------------------------------
// PublicStatus
// ---------------------------------------------------------------------------

/// Status code surfaced to the upstream platform.
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicStatus {
    Created = 0,
    Running = 1,
    Distributing = 2,
    Done = 3,
    Stopped = 4,
    Error = -1,
}

impl PublicStatus {
    /// Integer code as reported to the caller.
    pub fn code(self) -> i8 {
        self as i8
    }
}

impl From<PublicStatus> for i8 {
    fn from(value: PublicStatus) -> Self {
        value.code()
    }
}

impl Serialize for PublicStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.code())
    }
}

// ---------------------------------------------------------------------------
// JobPhase
// ---------------------------------------------------------------------------

/// Internal lifecycle tag owned by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    JobSubmitted,
    EngineRunning,
    ResultsDownloading,
    Distributing,
    Distributed,
    StopRequested,
    Stopped,
    Error,
    Cleanup,
}

impl JobPhase {
    /// Project the phase onto the status code callers see.
    ///
    /// `Cleanup` records are removed from the pool before the phase is set,
    /// so callers never observe it; it projects onto `Done` as "retired".
    pub fn public_status(self) -> PublicStatus {
        match self {
            Self::JobSubmitted => PublicStatus::Created,
            Self::EngineRunning | Self::ResultsDownloading => PublicStatus::Running,
            Self::Distributing => PublicStatus::Distributing,
            Self::Distributed | Self::Cleanup => PublicStatus::Done,
            Self::StopRequested | Self::Stopped => PublicStatus::Stopped,
            Self::Error => PublicStatus::Error,
        }
    }

    /// Phases after which only cleanup remains.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Distributed | Self::Stopped | Self::Error)
    }

    /// Phases a background download/distribution task owns.
    pub fn is_delivering(self) -> bool {
        matches!(self, Self::ResultsDownloading | Self::Distributing)
    }

    /// Position on the happy path, `None` for side states.
    fn rank(self) -> Option<u8> {
        match self {
            Self::JobSubmitted => Some(0),
            Self::EngineRunning => Some(1),
            Self::ResultsDownloading => Some(2),
            Self::Distributing => Some(3),
            Self::Distributed => Some(4),
            _ => None,
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Staying in the same phase is always allowed. Terminal phases only
    /// lead to `Cleanup`, and `Cleanup` leads nowhere.
    pub fn can_transition_to(self, next: JobPhase) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Cleanup => false,
            Self::Distributed | Self::Stopped | Self::Error => next == Self::Cleanup,
            Self::StopRequested => matches!(next, Self::Stopped | Self::Error),
            _ => match next {
                Self::StopRequested | Self::Stopped | Self::Error => true,
                Self::Cleanup => false,
                _ => matches!((self.rank(), next.rank()), (Some(from), Some(to)) if to > from),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
