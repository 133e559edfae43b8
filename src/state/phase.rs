/// Session phase definitions for tracking collection progress
///
/// This module defines every phase a collection session moves through and
/// which moves between them are legal.
use std::fmt;

/// Represents the current phase of a collection session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Loading the checkpoint and seeding the accumulator
    Init,

    /// Requesting pages from the fetcher
    Fetching,

    /// Backing off after the source signalled throttling; the cursor is held
    RateLimited,

    /// A page failed twice; recording it and deciding whether to continue
    Degraded,

    /// Final save done, summary produced
    Done,
}

impl SessionPhase {
    /// Returns true if the session has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true if the session may still issue fetches
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Fetching | Self::RateLimited | Self::Degraded)
    }

    /// Checks whether a move from this phase to `next` is legal
    ///
    /// `Fetching -> Fetching` is the normal page-to-page loop.
    pub fn can_transition_to(&self, next: SessionPhase) -> bool {
        use SessionPhase::*;

        matches!(
            (*self, next),
            (Init, Fetching)
                | (Init, Done)
                | (Fetching, Fetching)
                | (Fetching, RateLimited)
                | (Fetching, Degraded)
                | (Fetching, Done)
                | (RateLimited, Fetching)
                | (RateLimited, Done)
                | (Degraded, Fetching)
                | (Degraded, Done)
        )
    }

    /// Converts the phase to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Fetching => "fetching",
            Self::RateLimited => "rate_limited",
            Self::Degraded => "degraded",
            Self::Done => "done",
        }
    }

    /// Parses a phase from its string representation
    ///
    /// Returns None if the string doesn't match any known phase.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "init" => Some(Self::Init),
            "fetching" => Some(Self::Fetching),
            "rate_limited" => Some(Self::RateLimited),
            "degraded" => Some(Self::Degraded),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    /// Returns all phases
    pub fn all_phases() -> Vec<Self> {
        vec![
            Self::Init,
            Self::Fetching,
            Self::RateLimited,
            Self::Degraded,
            Self::Done,
        ]
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
