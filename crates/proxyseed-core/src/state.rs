//! Request lifecycle states, the transition table, and progress checkpoints.
//!
//! # Design
//! - `RequestStatus` is closed; every legal edge is listed in [`RequestStatus::can_transition_to`].
//! - Progress checkpoints are fixed per stage boundary and never move backwards.
//! - `Ready`, `Error` and `Cancelled` are terminal and accept no further edges.

use std::fmt;
use std::str::FromStr;

use proxyseed_events::RequestPhase;
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

/// Progress percentages recorded at each stage boundary.
pub mod progress {
    /// Record created, waiting for a worker.
    pub const QUEUED: u8 = 0;
    /// Fetch stage entered.
    pub const FETCHING: u8 = 10;
    /// Fetch stage finished and content fields recorded.
    pub const FETCHED: u8 = 40;
    /// Packaging stage entered.
    pub const PACKAGING: u8 = 50;
    /// Packaging finished and package fields recorded.
    pub const PACKAGED: u8 = 70;
    /// Seeding stage entered.
    pub const SEEDING: u8 = 80;
    /// Package available.
    pub const READY: u8 = 100;
}

/// Lifecycle state of a fetch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting for a worker.
    Queued,
    /// Retrieving remote content.
    Fetching,
    /// Building the distributable package.
    Packaging,
    /// Registering the package with the seeder.
    Seeding,
    /// Package available for download.
    Ready,
    /// Processing failed; see `error_message`.
    Error,
    /// Cancelled by a caller.
    Cancelled,
}

impl RequestStatus {
    /// All states in pipeline order followed by the escape states.
    pub const ALL: [Self; 7] = [
        Self::Queued,
        Self::Fetching,
        Self::Packaging,
        Self::Seeding,
        Self::Ready,
        Self::Error,
        Self::Cancelled,
    ];

    /// Lowercase wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Packaging => "packaging",
            Self::Seeding => "seeding",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Error | Self::Cancelled)
    }

    /// Transition table.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Queued, Self::Fetching)
            | (Self::Fetching, Self::Packaging)
            | (Self::Packaging, Self::Seeding)
            | (Self::Seeding, Self::Ready) => true,
            (from, Self::Error | Self::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Progress checkpoint recorded when this state is entered.
    ///
    /// Escape states keep whatever progress the request had reached, so they
    /// have no checkpoint of their own.
    #[must_use]
    pub const fn entry_progress(self) -> Option<u8> {
        match self {
            Self::Queued => Some(progress::QUEUED),
            Self::Fetching => Some(progress::FETCHING),
            Self::Packaging => Some(progress::PACKAGING),
            Self::Seeding => Some(progress::SEEDING),
            Self::Ready => Some(progress::READY),
            Self::Error | Self::Cancelled => None,
        }
    }

    /// Validate an edge against the table.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Illegal`] when the edge is not listed.
    pub const fn check_transition(self, next: Self) -> Result<(), TransitionError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError::Illegal {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = TransitionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| TransitionError::UnknownStatus {
                value: value.to_string(),
            })
    }
}

impl From<RequestStatus> for RequestPhase {
    fn from(status: RequestStatus) -> Self {
        match status {
            RequestStatus::Queued => Self::Queued,
            RequestStatus::Fetching => Self::Fetching,
            RequestStatus::Packaging => Self::Packaging,
            RequestStatus::Seeding => Self::Seeding,
            RequestStatus::Ready => Self::Ready,
            RequestStatus::Error => Self::Error,
            RequestStatus::Cancelled => Self::Cancelled,
        }
    }
}
