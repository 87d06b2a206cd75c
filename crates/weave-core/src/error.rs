use std::fmt;

use crate::identity::{AtomId, SiteId};

/// Machine-readable error codes for transport and policy layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    IdentityCollision,
    SelfCausation,
    CausalCycle,
    ClockExhausted,
    PendingBufferFull,
    SequenceDecodeFailed,
    SequenceEncodeFailed,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::IdentityCollision => "E2002",
            Self::SelfCausation => "E2003",
            Self::CausalCycle => "E2004",
            Self::ClockExhausted => "E2005",
            Self::PendingBufferFull => "E3001",
            Self::SequenceDecodeFailed => "E4001",
            Self::SequenceEncodeFailed => "E4002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Replica config parse error",
            Self::IdentityCollision => "Atom identity collision",
            Self::SelfCausation => "Atom names itself as its cause",
            Self::CausalCycle => "Atom causes form a cycle",
            Self::ClockExhausted => "Lamport clock exhausted",
            Self::PendingBufferFull => "Pending buffer is full",
            Self::SequenceDecodeFailed => "Atom sequence decode failed",
            Self::SequenceEncodeFailed => "Atom sequence encode failed",
        }
    }

    /// Optional remediation hint for whoever owns the peer policy.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in the replica config file and retry."),
            Self::IdentityCollision => Some(
                "A site reused a timestamp. Check the peer's clock or stop accepting its atoms.",
            ),
            Self::SelfCausation | Self::CausalCycle => {
                Some("Reject the peer that produced this atom.")
            }
            Self::ClockExhausted => Some(
                "A timestamp of u64::MAX was observed. Find the peer that sent it; this site cannot create atoms.",
            ),
            Self::PendingBufferFull => Some(
                "Deliver the missing causes first, or raise `pending_limit` in the replica config.",
            ),
            Self::SequenceDecodeFailed => Some("Re-fetch the sequence from the peer."),
            Self::SequenceEncodeFailed => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors reported by the insertion path.
///
/// `CauseMissing` and `AlreadyPresent` are not errors and never appear here;
/// see [`crate::weave::InsertResult`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WeaveError {
    /// Two atoms share `(site, timestamp)` but differ in priority, cause, or payload.
    #[error("identity collision on atom {id}")]
    IdentityCollision {
        /// Identity of the atom that was rejected.
        id: AtomId,
    },

    /// The atom declares itself as its own cause.
    #[error("atom {id} names itself as its cause")]
    SelfCausation {
        /// Identity of the rejected atom.
        id: AtomId,
    },

    /// The atom's cause chain, followed through buffered atoms, leads back to it.
    #[error("atom {id} waits on {cause}, which already waits on {id}")]
    CausalCycle {
        /// Identity of the rejected atom.
        id: AtomId,
        /// Its declared cause.
        cause: AtomId,
    },

    /// The site's Lamport clock has no timestamp left to issue.
    #[error("lamport clock for site {site} is exhausted")]
    ClockExhausted {
        /// Site whose clock reached `u64::MAX`.
        site: SiteId,
    },

    /// The pending buffer already holds `limit` atoms.
    #[error("pending buffer full ({limit} atoms); rejected atom {id} waiting on {cause}")]
    PendingBufferFull {
        /// Configured bound.
        limit: usize,
        /// The atom that could not be buffered.
        id: AtomId,
        /// The cause it is waiting for.
        cause: AtomId,
    },
}

impl WeaveError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::IdentityCollision { .. } => ErrorCode::IdentityCollision,
            Self::SelfCausation { .. } => ErrorCode::SelfCausation,
            Self::CausalCycle { .. } => ErrorCode::CausalCycle,
            Self::ClockExhausted { .. } => ErrorCode::ClockExhausted,
            Self::PendingBufferFull { .. } => ErrorCode::PendingBufferFull,
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
