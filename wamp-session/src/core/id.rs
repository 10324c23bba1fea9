use std::fmt::Display;

use serde::{
    Deserialize,
    Serialize,
};
use thiserror::Error;

/// Largest value a WAMP ID may take, so that IDs survive a round trip through IEEE doubles.
const MAX_ID: u64 = 1 << 53;

/// Error for an integer that cannot be used as an ID.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("ID {0} is outside of [1, 2^53]")]
pub struct IdOutOfRange(u64);

/// An ID assigned to a session, request, subscription, registration, or publication.
///
/// Always in `[1, 2^53]`. Values outside of that range are rejected when read off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Id(u64);

impl Id {
    pub const MIN: Id = Id(1);
    pub const MAX: Id = Id(MAX_ID);

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<u64> for Id {
    type Error = IdOutOfRange;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            1..=MAX_ID => Ok(Self(value)),
            _ => Err(IdOutOfRange(value)),
        }
    }
}

impl From<Id> for u64 {
    fn from(value: Id) -> Self {
        value.0
    }
}

/// Request IDs of a single session, handed out in increasing order starting at 1.
///
/// Owned by the session loop, which is the only place requests are created.
#[derive(Debug, Default)]
pub struct RequestIdSequence {
    last: u64,
}

impl RequestIdSequence {
    /// The ID for the next request.
    ///
    /// Wraps back to 1 after 2^53. A wrapped ID cannot collide with a request that is still
    /// pending, since a session never has that many requests in flight.
    pub fn next_request(&mut self) -> Id {
        self.last = if self.last >= MAX_ID { 1 } else { self.last + 1 };
        Id(self.last)
    }
}
