//! WAMP messages, split by the direction they travel.

pub mod incoming;
pub mod message;
pub mod outgoing;
