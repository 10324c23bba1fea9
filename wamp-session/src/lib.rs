//! # wamp-session
//!
//! A minimal asynchronous client for [WAMP](https://wamp-proto.org/spec.html) messaging.
//!
//! A [`Session`][`session::Session`] connects to a router over a transport, performs the
//! transport handshake, joins a realm, and then offers the four basic WAMP interactions:
//! subscribe, publish, register, and call. A [`PeriodicDriver`][`driver::PeriodicDriver`] can be
//! layered on top to publish and call at a fixed rate.

pub mod core;
pub mod driver;
pub mod message;
pub mod serializer;
pub mod session;
pub mod transport;
