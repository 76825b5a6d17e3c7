//! QUIC transport layer for COSI messages.
//!
//! This module provides [`CosiClient`] and [`CosiServer`] that communicate
//! [`CosiMessage`](crate::message::CosiMessage) values over QUIC
//! bi-directional streams using `quinn`.  Payloads are JSON; errors travel
//! as [`CosiError`](crate::error::CosiError) values so the caller sees the
//! driver's error kind verbatim.

pub mod client;
pub mod server;

pub use client::CosiClient;
pub use server::CosiServer;

/// Upper bound on a single encoded message.
pub(crate) const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
