#![allow(missing_docs)]
//! Wire formats: records, handshake messages, alerts and heartbeats.

#[macro_use]
mod macros;

pub mod alert;
pub mod base;
pub mod ccs;
pub mod codec;
pub mod enums;
pub mod handshake;
pub mod heartbeat;
pub mod message;

pub(crate) mod fragmenter;
pub(crate) mod record;
