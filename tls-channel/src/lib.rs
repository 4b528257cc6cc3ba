//! # tls-channel
//!
//! A TLS 1.2 and DTLS 1.2 connection controller that does no IO of its
//! own.
//!
//! A [`Channel`] sits between an application and a transport.  Bytes read
//! from the transport are handed to [`Channel::received_data`]; plaintext
//! to send goes to [`Channel::send`].  Everything the channel wants
//! written comes out through [`Callbacks::emit`], one record per call,
//! and everything it has for the application comes out through
//! [`Callbacks::deliver`].  The same controller drives stream transports
//! (TLS) and datagram transports (DTLS); the protocol version passed to
//! [`Channel::new_client`] picks between them, and a server follows
//! whichever the client speaks.
//!
//! ## Current features
//!
//! * TLS1.2 and DTLS1.2 with RFC 4279 pre-shared key authentication.
//! * AES-GCM and ChaCha20-Poly1305 record protection via *ring*.
//! * Renegotiation in both directions, bound to the previous handshake
//!   with RFC 5746 `renegotiation_info`.
//! * Heartbeats (RFC 6520) and maximum fragment length negotiation
//!   (RFC 6066).
//! * Datagram handshake fragmentation, reassembly and flight
//!   retransmission, and a 64 record anti-replay window.
//! * Keying material exporters (RFC 5705).
//!
//! ## Non-features
//!
//! * Certificates.  Peer authentication is by pre-shared key only.
//! * Session resumption.  Sessions are stored for the application's
//!   benefit; every handshake is full.
//! * TLS1.3, SSLv3 and compression.
//!
//! ## Getting started
//!
//! ```
//! use std::sync::Arc;
//! use tls_channel::client::ClientConfig;
//! use tls_channel::{Callbacks, Channel, Event, ProtocolVersion, Session};
//!
//! struct Printer;
//!
//! impl Callbacks for Printer {
//!     fn emit(&mut self, data: &[u8]) {
//!         println!("would send {} bytes", data.len());
//!     }
//!
//!     fn deliver(&mut self, event: Event<'_>) {
//!         println!("got {:?}", event);
//!     }
//!
//!     fn handshake_complete(&mut self, _session: &Session) -> bool {
//!         true
//!     }
//! }
//!
//! let config = Arc::new(ClientConfig::new("client-1", vec![0x42; 32]));
//! let channel = Channel::new_client(config, Box::new(Printer), ProtocolVersion::TLSv1_2).unwrap();
//! assert!(!channel.is_active());
//! ```
//!
//! # Crate features
//!
//! - `logging`: this makes the crate depend on the `log` crate.  Protocol
//!   events are logged at `trace!` and `debug!` level, and protocol errors
//!   at `warn!` and `error!` level.  The log messages do not contain secret
//!   key data.  This feature is in the default set.

// Require docs for public APIs, deny unsafe code, etc.
#![forbid(unsafe_code, unused_must_use)]
#![deny(
    clippy::clone_on_ref_ptr,
    clippy::use_self,
    trivial_casts,
    trivial_numeric_casts,
    missing_docs,
    unreachable_pub,
    unused_import_braces,
    unused_extern_crates,
    unused_qualifications
)]
// Relax these clippy lints:
// - ptr_arg: this triggers on references to type aliases that are Vec
//   underneath.
// - too_many_arguments: some things just need a lot of state, wrapping it
//   doesn't necessarily make it easier to follow what's going on
// - new_ret_no_self: we sometimes return `Arc<Self>`, which seems fine
// - single_component_path_imports: our top-level `use log` import causes
//   a false positive, https://github.com/rust-lang/rust-clippy/issues/5210
// - new_without_default: for internal constructors, the indirection is not
//   helpful
#![allow(
    clippy::too_many_arguments,
    clippy::new_ret_no_self,
    clippy::ptr_arg,
    clippy::single_component_path_imports,
    clippy::new_without_default
)]

// log for logging (optional).
#[cfg(feature = "logging")]
use log;

#[cfg(not(feature = "logging"))]
mod log {
    macro_rules! trace    ( ($($tt:tt)*) => {{}} );
    macro_rules! debug    ( ($($tt:tt)*) => {{}} );
    macro_rules! warn     ( ($($tt:tt)*) => {{}} );
    macro_rules! error    ( ($($tt:tt)*) => {{}} );
    pub(crate) use {debug, error, trace, warn};
}

#[macro_use]
mod msgs;
mod channel;
mod cipher;
mod enums;
mod error;
mod handshake;
mod hash_hs;
mod rand;
mod seq_numbers;
mod session;
mod tls12;
#[macro_use]
mod check;

/// Cryptography providers.
pub mod crypto;

/// Internal classes which may be useful outside the library.
/// The contents of this section DO NOT form part of the stable interface.
pub mod internal {
    /// Low-level TLS message parsing and encoding functions.
    pub mod msgs {
        pub use crate::msgs::*;
    }
}

// The public interface is:
pub use crate::channel::{Callbacks, Channel, Event};
pub use crate::cipher::{
    AeadKey, Iv, KeyBlockShape, MessageDecrypter, MessageEncrypter, Tls12AeadAlgorithm,
};
pub use crate::enums::{
    AlertDescription, CipherSuite, ContentType, HandshakeType, ProtocolVersion, Side,
};
pub use crate::error::{Error, InvalidMessage, PeerIncompatible, PeerMisbehaved};
pub use crate::msgs::alert::Alert;
pub use crate::msgs::enums::{AlertLevel, HeartbeatMode, MaxFragmentLength};
pub use crate::msgs::handshake::SessionId;
pub use crate::session::{NoSessionStorage, Session, SessionMemoryCache, SessionStore};
pub use crate::tls12::Tls12CipherSuite;

/// Items for use in a client.
pub mod client {
    mod config;
    pub(crate) mod hs;

    pub use config::ClientConfig;
}

/// Items for use in a server.
pub mod server {
    mod config;
    pub(crate) mod hs;

    pub use config::{ResolvesPsk, ServerConfig, StaticPskStore};
}
