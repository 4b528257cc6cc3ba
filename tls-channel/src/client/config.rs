use crate::crypto::ring::ALL_CIPHER_SUITES;
use crate::msgs::enums::MaxFragmentLength;
use crate::session::{NoSessionStorage, SessionStore};
use crate::tls12::Tls12CipherSuite;

use std::fmt;
use std::sync::Arc;

use zeroize::Zeroize;

/// Common configuration for (typically) all connections made by
/// a program.
///
/// Making one of these is cheap, though one of the inputs may be expensive:
/// gathering the pre-shared key from wherever it is kept.
pub struct ClientConfig {
    /// The identity sent in the ClientKeyExchange.
    pub psk_identity: Vec<u8>,

    /// The pre-shared key itself.
    pub psk: Vec<u8>,

    /// List of ciphersuites, in preference order.
    pub cipher_suites: Vec<&'static Tls12CipherSuite>,

    /// Ask the server to limit record plaintext to this size.  The default
    /// is None.
    pub max_fragment_length: Option<MaxFragmentLength>,

    /// Whether to offer the heartbeat extension.  The default is false.
    pub enable_heartbeats: bool,

    /// Whether to answer a server's HelloRequest with a new handshake,
    /// rather than a `no_renegotiation` alert.
    ///
    /// The default is true.
    pub allow_server_initiated_renegotiation: bool,

    /// Where approved sessions are saved.
    pub session_storage: Arc<dyn SessionStore>,
}

impl ClientConfig {
    /// Make a `ClientConfig` presenting `psk_identity` with `psk`, and
    /// defaults for everything else.
    pub fn new(psk_identity: impl Into<Vec<u8>>, psk: impl Into<Vec<u8>>) -> Self {
        Self {
            psk_identity: psk_identity.into(),
            psk: psk.into(),
            cipher_suites: ALL_CIPHER_SUITES.to_vec(),
            max_fragment_length: None,
            enable_heartbeats: false,
            allow_server_initiated_renegotiation: true,
            session_storage: Arc::new(NoSessionStorage {}),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("psk_identity", &self.psk_identity)
            .field("cipher_suites", &self.cipher_suites)
            .field("max_fragment_length", &self.max_fragment_length)
            .field("enable_heartbeats", &self.enable_heartbeats)
            .field(
                "allow_server_initiated_renegotiation",
                &self.allow_server_initiated_renegotiation,
            )
            .finish_non_exhaustive()
    }
}

impl Drop for ClientConfig {
    fn drop(&mut self) {
        self.psk.zeroize();
    }
}
