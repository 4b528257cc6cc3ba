use crate::crypto::ring::ALL_CIPHER_SUITES;
use crate::session::{NoSessionStorage, SessionStore};
use crate::tls12::Tls12CipherSuite;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How to choose the pre-shared key for a client's identity.
pub trait ResolvesPsk: Send + Sync {
    /// The key for `identity`, or None if the identity is unknown.
    fn resolve(&self, identity: &[u8]) -> Option<Vec<u8>>;
}

/// A fixed table of identities and their keys.
#[derive(Default)]
pub struct StaticPskStore {
    keys: HashMap<Vec<u8>, Vec<u8>>,
}

impl StaticPskStore {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the key for `identity`.
    pub fn insert(&mut self, identity: impl Into<Vec<u8>>, psk: impl Into<Vec<u8>>) {
        self.keys
            .insert(identity.into(), psk.into());
    }
}

impl ResolvesPsk for StaticPskStore {
    fn resolve(&self, identity: &[u8]) -> Option<Vec<u8>> {
        self.keys.get(identity).cloned()
    }
}

/// Common configuration for a set of server sessions.
pub struct ServerConfig {
    /// Sent to clients in a ServerKeyExchange when set.  The default is
    /// None, and no ServerKeyExchange is sent.
    pub psk_identity_hint: Option<Vec<u8>>,

    /// Resolves client identities to keys.
    pub psk_store: Arc<dyn ResolvesPsk>,

    /// List of ciphersuites, in preference order.
    pub cipher_suites: Vec<&'static Tls12CipherSuite>,

    /// Whether to honour a client's `max_fragment_length` request.  The
    /// default is true.
    pub max_fragment_length_accepted: bool,

    /// Whether to agree to the heartbeat extension when offered.  The
    /// default is false.
    pub enable_heartbeats: bool,

    /// Whether a client may start a new handshake on an established
    /// connection.  The default is true.
    pub allow_client_initiated_renegotiation: bool,

    /// Refuse clients that don't signal RFC 5746 support.  The default is
    /// true.
    pub require_secure_renegotiation: bool,

    /// Where approved sessions are saved.
    pub session_storage: Arc<dyn SessionStore>,
}

impl ServerConfig {
    /// Make a `ServerConfig` that looks keys up in `psk_store`, with
    /// defaults for everything else.
    pub fn new(psk_store: Arc<dyn ResolvesPsk>) -> Self {
        Self {
            psk_identity_hint: None,
            psk_store,
            cipher_suites: ALL_CIPHER_SUITES.to_vec(),
            max_fragment_length_accepted: true,
            enable_heartbeats: false,
            allow_client_initiated_renegotiation: true,
            require_secure_renegotiation: true,
            session_storage: Arc::new(NoSessionStorage {}),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("psk_identity_hint", &self.psk_identity_hint)
            .field("cipher_suites", &self.cipher_suites)
            .field(
                "max_fragment_length_accepted",
                &self.max_fragment_length_accepted,
            )
            .field("enable_heartbeats", &self.enable_heartbeats)
            .field(
                "allow_client_initiated_renegotiation",
                &self.allow_client_initiated_renegotiation,
            )
            .field(
                "require_secure_renegotiation",
                &self.require_secure_renegotiation,
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_store_resolves_known_identities() {
        let mut store = StaticPskStore::new();
        store.insert("alice", vec![1u8; 16]);
        assert_eq!(store.resolve(b"alice"), Some(vec![1u8; 16]));
        assert_eq!(store.resolve(b"bob"), None);
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::new(Arc::new(StaticPskStore::new()));
        assert!(config.require_secure_renegotiation);
        assert!(!config.enable_heartbeats);
        assert_eq!(config.cipher_suites.len(), ALL_CIPHER_SUITES.len());
    }
}
