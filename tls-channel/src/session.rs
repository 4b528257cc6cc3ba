use crate::enums::{CipherSuite, ProtocolVersion, Side};
use crate::msgs::handshake::SessionId;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use zeroize::Zeroize;

/// The parameters of a completed handshake.
///
/// Handed to [`Callbacks::handshake_complete`](crate::Callbacks::handshake_complete)
/// for approval, then to the configured [`SessionStore`].
#[derive(Clone)]
pub struct Session {
    /// The session identifier the server chose.
    pub id: SessionId,
    /// The negotiated protocol version.
    pub version: ProtocolVersion,
    /// The negotiated cipher suite.
    pub cipher_suite: CipherSuite,
    /// Which side of the connection this session was made on.
    pub side: Side,
    /// The pre-shared key identity the client presented.
    pub psk_identity: Vec<u8>,
    /// Seconds since the UNIX epoch when the handshake completed.
    pub start_time: u64,
    master_secret: Vec<u8>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        version: ProtocolVersion,
        cipher_suite: CipherSuite,
        side: Side,
        psk_identity: Vec<u8>,
        start_time: u64,
        master_secret: &[u8],
    ) -> Self {
        Self {
            id,
            version,
            cipher_suite,
            side,
            psk_identity,
            start_time,
            master_secret: master_secret.to_vec(),
        }
    }

    /// The session's master secret.
    pub fn master_secret(&self) -> &[u8] {
        &self.master_secret
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("cipher_suite", &self.cipher_suite)
            .field("side", &self.side)
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

/// A trait for the ability to store completed sessions.
///
/// The channel calls `save` once a handshake has been approved, and
/// `remove` when a fatal alert ends a connection whose session was
/// saved.  Implementations are shared between connections.
pub trait SessionStore: Send + Sync {
    /// Store `session`.  Returns true if it was stored.
    fn save(&self, session: &Session) -> bool;

    /// Forget the session with identifier `id`, if stored.
    fn remove(&self, id: &SessionId);
}

/// Something which never stores sessions.
pub struct NoSessionStorage {}

impl SessionStore for NoSessionStorage {
    fn save(&self, _session: &Session) -> bool {
        false
    }

    fn remove(&self, _id: &SessionId) {}
}

/// An implementer of `SessionStore` that stores everything in memory.
/// It enforces a limit on the number of stored sessions to bound memory
/// usage, evicting the oldest first.
pub struct SessionMemoryCache {
    cache: Mutex<LimitedCache>,
}

impl SessionMemoryCache {
    /// Make a new SessionMemoryCache.  `size` is the maximum number of
    /// stored sessions.
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            cache: Mutex::new(LimitedCache::new(size)),
        })
    }

    /// Look up a stored session.
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.cache
            .lock()
            .ok()?
            .map
            .get(id)
            .cloned()
    }

    /// The number of stored sessions.
    pub fn len(&self) -> usize {
        self.cache
            .lock()
            .map(|c| c.map.len())
            .unwrap_or(0)
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for SessionMemoryCache {
    fn save(&self, session: &Session) -> bool {
        match self.cache.lock() {
            Ok(mut cache) => {
                cache.insert(session.clone());
                true
            }
            Err(_) => false,
        }
    }

    fn remove(&self, id: &SessionId) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(id);
        }
    }
}

struct LimitedCache {
    map: HashMap<SessionId, Session>,
    oldest: VecDeque<SessionId>,
    limit: usize,
}

impl LimitedCache {
    fn new(limit: usize) -> Self {
        Self {
            map: HashMap::with_capacity(limit),
            oldest: VecDeque::with_capacity(limit),
            limit,
        }
    }

    fn insert(&mut self, session: Session) {
        if self.limit == 0 {
            return;
        }

        let id = session.id;
        if self.map.insert(id, session).is_none() {
            self.oldest.push_back(id);
        }

        while self.map.len() > self.limit {
            match self.oldest.pop_front() {
                Some(evict) => {
                    self.map.remove(&evict);
                }
                None => break,
            }
        }
    }

    fn remove(&mut self, id: &SessionId) {
        if self.map.remove(id).is_some() {
            self.oldest.retain(|x| x != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::codec::Codec;

    fn session(byte: u8) -> Session {
        let mut encoded = vec![32u8];
        encoded.extend_from_slice(&[byte; 32]);
        let id = SessionId::read_bytes(&encoded).unwrap();
        Session::new(
            id,
            ProtocolVersion::TLSv1_2,
            CipherSuite::TLS_PSK_WITH_AES_128_GCM_SHA256,
            Side::Server,
            b"client".to_vec(),
            0,
            &[byte; 48],
        )
    }

    #[test]
    fn test_noserversessionstorage_drops_put() {
        let c = NoSessionStorage {};
        assert!(!c.save(&session(1)));
        c.remove(&session(1).id);
    }

    #[test]
    fn cache_saves_and_removes() {
        let c = SessionMemoryCache::new(4);
        let s = session(1);
        assert!(c.save(&s));
        assert_eq!(c.get(&s.id).unwrap().master_secret(), &[1u8; 48]);
        c.remove(&s.id);
        assert!(c.get(&s.id).is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn cache_evicts_oldest() {
        let c = SessionMemoryCache::new(2);
        for i in 1..=3 {
            c.save(&session(i));
        }
        assert_eq!(c.len(), 2);
        assert!(c.get(&session(1).id).is_none());
        assert!(c.get(&session(2).id).is_some());
        assert!(c.get(&session(3).id).is_some());
    }

    #[test]
    fn debug_hides_master_secret() {
        let text = format!("{:?}", session(9));
        assert!(!text.contains("master_secret"));
    }
}
