use ring::digest;

use std::mem;

/// Early stage buffering of handshake messages.
///
/// Until the server hello names the cipher suite we don't know which hash
/// the Finished messages will use, so the transcript is just buffered.
pub(crate) struct HandshakeHashBuffer {
    buffer: Vec<u8>,
}

impl HandshakeHashBuffer {
    pub(crate) fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Buffer one encoded handshake message, header included.
    pub(crate) fn add_message(&mut self, encoded: &[u8]) {
        self.buffer.extend_from_slice(encoded);
    }

    /// We now know what hash function the verify_data will use.
    pub(crate) fn start_hash(self, alg: &'static digest::Algorithm) -> HandshakeHash {
        let mut ctx = digest::Context::new(alg);
        ctx.update(&self.buffer);
        HandshakeHash { ctx }
    }
}

/// A running hash over the handshake messages.
pub(crate) struct HandshakeHash {
    ctx: digest::Context,
}

impl HandshakeHash {
    /// Hash one encoded handshake message, header included.
    pub(crate) fn add_message(&mut self, encoded: &[u8]) -> &mut Self {
        self.ctx.update(encoded);
        self
    }

    /// Get the current hash value.
    pub(crate) fn current_hash(&self) -> digest::Digest {
        self.ctx.clone().finish()
    }
}

/// The transcript as a whole: buffered until the suite is known, then hashed.
pub(crate) enum Transcript {
    Buffering(HandshakeHashBuffer),
    Hashing(HandshakeHash),
    /// Transient placeholder used while switching between the other two.
    Switching,
}

impl Transcript {
    pub(crate) fn new() -> Self {
        Self::Buffering(HandshakeHashBuffer::new())
    }

    pub(crate) fn add_message(&mut self, encoded: &[u8]) {
        match self {
            Self::Buffering(buf) => buf.add_message(encoded),
            Self::Hashing(hash) => {
                hash.add_message(encoded);
            }
            Self::Switching => {}
        }
    }

    /// Switch to incremental hashing.  Does nothing if already hashing.
    pub(crate) fn start_hash(&mut self, alg: &'static digest::Algorithm) {
        *self = match mem::replace(self, Self::Switching) {
            Self::Buffering(buf) => Self::Hashing(buf.start_hash(alg)),
            other => other,
        };
    }

    pub(crate) fn current_hash(&self) -> Option<digest::Digest> {
        match self {
            Self::Hashing(hash) => Some(hash.current_hash()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_then_hashed() {
        let mut hhb = HandshakeHashBuffer::new();
        hhb.add_message(b"hello");
        let mut hh = hhb.start_hash(&digest::SHA256);
        hh.add_message(b"world");
        let h = hh.current_hash();
        assert_eq!(h.as_ref(), digest::digest(&digest::SHA256, b"helloworld").as_ref());
    }

    #[test]
    fn current_hash_does_not_consume() {
        let mut t = Transcript::new();
        t.add_message(b"ab");
        assert!(t.current_hash().is_none());

        t.start_hash(&digest::SHA384);
        let first = t.current_hash().unwrap();
        t.start_hash(&digest::SHA256);
        t.add_message(b"c");
        let second = t.current_hash().unwrap();

        assert_eq!(first.as_ref(), digest::digest(&digest::SHA384, b"ab").as_ref());
        assert_eq!(second.as_ref(), digest::digest(&digest::SHA384, b"abc").as_ref());
    }
}
