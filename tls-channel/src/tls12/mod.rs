use crate::cipher::{AeadKey, Tls12AeadAlgorithm};
use crate::enums::{CipherSuite, Side};
use crate::error::Error;
use crate::msgs::codec::Codec;

use ring::{digest, hmac};
use zeroize::Zeroize;

use std::fmt;

pub(crate) mod prf;

/// A TLS1.2 (and DTLS1.2) cipher suite using a pre-shared key.
pub struct Tls12CipherSuite {
    /// The IANA identifier.
    pub suite: CipherSuite,
    /// The transcript hash.
    pub hash_algorithm: &'static digest::Algorithm,
    /// HMAC used by the PRF.
    pub hmac_algorithm: &'static hmac::Algorithm,
    /// Record protection.
    pub aead_algorithm: &'static dyn Tls12AeadAlgorithm,
}

impl Tls12CipherSuite {
    /// Whether `version` can carry this suite.
    pub fn usable_for_version(&self, version: crate::enums::ProtocolVersion) -> bool {
        use crate::enums::ProtocolVersion;
        matches!(
            version,
            ProtocolVersion::TLSv1_2 | ProtocolVersion::DTLSv1_2
        )
    }
}

impl fmt::Debug for Tls12CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tls12CipherSuite")
            .field("suite", &self.suite)
            .finish()
    }
}

impl PartialEq for Tls12CipherSuite {
    fn eq(&self, other: &Self) -> bool {
        self.suite == other.suite
    }
}

/// The client and server hello randoms.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ConnectionRandoms {
    pub(crate) client: [u8; 32],
    pub(crate) server: [u8; 32],
}

fn join_randoms(first: &[u8; 32], second: &[u8; 32]) -> [u8; 64] {
    let mut randoms = [0u8; 64];
    randoms[..32].copy_from_slice(first);
    randoms[32..].copy_from_slice(second);
    randoms
}

/// RFC 4279: `uint16 N; N zero bytes; uint16 N; psk`.
pub(crate) fn psk_premaster_secret(psk: &[u8]) -> Vec<u8> {
    let mut pms = Vec::with_capacity(4 + psk.len() * 2);
    (psk.len() as u16).encode(&mut pms);
    pms.resize(2 + psk.len(), 0);
    (psk.len() as u16).encode(&mut pms);
    pms.extend_from_slice(psk);
    pms
}

/// One direction's slice of the key block.
pub(crate) struct DirectionKeys {
    pub(crate) key: AeadKey,
    pub(crate) iv: Vec<u8>,
    pub(crate) extra: Vec<u8>,
}

/// The master secret and the values it was derived for.  Everything the
/// session keys, Finished messages and exporters need.
pub(crate) struct ConnectionSecrets {
    pub(crate) randoms: ConnectionRandoms,
    suite: &'static Tls12CipherSuite,
    master_secret: [u8; 48],
}

impl ConnectionSecrets {
    pub(crate) fn from_psk(
        psk: &[u8],
        randoms: ConnectionRandoms,
        suite: &'static Tls12CipherSuite,
    ) -> Self {
        let mut ret = Self {
            randoms,
            suite,
            master_secret: [0u8; 48],
        };

        let mut pms = psk_premaster_secret(psk);
        let seed = join_randoms(&ret.randoms.client, &ret.randoms.server);
        prf::prf(
            &mut ret.master_secret,
            *suite.hmac_algorithm,
            &pms,
            b"master secret",
            &seed,
        );
        pms.zeroize();
        ret
    }

    fn make_key_block(&self) -> Vec<u8> {
        let shape = self.suite.aead_algorithm.key_block_shape();
        let len = (shape.enc_key_len + shape.fixed_iv_len) * 2 + shape.explicit_nonce_len;

        let mut out = vec![0u8; len];

        // NOTE: opposite order to the master secret derivation.
        let randoms = join_randoms(&self.randoms.server, &self.randoms.client);
        prf::prf(
            &mut out,
            *self.suite.hmac_algorithm,
            &self.master_secret,
            b"key expansion",
            &randoms,
        );

        out
    }

    /// The write key, IV and nonce seed used by `side`.
    pub(crate) fn direction_keys(&self, side: Side) -> Result<DirectionKeys, Error> {
        let shape = self.suite.aead_algorithm.key_block_shape();
        let mut key_block = self.make_key_block();

        let (client_key, rest) = key_block.split_at(shape.enc_key_len);
        let (server_key, rest) = rest.split_at(shape.enc_key_len);
        let (client_iv, rest) = rest.split_at(shape.fixed_iv_len);
        let (server_iv, extra) = rest.split_at(shape.fixed_iv_len);

        let keys = match side {
            Side::Client => DirectionKeys {
                key: AeadKey::new(client_key)?,
                iv: client_iv.to_vec(),
                extra: extra.to_vec(),
            },
            Side::Server => DirectionKeys {
                key: AeadKey::new(server_key)?,
                iv: server_iv.to_vec(),
                extra: extra.to_vec(),
            },
        };

        key_block.zeroize();
        Ok(keys)
    }

    pub(crate) fn suite(&self) -> &'static Tls12CipherSuite {
        self.suite
    }

    pub(crate) fn master_secret(&self) -> &[u8] {
        &self.master_secret[..]
    }

    fn make_verify_data(&self, handshake_hash: &digest::Digest, label: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; 12];

        prf::prf(
            &mut out,
            *self.suite.hmac_algorithm,
            &self.master_secret,
            label,
            handshake_hash.as_ref(),
        );
        out
    }

    pub(crate) fn client_verify_data(&self, handshake_hash: &digest::Digest) -> Vec<u8> {
        self.make_verify_data(handshake_hash, b"client finished")
    }

    pub(crate) fn server_verify_data(&self, handshake_hash: &digest::Digest) -> Vec<u8> {
        self.make_verify_data(handshake_hash, b"server finished")
    }

    /// RFC 5705 exporter: the PRF seeded with
    /// `client_random + server_random [+ u16 length + context]`.
    pub(crate) fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        let mut randoms = Vec::new();
        randoms.extend_from_slice(&self.randoms.client);
        randoms.extend_from_slice(&self.randoms.server);
        if let Some(context) = context {
            if context.len() > 0xffff {
                return Err(Error::General(
                    "exporter context must be at most 65535 bytes".into(),
                ));
            }
            (context.len() as u16).encode(&mut randoms);
            randoms.extend_from_slice(context);
        }

        prf::prf(
            output,
            *self.suite.hmac_algorithm,
            &self.master_secret,
            label,
            &randoms,
        );
        Ok(())
    }
}

impl Drop for ConnectionSecrets {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ring::tls12::{
        TLS_PSK_WITH_AES_128_GCM_SHA256, TLS_PSK_WITH_CHACHA20_POLY1305_SHA256,
    };

    fn randoms() -> ConnectionRandoms {
        ConnectionRandoms {
            client: [1u8; 32],
            server: [2u8; 32],
        }
    }

    #[test]
    fn psk_premaster_layout() {
        assert_eq!(
            psk_premaster_secret(&[9, 9, 9]),
            vec![0, 3, 0, 0, 0, 0, 3, 9, 9, 9]
        );
    }

    #[test]
    fn both_sides_derive_the_same_master_secret() {
        let a = ConnectionSecrets::from_psk(b"key", randoms(), &TLS_PSK_WITH_AES_128_GCM_SHA256);
        let b = ConnectionSecrets::from_psk(b"key", randoms(), &TLS_PSK_WITH_AES_128_GCM_SHA256);
        assert_eq!(a.master_secret(), b.master_secret());

        let c = ConnectionSecrets::from_psk(b"other", randoms(), &TLS_PSK_WITH_AES_128_GCM_SHA256);
        assert_ne!(a.master_secret(), c.master_secret());
    }

    #[test]
    fn direction_keys_follow_the_shape() {
        let secrets =
            ConnectionSecrets::from_psk(b"key", randoms(), &TLS_PSK_WITH_AES_128_GCM_SHA256);
        let client = secrets.direction_keys(Side::Client).unwrap();
        let server = secrets.direction_keys(Side::Server).unwrap();
        assert_eq!(client.key.as_ref().len(), 16);
        assert_eq!(client.iv.len(), 4);
        assert_eq!(client.extra.len(), 8);
        assert_ne!(client.key.as_ref(), server.key.as_ref());
        assert_ne!(client.iv, server.iv);

        let secrets =
            ConnectionSecrets::from_psk(b"key", randoms(), &TLS_PSK_WITH_CHACHA20_POLY1305_SHA256);
        let client = secrets.direction_keys(Side::Client).unwrap();
        assert_eq!(client.key.as_ref().len(), 32);
        assert_eq!(client.iv.len(), 12);
        assert!(client.extra.is_empty());
    }

    #[test]
    fn exporter_context_is_length_prefixed() {
        let secrets =
            ConnectionSecrets::from_psk(b"key", randoms(), &TLS_PSK_WITH_AES_128_GCM_SHA256);

        let mut none = [0u8; 32];
        let mut empty = [0u8; 32];
        secrets
            .export_keying_material(&mut none, b"EXPORTER-test", None)
            .unwrap();
        secrets
            .export_keying_material(&mut empty, b"EXPORTER-test", Some(b""))
            .unwrap();
        assert_ne!(none, empty);

        let mut out = [0u8; 16];
        assert!(secrets
            .export_keying_material(&mut out, b"EXPORTER-test", Some(&vec![0u8; 0x10000]))
            .is_err());
    }
}
