use crate::cipher::{
    make_nonce, make_tls12_aad, AeadKey, Iv, KeyBlockShape, MessageDecrypter, MessageEncrypter,
    Tls12AeadAlgorithm, NONCE_LEN,
};
use crate::enums::CipherSuite;
use crate::error::Error;
use crate::msgs::base::Payload;
use crate::msgs::fragmenter::MAX_FRAGMENT_LEN;
use crate::msgs::message::{BorrowedPlainMessage, OpaqueMessage, PlainMessage};
use crate::tls12::Tls12CipherSuite;

use ring::{aead, digest, hmac};

/// The TLS1.2 ciphersuite TLS_PSK_WITH_AES_128_GCM_SHA256.
pub static TLS_PSK_WITH_AES_128_GCM_SHA256: Tls12CipherSuite = Tls12CipherSuite {
    suite: CipherSuite::TLS_PSK_WITH_AES_128_GCM_SHA256,
    hash_algorithm: &digest::SHA256,
    hmac_algorithm: &hmac::HMAC_SHA256,
    aead_algorithm: &AES128_GCM,
};

/// The TLS1.2 ciphersuite TLS_PSK_WITH_AES_256_GCM_SHA384.
pub static TLS_PSK_WITH_AES_256_GCM_SHA384: Tls12CipherSuite = Tls12CipherSuite {
    suite: CipherSuite::TLS_PSK_WITH_AES_256_GCM_SHA384,
    hash_algorithm: &digest::SHA384,
    hmac_algorithm: &hmac::HMAC_SHA384,
    aead_algorithm: &AES256_GCM,
};

/// The TLS1.2 ciphersuite TLS_PSK_WITH_CHACHA20_POLY1305_SHA256.
pub static TLS_PSK_WITH_CHACHA20_POLY1305_SHA256: Tls12CipherSuite = Tls12CipherSuite {
    suite: CipherSuite::TLS_PSK_WITH_CHACHA20_POLY1305_SHA256,
    hash_algorithm: &digest::SHA256,
    hmac_algorithm: &hmac::HMAC_SHA256,
    aead_algorithm: &ChaCha20Poly1305,
};

static AES128_GCM: GcmAlgorithm = GcmAlgorithm(&aead::AES_128_GCM);
static AES256_GCM: GcmAlgorithm = GcmAlgorithm(&aead::AES_256_GCM);

struct GcmAlgorithm(&'static aead::Algorithm);

fn less_safe_key(alg: &'static aead::Algorithm, key: &AeadKey) -> Result<aead::LessSafeKey, Error> {
    aead::UnboundKey::new(alg, key.as_ref())
        .map(aead::LessSafeKey::new)
        .map_err(|_| Error::General("bulk key has the wrong length".into()))
}

impl Tls12AeadAlgorithm for GcmAlgorithm {
    fn decrypter(&self, dec_key: AeadKey, dec_iv: &[u8]) -> Result<Box<dyn MessageDecrypter>, Error> {
        if dec_iv.len() != 4 {
            return Err(Error::General("GCM salt must be 4 bytes".into()));
        }

        let mut ret = GcmMessageDecrypter {
            dec_key: less_safe_key(self.0, &dec_key)?,
            dec_salt: [0u8; 4],
        };
        ret.dec_salt.copy_from_slice(dec_iv);
        Ok(Box::new(ret))
    }

    fn encrypter(
        &self,
        enc_key: AeadKey,
        write_iv: &[u8],
        explicit: &[u8],
    ) -> Result<Box<dyn MessageEncrypter>, Error> {
        if write_iv.len() != 4 || explicit.len() != GCM_EXPLICIT_NONCE_LEN {
            return Err(Error::General("GCM nonce material has the wrong length".into()));
        }

        // The standard leaves the explicit part's construction open: we
        // seed it from the key block and xor in the sequence number, so
        // it never repeats under one key.
        let mut iv = [0u8; NONCE_LEN];
        iv[..4].copy_from_slice(write_iv);
        iv[4..].copy_from_slice(explicit);

        Ok(Box::new(GcmMessageEncrypter {
            enc_key: less_safe_key(self.0, &enc_key)?,
            iv: Iv::new(iv),
        }))
    }

    fn key_block_shape(&self) -> KeyBlockShape {
        KeyBlockShape {
            enc_key_len: self.0.key_len(),
            fixed_iv_len: 4,
            explicit_nonce_len: GCM_EXPLICIT_NONCE_LEN,
        }
    }
}

struct ChaCha20Poly1305;

impl Tls12AeadAlgorithm for ChaCha20Poly1305 {
    fn decrypter(&self, dec_key: AeadKey, iv: &[u8]) -> Result<Box<dyn MessageDecrypter>, Error> {
        if iv.len() != NONCE_LEN {
            return Err(Error::General("ChaCha20 IV must be 12 bytes".into()));
        }

        Ok(Box::new(ChaCha20Poly1305MessageDecrypter {
            dec_key: less_safe_key(&aead::CHACHA20_POLY1305, &dec_key)?,
            dec_offset: Iv::copy(iv),
        }))
    }

    fn encrypter(
        &self,
        enc_key: AeadKey,
        enc_iv: &[u8],
        _: &[u8],
    ) -> Result<Box<dyn MessageEncrypter>, Error> {
        if enc_iv.len() != NONCE_LEN {
            return Err(Error::General("ChaCha20 IV must be 12 bytes".into()));
        }

        Ok(Box::new(ChaCha20Poly1305MessageEncrypter {
            enc_key: less_safe_key(&aead::CHACHA20_POLY1305, &enc_key)?,
            enc_offset: Iv::copy(enc_iv),
        }))
    }

    fn key_block_shape(&self) -> KeyBlockShape {
        KeyBlockShape {
            enc_key_len: 32,
            fixed_iv_len: 12,
            explicit_nonce_len: 0,
        }
    }
}

/// A `MessageEncrypter` for AES-GCM AEAD ciphersuites.
struct GcmMessageEncrypter {
    enc_key: aead::LessSafeKey,
    iv: Iv,
}

/// A `MessageDecrypter` for AES-GCM AEAD ciphersuites.
struct GcmMessageDecrypter {
    dec_key: aead::LessSafeKey,
    dec_salt: [u8; 4],
}

const GCM_EXPLICIT_NONCE_LEN: usize = 8;
const GCM_OVERHEAD: usize = GCM_EXPLICIT_NONCE_LEN + 16;

impl MessageDecrypter for GcmMessageDecrypter {
    fn decrypt(&mut self, mut msg: OpaqueMessage, seq: u64) -> Result<PlainMessage, Error> {
        let payload = &mut msg.payload.0;
        if payload.len() < GCM_OVERHEAD {
            return Err(Error::DecryptError);
        }

        let nonce = {
            let mut nonce = [0u8; NONCE_LEN];
            nonce[..4].copy_from_slice(&self.dec_salt);
            nonce[4..].copy_from_slice(&payload[..GCM_EXPLICIT_NONCE_LEN]);
            aead::Nonce::assume_unique_for_key(nonce)
        };

        let aad = aead::Aad::from(make_tls12_aad(
            seq,
            msg.typ,
            msg.version,
            payload.len() - GCM_OVERHEAD,
        ));

        let plain_len = self
            .dec_key
            .open_within(nonce, aad, payload, GCM_EXPLICIT_NONCE_LEN..)
            .map_err(|_| Error::DecryptError)?
            .len();

        if plain_len > MAX_FRAGMENT_LEN {
            return Err(Error::PeerSentOversizedRecord);
        }

        payload.truncate(plain_len);
        Ok(msg.into_plain_message())
    }
}

impl MessageEncrypter for GcmMessageEncrypter {
    fn encrypt(&mut self, msg: BorrowedPlainMessage, seq: u64) -> Result<OpaqueMessage, Error> {
        let nonce = aead::Nonce::assume_unique_for_key(make_nonce(&self.iv, seq));
        let aad = aead::Aad::from(make_tls12_aad(seq, msg.typ, msg.version, msg.payload.len()));

        let total_len = msg.payload.len() + GCM_OVERHEAD;
        let mut payload = Vec::with_capacity(total_len);
        payload.extend_from_slice(&nonce.as_ref()[4..]);
        payload.extend_from_slice(msg.payload);

        self.enc_key
            .seal_in_place_separate_tag(nonce, aad, &mut payload[GCM_EXPLICIT_NONCE_LEN..])
            .map(|tag| payload.extend_from_slice(tag.as_ref()))
            .map_err(|_| Error::EncryptError)?;

        Ok(OpaqueMessage {
            typ: msg.typ,
            version: msg.version,
            payload: Payload::new(payload),
        })
    }
}

/// The RFC7905/RFC7539 ChaCha20Poly1305 construction, with the TLS1.2
/// AAD.
struct ChaCha20Poly1305MessageEncrypter {
    enc_key: aead::LessSafeKey,
    enc_offset: Iv,
}

struct ChaCha20Poly1305MessageDecrypter {
    dec_key: aead::LessSafeKey,
    dec_offset: Iv,
}

const CHACHAPOLY1305_OVERHEAD: usize = 16;

impl MessageDecrypter for ChaCha20Poly1305MessageDecrypter {
    fn decrypt(&mut self, mut msg: OpaqueMessage, seq: u64) -> Result<PlainMessage, Error> {
        let payload = &mut msg.payload.0;

        if payload.len() < CHACHAPOLY1305_OVERHEAD {
            return Err(Error::DecryptError);
        }

        let nonce = aead::Nonce::assume_unique_for_key(make_nonce(&self.dec_offset, seq));
        let aad = aead::Aad::from(make_tls12_aad(
            seq,
            msg.typ,
            msg.version,
            payload.len() - CHACHAPOLY1305_OVERHEAD,
        ));

        let plain_len = self
            .dec_key
            .open_in_place(nonce, aad, payload)
            .map_err(|_| Error::DecryptError)?
            .len();

        if plain_len > MAX_FRAGMENT_LEN {
            return Err(Error::PeerSentOversizedRecord);
        }

        payload.truncate(plain_len);
        Ok(msg.into_plain_message())
    }
}

impl MessageEncrypter for ChaCha20Poly1305MessageEncrypter {
    fn encrypt(&mut self, msg: BorrowedPlainMessage, seq: u64) -> Result<OpaqueMessage, Error> {
        let nonce = aead::Nonce::assume_unique_for_key(make_nonce(&self.enc_offset, seq));
        let aad = aead::Aad::from(make_tls12_aad(seq, msg.typ, msg.version, msg.payload.len()));

        let mut payload = Vec::with_capacity(msg.payload.len() + CHACHAPOLY1305_OVERHEAD);
        payload.extend_from_slice(msg.payload);

        self.enc_key
            .seal_in_place_append_tag(nonce, aad, &mut payload)
            .map_err(|_| Error::EncryptError)?;

        Ok(OpaqueMessage {
            typ: msg.typ,
            version: msg.version,
            payload: Payload::new(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{ContentType, ProtocolVersion};

    fn pair(
        alg: &dyn Tls12AeadAlgorithm,
    ) -> (Box<dyn MessageEncrypter>, Box<dyn MessageDecrypter>) {
        let shape = alg.key_block_shape();
        let key = vec![0x42u8; shape.enc_key_len];
        let iv = vec![0x24u8; shape.fixed_iv_len];
        let extra = vec![0x99u8; shape.explicit_nonce_len];
        (
            alg.encrypter(AeadKey::new(&key).unwrap(), &iv, &extra)
                .unwrap(),
            alg.decrypter(AeadKey::new(&key).unwrap(), &iv)
                .unwrap(),
        )
    }

    fn record(payload: &[u8]) -> BorrowedPlainMessage<'_> {
        BorrowedPlainMessage {
            typ: ContentType::ApplicationData,
            version: ProtocolVersion::TLSv1_2,
            payload,
        }
    }

    #[test]
    fn gcm_carries_explicit_nonce() {
        let (mut enc, mut dec) = pair(&AES128_GCM);
        let sealed = enc.encrypt(record(b"hello"), 7).unwrap();
        assert_eq!(sealed.payload.0.len(), 5 + GCM_OVERHEAD);

        let opened = dec.decrypt(sealed, 7).unwrap();
        assert_eq!(opened.payload.0, b"hello");
    }

    #[test]
    #[allow(trivial_casts)]
    fn wrong_sequence_fails_authentication() {
        for alg in [&AES256_GCM as &dyn Tls12AeadAlgorithm, &ChaCha20Poly1305] {
            let (mut enc, mut dec) = pair(alg);
            let sealed = enc.encrypt(record(b"hello"), 1).unwrap();
            assert_eq!(dec.decrypt(sealed, 2).unwrap_err(), Error::DecryptError);
        }
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let (mut enc, mut dec) = pair(&ChaCha20Poly1305);
        let mut sealed = enc.encrypt(record(b"hello"), 0).unwrap();
        sealed.payload.0[0] ^= 1;
        assert_eq!(dec.decrypt(sealed, 0).unwrap_err(), Error::DecryptError);
    }

    #[test]
    fn short_ciphertext_is_rejected() {
        let (_, mut dec) = pair(&AES128_GCM);
        let short = OpaqueMessage {
            typ: ContentType::ApplicationData,
            version: ProtocolVersion::TLSv1_2,
            payload: Payload::new(vec![0u8; GCM_OVERHEAD - 1]),
        };
        assert_eq!(dec.decrypt(short, 0).unwrap_err(), Error::DecryptError);
    }

    #[test]
    fn suites_name_their_hashes() {
        assert_eq!(
            TLS_PSK_WITH_AES_256_GCM_SHA384
                .hash_algorithm
                .output_len(),
            48
        );
        assert_eq!(
            TLS_PSK_WITH_CHACHA20_POLY1305_SHA256
                .aead_algorithm
                .key_block_shape()
                .enc_key_len,
            32
        );
    }
}
