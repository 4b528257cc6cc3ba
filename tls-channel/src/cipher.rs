use crate::enums::{ContentType, ProtocolVersion, Side};
use crate::error::Error;
use crate::msgs::codec;
use crate::msgs::message::{BorrowedPlainMessage, OpaqueMessage, PlainMessage};
use crate::tls12::ConnectionSecrets;

use zeroize::Zeroize;

/// Objects with this trait can decrypt records.
pub trait MessageDecrypter: Send + Sync {
    /// Authenticate and decrypt `m`, sent under sequence number `seq`.
    /// No plaintext is released unless authentication succeeds.
    fn decrypt(&mut self, m: OpaqueMessage, seq: u64) -> Result<PlainMessage, Error>;
}

/// Objects with this trait can encrypt records.
pub trait MessageEncrypter: Send + Sync {
    /// Protect `m` under sequence number `seq`.
    fn encrypt(&mut self, m: BorrowedPlainMessage, seq: u64) -> Result<OpaqueMessage, Error>;

    /// Whether this is a CBC mode that chains its IV across records
    /// instead of carrying one explicitly in each record.
    fn cbc_without_explicit_iv(&self) -> bool {
        false
    }
}

/// How a TLS1.2 bulk algorithm carves its keys out of the key block.
#[derive(Debug, Clone, Copy)]
pub struct KeyBlockShape {
    /// Length of each direction's encryption key.
    pub enc_key_len: usize,
    /// Length of each direction's fixed (implicit) IV.
    pub fixed_iv_len: usize,
    /// Length of the extra material used to seed explicit nonces.
    pub explicit_nonce_len: usize,
}

/// A bulk record-protection algorithm usable with TLS1.2 and DTLS1.2.
pub trait Tls12AeadAlgorithm: Send + Sync + 'static {
    /// Build a record decrypter.
    fn decrypter(&self, key: AeadKey, iv: &[u8]) -> Result<Box<dyn MessageDecrypter>, Error>;

    /// Build a record encrypter.  `extra` is the explicit nonce seed.
    fn encrypter(
        &self,
        key: AeadKey,
        iv: &[u8],
        extra: &[u8],
    ) -> Result<Box<dyn MessageEncrypter>, Error>;

    /// The key block layout this algorithm needs.
    fn key_block_shape(&self) -> KeyBlockShape;
}

/// A key for a bulk algorithm, wiped on drop.
pub struct AeadKey {
    buf: [u8; Self::MAX_LEN],
    used: usize,
}

impl AeadKey {
    const MAX_LEN: usize = 32;

    pub(crate) fn new(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() > Self::MAX_LEN {
            return Err(Error::General("key too long".into()));
        }
        let mut key = Self {
            buf: [0u8; Self::MAX_LEN],
            used: bytes.len(),
        };
        key.buf[..bytes.len()].copy_from_slice(bytes);
        Ok(key)
    }
}

impl AsRef<[u8]> for AeadKey {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.used]
    }
}

impl Drop for AeadKey {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

/// A 12-byte record nonce base.
#[derive(Default, Clone)]
pub struct Iv(pub(crate) [u8; NONCE_LEN]);

impl Iv {
    pub(crate) fn new(value: [u8; NONCE_LEN]) -> Self {
        Self(value)
    }

    pub(crate) fn copy(value: &[u8]) -> Self {
        debug_assert_eq!(value.len(), NONCE_LEN);
        let mut iv = Self::new(Default::default());
        iv.0.copy_from_slice(value);
        iv
    }
}

pub(crate) const NONCE_LEN: usize = 12;

/// Combine an `Iv` and sequence number to produce a unique nonce.
///
/// This is `iv ^ seq` where `seq` is encoded as a 96-bit big-endian integer.
pub(crate) fn make_nonce(iv: &Iv, seq: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    codec::put_u64(seq, &mut nonce[4..]);

    nonce
        .iter_mut()
        .zip(iv.0.iter())
        .for_each(|(nonce, iv)| {
            *nonce ^= *iv;
        });

    nonce
}

/// seq_num + content type + version + length.  For DTLS `seq` already
/// carries the epoch in its top 16 bits, so the layout is shared.
pub(crate) fn make_tls12_aad(
    seq: u64,
    typ: ContentType,
    vers: ProtocolVersion,
    len: usize,
) -> [u8; TLS12_AAD_SIZE] {
    let mut out = [0; TLS12_AAD_SIZE];
    codec::put_u64(seq, &mut out[0..]);
    out[8] = typ.get_u8();
    codec::put_u16(vers.get_uint(), &mut out[9..]);
    codec::put_u16(len as u16, &mut out[11..]);
    out
}

const TLS12_AAD_SIZE: usize = 8 + 1 + 2 + 2;

enum Protection {
    Read(Box<dyn MessageDecrypter>),
    Write(Box<dyn MessageEncrypter>),
}

/// The record protection for one direction of one epoch.
///
/// Built once the corresponding change_cipher_spec is processed, from the
/// negotiated suite and session keys.  The channel owns one of
/// these per direction and replaces them independently.
pub(crate) struct ConnectionCipherState {
    protection: Protection,
}

impl ConnectionCipherState {
    /// Protection for records we read, which were written with the keys
    /// belonging to `keys_side`.
    pub(crate) fn new_reader(
        keys_side: Side,
        secrets: &ConnectionSecrets,
    ) -> Result<Self, Error> {
        let suite = secrets.suite();
        let keys = secrets.direction_keys(keys_side)?;
        let decrypter = suite
            .aead_algorithm
            .decrypter(keys.key, &keys.iv)?;

        Ok(Self {
            protection: Protection::Read(decrypter),
        })
    }

    /// Protection for records we write with the keys belonging to
    /// `keys_side`.
    pub(crate) fn new_writer(
        keys_side: Side,
        secrets: &ConnectionSecrets,
    ) -> Result<Self, Error> {
        let suite = secrets.suite();
        let keys = secrets.direction_keys(keys_side)?;
        let encrypter = suite
            .aead_algorithm
            .encrypter(keys.key, &keys.iv, &keys.extra)?;

        Ok(Self {
            protection: Protection::Write(encrypter),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_encrypter(encrypter: Box<dyn MessageEncrypter>) -> Self {
        Self {
            protection: Protection::Write(encrypter),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_decrypter(decrypter: Box<dyn MessageDecrypter>) -> Self {
        Self {
            protection: Protection::Read(decrypter),
        }
    }

    /// True when the write side must split application data so the first
    /// byte travels alone.
    pub(crate) fn cbc_without_explicit_iv(&self) -> bool {
        match &self.protection {
            Protection::Write(enc) => enc.cbc_without_explicit_iv(),
            Protection::Read(_) => false,
        }
    }

    pub(crate) fn encrypt(
        &mut self,
        msg: BorrowedPlainMessage,
        seq: u64,
    ) -> Result<OpaqueMessage, Error> {
        match &mut self.protection {
            Protection::Write(enc) => enc.encrypt(msg, seq),
            Protection::Read(_) => Err(Error::EncryptError),
        }
    }

    pub(crate) fn decrypt(&mut self, msg: OpaqueMessage, seq: u64) -> Result<PlainMessage, Error> {
        match &mut self.protection {
            Protection::Read(dec) => dec.decrypt(msg, seq),
            Protection::Write(_) => Err(Error::DecryptError),
        }
    }
}
