use crate::tls12::Tls12CipherSuite;

pub(crate) mod tls12;

pub use tls12::{
    TLS_PSK_WITH_AES_128_GCM_SHA256, TLS_PSK_WITH_AES_256_GCM_SHA384,
    TLS_PSK_WITH_CHACHA20_POLY1305_SHA256,
};

/// Every cipher suite this crate implements, most preferred first.
pub static ALL_CIPHER_SUITES: &[&Tls12CipherSuite] = &[
    &TLS_PSK_WITH_AES_256_GCM_SHA384,
    &TLS_PSK_WITH_AES_128_GCM_SHA256,
    &TLS_PSK_WITH_CHACHA20_POLY1305_SHA256,
];
