use crate::channel::Channel;
use crate::check::inappropriate_message;
use crate::enums::{AlertDescription, ContentType, HandshakeType, ProtocolVersion, Side};
use crate::error::{Error, PeerIncompatible, PeerMisbehaved};
use crate::handshake::{Incoming, State};
use crate::log::{debug, trace};
use crate::msgs::base::{Payload, PayloadU16, PayloadU8};
use crate::msgs::enums::{Compression, HeartbeatMode};
use crate::msgs::handshake::{
    ClientHelloPayload, HandshakePayload, HasHelloExtensions, HelloExtension, Random,
    ServerHelloPayload, ServerPskKeyExchange, SessionId,
};
use crate::server::ServerConfig;
use crate::tls12::{ConnectionRandoms, ConnectionSecrets, Tls12CipherSuite};

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use std::sync::Arc;

pub(crate) type NextState = Box<dyn State>;
pub(crate) type NextStateOrError = Result<NextState, Error>;

/// The state every server handshake starts in.
pub(crate) fn expect_client_hello(config: Arc<ServerConfig>) -> NextState {
    Box::new(ExpectClientHello { config })
}

/// Ask the client for a new handshake with a HelloRequest.
pub(crate) fn request_renegotiation(
    cx: &mut Channel,
    config: Arc<ServerConfig>,
) -> NextStateOrError {
    debug!("sending HelloRequest");
    cx.send_handshake_message(HandshakePayload::HelloRequest)?;
    Ok(expect_client_hello(config))
}

struct ExpectClientHello {
    config: Arc<ServerConfig>,
}

impl ExpectClientHello {
    /// Settle the version of the pending handshake.
    fn choose_version(
        &self,
        cx: &mut Channel,
        client_hello: &ClientHelloPayload,
    ) -> Result<ProtocolVersion, Error> {
        if let Some(active) = cx.active_state() {
            if client_hello.client_version != active.version() {
                return Err(PeerMisbehaved::RenegotiationChangedVersion.into());
            }
            return Ok(active.version());
        }

        let pending = cx.pending_mut()?;
        let version = match pending.version().is_datagram() {
            true => ProtocolVersion::DTLSv1_2,
            false => ProtocolVersion::TLSv1_2,
        };
        if !client_hello
            .client_version
            .is_at_least(version)
        {
            return Err(PeerIncompatible::Tls12NotOffered.into());
        }

        pending.set_version(version);
        Ok(version)
    }

    fn choose_suite(
        &self,
        version: ProtocolVersion,
        client_hello: &ClientHelloPayload,
    ) -> Result<&'static Tls12CipherSuite, Error> {
        self.config
            .cipher_suites
            .iter()
            .copied()
            .find(|scs| {
                scs.usable_for_version(version) && client_hello.cipher_suites.contains(&scs.suite)
            })
            .ok_or_else(|| PeerIncompatible::NoCipherSuitesInCommon.into())
    }
}

impl State for ExpectClientHello {
    fn handle(self: Box<Self>, cx: &mut Channel, m: Incoming) -> NextStateOrError {
        let client_hello =
            require_handshake_msg!(m, HandshakeType::ClientHello, HandshakePayload::ClientHello)?;
        trace!("we got a clienthello {:?}", client_hello);

        cx.secure_renegotiation_check_client_hello(client_hello)?;

        if cx.active_state().is_some()
            && !self
                .config
                .allow_client_initiated_renegotiation
        {
            debug!("refusing client-initiated renegotiation");
            cx.send_warning_alert(AlertDescription::NoRenegotiation);
            return Ok(self);
        }

        let version = self.choose_version(cx, client_hello)?;

        if client_hello.has_duplicate_extension() {
            return Err(PeerMisbehaved::DuplicateClientHelloExtensions.into());
        }

        if !client_hello
            .compression_methods
            .contains(&Compression::Null)
        {
            return Err(PeerIncompatible::NullCompressionRequired.into());
        }

        let secure_renegotiation = client_hello
            .secure_renegotiation_info()
            .is_some();
        if self.config.require_secure_renegotiation && !secure_renegotiation {
            return Err(PeerIncompatible::SecureRenegotiationRequired.into());
        }

        let suite = self.choose_suite(version, client_hello)?;
        debug!("decided upon suite {:?}", suite);

        let mut extensions = Vec::new();
        if secure_renegotiation {
            extensions.push(HelloExtension::RenegotiationInfo(PayloadU8::new(
                cx.secure_renegotiation_data_for_server_hello(),
            )));
        }

        let peer_heartbeat_mode = client_hello
            .get_heartbeat_mode()
            .filter(|_| self.config.enable_heartbeats);
        if peer_heartbeat_mode.is_some() {
            extensions.push(HelloExtension::Heartbeat(HeartbeatMode::PeerAllowedToSend));
        }

        let max_fragment_length = client_hello
            .get_max_fragment_length()
            .filter(|mfl| self.config.max_fragment_length_accepted && mfl.size().is_some());
        if let Some(mfl) = max_fragment_length {
            extensions.push(HelloExtension::MaxFragmentLength(mfl));
        }

        let server_hello = ServerHelloPayload {
            server_version: version,
            random: Random::new()?,
            session_id: SessionId::random()?,
            cipher_suite: suite.suite,
            compression_method: Compression::Null,
            extensions,
        };

        let randoms = ConnectionRandoms {
            client: client_hello.random.0,
            server: server_hello.random.0,
        };

        let pending = cx.pending_mut()?;
        pending
            .transcript
            .add_message(m.encoded());
        pending.client_hello = Some(client_hello.clone());
        pending.server_hello = Some(server_hello.clone());
        pending.peer_heartbeat_mode = peer_heartbeat_mode;

        cx.send_handshake_message(HandshakePayload::ServerHello(server_hello))?;
        cx.pending_mut()?
            .transcript
            .start_hash(suite.hash_algorithm);

        if let Some(hint) = &self.config.psk_identity_hint {
            cx.send_handshake_message(HandshakePayload::ServerKeyExchange(
                ServerPskKeyExchange {
                    identity_hint: PayloadU16::new(hint.clone()),
                },
            ))?;
        }
        cx.send_handshake_message(HandshakePayload::ServerHelloDone)?;

        if let Some(size) = max_fragment_length.and_then(|mfl| mfl.size()) {
            debug!("agreed to {} byte fragments", size);
            cx.set_maximum_fragment_size(size);
        }

        Ok(Box::new(ExpectClientKx {
            config: self.config,
            suite,
            randoms,
        }))
    }
}

struct ExpectClientKx {
    config: Arc<ServerConfig>,
    suite: &'static Tls12CipherSuite,
    randoms: ConnectionRandoms,
}

impl State for ExpectClientKx {
    fn handle(self: Box<Self>, cx: &mut Channel, m: Incoming) -> NextStateOrError {
        let client_kx = require_handshake_msg!(
            m,
            HandshakeType::ClientKeyExchange,
            HandshakePayload::ClientKeyExchange
        )?;

        let identity = &client_kx.identity.0;
        let mut psk = self
            .config
            .psk_store
            .resolve(identity)
            .ok_or(PeerMisbehaved::UnknownPskIdentity)?;

        let pending = cx.pending_mut()?;
        pending
            .transcript
            .add_message(m.encoded());
        pending.secrets = Some(ConnectionSecrets::from_psk(&psk, self.randoms, self.suite));
        pending.psk_identity = identity.clone();
        psk.zeroize();

        Ok(Box::new(ExpectCcs {
            config: self.config,
        }))
    }
}

struct ExpectCcs {
    config: Arc<ServerConfig>,
}

impl State for ExpectCcs {
    fn handle(self: Box<Self>, cx: &mut Channel, m: Incoming) -> NextStateOrError {
        match m {
            Incoming::ChangeCipherSpec => {
                cx.change_cipher_spec_reader(Side::Server)?;
                Ok(Box::new(ExpectFinished {
                    config: self.config,
                }))
            }
            _ => Err(inappropriate_message(&m, &[ContentType::ChangeCipherSpec])),
        }
    }

    fn expecting_ccs(&self) -> bool {
        true
    }
}

struct ExpectFinished {
    config: Arc<ServerConfig>,
}

impl State for ExpectFinished {
    fn handle(self: Box<Self>, cx: &mut Channel, m: Incoming) -> NextStateOrError {
        let finished =
            require_handshake_msg!(m, HandshakeType::Finished, HandshakePayload::Finished)?;

        let pending = cx.pending_mut()?;
        let hash = pending
            .transcript
            .current_hash()
            .ok_or_else(|| Error::General("transcript is not hashing".into()))?;
        let expect_verify_data = pending
            .secrets
            .as_ref()
            .ok_or(Error::HandshakeNotComplete)?
            .client_verify_data(&hash);

        if !bool::from(expect_verify_data.ct_eq(&finished.0)) {
            return Err(PeerMisbehaved::IncorrectFinished.into());
        }

        pending.client_verify_data = expect_verify_data;
        pending
            .transcript
            .add_message(m.encoded());

        cx.send_change_cipher_spec()?;
        cx.change_cipher_spec_writer(Side::Server)?;

        let pending = cx.pending_mut()?;
        let hash = pending
            .transcript
            .current_hash()
            .ok_or_else(|| Error::General("transcript is not hashing".into()))?;
        let verify_data = pending
            .secrets
            .as_ref()
            .ok_or(Error::HandshakeNotComplete)?
            .server_verify_data(&hash);
        pending.server_verify_data = verify_data.clone();

        cx.send_handshake_message(HandshakePayload::Finished(Payload::new(verify_data)))?;
        cx.complete_handshake()?;

        Ok(expect_client_hello(self.config))
    }
}
