use crate::channel::Channel;
use crate::check::{inappropriate_handshake_message, inappropriate_message};
use crate::client::ClientConfig;
use crate::enums::{AlertDescription, ContentType, HandshakeType, Side};
use crate::error::{Error, PeerIncompatible, PeerMisbehaved};
use crate::handshake::{Incoming, State};
use crate::log::{debug, trace};
use crate::msgs::base::{Payload, PayloadU16, PayloadU8};
use crate::msgs::enums::{Compression, ExtensionType, HeartbeatMode};
use crate::msgs::handshake::{
    ClientHelloPayload, ClientPskKeyExchange, HandshakeMessagePayload, HandshakePayload,
    HasHelloExtensions, HelloExtension, Random, ServerHelloPayload, SessionId,
};
use crate::tls12::{ConnectionRandoms, ConnectionSecrets, Tls12CipherSuite};

use subtle::ConstantTimeEq;

use std::sync::Arc;

pub(crate) type NextState = Box<dyn State>;
pub(crate) type NextStateOrError = Result<NextState, Error>;

/// The state an idle client handshake starts in: waiting for the server
/// to ask for renegotiation.
pub(crate) fn expect_hello_request(config: Arc<ClientConfig>) -> NextState {
    Box::new(ExpectHelloRequest { config })
}

fn is_hello_request(m: &Incoming) -> bool {
    matches!(
        m,
        Incoming::Handshake {
            payload: HandshakeMessagePayload {
                typ: HandshakeType::HelloRequest,
                ..
            },
            ..
        }
    )
}

/// Send a ClientHello for the pending handshake.
pub(crate) fn start_handshake(cx: &mut Channel, config: Arc<ClientConfig>) -> NextStateOrError {
    let version = cx.pending_mut()?.version();

    let mut extensions = vec![HelloExtension::RenegotiationInfo(PayloadU8::new(
        cx.secure_renegotiation_data_for_client_hello(),
    ))];
    if config.enable_heartbeats {
        extensions.push(HelloExtension::Heartbeat(HeartbeatMode::PeerAllowedToSend));
    }
    if let Some(mfl) = config.max_fragment_length {
        extensions.push(HelloExtension::MaxFragmentLength(mfl));
    }

    let cipher_suites = config
        .cipher_suites
        .iter()
        .filter(|scs| scs.usable_for_version(version))
        .map(|scs| scs.suite)
        .collect::<Vec<_>>();
    if cipher_suites.is_empty() {
        return Err(Error::General(format!(
            "no configured cipher suites are usable with {:?}",
            version
        )));
    }

    let client_hello = ClientHelloPayload {
        client_version: version,
        random: Random::new()?,
        session_id: SessionId::empty(),
        cookie: version
            .is_datagram()
            .then(PayloadU8::empty),
        cipher_suites,
        compression_methods: vec![Compression::Null],
        extensions,
    };

    debug!("sending ClientHello {:#?}", client_hello);
    cx.pending_mut()?.client_hello = Some(client_hello.clone());
    cx.send_handshake_message(HandshakePayload::ClientHello(client_hello))?;

    Ok(Box::new(ExpectServerHello { config }))
}

struct ExpectHelloRequest {
    config: Arc<ClientConfig>,
}

impl State for ExpectHelloRequest {
    fn handle(self: Box<Self>, cx: &mut Channel, m: Incoming) -> NextStateOrError {
        if !is_hello_request(&m) {
            return match &m {
                Incoming::Handshake { payload, .. } => Err(inappropriate_handshake_message(
                    payload,
                    &[HandshakeType::HelloRequest],
                )),
                _ => Err(inappropriate_message(&m, &[ContentType::Handshake])),
            };
        }

        if !self
            .config
            .allow_server_initiated_renegotiation
        {
            debug!("refusing server-initiated renegotiation");
            cx.send_warning_alert(AlertDescription::NoRenegotiation);
            return Ok(self);
        }

        debug!("server requested renegotiation");
        start_handshake(cx, self.config)
    }
}

struct ExpectServerHello {
    config: Arc<ClientConfig>,
}

impl ExpectServerHello {
    /// Check the server's choices against what we offered, returning our
    /// copy of the chosen suite.
    fn check_server_hello(
        &self,
        cx: &Channel,
        offered: &ClientHelloPayload,
        server_hello: &ServerHelloPayload,
    ) -> Result<&'static Tls12CipherSuite, Error> {
        if server_hello.server_version != offered.client_version {
            return Err(match cx.active_state() {
                Some(_) => PeerMisbehaved::RenegotiationChangedVersion.into(),
                None => PeerIncompatible::UnsupportedVersion(server_hello.server_version).into(),
            });
        }

        if !offered
            .cipher_suites
            .contains(&server_hello.cipher_suite)
        {
            return Err(PeerMisbehaved::SelectedUnofferedCipherSuite.into());
        }
        let suite = self
            .config
            .cipher_suites
            .iter()
            .copied()
            .find(|scs| scs.suite == server_hello.cipher_suite)
            .ok_or(PeerMisbehaved::SelectedUnofferedCipherSuite)?;

        if server_hello.compression_method != Compression::Null {
            return Err(PeerMisbehaved::SelectedUnofferedCompression.into());
        }

        if server_hello.has_duplicate_extension() {
            return Err(PeerMisbehaved::DuplicateServerHelloExtensions.into());
        }

        for ext in &server_hello.extensions {
            match ext.get_type() {
                ExtensionType::RenegotiationInfo => {}
                ExtensionType::Heartbeat if offered.get_heartbeat_mode().is_some() => {}
                ExtensionType::Heartbeat => {
                    return Err(PeerMisbehaved::UnsolicitedHeartbeatExtension.into());
                }
                ExtensionType::MaxFragmentLength => {
                    if offered.get_max_fragment_length() != server_hello.get_max_fragment_length()
                    {
                        return Err(PeerMisbehaved::SelectedUnofferedMaxFragmentLength.into());
                    }
                }
                _ => return Err(PeerMisbehaved::UnsolicitedServerHelloExtension.into()),
            }
        }

        Ok(suite)
    }
}

impl State for ExpectServerHello {
    fn handle(self: Box<Self>, cx: &mut Channel, m: Incoming) -> NextStateOrError {
        if is_hello_request(&m) {
            trace!("ignoring HelloRequest during handshake");
            return Ok(self);
        }

        let server_hello =
            require_handshake_msg!(m, HandshakeType::ServerHello, HandshakePayload::ServerHello)?;
        trace!("we got a ServerHello {:#?}", server_hello);
        cx.secure_renegotiation_check_server_hello(server_hello)?;

        let offered = cx
            .pending_mut()?
            .client_hello
            .clone()
            .ok_or_else(|| Error::General("ServerHello before ClientHello".into()))?;
        let suite = self.check_server_hello(cx, &offered, server_hello)?;
        debug!("using ciphersuite {:?}", suite);

        let pending = cx.pending_mut()?;
        pending
            .transcript
            .add_message(m.encoded());
        pending
            .transcript
            .start_hash(suite.hash_algorithm);
        pending.peer_heartbeat_mode = server_hello.get_heartbeat_mode();
        pending.server_hello = Some(server_hello.clone());

        if let Some(size) = server_hello
            .get_max_fragment_length()
            .and_then(|mfl| mfl.size())
        {
            debug!("server agreed to {} byte fragments", size);
            cx.set_maximum_fragment_size(size);
        }

        Ok(Box::new(ExpectServerKxOrDone {
            config: self.config,
            suite,
            randoms: ConnectionRandoms {
                client: offered.random.0,
                server: server_hello.random.0,
            },
        }))
    }
}

struct ExpectServerKxOrDone {
    config: Arc<ClientConfig>,
    suite: &'static Tls12CipherSuite,
    randoms: ConnectionRandoms,
}

impl State for ExpectServerKxOrDone {
    fn handle(self: Box<Self>, cx: &mut Channel, m: Incoming) -> NextStateOrError {
        if is_hello_request(&m) {
            trace!("ignoring HelloRequest during handshake");
            return Ok(self);
        }

        match &m {
            Incoming::Handshake {
                payload:
                    HandshakeMessagePayload {
                        payload: HandshakePayload::ServerKeyExchange(skx),
                        ..
                    },
                encoded,
            } => {
                debug!("server identity hint {:?}", skx.identity_hint);
                cx.pending_mut()?
                    .transcript
                    .add_message(encoded);
                Ok(Box::new(ExpectServerDone {
                    config: self.config,
                    suite: self.suite,
                    randoms: self.randoms,
                }))
            }
            Incoming::Handshake {
                payload:
                    HandshakeMessagePayload {
                        payload: HandshakePayload::ServerHelloDone,
                        ..
                    },
                encoded,
            } => emit_client_flight(cx, self.config, self.suite, self.randoms, encoded),
            Incoming::Handshake { payload, .. } => Err(inappropriate_handshake_message(
                payload,
                &[
                    HandshakeType::ServerKeyExchange,
                    HandshakeType::ServerHelloDone,
                ],
            )),
            _ => Err(inappropriate_message(&m, &[ContentType::Handshake])),
        }
    }
}

struct ExpectServerDone {
    config: Arc<ClientConfig>,
    suite: &'static Tls12CipherSuite,
    randoms: ConnectionRandoms,
}

impl State for ExpectServerDone {
    fn handle(self: Box<Self>, cx: &mut Channel, m: Incoming) -> NextStateOrError {
        if is_hello_request(&m) {
            trace!("ignoring HelloRequest during handshake");
            return Ok(self);
        }

        match &m {
            Incoming::Handshake {
                payload:
                    HandshakeMessagePayload {
                        payload: HandshakePayload::ServerHelloDone,
                        ..
                    },
                encoded,
            } => emit_client_flight(cx, self.config, self.suite, self.randoms, encoded),
            Incoming::Handshake { payload, .. } => Err(inappropriate_handshake_message(
                payload,
                &[HandshakeType::ServerHelloDone],
            )),
            _ => Err(inappropriate_message(&m, &[ContentType::Handshake])),
        }
    }
}

/// Answer the server's flight: ClientKeyExchange, ChangeCipherSpec and
/// Finished, switching to the new keys in between.
fn emit_client_flight(
    cx: &mut Channel,
    config: Arc<ClientConfig>,
    suite: &'static Tls12CipherSuite,
    randoms: ConnectionRandoms,
    server_done: &[u8],
) -> NextStateOrError {
    cx.pending_mut()?
        .transcript
        .add_message(server_done);

    cx.send_handshake_message(HandshakePayload::ClientKeyExchange(ClientPskKeyExchange {
        identity: PayloadU16::new(config.psk_identity.clone()),
    }))?;

    let pending = cx.pending_mut()?;
    pending.secrets = Some(ConnectionSecrets::from_psk(&config.psk, randoms, suite));
    pending.psk_identity = config.psk_identity.clone();

    cx.send_change_cipher_spec()?;
    cx.change_cipher_spec_writer(Side::Client)?;

    let pending = cx.pending_mut()?;
    let hash = pending
        .transcript
        .current_hash()
        .ok_or_else(|| Error::General("transcript is not hashing".into()))?;
    let verify_data = pending
        .secrets
        .as_ref()
        .ok_or(Error::HandshakeNotComplete)?
        .client_verify_data(&hash);
    pending.client_verify_data = verify_data.clone();

    cx.send_handshake_message(HandshakePayload::Finished(Payload::new(verify_data)))?;
    Ok(Box::new(ExpectCcs { config }))
}

struct ExpectCcs {
    config: Arc<ClientConfig>,
}

impl State for ExpectCcs {
    fn handle(self: Box<Self>, cx: &mut Channel, m: Incoming) -> NextStateOrError {
        match m {
            Incoming::ChangeCipherSpec => {
                cx.change_cipher_spec_reader(Side::Client)?;
                Ok(Box::new(ExpectFinished {
                    config: self.config,
                }))
            }
            _ if is_hello_request(&m) => {
                trace!("ignoring HelloRequest during handshake");
                Ok(self)
            }
            _ => Err(inappropriate_message(&m, &[ContentType::ChangeCipherSpec])),
        }
    }

    fn expecting_ccs(&self) -> bool {
        true
    }
}

struct ExpectFinished {
    config: Arc<ClientConfig>,
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
            .server_verify_data(&hash);

        if !bool::from(expect_verify_data.ct_eq(&finished.0)) {
            return Err(PeerMisbehaved::IncorrectFinished.into());
        }

        pending.server_verify_data = expect_verify_data;
        pending
            .transcript
            .add_message(m.encoded());

        cx.complete_handshake()?;
        Ok(expect_hello_request(self.config))
    }
}
