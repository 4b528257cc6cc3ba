#![allow(dead_code)]

pub use std::sync::{Arc, Mutex};

use tls_channel::client::ClientConfig;
use tls_channel::server::{ServerConfig, StaticPskStore};
use tls_channel::{Alert, Callbacks, Channel, Error, Event, ProtocolVersion, Session};

pub const PSK_IDENTITY: &[u8] = b"client-1";
pub const PSK: [u8; 32] = [0x42; 32];

/// Everything one end's callbacks were handed.
#[derive(Default)]
pub struct Recorded {
    pub emitted: Vec<Vec<u8>>,
    pub data: Vec<u8>,
    pub data_records: usize,
    pub alerts: Vec<Alert>,
    pub heartbeats: Vec<Vec<u8>>,
    pub sessions: Vec<Session>,
}

pub struct Recorder {
    recorded: Arc<Mutex<Recorded>>,
    approve: bool,
}

impl Callbacks for Recorder {
    fn emit(&mut self, data: &[u8]) {
        self.recorded
            .lock()
            .unwrap()
            .emitted
            .push(data.to_vec());
    }

    fn deliver(&mut self, event: Event<'_>) {
        let mut recorded = self.recorded.lock().unwrap();
        match event {
            Event::ApplicationData(data) => {
                recorded.data.extend_from_slice(data);
                recorded.data_records += 1;
            }
            Event::Alert(alert) => recorded.alerts.push(alert),
            Event::HeartbeatResponse(payload) => recorded
                .heartbeats
                .push(payload.to_vec()),
        }
    }

    fn handshake_complete(&mut self, session: &Session) -> bool {
        self.recorded
            .lock()
            .unwrap()
            .sessions
            .push(session.clone());
        self.approve
    }
}

/// A channel and the record of what it did.
pub struct Endpoint {
    pub channel: Channel,
    pub recorded: Arc<Mutex<Recorded>>,
}

impl Endpoint {
    pub fn take_emitted(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.recorded.lock().unwrap().emitted)
    }

    pub fn take_data(&self) -> Vec<u8> {
        std::mem::take(&mut self.recorded.lock().unwrap().data)
    }

    pub fn data_records(&self) -> usize {
        self.recorded.lock().unwrap().data_records
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.recorded.lock().unwrap().alerts.clone()
    }

    pub fn heartbeats(&self) -> Vec<Vec<u8>> {
        self.recorded
            .lock()
            .unwrap()
            .heartbeats
            .clone()
    }

    pub fn sessions_offered(&self) -> usize {
        self.recorded.lock().unwrap().sessions.len()
    }
}

fn recorder(approve: bool) -> (Box<Recorder>, Arc<Mutex<Recorded>>) {
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let callbacks = Box::new(Recorder {
        recorded: Arc::clone(&recorded),
        approve,
    });
    (callbacks, recorded)
}

pub fn make_client_config() -> ClientConfig {
    ClientConfig::new(PSK_IDENTITY, PSK.to_vec())
}

pub fn make_server_config() -> ServerConfig {
    let mut store = StaticPskStore::new();
    store.insert(PSK_IDENTITY, PSK.to_vec());
    ServerConfig::new(Arc::new(store))
}

pub fn make_client(config: ClientConfig, version: ProtocolVersion) -> Endpoint {
    make_client_approving(config, version, true)
}

pub fn make_client_approving(
    config: ClientConfig,
    version: ProtocolVersion,
    approve: bool,
) -> Endpoint {
    let (callbacks, recorded) = recorder(approve);
    let channel = Channel::new_client(Arc::new(config), callbacks, version).unwrap();
    Endpoint { channel, recorded }
}

pub fn make_server(config: ServerConfig) -> Endpoint {
    make_server_approving(config, true)
}

pub fn make_server_approving(config: ServerConfig, approve: bool) -> Endpoint {
    let (callbacks, recorded) = recorder(approve);
    let channel = Channel::new_server(Arc::new(config), callbacks);
    Endpoint { channel, recorded }
}

pub fn make_pair(version: ProtocolVersion) -> (Endpoint, Endpoint) {
    make_pair_for_configs(make_client_config(), make_server_config(), version)
}

pub fn make_pair_for_configs(
    client_config: ClientConfig,
    server_config: ServerConfig,
    version: ProtocolVersion,
) -> (Endpoint, Endpoint) {
    (
        make_client(client_config, version),
        make_server(server_config),
    )
}

/// Hand every record `left` emitted to `right`, one record per call.
/// Stops at the first error.  Returns the number of records moved.
pub fn transfer(left: &Endpoint, right: &mut Endpoint) -> Result<usize, Error> {
    let records = left.take_emitted();
    for record in &records {
        assert_eq!(right.channel.received_data(record)?, 0);
    }
    Ok(records.len())
}

/// As `transfer`, but a byte at a time.  Returns what each call said
/// was still needed.
pub fn transfer_bytewise(left: &Endpoint, right: &mut Endpoint) -> Result<Vec<usize>, Error> {
    let mut needed = Vec::new();
    for record in left.take_emitted() {
        for byte in record.chunks(1) {
            needed.push(right.channel.received_data(byte)?);
        }
    }
    Ok(needed)
}

pub fn do_handshake(client: &mut Endpoint, server: &mut Endpoint) {
    do_handshake_until_error(client, server).unwrap();
}

pub fn do_handshake_until_error(client: &mut Endpoint, server: &mut Endpoint) -> Result<(), Error> {
    for _ in 0..16 {
        let sent = transfer(client, server)? + transfer(server, client)?;
        if sent == 0 {
            return Ok(());
        }
    }
    panic!("handshake did not settle");
}

pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}
