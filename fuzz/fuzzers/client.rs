#![no_main]
#[macro_use]
extern crate libfuzzer_sys;
extern crate tls_channel;

use std::sync::Arc;

use tls_channel::client::ClientConfig;
use tls_channel::{Callbacks, Channel, Event, ProtocolVersion, Session};

struct Sink;

impl Callbacks for Sink {
    fn emit(&mut self, _data: &[u8]) {}

    fn deliver(&mut self, _event: Event<'_>) {}

    fn handshake_complete(&mut self, _session: &Session) -> bool {
        true
    }
}

fuzz_target!(|data: &[u8]| {
    let _ = env_logger::try_init();
    let (version, data) = match data.split_first() {
        Some((&0, rest)) => (ProtocolVersion::TLSv1_2, rest),
        Some((_, rest)) => (ProtocolVersion::DTLSv1_2, rest),
        None => return,
    };

    let config = Arc::new(ClientConfig::new("client-1", vec![0x42; 32]));
    let mut client = match Channel::new_client(config, Box::new(Sink), version) {
        Ok(client) => client,
        Err(_) => return,
    };
    let _ = client.received_data(data);
});
