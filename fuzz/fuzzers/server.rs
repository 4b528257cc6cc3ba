#![no_main]
#[macro_use]
extern crate libfuzzer_sys;
extern crate tls_channel;

use std::sync::Arc;

use tls_channel::server::{ServerConfig, StaticPskStore};
use tls_channel::{Callbacks, Channel, Event, Session};

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
    let mut store = StaticPskStore::new();
    store.insert("client-1", vec![0x42; 32]);
    let config = Arc::new(ServerConfig::new(Arc::new(store)));
    let mut server = Channel::new_server(config, Box::new(Sink));
    let _ = server.received_data(data);
});
