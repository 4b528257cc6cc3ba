#![no_main]
#[macro_use]
extern crate libfuzzer_sys;
extern crate tls_channel;

use tls_channel::internal::msgs::alert::Alert;
use tls_channel::internal::msgs::codec::Codec;
use tls_channel::internal::msgs::handshake::HandshakeMessagePayload;
use tls_channel::internal::msgs::heartbeat::HeartbeatPayload;
use tls_channel::HandshakeType;

fuzz_target!(|data: &[u8]| {
    let (typ, body) = match data.split_first() {
        Some((typ, body)) => (HandshakeType::from(*typ), body),
        None => return,
    };

    if let Ok(msg) = HandshakeMessagePayload::read_body(typ, body) {
        let _ = msg.body_encoding();
    }

    let _ = Alert::read_bytes(body);
    let _ = HeartbeatPayload::read_bytes(body);
});
