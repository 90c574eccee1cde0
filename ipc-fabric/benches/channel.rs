#[macro_use]
extern crate criterion;

use bytemuck::{Pod, Zeroable};
use criterion::{black_box, Criterion};
use ipc_fabric::channel::{Receiver, Sender};
use ipc_fabric::codec::{decode_variant, encode_variant, Message};
use ipc_fabric::segment::SegmentParams;
use std::sync::Arc;
use std::thread;

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct Ping {
    n: u64,
}

enum PingMessage {
    Ping(Ping),
}

impl Message for PingMessage {
    const MAX_SIZE: usize = std::mem::size_of::<Ping>();

    fn encode_into(&self, buf: &mut [u8]) -> (u8, u16) {
        match self {
            PingMessage::Ping(p) => (0, encode_variant(p, buf)),
        }
    }

    fn decode_from(_discriminator: u8, payload_len: u16, buf: &[u8]) -> ipc_fabric::Result<Self> {
        Ok(PingMessage::Ping(decode_variant(payload_len, buf)?))
    }
}

fn round_trip(c: &mut Criterion) {
    let params = SegmentParams {
        physical_name: format!("ipc_fabric_bench_{}", std::process::id()),
        logical_name: "bench channel".into(),
        kind: 1,
        version: 1,
    };

    let receiver = Arc::new(Receiver::<PingMessage>::new(params.clone()).unwrap());
    let recv_handle = receiver.clone();
    let echoer = thread::spawn(move || loop {
        match recv_handle.receive(None) {
            Some(_) => {}
            None => return,
        }
    });

    let sender = Sender::<PingMessage>::new(params).unwrap();

    c.bench_function("channel send/receive round trip", |b| {
        b.iter(|| {
            let ok = sender.send(&PingMessage::Ping(Ping { n: 1 }), None);
            black_box(ok);
        })
    });

    receiver.disconnect();
    sender.disconnect();
    let _ = echoer.join();
}

criterion_group!(benches, round_trip);
criterion_main!(benches);
