//! A producer keeps sending while the receiver disconnects mid-stream from
//! a third thread. The producer must observe at most one more send than
//! the consumer actually counted.

use bytemuck::{Pod, Zeroable};
use ipc_fabric::channel::{Receiver, Sender};
use ipc_fabric::codec::{decode_variant, encode_variant, Message};
use ipc_fabric::segment::SegmentParams;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct Tick {
    n: u64,
}

enum Item {
    Tick(Tick),
}

impl Message for Item {
    const MAX_SIZE: usize = std::mem::size_of::<Tick>();

    fn encode_into(&self, buf: &mut [u8]) -> (u8, u16) {
        match self {
            Item::Tick(t) => (0, encode_variant(t, buf)),
        }
    }

    fn decode_from(_discriminator: u8, payload_len: u16, buf: &[u8]) -> ipc_fabric::Result<Self> {
        Ok(Item::Tick(decode_variant(payload_len, buf)?))
    }
}

#[test]
fn disconnect_mid_stream_leaves_counts_within_one() {
    let params = SegmentParams {
        physical_name: format!("ipc_fabric_test_disconnect_{}", std::process::id()),
        logical_name: "disconnect test".into(),
        kind: 11,
        version: 1,
    };

    let receiver = Arc::new(Receiver::<Item>::new(params.clone()).unwrap());
    let sender = Sender::<Item>::new(params).unwrap();

    let consumed = Arc::new(AtomicUsize::new(0));
    let produced = Arc::new(AtomicUsize::new(0));

    let consumer_receiver = receiver.clone();
    let consumer_count = consumed.clone();
    let consumer = thread::spawn(move || loop {
        match consumer_receiver.receive(None) {
            Some(Item::Tick(_)) => {
                consumer_count.fetch_add(1, Ordering::Relaxed);
            }
            None => return,
        }
    });

    let producer_count = produced.clone();
    let producer = thread::spawn(move || {
        let mut n = 0u64;
        loop {
            if !sender.send(&Item::Tick(Tick { n }), None) {
                return;
            }
            producer_count.fetch_add(1, Ordering::Relaxed);
            n += 1;
        }
    });

    thread::sleep(Duration::from_secs(1));
    receiver.disconnect();

    consumer.join().unwrap();
    producer.join().unwrap();

    let consumed = consumed.load(Ordering::Relaxed);
    let produced = produced.load(Ordering::Relaxed);

    assert!(
        produced == consumed || produced == consumed + 1,
        "produced={produced} consumed={consumed}"
    );
}
