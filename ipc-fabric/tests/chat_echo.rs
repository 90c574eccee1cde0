//! Single-process chat echo loop, 4000 request/response round trips,
//! validating that the server always sees the sending client's own
//! address echoed back to it.

use bytemuck::{Pod, Zeroable};
use ipc_fabric::chat::{ChatClient, ChatServer, ClientAddress};
use ipc_fabric::codec::{decode_variant, encode_variant, Message};
use ipc_fabric::segment::SegmentParams;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct Ping {
    n: u32,
}

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct Pong {
    n: u32,
}

enum Req {
    Ping(Ping),
}

enum Resp {
    Pong(Pong),
}

impl Message for Req {
    const MAX_SIZE: usize = std::mem::size_of::<Ping>();

    fn encode_into(&self, buf: &mut [u8]) -> (u8, u16) {
        match self {
            Req::Ping(p) => (0, encode_variant(p, buf)),
        }
    }

    fn decode_from(_discriminator: u8, payload_len: u16, buf: &[u8]) -> ipc_fabric::Result<Self> {
        Ok(Req::Ping(decode_variant(payload_len, buf)?))
    }
}

impl Message for Resp {
    const MAX_SIZE: usize = std::mem::size_of::<Pong>();

    fn encode_into(&self, buf: &mut [u8]) -> (u8, u16) {
        match self {
            Resp::Pong(p) => (0, encode_variant(p, buf)),
        }
    }

    fn decode_from(_discriminator: u8, payload_len: u16, buf: &[u8]) -> ipc_fabric::Result<Self> {
        Ok(Resp::Pong(decode_variant(payload_len, buf)?))
    }
}

fn segment_params() -> SegmentParams {
    static ORDINAL: AtomicU32 = AtomicU32::new(0);
    let ordinal = ORDINAL.fetch_add(1, Ordering::Relaxed);
    SegmentParams {
        physical_name: format!("ipc_fabric_test_chat_{}_{}", std::process::id(), ordinal),
        logical_name: "chat echo test".into(),
        kind: 7,
        version: 1,
    }
}

#[test]
fn echoes_client_address_over_4000_round_trips() {
    const NUM_MESSAGES: u32 = 4_000;

    let params = segment_params();
    let server: ChatServer<Req, Resp> = ChatServer::new(params.clone()).unwrap();
    let client: ChatClient<Req, Resp> = ChatClient::new(params).unwrap();
    let client_address = client.address();

    let consumer = thread::spawn(move || {
        let mut seen_addresses_match = true;
        for _ in 0..NUM_MESSAGES {
            let Some((Req::Ping(ping), from)) = server.receive(None) else {
                break;
            };
            if from != client_address {
                seen_addresses_match = false;
            }
            server.send_to(from, Resp::Pong(Pong { n: ping.n }), None);
        }
        assert!(seen_addresses_match, "server observed a foreign client address");
    });

    for i in 0..NUM_MESSAGES {
        let reply = client.send_and_receive(Req::Ping(Ping { n: i }), None);
        match reply {
            Some(Resp::Pong(pong)) => assert_eq!(pong.n, i),
            None => panic!("no reply for message {i}"),
        }
    }

    consumer.join().unwrap();
}

#[test]
fn client_uids_are_unique_within_a_process() {
    let params = segment_params();
    let client_a: ChatClient<Req, Resp> = ChatClient::new(params.clone()).unwrap();
    let other_params = segment_params();
    let client_b: ChatClient<Req, Resp> = ChatClient::new(other_params).unwrap();

    assert_ne!(client_a.address().uid, client_b.address().uid);
    assert_eq!(client_a.address().pid, client_b.address().pid);
}

#[test]
fn send_to_dead_client_reports_false_not_error() {
    let params = segment_params();
    let server: ChatServer<Req, Resp> = ChatServer::new(params).unwrap();

    let bogus = ClientAddress {
        pid: u64::MAX,
        uid: u64::MAX,
    };

    assert!(!server.send_to(bogus, Resp::Pong(Pong { n: 0 }), None));
}
