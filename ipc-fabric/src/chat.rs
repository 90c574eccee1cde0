//! Symmetric request/response pairing built on two [`Channel`](crate::channel)
//! instances: one well-known server channel receiving from any client, and
//! one ephemeral per-client reply channel the server opens on demand.

use crate::channel::{Receiver, Sender};
use crate::codec::{IpcVariant, Message, Tagged};
use crate::error::Result;
use crate::segment::SegmentParams;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one client's reply channel. Unique within a process via
/// `uid`; unique across the host once paired with `pid`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct ClientAddress {
    pub pid: u64,
    pub uid: u64,
}

impl IpcVariant for ClientAddress {}

static NEXT_CLIENT_UID: AtomicU64 = AtomicU64::new(0);

fn reply_channel_params(base: &SegmentParams, addr: ClientAddress) -> SegmentParams {
    let physical_name = format!("ipc_chat_client_{}_{}", addr.pid, addr.uid);
    SegmentParams {
        logical_name: format!("ipc chat client {}", physical_name),
        physical_name,
        kind: base.kind,
        version: base.version,
    }
}

/// Server half of a chat pairing. Receives from any client on one
/// well-known channel and replies on that client's derived reply channel.
pub struct ChatServer<Req: Message, Resp: Message> {
    receiver: Receiver<Tagged<Req, ClientAddress>>,
    base_params: SegmentParams,
    _resp: std::marker::PhantomData<Resp>,
}

impl<Req: Message, Resp: Message> ChatServer<Req, Resp> {
    pub fn new(params: SegmentParams) -> Result<Self> {
        let receiver = Receiver::new(params.clone())?;
        Ok(ChatServer {
            receiver,
            base_params: params,
            _resp: std::marker::PhantomData,
        })
    }

    pub fn is_disconnected(&self) -> bool {
        self.receiver.is_disconnected()
    }

    /// May be called while `receive` or `send_to` runs on another thread.
    pub fn disconnect(&self) {
        self.receiver.disconnect();
    }

    pub fn receive(&self, idle: Option<&mut dyn FnMut()>) -> Option<(Req, ClientAddress)> {
        self.receiver.receive(idle).map(|t| (t.variant, t.fixed))
    }

    /// Opens an ephemeral sender toward `client`'s reply channel and sends
    /// one message. Returns `false` (never an error) if the client has
    /// already gone away — a missing reply channel is an expected outcome,
    /// not a fault.
    pub fn send_to(&self, client: ClientAddress, message: Resp, idle: Option<&mut dyn FnMut()>) -> bool {
        let params = reply_channel_params(&self.base_params, client);
        let tagged = Tagged {
            variant: message,
            fixed: client,
        };
        match Sender::send_to(params, &tagged, idle) {
            Ok(sent) => sent,
            Err(_) => false,
        }
    }
}

/// Client half of a chat pairing. Owns a sender toward the server's
/// well-known channel and a receiver on its own derived reply channel.
pub struct ChatClient<Req: Message, Resp: Message> {
    address: ClientAddress,
    sender: Sender<Tagged<Req, ClientAddress>>,
    receiver: Receiver<Tagged<Resp, ClientAddress>>,
}

impl<Req: Message, Resp: Message> ChatClient<Req, Resp> {
    pub fn new(server_params: SegmentParams) -> Result<Self> {
        let address = ClientAddress {
            pid: std::process::id() as u64,
            uid: NEXT_CLIENT_UID.fetch_add(1, Ordering::Relaxed),
        };

        let sender = Sender::new(server_params.clone())?;
        let receiver = Receiver::new(reply_channel_params(&server_params, address))?;

        Ok(ChatClient {
            address,
            sender,
            receiver,
        })
    }

    pub fn address(&self) -> ClientAddress {
        self.address
    }

    pub fn is_disconnected(&self) -> bool {
        self.sender.is_disconnected() || self.receiver.is_disconnected()
    }

    /// May be called while `send`/`receive`/`send_and_receive` run on
    /// another thread.
    pub fn disconnect(&self) {
        self.sender.disconnect();
        self.receiver.disconnect();
    }

    pub fn send(&self, message: Req, idle: Option<&mut dyn FnMut()>) -> bool {
        let tagged = Tagged {
            variant: message,
            fixed: self.address,
        };
        self.sender.send(&tagged, idle)
    }

    pub fn receive(&self, idle: Option<&mut dyn FnMut()>) -> Option<Resp> {
        self.receiver.receive(idle).map(|t| t.variant)
    }

    pub fn send_and_receive(&self, message: Req, mut idle: Option<&mut dyn FnMut()>) -> Option<Resp> {
        if !self.send(message, idle.as_deref_mut()) {
            return None;
        }
        self.receive(idle)
    }
}
