//! Server-side bootstrap and dispatch loop on top of a [`ChatServer`].

use crate::chat::{ChatServer, ClientAddress};
use crate::codec::{IpcVariant, Message};
use crate::error::Result;
use crate::segment::SegmentParams;
use slog::Logger;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub const EXCEPTION_MESSAGE_CAP: usize = 255;
pub const MAX_USER_NAME_LEN: usize = 63;

/// A formatted exception, the wire-safe payload a worker-thread panic or a
/// handler-returned error gets turned into. Embedders fold this into their
/// own response enum via the `to_exception` callback passed to
/// [`ListenerSupervisor::start`].
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct ExceptionResponse {
    len: u8,
    bytes: [u8; EXCEPTION_MESSAGE_CAP],
}

impl ExceptionResponse {
    pub fn new(message: &str) -> Self {
        let cut = message.len().min(EXCEPTION_MESSAGE_CAP);
        let mut bytes = [0u8; EXCEPTION_MESSAGE_CAP];
        bytes[..cut].copy_from_slice(&message.as_bytes()[..cut]);
        ExceptionResponse {
            len: cut as u8,
            bytes,
        }
    }

    pub fn message(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("<non-utf8 exception text>")
    }
}

impl IpcVariant for ExceptionResponse {}

/// A fixed-capacity wire name, the POD counterpart to [`crate::identifier::Identifier`]
/// for contexts (like [`CheckUserRequest`]) that need to travel inside a
/// `bytemuck::Pod` message.
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct FixedIdentifier {
    len: u8,
    bytes: [u8; MAX_USER_NAME_LEN],
}

impl FixedIdentifier {
    pub fn new(name: &str) -> Self {
        let cut = name.len().min(MAX_USER_NAME_LEN);
        let mut bytes = [0u8; MAX_USER_NAME_LEN];
        bytes[..cut].copy_from_slice(&name.as_bytes()[..cut]);
        FixedIdentifier {
            len: cut as u8,
            bytes,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("<non-utf8 identity>")
    }
}

impl IpcVariant for FixedIdentifier {}

/// A caller's identity, as presented to a handler and to `identity_check`.
/// This crate only ever models the call site of an authorization
/// predicate; it never implements real authentication — the only identity
/// it can hand a handler is the caller's own reply-channel address, which
/// `ClientAddress` already carries for every request.
pub trait Identity: Send + Sync {
    fn user_name(&self) -> FixedIdentifier;
}

impl Identity for ClientAddress {
    fn user_name(&self) -> FixedIdentifier {
        FixedIdentifier::new(&format!("{}:{}", self.pid, self.uid))
    }
}

/// A request variant an embedder's protocol can include to ask the server,
/// explicitly, whether a name would be accepted — a building block for
/// richer protocols, not something this crate dispatches itself.
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct CheckUserRequest {
    pub user_name: FixedIdentifier,
}

impl IpcVariant for CheckUserRequest {}

/// Embedder-supplied bootstrap seam. The actual cross-process
/// lock-acquire-then-release trick used to wake a dormant listener lives in
/// the embedding attachment manager; this crate only guarantees it is
/// called, exactly once, before the listener starts serving.
pub trait AttachmentHooks: Send + Sync {
    /// Invoked once, lazily, the first time this process needs the
    /// listener to exist — before the worker thread starts receiving.
    /// Implementations typically acquire then release a cross-process lock
    /// so a dormant peer notices and spins the listener up, without having
    /// sent it a message first.
    fn on_bootstrap_request(&self) {}
}

impl AttachmentHooks for () {}

/// Runs a [`ChatServer`]'s receive loop on a dedicated worker thread,
/// converting handler panics and handler-returned errors into
/// [`ExceptionResponse`]s instead of taking the listener down.
pub struct ListenerSupervisor<Req: Message + Send + 'static, Resp: Message + Send + 'static> {
    server: Arc<ChatServer<Req, Resp>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl<Req: Message + Send + 'static, Resp: Message + Send + 'static> ListenerSupervisor<Req, Resp> {
    /// `handler` processes one decoded request and the caller's identity
    /// into a response or an exception; `identity_check` gates dispatch —
    /// returning `false` turns the request into an `ExceptionResponse`
    /// without ever calling `handler`; `to_exception` folds an
    /// `ExceptionResponse` into the embedder's `Resp` enum; `hooks` is
    /// invoked once before the worker starts receiving; `on_idle` is the
    /// cooperative-cancellation hook invoked on every ~500ms receive
    /// timeout tick.
    pub fn start<H, E, I, C, A>(
        params: SegmentParams,
        logger: Logger,
        hooks: A,
        identity_check: C,
        handler: H,
        to_exception: E,
        mut on_idle: I,
    ) -> Result<Self>
    where
        H: Fn(Req, &dyn Identity) -> std::result::Result<Resp, ExceptionResponse> + Send + Sync + 'static,
        E: Fn(ExceptionResponse) -> Resp + Send + Sync + 'static,
        I: FnMut() + Send + 'static,
        C: Fn(&FixedIdentifier) -> bool + Send + Sync + 'static,
        A: AttachmentHooks + 'static,
    {
        let server = Arc::new(ChatServer::<Req, Resp>::new(params)?);
        let shutdown = Arc::new(AtomicBool::new(false));

        hooks.on_bootstrap_request();

        let worker_server = server.clone();
        let worker_shutdown = shutdown.clone();

        let worker = thread::spawn(move || {
            loop {
                if worker_shutdown.load(Ordering::Relaxed) {
                    return;
                }

                let mut idle = || on_idle();
                let received = worker_server.receive(Some(&mut idle));

                let (request, client) = match received {
                    Some(pair) => pair,
                    None => return,
                };

                let identity_name = client.user_name();
                let response = if !identity_check(&identity_name) {
                    slog::warn!(logger, "listener rejected caller"; "identity" => identity_name.as_str().to_string());
                    to_exception(ExceptionResponse::new("caller rejected by identity check"))
                } else {
                    match catch_unwind(AssertUnwindSafe(|| handler(request, &client as &dyn Identity))) {
                        Ok(Ok(resp)) => resp,
                        Ok(Err(exc)) => {
                            slog::warn!(logger, "listener handler returned an exception"; "message" => exc.message().to_string());
                            to_exception(exc)
                        }
                        Err(panic) => {
                            let message = panic_message(&panic);
                            slog::error!(logger, "listener handler panicked"; "message" => message.clone());
                            to_exception(ExceptionResponse::new(&message))
                        }
                    }
                };

                worker_server.send_to(client, response, None);
            }
        });

        Ok(ListenerSupervisor {
            server,
            shutdown,
            worker: Some(worker),
        })
    }

    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.server.disconnect();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl<Req: Message + Send + 'static, Resp: Message + Send + 'static> Drop for ListenerSupervisor<Req, Resp> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.server.disconnect();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener handler panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_identifier_round_trips() {
        let id = FixedIdentifier::new("1234:5");
        assert_eq!(id.as_str(), "1234:5");
    }

    #[test]
    fn client_address_identity_is_pid_uid() {
        let addr = ClientAddress { pid: 42, uid: 7 };
        assert_eq!(addr.user_name().as_str(), "42:7");
    }
}
