//! Half-duplex request/response handshake over one [`Segment`].
//!
//! A [`Receiver`] owns the segment; a [`Sender`] attaches to an existing
//! one. Exactly one message may be in flight at a time: `Sender::send`
//! holds the segment's mutex for the whole round trip (write, wake the
//! receiver, wait for the reply signal), so concurrent senders queue up
//! behind each other rather than racing the buffer.
//!
//! Per spec.md §9 ("Rust implementations should prefer the named-variant
//! entirely"), wakeups and the segment mutex are backed by
//! [`NamedSignal`] rather than a process-shared pthread mutex/condvar
//! embedded in the segment body — each attachment opens its own handle to
//! the same three named kernel objects, derived from the segment's
//! physical name.

use crate::codec::Message;
use crate::error::Result;
use crate::segment::{Segment, SegmentParams};
use crate::signal::{NamedSignal, Signal, IPC_TIMEOUT};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

static OWNER_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const JOIN_POLL_ATTEMPTS: u32 = 5_000;

#[repr(C)]
struct MessageHeaderMeta {
    ready: AtomicU8,
    owner_pid: i32,
    owner_id: i32,
    alive: AtomicU8,
    receiver_flag: AtomicU8,
    sender_flag: AtomicU8,
    message_len: std::cell::UnsafeCell<u16>,
    message_index: std::cell::UnsafeCell<u8>,
}

unsafe impl Send for MessageHeaderMeta {}
unsafe impl Sync for MessageHeaderMeta {}

/// `M::MAX_SIZE + M::PREFIX_SIZE` sizes the channel's trailing buffer and
/// is stored in the wire header as a `u16` length, so it must fit in 16
/// bits — mirrors the C++ `static_assert` guarding the same bound. The
/// local const item is monomorphized per `M`, so a violation is a compile
/// error at every call site that names the offending message type, not a
/// runtime check.
fn trailing_len<M: Message>() -> usize {
    const _: () = assert!(
        M::MAX_SIZE + M::PREFIX_SIZE <= 65_535,
        "message type's MAX_SIZE + PREFIX_SIZE exceeds the 16-bit wire length field"
    );
    M::PREFIX_SIZE + M::MAX_SIZE
}

fn wait_until_ready(header: &MessageHeaderMeta) -> Result<()> {
    let mut attempts = 0;
    while header.ready.load(Ordering::Acquire) == 0 {
        attempts += 1;
        if attempts > JOIN_POLL_ATTEMPTS {
            return Err(crate::error::IpcError::Os(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "owner never finished initializing channel header",
            )));
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    Ok(())
}

/// The three named signals backing one channel: receiver/sender wakeups
/// plus the segment's mutual-exclusion lock (opened with an initial value
/// of 1, see [`NamedSignal::create_mutex`]).
struct ChannelSignals {
    receiver_signal: NamedSignal,
    sender_signal: NamedSignal,
    segment_mutex: NamedSignal,
}

impl ChannelSignals {
    fn open(physical_name: &str) -> Result<Self> {
        Ok(ChannelSignals {
            receiver_signal: NamedSignal::create(&format!("{}_recv", physical_name))?,
            sender_signal: NamedSignal::create(&format!("{}_send", physical_name))?,
            segment_mutex: NamedSignal::create_mutex(&format!("{}_mutex", physical_name))?,
        })
    }

    fn remove_all(physical_name: &str) {
        let _ = NamedSignal::remove(&format!("{}_recv", physical_name));
        let _ = NamedSignal::remove(&format!("{}_send", physical_name));
        let _ = NamedSignal::remove(&format!("{}_mutex", physical_name));
    }
}

/// RAII guard releasing the segment's mutex when a send finishes, on
/// every exit path including an early disconnect.
struct SegmentMutexGuard<'h> {
    mutex: &'h NamedSignal,
}

impl Drop for SegmentMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.signal();
    }
}

pub struct Receiver<M: Message> {
    segment: Segment<MessageHeaderMeta>,
    signals: ChannelSignals,
    disconnected: AtomicBool,
    guard: Mutex<()>,
    _marker: PhantomData<M>,
}

impl<M: Message> Receiver<M> {
    /// Creates the backing segment and becomes its owner.
    pub fn new(params: SegmentParams) -> Result<Self> {
        let segment = Segment::<MessageHeaderMeta>::create(params.clone(), trailing_len::<M>())?;
        let signals = ChannelSignals::open(&params.physical_name)?;

        unsafe {
            let ptr = segment.body_ptr();
            (*ptr).owner_pid = std::process::id() as i32;
            (*ptr).owner_id = OWNER_ID_COUNTER.fetch_add(1, Ordering::Relaxed) as i32 + 1;
            (*ptr).alive.store(1, Ordering::Relaxed);
            (*ptr).receiver_flag.store(0, Ordering::Relaxed);
            (*ptr).sender_flag.store(0, Ordering::Relaxed);
            *(*ptr).message_len.get() = 0;
            *(*ptr).message_index.get() = 0;
            (*ptr).ready.store(1, Ordering::Release);
        }

        Ok(Receiver {
            segment,
            signals,
            disconnected: AtomicBool::new(false),
            guard: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    pub fn params(&self) -> &SegmentParams {
        self.segment.params()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
    }

    /// May be called from any thread while another thread is blocked in
    /// `receive`.
    pub fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            let _lock = self.guard.lock().unwrap();
            self.segment.body().alive.store(0, Ordering::Relaxed);
        }
    }

    /// Blocks for the next message, calling `idle` every 500ms of silence.
    /// Returns `None` once disconnected.
    ///
    /// The local mutex is held for the entire wait, not just the buffer
    /// copy — this means only one thread in this process may call
    /// `receive` productively at a time. That mirrors the upstream
    /// behaviour exactly and is relied upon by callers; it is not a bug to
    /// be fixed here.
    pub fn receive(&self, mut idle: Option<&mut dyn FnMut()>) -> Option<M> {
        let _lock = self.guard.lock().unwrap();

        if self.disconnected.load(Ordering::Relaxed) {
            return None;
        }

        let header = self.segment.body();

        while header.receiver_flag.load(Ordering::Acquire) == 0 {
            if !self.signals.receiver_signal.wait(IPC_TIMEOUT) {
                if self.disconnected.load(Ordering::Relaxed) {
                    return None;
                }
                if let Some(f) = idle.as_deref_mut() {
                    f();
                }
            }
        }

        self.signals.receiver_signal.reset();
        header.receiver_flag.store(0, Ordering::Release);

        let len = unsafe { *header.message_len.get() };
        let index = unsafe { *header.message_index.get() };
        let buf = unsafe { std::slice::from_raw_parts(self.segment.trailing_ptr(), trailing_len::<M>()) };
        let message = M::decode_from(index, len, buf)
            .expect("peer wrote a message that does not match the wire contract");

        self.signals.sender_signal.signal();
        header.sender_flag.store(1, Ordering::Release);

        Some(message)
    }
}

impl<M: Message> Drop for Receiver<M> {
    fn drop(&mut self) {
        self.disconnect();
        ChannelSignals::remove_all(&self.segment.params().physical_name);
    }
}

pub struct Sender<M: Message> {
    segment: Segment<MessageHeaderMeta>,
    signals: ChannelSignals,
    disconnected: AtomicBool,
    guard: Mutex<()>,
    _marker: PhantomData<M>,
}

impl<M: Message> Sender<M> {
    /// Attaches to an existing receiver's segment.
    pub fn new(params: SegmentParams) -> Result<Self> {
        let segment = Segment::<MessageHeaderMeta>::open(params.clone(), trailing_len::<M>())?;
        wait_until_ready(segment.body())?;
        let signals = ChannelSignals::open(&params.physical_name)?;

        Ok(Sender {
            segment,
            signals,
            disconnected: AtomicBool::new(false),
            guard: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    /// Opens a one-shot sender, sends a single message, and tears it down.
    pub fn send_to(params: SegmentParams, msg: &M, idle: Option<&mut dyn FnMut()>) -> Result<bool> {
        let sender = Sender::new(params)?;
        Ok(sender.send(msg, idle))
    }

    pub fn params(&self) -> &SegmentParams {
        self.segment.params()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
    }

    /// May be called from any thread while another thread is blocked in
    /// `send`.
    pub fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            let _lock = self.guard.lock().unwrap();
        }
    }

    pub fn send(&self, msg: &M, mut idle: Option<&mut dyn FnMut()>) -> bool {
        let _lock = self.guard.lock().unwrap();

        if self.disconnected.load(Ordering::Relaxed) {
            return false;
        }

        let header = self.segment.body();

        while !self.signals.segment_mutex.wait(IPC_TIMEOUT) {
            if header.alive.load(Ordering::Relaxed) == 0 {
                self.disconnected.store(true, Ordering::Relaxed);
            }
            if self.disconnected.load(Ordering::Relaxed) {
                return false;
            }
            if let Some(f) = idle.as_deref_mut() {
                f();
            }
        }
        let _segment_lock = SegmentMutexGuard {
            mutex: &self.signals.segment_mutex,
        };

        let buf = unsafe {
            std::slice::from_raw_parts_mut(self.segment.trailing_ptr(), trailing_len::<M>())
        };
        let (index, len) = msg.encode_into(buf);
        unsafe {
            *header.message_index.get() = index;
            *header.message_len.get() = len;
        }

        self.signals.receiver_signal.signal();
        header.receiver_flag.store(1, Ordering::Release);

        while header.sender_flag.load(Ordering::Acquire) == 0 {
            if !self.signals.sender_signal.wait(IPC_TIMEOUT) {
                if header.alive.load(Ordering::Relaxed) == 0 {
                    self.disconnected.store(true, Ordering::Relaxed);
                }
                if self.disconnected.load(Ordering::Relaxed) {
                    return false;
                }
                if let Some(f) = idle.as_deref_mut() {
                    f();
                }
            }
        }

        self.signals.sender_signal.reset();
        header.sender_flag.store(0, Ordering::Release);

        true
    }
}

impl<M: Message> Drop for Sender<M> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
