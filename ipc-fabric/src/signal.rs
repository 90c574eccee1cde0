//! Cross-process one-bit edge-triggered events.
//!
//! spec.md §9 calls for Rust implementations to prefer the named-semaphore
//! variant entirely over a process-shared pthread mutex/condvar, so
//! [`NamedSignal`] (grounded on `IpcNamedSignal.h`'s POSIX branch) is the
//! only synchronization primitive the channel module uses on Unix. A named
//! semaphore doubles as a mutex when opened with an initial value of 1:
//! `wait` decrements (lock), `signal` increments (unlock) — so the same
//! type backs both the receiver/sender wakeups and the segment's mutual
//! exclusion lock, rather than a separate pthread-mutex type.

use crate::error::{IpcError, Result};
use std::ffi::CString;
use std::mem::MaybeUninit;
use std::time::Duration;

pub const IPC_TIMEOUT: Duration = Duration::from_millis(500);

pub trait Signal: Send + Sync {
    /// Clears the signal flag without waking anyone.
    fn reset(&self);
    /// Sets the flag and wakes every waiter.
    fn signal(&self);
    /// Blocks up to `timeout` for the flag to be set. Returns `true` if the
    /// flag was observed set, `false` on timeout (spurious wakeups are
    /// absorbed internally, so a `false` return always means real elapsed
    /// time).
    fn wait(&self, timeout: Duration) -> bool;
}

fn absolute_deadline(timeout: Duration) -> libc::timespec {
    let mut now = MaybeUninit::<libc::timespec>::uninit();
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, now.as_mut_ptr());
    }
    let now = unsafe { now.assume_init() };
    let mut secs = now.tv_sec + timeout.as_secs() as libc::time_t;
    let mut nanos = now.tv_nsec + timeout.subsec_nanos() as i64;
    if nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    libc::timespec {
        tv_sec: secs,
        tv_nsec: nanos,
    }
}

/// POSIX named-semaphore signal. Named `/`-prefixed per POSIX. Every
/// attachment (owner or joiner) opens its own handle to the same kernel
/// object by name; `sem_open` with `O_CREAT` is idempotent, so whichever
/// side gets there first decides the initial value.
pub struct NamedSignal {
    sem: *mut libc::sem_t,
}

unsafe impl Send for NamedSignal {}
unsafe impl Sync for NamedSignal {}

impl NamedSignal {
    /// Opens (creating if needed) a named semaphore starting at 0 — an
    /// unset event, suitable for the receiver/sender wakeup flags.
    pub fn create(name: &str) -> Result<Self> {
        Self::create_with_value(name, 0)
    }

    /// Opens (creating if needed) a named semaphore starting at 1 — an
    /// unlocked binary lock, suitable for the segment's mutual exclusion.
    pub fn create_mutex(name: &str) -> Result<Self> {
        Self::create_with_value(name, 1)
    }

    fn create_with_value(name: &str, value: u32) -> Result<Self> {
        let fixed = fix_name(name);
        let cname = CString::new(fixed.clone()).map_err(|_| IpcError::InvalidName(fixed.clone()))?;
        let sem = unsafe { libc::sem_open(cname.as_ptr(), libc::O_CREAT, 0o600u32, value) };
        if sem == libc::SEM_FAILED {
            return Err(IpcError::Os(std::io::Error::last_os_error()));
        }
        Ok(NamedSignal { sem })
    }

    /// Unlinks the named semaphore object. Call this from the side that
    /// created it, after all handles referencing it are closed.
    pub fn remove(name: &str) -> Result<()> {
        let fixed = fix_name(name);
        let cname = CString::new(fixed.clone()).map_err(|_| IpcError::InvalidName(fixed.clone()))?;
        let rc = unsafe { libc::sem_unlink(cname.as_ptr()) };
        if rc != 0 {
            return Err(IpcError::Os(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for NamedSignal {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

impl Signal for NamedSignal {
    /// Drains the semaphore back to 0. Only meaningful for event-style use;
    /// never called on a mutex-mode instance.
    fn reset(&self) {
        loop {
            let mut value: i32 = 0;
            unsafe {
                libc::sem_getvalue(self.sem, &mut value);
            }
            if value <= 0 {
                return;
            }
            unsafe {
                libc::sem_trywait(self.sem);
            }
        }
    }

    /// Event wakeup (`sem_post`) or mutex unlock — same operation either way.
    fn signal(&self) {
        unsafe {
            libc::sem_post(self.sem);
        }
    }

    /// Event wait-until-set or mutex lock-with-timeout — `sem_timedwait`
    /// blocks until the count is positive, then atomically decrements it,
    /// which is exactly a timed lock acquisition as well as an edge-wait.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = absolute_deadline(timeout);
        let rc = unsafe { libc::sem_timedwait(self.sem, &deadline) };
        rc == 0
    }
}

fn fix_name(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{}", name)
    }
}

#[cfg(windows)]
pub mod windows {
    //! Named-event signal, the Windows analogue of [`super::NamedSignal`].
    //! Not exercised outside `cfg(windows)` builds.
    use super::Signal;
    use std::time::Duration;

    pub struct WindowsEvent {
        handle: windows_sys::Win32::Foundation::HANDLE,
    }

    unsafe impl Send for WindowsEvent {}
    unsafe impl Sync for WindowsEvent {}

    impl WindowsEvent {
        pub fn create(name: &str) -> std::io::Result<Self> {
            use windows_sys::Win32::System::Threading::CreateEventW;
            let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
            let handle = unsafe { CreateEventW(std::ptr::null(), 1, 0, wide.as_ptr()) };
            if handle == 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(WindowsEvent { handle })
        }
    }

    impl Drop for WindowsEvent {
        fn drop(&mut self) {
            use windows_sys::Win32::Foundation::CloseHandle;
            unsafe {
                CloseHandle(self.handle);
            }
        }
    }

    impl Signal for WindowsEvent {
        fn reset(&self) {
            use windows_sys::Win32::System::Threading::ResetEvent;
            unsafe {
                ResetEvent(self.handle);
            }
        }

        fn signal(&self) {
            use windows_sys::Win32::System::Threading::SetEvent;
            unsafe {
                SetEvent(self.handle);
            }
        }

        fn wait(&self, timeout: Duration) -> bool {
            use windows_sys::Win32::System::Threading::WaitForSingleObject;
            use windows_sys::Win32::Foundation::WAIT_OBJECT_0;
            let millis = timeout.as_millis().min(u32::MAX as u128) as u32;
            let rc = unsafe { WaitForSingleObject(self.handle, millis) };
            rc == WAIT_OBJECT_0
        }
    }
}
