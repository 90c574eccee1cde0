//! Tagged-union wire codec. A `Message` is a statically known closed set of
//! plain-old-data alternatives, each carried as `(discriminator, raw bytes)`
//! with no endianness conversion — this fabric never leaves one host.

use crate::error::{IpcError, Result};
use std::mem;

/// Marker for a POD alternative payload. Blanket-implemented for anything
/// `bytemuck` already considers `Pod + Zeroable`, so callers just derive
/// those two traits on their variant structs.
pub trait IpcVariant: Copy + bytemuck::Pod + bytemuck::Zeroable {}

impl<T: Copy + bytemuck::Pod + bytemuck::Zeroable> IpcVariant for T {}

/// A value that can be written to, and read back from, a channel's shared
/// message buffer. Implemented by hand per enum — there is no derive here,
/// matching the buffer-level (de)serialization the rest of this crate uses
/// throughout.
pub trait Message: Sized {
    /// Upper bound on the encoded payload, enforced at the call site that
    /// sizes the channel's segment.
    const MAX_SIZE: usize;

    /// Bytes written ahead of the span `encode_into`/`decode_from` account
    /// for in their returned/accepted length. Used by [`Tagged`] to carry a
    /// fixed-size prefix alongside the variant; zero for a bare variant.
    const PREFIX_SIZE: usize = 0;

    /// Writes this value's discriminator-tagged bytes into `buf` (which is
    /// at least `Self::MAX_SIZE + Self::PREFIX_SIZE` long) and returns
    /// `(discriminator, payload_len)`, where `payload_len` excludes
    /// `PREFIX_SIZE`.
    fn encode_into(&self, buf: &mut [u8]) -> (u8, u16);

    /// Reconstructs a value from `discriminator` and the `payload_len +
    /// PREFIX_SIZE` bytes at the front of `buf`.
    fn decode_from(discriminator: u8, payload_len: u16, buf: &[u8]) -> Result<Self>;
}

/// Writes a single POD variant's bytes and returns its length. Shared by
/// every hand-written `Message` impl's `encode_into` match arms.
pub fn encode_variant<T: IpcVariant>(value: &T, buf: &mut [u8]) -> u16 {
    let bytes = bytemuck::bytes_of(value);
    buf[..bytes.len()].copy_from_slice(bytes);
    bytes.len() as u16
}

/// Reads a single POD variant back out, validating the length matches
/// exactly (a mismatch means the peer and this process disagree on the
/// wire layout, which is always a programmer error rather than something to
/// recover from).
pub fn decode_variant<T: IpcVariant>(payload_len: u16, buf: &[u8]) -> Result<T> {
    if payload_len as usize != mem::size_of::<T>() || buf.len() < mem::size_of::<T>() {
        return Err(IpcError::InvalidMessage);
    }
    Ok(*bytemuck::from_bytes::<T>(&buf[..mem::size_of::<T>()]))
}

/// The `(variant, F)` pair form of a message: a statically typed fixed tail
/// `F` riding alongside every variant. Used by the chat layer to carry a
/// `ClientAddress` with each request/response without making the address
/// part of the variant enum itself.
pub struct Tagged<V, F> {
    pub variant: V,
    pub fixed: F,
}

impl<V: Message, F: IpcVariant> Message for Tagged<V, F> {
    const MAX_SIZE: usize = V::MAX_SIZE;
    const PREFIX_SIZE: usize = mem::size_of::<F>();

    fn encode_into(&self, buf: &mut [u8]) -> (u8, u16) {
        let fixed_size = mem::size_of::<F>();
        let fixed_bytes = bytemuck::bytes_of(&self.fixed);
        buf[..fixed_size].copy_from_slice(fixed_bytes);
        self.variant.encode_into(&mut buf[fixed_size..])
    }

    fn decode_from(discriminator: u8, payload_len: u16, buf: &[u8]) -> Result<Self> {
        let fixed_size = mem::size_of::<F>();
        if buf.len() < fixed_size {
            return Err(IpcError::InvalidMessage);
        }
        let fixed = *bytemuck::from_bytes::<F>(&buf[..fixed_size]);
        let variant = V::decode_from(discriminator, payload_len, &buf[fixed_size..])?;
        Ok(Tagged { variant, fixed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::{Pod, Zeroable};

    #[derive(Copy, Clone, Pod, Zeroable)]
    #[repr(C)]
    struct Ping {
        n: u32,
    }

    #[derive(Copy, Clone, Pod, Zeroable)]
    #[repr(C)]
    struct Pong {
        n: u32,
        echo: u32,
    }

    enum Demo {
        Ping(Ping),
        Pong(Pong),
    }

    impl Message for Demo {
        const MAX_SIZE: usize = mem::size_of::<Pong>();

        fn encode_into(&self, buf: &mut [u8]) -> (u8, u16) {
            match self {
                Demo::Ping(p) => (0, encode_variant(p, buf)),
                Demo::Pong(p) => (1, encode_variant(p, buf)),
            }
        }

        fn decode_from(discriminator: u8, payload_len: u16, buf: &[u8]) -> Result<Self> {
            match discriminator {
                0 => Ok(Demo::Ping(decode_variant(payload_len, buf)?)),
                1 => Ok(Demo::Pong(decode_variant(payload_len, buf)?)),
                _ => Err(IpcError::InvalidMessage),
            }
        }
    }

    #[test]
    fn round_trips_each_variant() {
        let mut buf = [0u8; 64];

        let msg = Demo::Ping(Ping { n: 7 });
        let (idx, len) = msg.encode_into(&mut buf);
        match Demo::decode_from(idx, len, &buf).unwrap() {
            Demo::Ping(p) => assert_eq!(p.n, 7),
            _ => panic!("wrong variant decoded"),
        }

        let msg = Demo::Pong(Pong { n: 3, echo: 9 });
        let (idx, len) = msg.encode_into(&mut buf);
        match Demo::decode_from(idx, len, &buf).unwrap() {
            Demo::Pong(p) => {
                assert_eq!(p.n, 3);
                assert_eq!(p.echo, 9);
            }
            _ => panic!("wrong variant decoded"),
        }
    }

    #[test]
    fn rejects_length_mismatch() {
        let buf = [0u8; 64];
        assert!(matches!(
            Demo::decode_from(0, 1, &buf),
            Err(IpcError::InvalidMessage)
        ));
    }

    #[test]
    fn tagged_carries_fixed_prefix() {
        #[derive(Copy, Clone, Pod, Zeroable)]
        #[repr(C)]
        struct Addr {
            pid: u64,
        }

        let mut buf = [0u8; 64];
        let msg = Tagged {
            variant: Demo::Ping(Ping { n: 42 }),
            fixed: Addr { pid: 555 },
        };
        let (idx, len) = msg.encode_into(&mut buf);
        let decoded = Tagged::<Demo, Addr>::decode_from(idx, len, &buf).unwrap();
        assert_eq!(decoded.fixed.pid, 555);
        match decoded.variant {
            Demo::Ping(p) => assert_eq!(p.n, 42),
            _ => panic!("wrong variant decoded"),
        }
    }
}
