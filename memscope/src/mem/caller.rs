/*!
Access to the memory of the requesting side.

Request records and data buffers live in the address space of whoever issued
the request. Every copy across that boundary goes through [`CallerMemory`],
which may fail part way through, for example when a caller buffer is only
partially mapped.
*/

use dataview::{Pod, PodMethods};

use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::types::Address;

/// Memory of the requesting side.
///
/// Implementations copy as many bytes as they can and report a failure as
/// `ErrorKind::CopyFailed` carrying the number of bytes that were transferred.
pub trait CallerMemory {
    /// Copies `out.len()` bytes starting at `src` in caller memory into `out`.
    fn copy_from_caller(&mut self, src: Address, out: &mut [u8]) -> Result<()>;

    /// Copies `data` to `dst` in caller memory.
    fn copy_to_caller(&mut self, dst: Address, data: &[u8]) -> Result<()>;

    /// Reads a fixed size record from caller memory.
    fn read_record<T: Pod + Sized>(&mut self, src: Address) -> Result<T>
    where
        Self: Sized,
    {
        let mut record = T::zeroed();
        self.copy_from_caller(src, record.as_bytes_mut())?;
        Ok(record)
    }

    /// Writes a fixed size record to caller memory.
    fn write_record<T: Pod + ?Sized>(&mut self, dst: Address, record: &T) -> Result<()>
    where
        Self: Sized,
    {
        self.copy_to_caller(dst, record.as_bytes())
    }
}

impl<T: CallerMemory + ?Sized> CallerMemory for &mut T {
    fn copy_from_caller(&mut self, src: Address, out: &mut [u8]) -> Result<()> {
        (**self).copy_from_caller(src, out)
    }

    fn copy_to_caller(&mut self, dst: Address, data: &[u8]) -> Result<()> {
        (**self).copy_to_caller(dst, data)
    }
}

pub(crate) fn copy_failed(transferred: usize) -> Error {
    Error(
        ErrorOrigin::CallerMemory,
        ErrorKind::CopyFailed { transferred },
    )
}

/// Returns the part of a buffer of length `len` covered by `[addr, addr + wanted)`.
fn clamp(len: usize, addr: Address, wanted: usize) -> Option<(usize, usize)> {
    let start = usize::try_from(addr.as_u64()).ok()?;
    if start > len {
        return None;
    }
    Some((start, wanted.min(len - start)))
}

/// Caller memory backed by a local mutable buffer.
///
/// Addresses are offsets into the buffer.
pub struct CallerBuffer<'a> {
    buf: &'a mut [u8],
}

impl<'a> CallerBuffer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> CallerMemory for CallerBuffer<'a> {
    fn copy_from_caller(&mut self, src: Address, out: &mut [u8]) -> Result<()> {
        let (start, len) = clamp(self.buf.len(), src, out.len()).ok_or_else(|| copy_failed(0))?;
        out[..len].copy_from_slice(&self.buf[start..start + len]);
        if len < out.len() {
            return Err(copy_failed(len));
        }
        Ok(())
    }

    fn copy_to_caller(&mut self, dst: Address, data: &[u8]) -> Result<()> {
        let (start, len) = clamp(self.buf.len(), dst, data.len()).ok_or_else(|| copy_failed(0))?;
        self.buf[start..start + len].copy_from_slice(&data[..len]);
        if len < data.len() {
            return Err(copy_failed(len));
        }
        Ok(())
    }
}

/// Caller memory backed by a local read-only buffer.
///
/// Addresses are offsets into the buffer, copies towards the caller always fail.
pub struct CallerSource<'a> {
    buf: &'a [u8],
}

impl<'a> CallerSource<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> CallerMemory for CallerSource<'a> {
    fn copy_from_caller(&mut self, src: Address, out: &mut [u8]) -> Result<()> {
        let (start, len) = clamp(self.buf.len(), src, out.len()).ok_or_else(|| copy_failed(0))?;
        out[..len].copy_from_slice(&self.buf[start..start + len]);
        if len < out.len() {
            return Err(copy_failed(len));
        }
        Ok(())
    }

    fn copy_to_caller(&mut self, _dst: Address, _data: &[u8]) -> Result<()> {
        Err(Error(ErrorOrigin::CallerMemory, ErrorKind::PermissionDenied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_copies() {
        let mut buf = [0u8; 8];
        let mut caller = CallerBuffer::new(&mut buf);
        caller
            .copy_to_caller(Address::from(2u64), &[1, 2, 3])
            .unwrap();

        let mut out = [0u8; 4];
        caller.copy_from_caller(Address::from(1u64), &mut out).unwrap();
        assert_eq!(out, [0, 1, 2, 3]);
    }

    #[test]
    fn buffer_partial() {
        let mut buf = [7u8; 8];
        let mut caller = CallerBuffer::new(&mut buf);

        let mut out = [0u8; 4];
        let err = caller
            .copy_from_caller(Address::from(6u64), &mut out)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CopyFailed { transferred: 2 });
        assert_eq!(out, [7, 7, 0, 0]);

        let err = caller
            .copy_to_caller(Address::from(100u64), &[1])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CopyFailed { transferred: 0 });
    }

    #[test]
    fn records() {
        let mut buf = [0u8; 16];
        let mut caller = CallerBuffer::new(&mut buf);
        caller
            .write_record(Address::from(8u64), &0x1122_3344_5566_7788u64)
            .unwrap();
        let value: u64 = caller.read_record(Address::from(8u64)).unwrap();
        assert_eq!(value, 0x1122_3344_5566_7788);
        assert!(caller.read_record::<u64>(Address::from(12u64)).is_err());
    }

    #[test]
    fn source_is_read_only() {
        let data = [1u8, 2, 3];
        let mut caller = CallerSource::new(&data);
        let mut out = [0u8; 3];
        caller.copy_from_caller(Address::NULL, &mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(
            caller.copy_to_caller(Address::NULL, &[0]).unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
    }
}
