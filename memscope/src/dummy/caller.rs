use crate::error::Result;
use crate::mem::caller::copy_failed;
use crate::mem::CallerMemory;
use crate::types::Address;

/// Fake memory of a requesting process.
///
/// The buffer is mapped at `base`. Only the first `valid_len` bytes are
/// accessible, copies touching the rest fail part way like a copy into a
/// partially unmapped user buffer would.
pub struct DummyCaller {
    base: Address,
    buf: Vec<u8>,
    valid_len: usize,
}

impl DummyCaller {
    pub fn new(base: u64, len: usize) -> Self {
        Self {
            base: Address::from(base),
            buf: vec![0; len],
            valid_len: len,
        }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    /// Limits the accessible part of the buffer to its first `len` bytes.
    pub fn set_valid_len(&mut self, len: usize) {
        self.valid_len = len.min(self.buf.len());
    }

    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Returns the offset and length of the accessible part of `[addr, addr + len)`.
    fn clamp(&self, addr: Address, len: usize) -> Result<(usize, usize)> {
        if addr < self.base {
            return Err(copy_failed(0));
        }
        let offset = (addr - self.base) as usize;
        if offset > self.valid_len {
            return Err(copy_failed(0));
        }
        Ok((offset, len.min(self.valid_len - offset)))
    }
}

impl CallerMemory for DummyCaller {
    fn copy_from_caller(&mut self, src: Address, out: &mut [u8]) -> Result<()> {
        let (offset, len) = self.clamp(src, out.len())?;
        out[..len].copy_from_slice(&self.buf[offset..offset + len]);
        if len < out.len() {
            return Err(copy_failed(len));
        }
        Ok(())
    }

    fn copy_to_caller(&mut self, dst: Address, data: &[u8]) -> Result<()> {
        let (offset, len) = self.clamp(dst, data.len())?;
        self.buf[offset..offset + len].copy_from_slice(&data[..len]);
        if len < data.len() {
            return Err(copy_failed(len));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn partial_buffer() {
        let mut caller = DummyCaller::new(0x7000, 8);
        caller.set_valid_len(5);

        let err = caller
            .copy_to_caller(Address::from(0x7002u64), &[1, 2, 3, 4])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CopyFailed { transferred: 3 });
        assert_eq!(&caller.buf()[..5], &[0, 0, 1, 2, 3]);

        let mut out = [0u8; 2];
        assert!(caller
            .copy_from_caller(Address::from(0x6fffu64), &mut out)
            .is_err());
    }
}
