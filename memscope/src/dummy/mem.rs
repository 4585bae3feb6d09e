use std::cell::Cell;

use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::mem::{
    Direction, MapCapability, PhysicalMapper, PhysicalMemory, PhysicalMemoryMetadata,
    PhysicalWindow,
};
use crate::types::{Address, PhysicalAddress};

/// Buffer backed fake physical memory.
///
/// Besides plain reads and writes it hands out windows into the buffer and
/// keeps track of how many of them are currently mapped.
pub struct DummyMemory {
    buf: Box<[u8]>,
    live_windows: Cell<usize>,
    windows_opened: usize,
    fail_maps: bool,
}

impl DummyMemory {
    /// Creates a new DummyMemory object with the given size
    ///
    /// # Remarks:
    ///
    /// If the provided size is not aligned to 0x1000 bytes DummyMemory will over-allocate to enforce the alignment.
    pub fn new(size: usize) -> Self {
        let size = (size + 0xfff) & !0xfff;
        Self {
            buf: vec![0_u8; size].into_boxed_slice(),
            live_windows: Cell::new(0),
            windows_opened: 0,
            fail_maps: false,
        }
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Number of windows that are mapped right now.
    pub fn live_windows(&self) -> usize {
        self.live_windows.get()
    }

    /// Number of windows mapped since creation.
    pub fn windows_opened(&self) -> usize {
        self.windows_opened
    }

    /// Makes every following `map_window` call fail.
    pub fn fail_window_maps(&mut self, fail: bool) {
        self.fail_maps = fail;
    }

    fn range(&self, addr: PhysicalAddress, len: usize) -> Result<(usize, usize)> {
        let start = addr.as_usize();
        match start.checked_add(len) {
            Some(end) if end <= self.buf.len() => Ok((start, end)),
            _ => Err(Error(ErrorOrigin::PhysicalMemory, ErrorKind::OutOfBounds)),
        }
    }
}

impl PhysicalMemory for DummyMemory {
    fn phys_read_raw_into(&mut self, addr: PhysicalAddress, out: &mut [u8]) -> Result<()> {
        let (start, end) = self.range(addr, out.len())?;
        out.copy_from_slice(&self.buf[start..end]);
        Ok(())
    }

    fn phys_write_raw(&mut self, addr: PhysicalAddress, data: &[u8]) -> Result<()> {
        let (start, end) = self.range(addr, data.len())?;
        self.buf[start..end].copy_from_slice(data);
        Ok(())
    }

    fn metadata(&self) -> PhysicalMemoryMetadata {
        PhysicalMemoryMetadata {
            max_address: Address::from(self.buf.len() - 1),
            readonly: false,
        }
    }
}

struct DummyWindow<'a> {
    data: &'a mut [u8],
    writeable: bool,
    live: &'a Cell<usize>,
}

impl<'a> PhysicalWindow for DummyWindow<'a> {
    fn as_slice(&self) -> &[u8] {
        &*self.data
    }

    fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if self.writeable {
            Some(&mut *self.data)
        } else {
            None
        }
    }
}

impl<'a> Drop for DummyWindow<'a> {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

impl PhysicalMapper for DummyMemory {
    fn map_window(
        &mut self,
        _cap: &MapCapability,
        addr: PhysicalAddress,
        len: usize,
        direction: Direction,
    ) -> Result<Box<dyn PhysicalWindow + '_>> {
        if self.fail_maps {
            return Err(Error(ErrorOrigin::PhysicalWindow, ErrorKind::WindowMapFailed));
        }

        let (start, end) = self.range(addr, len)?;
        self.windows_opened += 1;
        self.live_windows.set(self.live_windows.get() + 1);

        Ok(Box::new(DummyWindow {
            data: &mut self.buf[start..end],
            writeable: direction == Direction::Write,
            live: &self.live_windows,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::size;

    #[test]
    fn aligned_size() {
        let mem = DummyMemory::new(size::kb(4) + 1);
        assert_eq!(mem.size(), size::kb(8));
        assert_eq!(
            mem.metadata().max_address,
            Address::from(size::kb(8) as u64 - 1)
        );
    }

    #[test]
    fn out_of_bounds() {
        let mut mem = DummyMemory::new(size::kb(4));
        let mut out = [0u8; 2];
        assert!(mem
            .phys_read_raw_into(Address::from(0xfffu64).into(), &mut out)
            .is_err());
        assert!(mem
            .phys_write_raw(Address::from(0x1000u64).into(), &[1])
            .is_err());
    }
}
