/*!
Physical memory backed by a file or a memory device.

Page table entries are read with positioned file i/o, data pages are accessed
through windows memory mapped from the file for the duration of a single copy.
*/

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use log::info;
use memmap::{Mmap, MmapMut, MmapOptions};

use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::mem::{
    Direction, MapCapability, PhysicalMapper, PhysicalMemory, PhysicalMemoryMetadata,
    PhysicalWindow,
};
use crate::types::{size, Address, PhysicalAddress};

/// Granularity mapping offsets are aligned to.
const MAP_ALIGN: usize = size::kb(4);

pub struct FileMappedMemory {
    file: File,
    max_address: Address,
    writeable: bool,
}

impl FileMappedMemory {
    /// Opens `path` as physical memory.
    ///
    /// The physical address space ends with the file. Character devices report a length
    /// of 0, their size has to be set with [`FileMappedMemory::with_max_address`].
    pub fn open<P: AsRef<Path>>(path: P, writeable: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(writeable)
            .open(path)
            .map_err(|err| {
                Error(ErrorOrigin::Connector, ErrorKind::UnableToReadFile).log_error(err)
            })?;

        let len = file
            .metadata()
            .map_err(|err| {
                Error(ErrorOrigin::Connector, ErrorKind::UnableToReadFile).log_error(err)
            })?
            .len();

        info!(
            "opened {} as physical memory (len={:#x} writeable={})",
            path.display(),
            len,
            writeable
        );

        Ok(Self {
            file,
            max_address: Address::from(len.saturating_sub(1)),
            writeable,
        })
    }

    /// Overrides the last valid physical address.
    pub fn with_max_address(mut self, max_address: Address) -> Self {
        self.max_address = max_address;
        self
    }

    fn check_range(&self, addr: PhysicalAddress, len: usize) -> Result<()> {
        let last = addr
            .address()
            .checked_add(len.saturating_sub(1))
            .ok_or(Error(ErrorOrigin::PhysicalMemory, ErrorKind::OutOfBounds))?;
        if len > 0 && last > self.max_address {
            return Err(Error(ErrorOrigin::PhysicalMemory, ErrorKind::OutOfBounds));
        }
        Ok(())
    }
}

impl PhysicalMemory for FileMappedMemory {
    fn phys_read_raw_into(&mut self, addr: PhysicalAddress, out: &mut [u8]) -> Result<()> {
        self.check_range(addr, out.len())?;
        self.file
            .read_exact_at(out, addr.as_u64())
            .map_err(|err| Error(ErrorOrigin::Connector, ErrorKind::UnableToReadFile).log_debug(err))
    }

    fn phys_write_raw(&mut self, addr: PhysicalAddress, data: &[u8]) -> Result<()> {
        if !self.writeable {
            return Err(Error(ErrorOrigin::PhysicalMemory, ErrorKind::PermissionDenied));
        }
        self.check_range(addr, data.len())?;
        self.file
            .write_all_at(data, addr.as_u64())
            .map_err(|err| Error(ErrorOrigin::Connector, ErrorKind::UnableToWriteFile).log_error(err))
    }

    fn metadata(&self) -> PhysicalMemoryMetadata {
        PhysicalMemoryMetadata {
            max_address: self.max_address,
            readonly: !self.writeable,
        }
    }
}

enum MapKind {
    Read(Mmap),
    Write(MmapMut),
}

/// Mapping of an aligned range of the file, exposing only the requested bytes.
struct FileWindow {
    map: MapKind,
    offset: usize,
    len: usize,
}

impl PhysicalWindow for FileWindow {
    fn as_slice(&self) -> &[u8] {
        let buf: &[u8] = match &self.map {
            MapKind::Read(map) => &map[..],
            MapKind::Write(map) => &map[..],
        };
        &buf[self.offset..self.offset + self.len]
    }

    fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.map {
            MapKind::Read(_) => None,
            MapKind::Write(map) => Some(&mut map[self.offset..self.offset + self.len]),
        }
    }
}

impl PhysicalMapper for FileMappedMemory {
    fn map_window(
        &mut self,
        _cap: &MapCapability,
        addr: PhysicalAddress,
        len: usize,
        direction: Direction,
    ) -> Result<Box<dyn PhysicalWindow + '_>> {
        self.check_range(addr, len)?;

        let base = addr.address().as_page_aligned(MAP_ALIGN);
        let offset = addr.address().page_offset(MAP_ALIGN);

        let mut options = MmapOptions::new();
        options.offset(base.as_u64()).len(offset + len);

        let map_err = |err: std::io::Error| {
            Error(ErrorOrigin::PhysicalWindow, ErrorKind::UnableToMapFile).log_debug(err)
        };

        // SAFETY: the mapping lives no longer than the window, which is dropped before the
        // request that opened it returns.
        let map = match direction {
            Direction::Read => MapKind::Read(unsafe { options.map(&self.file) }.map_err(map_err)?),
            Direction::Write => {
                if !self.writeable {
                    return Err(Error(ErrorOrigin::PhysicalWindow, ErrorKind::PermissionDenied));
                }
                MapKind::Write(unsafe { options.map_mut(&self.file) }.map_err(map_err)?)
            }
        };

        Ok(Box::new(FileWindow { map, offset, len }))
    }
}
