use std::ops::DerefMut;

use dataview::{Pod, PodMethods};

use crate::error::Result;
use crate::types::{Address, PhysicalAddress};

/// The `PhysicalMemory` trait is implemented by memory backends
/// and provides a generic way to read and write from/to physical memory.
///
/// All addresses are of the type [`PhysicalAddress`](../../types/physical_address/index.html)
/// and can contain additional information about the page the address resides in.
///
/// There are only 3 methods which are required to be implemented by the provider of this trait.
///
/// # Examples
///
/// Implementing `PhysicalMemory` for a memory backend:
/// ```
/// use memscope::mem::{PhysicalMemory, PhysicalMemoryMetadata};
/// use memscope::types::{Address, PhysicalAddress};
/// use memscope::error::{Error, ErrorKind, ErrorOrigin, Result};
///
/// pub struct MemoryBackend {
///     mem: Box<[u8]>,
/// }
///
/// impl PhysicalMemory for MemoryBackend {
///     fn phys_read_raw_into(&mut self, addr: PhysicalAddress, out: &mut [u8]) -> Result<()> {
///         let start = addr.as_usize();
///         let src = self
///             .mem
///             .get(start..start + out.len())
///             .ok_or(Error(ErrorOrigin::PhysicalMemory, ErrorKind::OutOfBounds))?;
///         out.copy_from_slice(src);
///         Ok(())
///     }
///
///     fn phys_write_raw(&mut self, addr: PhysicalAddress, data: &[u8]) -> Result<()> {
///         let start = addr.as_usize();
///         self.mem
///             .get_mut(start..start + data.len())
///             .ok_or(Error(ErrorOrigin::PhysicalMemory, ErrorKind::OutOfBounds))?
///             .copy_from_slice(data);
///         Ok(())
///     }
///
///     fn metadata(&self) -> PhysicalMemoryMetadata {
///         PhysicalMemoryMetadata {
///             max_address: Address::from(self.mem.len() - 1),
///             readonly: false,
///         }
///     }
/// }
///
/// let mut mem = MemoryBackend { mem: vec![0; 0x2000].into_boxed_slice() };
/// mem.phys_write(Address::from(0x1000u64).into(), &0x1234u64).unwrap();
/// let value: u64 = mem.phys_read(Address::from(0x1000u64).into()).unwrap();
/// assert_eq!(value, 0x1234);
/// ```
pub trait PhysicalMemory
where
    Self: Send,
{
    fn phys_read_raw_into(&mut self, addr: PhysicalAddress, out: &mut [u8]) -> Result<()>;

    fn phys_write_raw(&mut self, addr: PhysicalAddress, data: &[u8]) -> Result<()>;

    /// Retrieve metadata about the physical memory
    ///
    /// This function will return metadata about the underlying physical memory object.
    /// The `max_address` is the last readable byte, the page walk rejects any frame above it.
    fn metadata(&self) -> PhysicalMemoryMetadata;

    // read helpers
    fn phys_read_into<T: Pod + ?Sized>(&mut self, addr: PhysicalAddress, out: &mut T) -> Result<()>
    where
        Self: Sized,
    {
        self.phys_read_raw_into(addr, out.as_bytes_mut())
    }

    fn phys_read_raw(&mut self, addr: PhysicalAddress, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.phys_read_raw_into(addr, &mut *buf)?;
        Ok(buf)
    }

    fn phys_read<T: Pod + Sized>(&mut self, addr: PhysicalAddress) -> Result<T>
    where
        Self: Sized,
    {
        let mut obj = T::zeroed();
        self.phys_read_into(addr, &mut obj)?;
        Ok(obj)
    }

    // write helpers
    fn phys_write<T: Pod + ?Sized>(&mut self, addr: PhysicalAddress, data: &T) -> Result<()>
    where
        Self: Sized,
    {
        self.phys_write_raw(addr, data.as_bytes())
    }
}

// forward impls
impl<T: PhysicalMemory + ?Sized, P: DerefMut<Target = T> + Send> PhysicalMemory for P {
    #[inline]
    fn phys_read_raw_into(&mut self, addr: PhysicalAddress, out: &mut [u8]) -> Result<()> {
        (**self).phys_read_raw_into(addr, out)
    }

    #[inline]
    fn phys_write_raw(&mut self, addr: PhysicalAddress, data: &[u8]) -> Result<()> {
        (**self).phys_write_raw(addr, data)
    }

    #[inline]
    fn metadata(&self) -> PhysicalMemoryMetadata {
        (**self).metadata()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct PhysicalMemoryMetadata {
    pub max_address: Address,
    pub readonly: bool,
}
