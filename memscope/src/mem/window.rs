/*!
Scoped physical windows.

A physical window is a temporary mapping of a physical range into the
accessing address space. Windows are handed out by a [`PhysicalMapper`]
and unmapped when they are dropped.

Mapping a window requires a [`MapCapability`], which can only be created
inside this module. The [`access`] function is therefore the single place
that opens windows, and it never lets one outlive the call.
*/

use log::debug;

use super::CallerMemory;
use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::types::{Address, PhysicalAddress};

/// Direction of a copy through a physical window.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    /// Copy from physical memory into the caller buffer.
    Read,
    /// Copy from the caller buffer into physical memory.
    Write,
}

/// Token required to map physical memory.
///
/// It cannot be constructed outside of this module.
pub struct MapCapability {
    _private: (),
}

/// A mapped physical range. Dropping the window releases the mapping.
pub trait PhysicalWindow {
    fn as_slice(&self) -> &[u8];

    /// Returns `None` if the window was mapped read-only.
    fn as_mut_slice(&mut self) -> Option<&mut [u8]>;
}

/// Backends able to map ranges of physical memory.
pub trait PhysicalMapper {
    /// Maps exactly `len` bytes starting at `addr`.
    ///
    /// Windows mapped with `Direction::Write` must be writeable.
    fn map_window(
        &mut self,
        cap: &MapCapability,
        addr: PhysicalAddress,
        len: usize,
        direction: Direction,
    ) -> Result<Box<dyn PhysicalWindow + '_>>;
}

/// Copies `len` bytes between physical memory at `phys` and the caller buffer at `caller_addr`.
///
/// The window covers exactly the requested bytes and has to stay inside the page that contains
/// `phys`, requests crossing it are rejected with `OutOfBounds` before anything is mapped.
/// Failures of the caller copy are reported as `CopyFailed` with the number of bytes that were
/// moved before the fault. The window is released before this function returns on every path.
pub fn access<M, C>(
    mapper: &mut M,
    phys: PhysicalAddress,
    len: usize,
    direction: Direction,
    caller: &mut C,
    caller_addr: Address,
) -> Result<()>
where
    M: PhysicalMapper + ?Sized,
    C: CallerMemory + ?Sized,
{
    if len == 0 {
        return Ok(());
    }

    if let Some(remaining) = phys.remaining_in_page() {
        if len > remaining {
            return Err(Error(ErrorOrigin::PhysicalWindow, ErrorKind::OutOfBounds)
                .log_debug(format_args!("{:x}+{:x} crosses its page", phys, len)));
        }
    }

    let cap = MapCapability { _private: () };
    let mut window = mapper
        .map_window(&cap, phys, len, direction)
        .map_err(|err| Error(ErrorOrigin::PhysicalWindow, ErrorKind::WindowMapFailed).log_debug(err))?;

    debug!(
        "window {:?} phys={:x} len={:x} caller={:x}",
        direction, phys, len, caller_addr
    );

    match direction {
        Direction::Read => caller.copy_to_caller(caller_addr, window.as_slice()),
        Direction::Write => match window.as_mut_slice() {
            Some(slice) => caller.copy_from_caller(caller_addr, slice),
            None => Err(Error(ErrorOrigin::PhysicalWindow, ErrorKind::PermissionDenied)),
        },
    }
}
