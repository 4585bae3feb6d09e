/*!
Traits and structures describing target processes and their memory contexts.

A [`ProcessResolver`] maps a process id to a [`ProcessHandle`]. The handle is
only good for the request it was resolved for: the memory context behind it is
reached through [`ProcessResolver::lock_context`], which takes the context's
reader lock and checks that the process is still the one that was resolved.
*/

pub mod maps;
#[doc(hidden)]
pub use maps::{find_mapping, region_list};

use crate::error::Result;
use crate::mem::PhysicalMemory;
use crate::types::{Address, PermissionFlags, PhysicalAddress};

/// Process id, same width as `pid_t`.
pub type Pid = i32;

/// Reference to a process resolved for a single request.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ProcessHandle {
    pid: Pid,
    generation: u64,
}

impl ProcessHandle {
    /// `generation` is a backend specific token that changes when a pid is reused.
    pub fn new(pid: Pid, generation: u64) -> Self {
        Self { pid, generation }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A contiguous virtual range of a process with uniform permissions.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct MemoryRegion {
    pub pid: Pid,
    pub start: Address,
    /// Exclusive end of the region.
    pub end: Address,
    pub permissions: PermissionFlags,
    /// Path of the backing file, `None` for anonymous memory.
    pub backing_path: Option<String>,
}

impl MemoryRegion {
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn is_anonymous(&self) -> bool {
        self.backing_path.is_none()
    }
}

/// Result of a successful virtual to physical translation.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Translation {
    pub virt: Address,
    pub phys: PhysicalAddress,
}

pub type RegionCallback<'a> = &'a mut dyn FnMut(MemoryRegion) -> bool;

/// The memory-management context of a process, held under its reader lock.
///
/// Dropping the context releases the lock.
pub trait MemoryContext {
    fn pid(&self) -> Pid;

    /// Translates a virtual address of the process into a physical address.
    ///
    /// Failures carry the page table level that was absent or malformed.
    fn translate(&mut self, mem: &mut dyn PhysicalMemory, addr: Address) -> Result<Translation>;

    /// Walks the regions of the process in ascending start address order.
    ///
    /// The walk stops early once `callback` returns false.
    fn region_list_callback(&mut self, callback: RegionCallback) -> Result<()>;
}

/// Resolves process ids to memory contexts.
pub trait ProcessResolver {
    /// Looks up a live process.
    ///
    /// Fails with `ProcessNotFound` if no such process exists and with
    /// `NoMemoryContext` if it has no user address space (kernel threads, zombies).
    fn resolve(&self, pid: Pid) -> Result<ProcessHandle>;

    /// Takes the reader lock of the process' memory context.
    ///
    /// The process is checked again once the lock is held. A handle whose process
    /// exited or whose pid was reused fails with `ProcessNotFound`.
    fn lock_context(&self, handle: &ProcessHandle) -> Result<Box<dyn MemoryContext + '_>>;
}

impl<T: ProcessResolver + ?Sized> ProcessResolver for &T {
    fn resolve(&self, pid: Pid) -> Result<ProcessHandle> {
        (**self).resolve(pid)
    }

    fn lock_context(&self, handle: &ProcessHandle) -> Result<Box<dyn MemoryContext + '_>> {
        (**self).lock_context(handle)
    }
}
