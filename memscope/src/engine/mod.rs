/*!
Request engine.

The engine owns a [`ProcessResolver`] and a physical memory backend and runs every
request under the memory-context lock of its target process: the process is resolved,
its context is locked and re-validated, all pages touched by the request are
translated and only then the bytes are copied through physical windows.
*/

use log::debug;

use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::mem::{window, CallerBuffer, CallerMemory, CallerSource, Direction};
use crate::mem::{PhysicalMapper, PhysicalMemory};
use crate::process::{self, MemoryRegion, Pid, ProcessHandle, ProcessResolver, Translation};
use crate::types::{size, Address, PhysicalAddress};

/// Chunk length used when a translation does not report its page size.
const FALLBACK_PAGE_SIZE: usize = size::kb(4);

/// A piece of a request that lies inside a single physical page.
#[derive(Debug, Clone, Copy)]
struct Chunk {
    offset: usize,
    phys: PhysicalAddress,
    len: usize,
}

pub struct Engine<R, M> {
    resolver: R,
    mem: M,
}

impl<R: ProcessResolver, M: PhysicalMemory + PhysicalMapper> Engine<R, M> {
    pub fn new(resolver: R, mem: M) -> Self {
        Self { resolver, mem }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn mem(&self) -> &M {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    /// Consumes the engine and returns its resolver and memory backend.
    pub fn into_inner(self) -> (R, M) {
        (self.resolver, self.mem)
    }

    pub fn resolve(&self, pid: Pid) -> Result<ProcessHandle> {
        self.resolver.resolve(pid)
    }

    /// Translates a single virtual address of `pid`.
    pub fn translate(&mut self, pid: Pid, addr: Address) -> Result<Translation> {
        let handle = self.resolver.resolve(pid)?;
        let mut ctx = self.resolver.lock_context(&handle)?;
        ctx.translate(&mut self.mem, addr)
    }

    /// Returns the first file-backed region of `pid` whose path contains `name`.
    pub fn find_mapping(&self, pid: Pid, name: &str) -> Result<MemoryRegion> {
        let handle = self.resolver.resolve(pid)?;
        let mut ctx = self.resolver.lock_context(&handle)?;
        process::find_mapping(&mut *ctx, name)
    }

    pub fn region_list(&self, pid: Pid) -> Result<Vec<MemoryRegion>> {
        let handle = self.resolver.resolve(pid)?;
        let mut ctx = self.resolver.lock_context(&handle)?;
        process::region_list(&mut *ctx)
    }

    /// Copies `len` bytes between `addr` in `pid` and `caller_addr` in the caller memory.
    ///
    /// The request is split at physical page boundaries. Every chunk is translated
    /// before the first byte is copied, so a translation failure leaves both sides
    /// untouched. A failing caller copy is reported as `CopyFailed` carrying the number
    /// of bytes of the whole request that were transferred.
    pub fn access<C: CallerMemory + ?Sized>(
        &mut self,
        pid: Pid,
        addr: Address,
        len: usize,
        direction: Direction,
        caller: &mut C,
        caller_addr: Address,
    ) -> Result<()> {
        debug!(
            "access pid={} addr={:x} len={:x} direction={:?}",
            pid, addr, len, direction
        );

        let handle = self.resolver.resolve(pid)?;
        let mut ctx = self.resolver.lock_context(&handle)?;

        let mut chunks = vec![];
        let mut offset = 0;
        while offset < len {
            let virt = addr
                .checked_add(offset)
                .ok_or(Error(ErrorOrigin::VirtualTranslate, ErrorKind::OutOfBounds))?;
            let Translation { phys, .. } = ctx.translate(&mut self.mem, virt)?;

            let in_page = phys.remaining_in_page().unwrap_or_else(|| {
                FALLBACK_PAGE_SIZE - virt.page_offset(FALLBACK_PAGE_SIZE)
            });
            let chunk = Chunk {
                offset,
                phys,
                len: in_page.min(len - offset),
            };
            offset += chunk.len;
            chunks.push(chunk);
        }

        for chunk in chunks {
            window::access(
                &mut self.mem,
                chunk.phys,
                chunk.len,
                direction,
                caller,
                caller_addr + chunk.offset,
            )
            .map_err(|err| match err.kind() {
                ErrorKind::CopyFailed { transferred } => Error(
                    err.origin(),
                    ErrorKind::CopyFailed {
                        transferred: chunk.offset + transferred,
                    },
                ),
                _ => err,
            })?;
        }

        // the context lock is held until here
        drop(ctx);
        Ok(())
    }

    /// Reads `out.len()` bytes at `addr` of `pid` into a local buffer.
    pub fn read(&mut self, pid: Pid, addr: Address, out: &mut [u8]) -> Result<()> {
        let len = out.len();
        let mut caller = CallerBuffer::new(out);
        self.access(pid, addr, len, Direction::Read, &mut caller, Address::NULL)
    }

    /// Writes `data` to `addr` of `pid` from a local buffer.
    pub fn write(&mut self, pid: Pid, addr: Address, data: &[u8]) -> Result<()> {
        let mut caller = CallerSource::new(data);
        self.access(pid, addr, data.len(), Direction::Write, &mut caller, Address::NULL)
    }
}
