use super::mem::DummyMemory;

use crate::architecture::x86::x64;
use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::mem::PhysicalMemory;
use crate::process::{
    MemoryContext, MemoryRegion, Pid, ProcessHandle, ProcessResolver, RegionCallback,
    Translation,
};
use crate::types::{size, Address, PermissionFlags};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard};

use x86_64::structures::paging::page_table::PageTableFlags;

const LEAF_STEP: usize = 3;
const LARGE_STEP: usize = 2;

/// Memory context of a fake process: a page table root and its regions.
struct DummyMm {
    dtb: Address,
    regions: BTreeMap<Address, MemoryRegion>,
    // virtual page -> (physical page, page size), used as a reference for the page walk
    pages: BTreeMap<Address, (Address, usize)>,
}

struct DummyProcess {
    generation: u64,
    mm: RwLock<Option<DummyMm>>,
}

/// Fake operating system owning a set of processes backed by a [`DummyMemory`].
///
/// Page tables are real x86-64 tables written into the dummy memory, frames are
/// handed out in a shuffled order so that virtually contiguous memory is not
/// physically contiguous.
pub struct DummyOs {
    processes: BTreeMap<Pid, DummyProcess>,
    frames: Vec<Address>,
    large_frames: Vec<Address>,
    last_pid: Pid,
    serial: u64,
}

fn not_found() -> Error {
    Error(ErrorOrigin::ProcessResolver, ErrorKind::ProcessNotFound)
}

fn no_context() -> Error {
    Error(ErrorOrigin::ProcessResolver, ErrorKind::NoMemoryContext)
}

fn poisoned() -> Error {
    Error(ErrorOrigin::ProcessResolver, ErrorKind::Unknown).log_error("memory context lock poisoned")
}

fn leaf_flags(perms: PermissionFlags) -> PageTableFlags {
    let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
    if perms.contains(PermissionFlags::WRITE) {
        flags |= PageTableFlags::WRITABLE;
    }
    if !perms.contains(PermissionFlags::EXEC) {
        flags |= PageTableFlags::NO_EXECUTE;
    }
    flags
}

impl DummyOs {
    /// Creates a new DummyOs object with a fixed default seed
    ///
    /// Note:
    ///
    /// Using a fixed seed for the rng will provide reproducability throughout test cases.
    pub fn new(mem: &DummyMemory) -> Self {
        Self::with_seed(mem, 1)
    }

    /// Creates a new DummyOs object with the given seed as a starting value for the RNG
    pub fn with_seed(mem: &DummyMemory, seed: u64) -> Self {
        Self::with_rng(mem, XorShiftRng::seed_from_u64(seed))
    }

    /// Creates a new DummyOs object with the given RNG.
    ///
    /// The upper quarter of memories of at least 8 MiB is kept for 2 MiB pages.
    /// The frame at physical address 0 is never handed out by the allocator,
    /// it can only be mapped explicitly through [`DummyOs::map_page_at`].
    pub fn with_rng(mem: &DummyMemory, mut rng: XorShiftRng) -> Self {
        let total = mem.size();
        let large_start = if total >= size::mb(8) {
            (total - total / 4 + size::mb(2) - 1) & !(size::mb(2) - 1)
        } else {
            total
        };

        let mut frames = (1..(large_start / size::kb(4)))
            .map(|idx| Address::from(idx * size::kb(4)))
            .collect::<Vec<_>>();
        frames.shuffle(&mut rng);

        let mut large_frames = (large_start..total)
            .step_by(size::mb(2))
            .filter(|base| base + size::mb(2) <= total)
            .map(Address::from)
            .collect::<Vec<_>>();
        large_frames.shuffle(&mut rng);

        Self {
            processes: BTreeMap::new(),
            frames,
            large_frames,
            last_pid: 0,
            serial: 0,
        }
    }

    fn alloc_frame(&mut self, mem: &mut DummyMemory) -> Result<Address> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| Error(ErrorOrigin::PhysicalMemory, ErrorKind::OutOfBounds).log_error("dummy memory exhausted"))?;
        mem.phys_write_raw(frame.into(), &[0u8; 0x1000])?;
        Ok(frame)
    }

    /// Creates a process with an empty address space.
    pub fn alloc_process(&mut self, mem: &mut DummyMemory) -> Result<Pid> {
        let pid = self.last_pid + 1;
        self.alloc_process_with_pid(mem, pid)?;
        Ok(pid)
    }

    /// Creates a process with an empty address space and the given pid.
    ///
    /// An existing process with the same pid is replaced, which models pid reuse.
    pub fn alloc_process_with_pid(&mut self, mem: &mut DummyMemory, pid: Pid) -> Result<()> {
        let dtb = self.alloc_frame(mem)?;
        self.serial += 1;
        self.last_pid = self.last_pid.max(pid);
        self.processes.insert(
            pid,
            DummyProcess {
                generation: self.serial,
                mm: RwLock::new(Some(DummyMm {
                    dtb,
                    regions: BTreeMap::new(),
                    pages: BTreeMap::new(),
                })),
            },
        );
        Ok(())
    }

    /// Creates a process without a user address space, like a kernel thread.
    pub fn add_kernel_thread(&mut self) -> Pid {
        self.last_pid += 1;
        self.serial += 1;
        self.processes.insert(
            self.last_pid,
            DummyProcess {
                generation: self.serial,
                mm: RwLock::new(None),
            },
        );
        self.last_pid
    }

    fn mm_mut(&mut self, pid: Pid) -> Result<&mut DummyMm> {
        self.processes
            .get_mut(&pid)
            .ok_or_else(not_found)?
            .mm
            .get_mut()
            .map_err(|_| poisoned())?
            .as_mut()
            .ok_or_else(no_context)
    }

    /// Writes the page table entries mapping `vaddr` to `frame`.
    ///
    /// `step` selects the page size: the leaf step maps 4 KiB, the middle directory 2 MiB.
    fn map_page(
        &mut self,
        mem: &mut DummyMemory,
        dtb: Address,
        vaddr: Address,
        frame: Address,
        step: usize,
        flags: PageTableFlags,
    ) -> Result<()> {
        let spec = &x64::ARCH_SPEC;
        let table_flags = PageTableFlags::PRESENT
            | PageTableFlags::WRITABLE
            | PageTableFlags::USER_ACCESSIBLE;

        let mut table = dtb;
        for level in 0..step {
            let pte_addr = table + spec.virt_addr_to_pte_offset(vaddr, level);
            let raw: u64 = mem.phys_read(pte_addr.into())?;
            let entry = PageTableFlags::from_bits_truncate(raw);

            if entry.contains(PageTableFlags::HUGE_PAGE) {
                return Err(Error(ErrorOrigin::Other, ErrorKind::InvalidArgument)
                    .log_error("mapping overlaps a large page"));
            }

            table = if entry.contains(PageTableFlags::PRESENT) {
                Address::from(raw & Address::bit_mask(12..=51).as_u64())
            } else {
                let next = self.alloc_frame(mem)?;
                mem.phys_write(pte_addr.into(), &(next.as_u64() | table_flags.bits()))?;
                next
            };
        }

        let mut flags = flags;
        if step != LEAF_STEP {
            flags |= PageTableFlags::HUGE_PAGE;
        }

        let pte_addr = table + spec.virt_addr_to_pte_offset(vaddr, step);
        mem.phys_write(pte_addr.into(), &(frame.as_u64() | flags.bits()))
    }

    /// Maps a region of 4 KiB pages at `base` and fills it with `data`.
    ///
    /// `size` is rounded up to whole pages. Bytes past the end of `data` stay zero.
    pub fn alloc_region(
        &mut self,
        mem: &mut DummyMemory,
        pid: Pid,
        base: Address,
        size: usize,
        perms: PermissionFlags,
        path: Option<&str>,
        data: &[u8],
    ) -> Result<()> {
        let page_size = size::kb(4);
        if base.page_offset(page_size) != 0 || data.len() > size {
            return Err(Error(ErrorOrigin::Other, ErrorKind::InvalidArgument));
        }

        let dtb = self.mm_mut(pid)?.dtb;
        let pages = (size + page_size - 1) / page_size;

        for idx in 0..pages {
            let vaddr = base + idx * page_size;
            let frame = self.alloc_frame(mem)?;
            self.map_page(mem, dtb, vaddr, frame, LEAF_STEP, leaf_flags(perms))?;

            let chunk = data.iter().skip(idx * page_size).take(page_size).copied().collect::<Vec<_>>();
            mem.phys_write_raw(frame.into(), &chunk)?;

            self.mm_mut(pid)?.pages.insert(vaddr, (frame, page_size));
        }

        self.add_region(pid, base, base + pages * page_size, perms, path)
    }

    /// Maps a single 2 MiB page at `base`, which has to be 2 MiB aligned.
    pub fn alloc_large_region(
        &mut self,
        mem: &mut DummyMemory,
        pid: Pid,
        base: Address,
        perms: PermissionFlags,
        path: Option<&str>,
    ) -> Result<()> {
        let page_size = size::mb(2);
        if base.page_offset(page_size) != 0 {
            return Err(Error(ErrorOrigin::Other, ErrorKind::InvalidArgument));
        }

        let dtb = self.mm_mut(pid)?.dtb;
        let frame = self
            .large_frames
            .pop()
            .ok_or_else(|| Error(ErrorOrigin::PhysicalMemory, ErrorKind::OutOfBounds).log_error("no large frames left"))?;
        self.map_page(mem, dtb, base, frame, LARGE_STEP, leaf_flags(perms))?;
        self.mm_mut(pid)?.pages.insert(base, (frame, page_size));

        self.add_region(pid, base, base + page_size, perms, path)
    }

    /// Maps the 4 KiB page at `vaddr` to the given physical frame.
    pub fn map_page_at(
        &mut self,
        mem: &mut DummyMemory,
        pid: Pid,
        vaddr: Address,
        frame: Address,
        perms: PermissionFlags,
    ) -> Result<()> {
        let vaddr = vaddr.as_page_aligned(size::kb(4));
        let dtb = self.mm_mut(pid)?.dtb;
        self.map_page(mem, dtb, vaddr, frame, LEAF_STEP, leaf_flags(perms))?;
        self.mm_mut(pid)?.pages.insert(vaddr, (frame, size::kb(4)));
        self.add_region(pid, vaddr, vaddr + size::kb(4), perms, None)
    }

    /// Records a region without mapping any of its pages.
    pub fn add_region(
        &mut self,
        pid: Pid,
        start: Address,
        end: Address,
        permissions: PermissionFlags,
        path: Option<&str>,
    ) -> Result<()> {
        let mm = self.mm_mut(pid)?;
        mm.regions.insert(
            start,
            MemoryRegion {
                pid,
                start,
                end,
                permissions,
                backing_path: path.map(String::from),
            },
        );
        Ok(())
    }

    /// Clears the present bit of the leaf entry mapping `vaddr`, as if the page was swapped out.
    pub fn evict_page(&self, mem: &mut DummyMemory, pid: Pid, vaddr: Address) -> Result<()> {
        let process = self.processes.get(&pid).ok_or_else(not_found)?;
        let mut guard = process.mm.write().map_err(|_| poisoned())?;
        let mm = guard.as_mut().ok_or_else(no_context)?;

        let page = vaddr.as_page_aligned(size::kb(4));
        if mm.pages.remove(&page).is_none() {
            return Err(Error(ErrorOrigin::Other, ErrorKind::NotFound));
        }

        let spec = &x64::ARCH_SPEC;
        let mut table = mm.dtb;
        for step in 0..LEAF_STEP {
            let entry: u64 = mem.phys_read((table + spec.virt_addr_to_pte_offset(page, step)).into())?;
            table = Address::from(entry & Address::bit_mask(12..=51).as_u64());
        }

        let pte_addr = table + spec.virt_addr_to_pte_offset(page, LEAF_STEP);
        let entry: u64 = mem.phys_read(pte_addr.into())?;
        mem.phys_write(pte_addr.into(), &(entry & !PageTableFlags::PRESENT.bits()))
    }

    /// Tears down the address space of a process while keeping the process around,
    /// like a zombie waiting to be reaped.
    pub fn exit_process(&self, pid: Pid) -> Result<()> {
        let process = self.processes.get(&pid).ok_or_else(not_found)?;
        *process.mm.write().map_err(|_| poisoned())? = None;
        Ok(())
    }

    /// Removes a process entirely.
    pub fn reap_process(&mut self, pid: Pid) -> Result<()> {
        self.processes.remove(&pid).map(|_| ()).ok_or_else(not_found)
    }

    /// Translates `vaddr` from the bookkeeping of the allocator, without walking page tables.
    pub fn reference_translate(&self, pid: Pid, vaddr: Address) -> Option<Address> {
        let process = self.processes.get(&pid)?;
        let guard = process.mm.read().ok()?;
        let mm = guard.as_ref()?;

        let (virt_base, (phys_base, page_size)) = mm.pages.range(..=vaddr).next_back()?;
        if vaddr - *virt_base < *page_size as u64 {
            Some(*phys_base + (vaddr - *virt_base) as usize)
        } else {
            None
        }
    }
}

struct DummyContext<'a> {
    pid: Pid,
    mm: RwLockReadGuard<'a, Option<DummyMm>>,
}

impl<'a> DummyContext<'a> {
    fn mm(&self) -> Result<&DummyMm> {
        self.mm.as_ref().ok_or_else(no_context)
    }
}

impl<'a> MemoryContext for DummyContext<'a> {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn translate(&mut self, mem: &mut dyn PhysicalMemory, addr: Address) -> Result<Translation> {
        let dtb = self.mm()?.dtb;
        let phys = x64::new_translator(dtb).virt_to_phys(mem, addr)?;
        Ok(Translation { virt: addr, phys })
    }

    fn region_list_callback(&mut self, callback: RegionCallback) -> Result<()> {
        for region in self.mm()?.regions.values() {
            if !callback(region.clone()) {
                break;
            }
        }
        Ok(())
    }
}

impl ProcessResolver for DummyOs {
    fn resolve(&self, pid: Pid) -> Result<ProcessHandle> {
        let process = self.processes.get(&pid).ok_or_else(not_found)?;
        if process.mm.read().map_err(|_| poisoned())?.is_none() {
            return Err(no_context());
        }
        Ok(ProcessHandle::new(pid, process.generation))
    }

    fn lock_context(&self, handle: &ProcessHandle) -> Result<Box<dyn MemoryContext + '_>> {
        let process = self
            .processes
            .get(&handle.pid())
            .filter(|process| process.generation == handle.generation())
            .ok_or_else(not_found)?;

        let mm = process.mm.read().map_err(|_| poisoned())?;
        if mm.is_none() {
            return Err(no_context());
        }

        Ok(Box::new(DummyContext {
            pid: handle.pid(),
            mm,
        }))
    }
}
