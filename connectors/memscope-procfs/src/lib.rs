/*!
Linux procfs backend for memscope.

Processes are resolved through `/proc/<pid>/stat`, their regions come from
`/proc/<pid>/maps` and virtual addresses are translated with
`/proc/<pid>/pagemap`. Physical memory is accessed through a memory device,
`/dev/mem` by default.

Reading page frame numbers from pagemap requires `CAP_SYS_ADMIN`, without it the
kernel reports every frame as 0 and translation fails with `PermissionDenied`.
*/

use log::{debug, info, warn};

use memscope::connector::{ConnectorArgs, FileMappedMemory};
use memscope::engine::Engine;
use memscope::error::{Error, ErrorKind, ErrorOrigin, Result};
use memscope::mem::{CallerMemory, PhysicalMemory};
use memscope::process::{
    MemoryContext, MemoryRegion, Pid, ProcessHandle, ProcessResolver, RegionCallback,
    Translation,
};
use memscope::types::{Address, PermissionFlags, PhysicalAddress};

use core::ffi::c_void;
use libc::{c_ulong, iovec, sysconf, _SC_PAGESIZE};

use procfs::process::{MMPermissions, MMapPath, MemoryPageFlags, PageInfo, PageMap, Process};
use procfs::ProcError;

/// Default physical memory device.
pub const DEFAULT_DEVICE: &str = "/dev/mem";

// include/linux/sched.h
const PF_EXITING: u32 = 0x0000_0004;
const PF_KTHREAD: u32 = 0x0020_0000;

fn proc_error(err: ProcError) -> Error {
    match err {
        ProcError::NotFound(_) => Error(ErrorOrigin::ProcessResolver, ErrorKind::ProcessNotFound),
        ProcError::PermissionDenied(_) => {
            Error(ErrorOrigin::ProcessResolver, ErrorKind::PermissionDenied).log_warn(err)
        }
        _ => Error(ErrorOrigin::ProcessResolver, ErrorKind::UnableToReadFile).log_error(err),
    }
}

fn page_size() -> usize {
    match unsafe { sysconf(_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 0x1000,
    }
}

/// Resolves processes of the running system.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcfsResolver;

impl ProcfsResolver {
    pub fn new() -> Self {
        Self
    }

    /// Opens the process and checks that it has a user address space.
    ///
    /// Returns the process together with its start time, which serves as generation.
    fn open(&self, pid: Pid) -> Result<(Process, u64)> {
        let process = Process::new(pid).map_err(proc_error)?;
        let stat = process.stat().map_err(proc_error)?;

        if stat.flags & PF_KTHREAD != 0 {
            debug!("pid {} is a kernel thread", pid);
            return Err(Error(ErrorOrigin::ProcessResolver, ErrorKind::NoMemoryContext));
        }

        if matches!(stat.state, 'Z' | 'X') || stat.flags & PF_EXITING != 0 {
            debug!("pid {} is exiting (state {})", pid, stat.state);
            return Err(Error(ErrorOrigin::ProcessResolver, ErrorKind::NoMemoryContext));
        }

        Ok((process, stat.starttime))
    }
}

impl ProcessResolver for ProcfsResolver {
    fn resolve(&self, pid: Pid) -> Result<ProcessHandle> {
        let (_, starttime) = self.open(pid)?;
        Ok(ProcessHandle::new(pid, starttime))
    }

    fn lock_context(&self, handle: &ProcessHandle) -> Result<Box<dyn MemoryContext + '_>> {
        let (process, starttime) = self.open(handle.pid())?;
        if starttime != handle.generation() {
            debug!("pid {} was reused", handle.pid());
            return Err(Error(ErrorOrigin::ProcessResolver, ErrorKind::ProcessNotFound));
        }

        let regions = process
            .maps()
            .map_err(proc_error)?
            .into_iter()
            .map(|map| {
                let mut permissions = PermissionFlags::empty();
                permissions.set(PermissionFlags::READ, map.perms.contains(MMPermissions::READ));
                permissions.set(PermissionFlags::WRITE, map.perms.contains(MMPermissions::WRITE));
                permissions.set(PermissionFlags::EXEC, map.perms.contains(MMPermissions::EXECUTE));

                let backing_path = match map.pathname {
                    MMapPath::Path(path) => Some(path.to_string_lossy().into_owned()),
                    _ => None,
                };

                MemoryRegion {
                    pid: handle.pid(),
                    start: Address::from(map.address.0),
                    end: Address::from(map.address.1),
                    permissions,
                    backing_path,
                }
            })
            .collect::<Vec<_>>();

        let pagemap = process.pagemap().map_err(proc_error)?;

        Ok(Box::new(ProcfsContext {
            pid: handle.pid(),
            regions,
            pagemap,
            page_size: page_size(),
        }))
    }
}

/// Snapshot of the regions of a process together with its open pagemap.
struct ProcfsContext {
    pid: Pid,
    regions: Vec<MemoryRegion>,
    pagemap: PageMap,
    page_size: usize,
}

impl MemoryContext for ProcfsContext {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn translate(&mut self, _mem: &mut dyn PhysicalMemory, addr: Address) -> Result<Translation> {
        use memscope::architecture::PageTableLevel;

        let fail = |level| Error(ErrorOrigin::VirtualTranslate, ErrorKind::TranslationFailed(level));

        let region = self
            .regions
            .iter()
            .find(|region| region.contains(addr))
            .ok_or_else(|| fail(PageTableLevel::Top))?;

        let info = self
            .pagemap
            .get_info(addr.as_usize() / self.page_size)
            .map_err(|err| fail(PageTableLevel::Leaf).log_debug(err))?;

        let flags = match info {
            PageInfo::MemoryPage(flags) if flags.contains(MemoryPageFlags::PRESENT) => flags,
            _ => return Err(fail(PageTableLevel::Leaf)),
        };

        let pfn = flags.get_page_frame_number().0;
        if pfn == 0 {
            return Err(Error(ErrorOrigin::VirtualTranslate, ErrorKind::PermissionDenied)
                .log_warn("pagemap hides page frame numbers, CAP_SYS_ADMIN is required"));
        }

        let phys = PhysicalAddress::with_page(
            Address::from(pfn * self.page_size as u64 + addr.page_offset(self.page_size) as u64),
            region.permissions.page_type(),
            self.page_size,
        );

        Ok(Translation { virt: addr, phys })
    }

    fn region_list_callback(&mut self, callback: RegionCallback) -> Result<()> {
        for region in self.regions.iter() {
            if !callback(region.clone()) {
                break;
            }
        }
        Ok(())
    }
}

/// Memory of a requesting process, accessed with `process_vm_readv` / `process_vm_writev`.
#[derive(Debug, Clone, Copy)]
pub struct ProcessVmMemory {
    pid: Pid,
}

impl ProcessVmMemory {
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    /// Memory of the running process.
    pub fn current() -> Self {
        Self::new(std::process::id() as Pid)
    }

    fn iovecs(addr: Address, ptr: *mut c_void, len: usize) -> (iovec, iovec) {
        (
            iovec {
                iov_base: ptr,
                iov_len: len,
            },
            iovec {
                iov_base: addr.as_u64() as *mut c_void,
                iov_len: len,
            },
        )
    }

    fn vm_error(len: usize, transferred: isize) -> Error {
        let err = Error(
            ErrorOrigin::CallerMemory,
            ErrorKind::CopyFailed {
                transferred: transferred.max(0) as usize,
            },
        );

        if transferred >= 0 {
            return err.log_debug(format_args!("short copy {:#x} of {:#x}", transferred, len));
        }

        match unsafe { *libc::__errno_location() } {
            libc::EFAULT => err.log_debug("EFAULT (remote memory address is invalid)"),
            libc::ENOMEM => err.log_warn("ENOMEM (unable to allocate memory for internal copies)"),
            libc::EPERM => err.log_warn("EPERM (insufficient permissions to access the address space)"),
            libc::ESRCH => err.log_warn("ESRCH (process not found)"),
            libc::EINVAL => err.log_warn("EINVAL (invalid value)"),
            _ => err.log_warn("unknown error"),
        }
    }
}

impl CallerMemory for ProcessVmMemory {
    fn copy_from_caller(&mut self, src: Address, out: &mut [u8]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }

        let (local, remote) = Self::iovecs(src, out.as_mut_ptr() as *mut c_void, out.len());
        let ret = unsafe {
            libc::process_vm_readv(self.pid, &local, 1 as c_ulong, &remote, 1 as c_ulong, 0)
        };

        if ret != out.len() as isize {
            return Err(Self::vm_error(out.len(), ret));
        }
        Ok(())
    }

    fn copy_to_caller(&mut self, dst: Address, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let (local, remote) = Self::iovecs(dst, data.as_ptr() as *mut c_void, data.len());
        let ret = unsafe {
            libc::process_vm_writev(self.pid, &local, 1 as c_ulong, &remote, 1 as c_ulong, 0)
        };

        if ret != data.len() as isize {
            return Err(Self::vm_error(data.len(), ret));
        }
        Ok(())
    }
}

/// Creates an engine over the running system.
///
/// The physical memory device is taken from `device=<path>` or the default argument
/// and falls back to [`DEFAULT_DEVICE`]. `rw=false` opens it read-only.
pub fn create_engine(args: &ConnectorArgs) -> Result<Engine<ProcfsResolver, FileMappedMemory>> {
    let device = args
        .get("device")
        .or_else(|| args.get_default())
        .map(String::as_str)
        .unwrap_or(DEFAULT_DEVICE);
    let writeable = args.get_parsed::<bool>("rw")?.unwrap_or(true);

    // memory devices report a length of 0, bound them by the physical address width instead
    let mut mem = FileMappedMemory::open(device, writeable)?;
    if mem.metadata().max_address.is_null() {
        mem = mem.with_max_address(Address::bit_mask(0..=51));
    }

    if unsafe { libc::geteuid() } != 0 {
        warn!("not running as root, page frame numbers will not be readable");
    }

    info!("procfs connector created with device {}", device);
    Ok(Engine::new(ProcfsResolver::new(), mem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use memscope::architecture::PageTableLevel;
    use memscope::process::find_mapping;

    fn own_pid() -> Pid {
        std::process::id() as Pid
    }

    struct NoMemory;

    impl PhysicalMemory for NoMemory {
        fn phys_read_raw_into(&mut self, _addr: PhysicalAddress, _out: &mut [u8]) -> Result<()> {
            Err(Error(ErrorOrigin::PhysicalMemory, ErrorKind::NotSupported))
        }

        fn phys_write_raw(&mut self, _addr: PhysicalAddress, _data: &[u8]) -> Result<()> {
            Err(Error(ErrorOrigin::PhysicalMemory, ErrorKind::NotSupported))
        }

        fn metadata(&self) -> memscope::mem::PhysicalMemoryMetadata {
            memscope::mem::PhysicalMemoryMetadata {
                max_address: Address::NULL,
                readonly: true,
            }
        }
    }

    #[test]
    fn resolve_self() {
        let resolver = ProcfsResolver::new();
        let handle = resolver.resolve(own_pid()).unwrap();
        assert_eq!(handle.pid(), own_pid());

        let stat = Process::myself().unwrap().stat().unwrap();
        assert_eq!(handle.generation(), stat.starttime);
    }

    #[test]
    fn resolve_missing() {
        let resolver = ProcfsResolver::new();
        assert_eq!(
            resolver.resolve(i32::MAX).unwrap_err().kind(),
            ErrorKind::ProcessNotFound
        );
    }

    #[test]
    fn stale_generation() {
        let resolver = ProcfsResolver::new();
        let handle = resolver.resolve(own_pid()).unwrap();
        let stale = ProcessHandle::new(handle.pid(), handle.generation() + 1);
        assert_eq!(
            resolver.lock_context(&stale).err().map(|err| err.kind()),
            Some(ErrorKind::ProcessNotFound)
        );
    }

    #[test]
    fn own_regions() {
        let resolver = ProcfsResolver::new();
        let handle = resolver.resolve(own_pid()).unwrap();
        let mut ctx = resolver.lock_context(&handle).unwrap();

        let region = find_mapping(&mut *ctx, "").unwrap();
        assert!(!region.is_anonymous());
        assert!(region.start < region.end);

        assert_eq!(
            ctx.translate(&mut NoMemory, Address::from(0x10u64))
                .unwrap_err()
                .kind(),
            ErrorKind::TranslationFailed(PageTableLevel::Top)
        );
    }

    #[test]
    fn translate_resident() {
        let value = Box::new(0x1234_5678u64);
        let addr = Address::from(&*value as *const u64 as u64);

        let resolver = ProcfsResolver::new();
        let handle = resolver.resolve(own_pid()).unwrap();
        let mut ctx = resolver.lock_context(&handle).unwrap();

        match ctx.translate(&mut NoMemory, addr) {
            Ok(translation) => {
                assert!(!translation.phys.address().is_null());
                assert_eq!(
                    translation.phys.address().page_offset(page_size()),
                    addr.page_offset(page_size())
                );
            }
            Err(err) => assert_eq!(err.kind(), ErrorKind::PermissionDenied),
        }
    }

    #[test]
    fn caller_copies() {
        let mut caller = ProcessVmMemory::current();
        let src = [1u8, 2, 3, 4];
        let mut out = [0u8; 4];

        caller
            .copy_from_caller(Address::from(src.as_ptr() as u64), &mut out)
            .unwrap();
        assert_eq!(out, src);

        let mut dst = [0u8; 2];
        caller
            .copy_to_caller(Address::from(dst.as_mut_ptr() as u64), &[0, 200])
            .unwrap();
        assert_eq!(dst, [0, 200]);

        assert_eq!(
            caller
                .copy_from_caller(Address::NULL, &mut out)
                .unwrap_err()
                .kind(),
            ErrorKind::CopyFailed { transferred: 0 }
        );
    }
}
