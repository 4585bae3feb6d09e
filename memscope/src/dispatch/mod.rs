/*!
Request dispatcher.

The dispatcher is the outermost boundary of memscope. It receives a command code
and the address of a request record in the caller's memory, copies the record in,
routes it to the [`Engine`] and collapses the outcome into a status code.

The dispatcher performs no translation itself.
*/

pub mod protocol;
#[doc(hidden)]
pub use protocol::{Command, MapsRecord, MemoryRecord};

use log::{debug, info};

use crate::engine::Engine;
use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::mem::{CallerMemory, Direction, PhysicalMapper, PhysicalMemory};
use crate::process::{MemoryRegion, Pid, ProcessResolver};
use crate::types::{size, Address};

/// How failures are reported to the caller.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StatusMode {
    /// Every failure is reported as -1.
    Binary,
    /// Every failure is reported as the negative code of its error kind.
    Structured,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Upper bound of the length of a single memory request.
    pub max_access_len: usize,
    pub status_mode: StatusMode,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_access_len: size::mb(1),
            status_mode: StatusMode::Structured,
        }
    }
}

pub struct Dispatcher<R, M> {
    engine: Engine<R, M>,
    config: DispatcherConfig,
}

impl<R: ProcessResolver, M: PhysicalMemory + PhysicalMapper> Dispatcher<R, M> {
    pub fn new(engine: Engine<R, M>, config: DispatcherConfig) -> Self {
        info!(
            "dispatcher created: max_access_len={:#x} status_mode={:?}",
            config.max_access_len, config.status_mode
        );
        Self { engine, config }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine<R, M> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<R, M> {
        &mut self.engine
    }

    pub fn into_engine(self) -> Engine<R, M> {
        self.engine
    }

    /// Handles a single request and returns its status code.
    ///
    /// `arg` is the address of the request record in `caller`. The return value is 0 on
    /// success and negative on failure, see [`StatusMode`].
    pub fn ioctl<C: CallerMemory>(&mut self, caller: &mut C, cmd: u32, arg: Address) -> i32 {
        match self.handle(caller, cmd, arg) {
            Ok(()) => 0,
            Err(err) => {
                debug!("request {:#x} failed: {}", cmd, err);
                self.status(err)
            }
        }
    }

    /// Converts an error into the status code of the configured mode.
    pub fn status(&self, err: Error) -> i32 {
        match self.config.status_mode {
            StatusMode::Binary => -1,
            StatusMode::Structured => err.into_status(),
        }
    }

    /// Handles a single request and returns the typed result.
    pub fn handle<C: CallerMemory>(&mut self, caller: &mut C, cmd: u32, arg: Address) -> Result<()> {
        match Command::try_from(cmd)? {
            Command::GetMappings => {
                let mut record: MapsRecord = caller.read_record(arg)?;
                let name = record.name()?.to_owned();

                let region = match self.get_mappings(record.pid, &name) {
                    Ok(region) => region,
                    // the record stays untouched and the baseline protocol reports success
                    Err(err)
                        if err.kind() == ErrorKind::NotFound
                            && self.config.status_mode == StatusMode::Binary =>
                    {
                        return Ok(())
                    }
                    Err(err) => return Err(err),
                };

                record.start = region.start.as_u64();
                record.end = region.end.as_u64();
                record.flags = region.permissions.bits();
                caller.write_record(arg, &record)
            }
            Command::GetMemory => {
                let record: MemoryRecord = caller.read_record(arg)?;
                self.get_memory(caller, &record)
            }
            Command::SetMemory => {
                let record: MemoryRecord = caller.read_record(arg)?;
                self.set_memory(caller, &record)
            }
        }
    }

    /// Returns the first file-backed region of `pid` whose path contains `name`.
    pub fn get_mappings(&self, pid: Pid, name: &str) -> Result<MemoryRegion> {
        debug!("get_mappings pid={} name={:?}", pid, name);
        self.engine.find_mapping(pid, name)
    }

    /// Copies `record.len` bytes of the target into the caller buffer at `record.buf`.
    pub fn get_memory<C: CallerMemory + ?Sized>(
        &mut self,
        caller: &mut C,
        record: &MemoryRecord,
    ) -> Result<()> {
        self.memory(caller, record, Direction::Read)
    }

    /// Copies `record.len` bytes of the caller buffer at `record.buf` into the target.
    pub fn set_memory<C: CallerMemory + ?Sized>(
        &mut self,
        caller: &mut C,
        record: &MemoryRecord,
    ) -> Result<()> {
        self.memory(caller, record, Direction::Write)
    }

    fn memory<C: CallerMemory + ?Sized>(
        &mut self,
        caller: &mut C,
        record: &MemoryRecord,
        direction: Direction,
    ) -> Result<()> {
        let len = self.check_len(record.len)?;
        self.engine.access(
            record.pid,
            Address::from(record.addr),
            len,
            direction,
            caller,
            Address::from(record.buf),
        )
    }

    fn check_len(&self, len: u64) -> Result<usize> {
        match usize::try_from(len) {
            Ok(len) if len > 0 && len <= self.config.max_access_len => Ok(len),
            _ => Err(Error(ErrorOrigin::Dispatcher, ErrorKind::InvalidArgument)
                .log_debug(format_args!("invalid length {:#x}", len))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::protocol::{GET_MAPS, GET_MEM, SET_MEM};
    use super::*;
    use crate::architecture::PageTableLevel;
    use crate::dummy::{DummyCaller, DummyMemory, DummyOs};
    use crate::types::PermissionFlags;

    const BASE: u64 = 0x40_0000;
    const CALLER_BASE: u64 = 0x7000_0000;
    const RECORD: u64 = CALLER_BASE;
    const BUF: u64 = CALLER_BASE + 0x100;

    fn setup() -> (DummyOs, DummyMemory, Pid) {
        let mut mem = DummyMemory::new(size::mb(8));
        let mut os = DummyOs::new(&mem);
        let pid = os.alloc_process(&mut mem).unwrap();
        os.alloc_region(
            &mut mem,
            pid,
            Address::from(BASE),
            size::kb(8),
            PermissionFlags::READ | PermissionFlags::WRITE,
            Some("/usr/lib/x86_64-linux-gnu/libc.so.6"),
            &[1, 2, 3, 4],
        )
        .unwrap();
        os.add_region(
            pid,
            Address::from(0x7f00_0000_0000u64),
            Address::from(0x7f00_0000_4000u64),
            PermissionFlags::READ | PermissionFlags::EXEC,
            Some("/usr/lib/x86_64-linux-gnu/libc.so.6"),
        )
        .unwrap();
        (os, mem, pid)
    }

    fn new_dispatcher(os: &DummyOs, mem: DummyMemory, status_mode: StatusMode) -> Dispatcher<&DummyOs, DummyMemory> {
        Dispatcher::new(
            Engine::new(os, mem),
            DispatcherConfig {
                status_mode,
                ..DispatcherConfig::default()
            },
        )
    }

    fn memory_request(caller: &mut DummyCaller, pid: Pid, addr: u64, len: usize) {
        let record = MemoryRecord::new(pid, Address::from(addr), len, Address::from(BUF));
        caller.write_record(Address::from(RECORD), &record).unwrap();
    }

    #[test]
    fn get_maps() {
        let (os, mem, pid) = setup();
        let mut dispatcher = new_dispatcher(&os, mem, StatusMode::Structured);
        let mut caller = DummyCaller::new(CALLER_BASE, 0x1000);

        caller
            .write_record(Address::from(RECORD), &MapsRecord::new(pid, "libc.so"))
            .unwrap();
        assert_eq!(dispatcher.ioctl(&mut caller, GET_MAPS, Address::from(RECORD)), 0);

        let record: MapsRecord = caller.read_record(Address::from(RECORD)).unwrap();
        assert_eq!(record.start, BASE);
        assert_eq!(record.end, BASE + 0x2000);
        assert_eq!(record.flags, 0b011);
        assert_eq!(record.name(), Ok("libc.so"));
    }

    #[test]
    fn get_maps_not_found() {
        let (os, mem, pid) = setup();
        let mut caller = DummyCaller::new(CALLER_BASE, 0x1000);
        let mut request = MapsRecord::new(pid, "libz");
        request.start = 0x1111;
        caller.write_record(Address::from(RECORD), &request).unwrap();

        let mut dispatcher = new_dispatcher(&os, mem, StatusMode::Structured);
        assert_eq!(
            dispatcher.ioctl(&mut caller, GET_MAPS, Address::from(RECORD)),
            Error(ErrorOrigin::MappingEnumerator, ErrorKind::NotFound).into_status()
        );

        let mem = dispatcher.into_engine().into_inner().1;
        let mut dispatcher = new_dispatcher(&os, mem, StatusMode::Binary);
        assert_eq!(dispatcher.ioctl(&mut caller, GET_MAPS, Address::from(RECORD)), 0);

        let record: MapsRecord = caller.read_record(Address::from(RECORD)).unwrap();
        assert_eq!(record.start, 0x1111);
        assert_eq!(record.end, 0);
    }

    #[test]
    fn set_then_get_memory() {
        let (os, mem, pid) = setup();
        let mut dispatcher = new_dispatcher(&os, mem, StatusMode::Structured);
        let mut caller = DummyCaller::new(CALLER_BASE, 0x1000);

        caller
            .copy_to_caller(Address::from(BUF), &[0, 0, 200, 0])
            .unwrap();
        memory_request(&mut caller, pid, BASE + 0xffe, 4);
        assert_eq!(dispatcher.ioctl(&mut caller, SET_MEM, Address::from(RECORD)), 0);

        caller.copy_to_caller(Address::from(BUF), &[9; 4]).unwrap();
        assert_eq!(dispatcher.ioctl(&mut caller, GET_MEM, Address::from(RECORD)), 0);

        let mut out = [0u8; 4];
        caller.copy_from_caller(Address::from(BUF), &mut out).unwrap();
        assert_eq!(out, [0, 0, 200, 0]);
    }

    #[test]
    fn errors_are_reported() {
        let (os, mem, pid) = setup();
        let mut dispatcher = new_dispatcher(&os, mem, StatusMode::Structured);
        let mut caller = DummyCaller::new(CALLER_BASE, 0x1000);
        let record = Address::from(RECORD);

        memory_request(&mut caller, pid, BASE + 0x2000, 4);
        let status = dispatcher.ioctl(&mut caller, GET_MEM, record);
        assert_eq!(
            Error::from_status(status),
            Some(ErrorKind::TranslationFailed(PageTableLevel::Leaf))
        );

        memory_request(&mut caller, 999, BASE, 4);
        let status = dispatcher.ioctl(&mut caller, GET_MEM, record);
        assert_eq!(Error::from_status(status), Some(ErrorKind::ProcessNotFound));

        memory_request(&mut caller, pid, BASE, 0);
        let status = dispatcher.ioctl(&mut caller, GET_MEM, record);
        assert_eq!(Error::from_status(status), Some(ErrorKind::InvalidArgument));

        memory_request(&mut caller, pid, BASE, size::mb(1) + 1);
        let status = dispatcher.ioctl(&mut caller, SET_MEM, record);
        assert_eq!(Error::from_status(status), Some(ErrorKind::InvalidArgument));

        let status = dispatcher.ioctl(&mut caller, 0xdead, record);
        assert_eq!(Error::from_status(status), Some(ErrorKind::NotSupported));

        // record outside of the caller memory
        let status = dispatcher.ioctl(&mut caller, GET_MEM, Address::from(0x10u64));
        assert_eq!(
            Error::from_status(status),
            Some(ErrorKind::CopyFailed { transferred: 0 })
        );
    }

    #[test]
    fn binary_status() {
        let (os, mem, pid) = setup();
        let mut dispatcher = new_dispatcher(&os, mem, StatusMode::Binary);
        let mut caller = DummyCaller::new(CALLER_BASE, 0x1000);

        memory_request(&mut caller, pid, 0x7f00_0000_0000, 4);
        assert_eq!(dispatcher.ioctl(&mut caller, GET_MEM, Address::from(RECORD)), -1);

        memory_request(&mut caller, pid, BASE, 4);
        assert_eq!(dispatcher.ioctl(&mut caller, GET_MEM, Address::from(RECORD)), 0);
    }

    #[test]
    fn partial_caller_buffer() {
        let (os, mem, pid) = setup();
        let mut dispatcher = new_dispatcher(&os, mem, StatusMode::Structured);
        let mut caller = DummyCaller::new(CALLER_BASE, 0x1000);

        memory_request(&mut caller, pid, BASE, 0x10);
        caller.set_valid_len(0x102);

        let err = dispatcher
            .handle(&mut caller, GET_MEM, Address::from(RECORD))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CopyFailed { transferred: 2 });
        assert_eq!(&caller.buf()[0x100..0x102], &[1, 2]);
        assert_eq!(dispatcher.engine().mem().live_windows(), 0);
    }
}
