/*!
Wire format of the request interface.

Command numbers use the Linux ioctl encoding, every request carries a pointer to
a fixed size record in the caller's memory.
*/

use std::fmt;
use std::mem::size_of;

use dataview::Pod;

use crate::error::{Error, ErrorKind, ErrorOrigin};
use crate::process::Pid;
use crate::types::{Address, PermissionFlags};

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

pub const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> u32 {
    (dir << IOC_DIRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
}

/// `_IOR(ty, nr, T)` with `size` being `sizeof(T)`.
pub const fn ior(ty: u8, nr: u8, size: usize) -> u32 {
    ioc(IOC_READ, ty, nr, size)
}

/// `_IOW(ty, nr, T)` with `size` being `sizeof(T)`.
pub const fn iow(ty: u8, nr: u8, size: usize) -> u32 {
    ioc(IOC_WRITE, ty, nr, size)
}

// the argument type of every command is a pointer to its record
const ARG_SIZE: usize = size_of::<u64>();

pub const GET_MAPS: u32 = ior(b'a', b'a', ARG_SIZE);
pub const GET_MEM: u32 = ior(b'b', b'a', ARG_SIZE);
pub const SET_MEM: u32 = iow(b'b', b'b', ARG_SIZE);

/// Length of the name field of [`MapsRecord`], the terminating NUL included.
pub const NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Command {
    GetMappings,
    GetMemory,
    SetMemory,
}

impl Command {
    pub const fn code(self) -> u32 {
        match self {
            Command::GetMappings => GET_MAPS,
            Command::GetMemory => GET_MEM,
            Command::SetMemory => SET_MEM,
        }
    }
}

impl TryFrom<u32> for Command {
    type Error = Error;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            GET_MAPS => Ok(Command::GetMappings),
            GET_MEM => Ok(Command::GetMemory),
            SET_MEM => Ok(Command::SetMemory),
            _ => Err(Error(ErrorOrigin::Dispatcher, ErrorKind::NotSupported)
                .log_debug(format_args!("unknown command {:#x}", code))),
        }
    }
}

/// Request record of `GetMappings`.
///
/// `start`, `end` and `flags` are overwritten with the first matching region.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MapsRecord {
    pub pid: Pid,
    _pad: u32,
    pub start: u64,
    pub end: u64,
    pub flags: u64,
    pub name: [u8; NAME_LEN],
}

unsafe impl Pod for MapsRecord {}

const _: [(); 96] = [(); size_of::<MapsRecord>()];

impl MapsRecord {
    /// Creates a request for `name`, which is truncated to 63 bytes.
    pub fn new(pid: Pid, name: &str) -> Self {
        let mut record = Self {
            pid,
            _pad: 0,
            start: 0,
            end: 0,
            flags: 0,
            name: [0; NAME_LEN],
        };
        record.set_name(name);
        record
    }

    /// Returns the name up to the first NUL byte.
    ///
    /// A name without terminator is rejected instead of read past its end.
    pub fn name(&self) -> crate::error::Result<&str> {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error(ErrorOrigin::Dispatcher, ErrorKind::InvalidArgument))?;
        Ok(std::str::from_utf8(&self.name[..len])?)
    }

    pub fn set_name(&mut self, name: &str) {
        let len = name.len().min(NAME_LEN - 1);
        self.name = [0; NAME_LEN];
        self.name[..len].copy_from_slice(&name.as_bytes()[..len]);
    }

    pub fn permissions(&self) -> PermissionFlags {
        PermissionFlags::from_bits_truncate(self.flags)
    }
}

impl fmt::Debug for MapsRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MapsRecord")
            .field("pid", &self.pid)
            .field("start", &Address::from(self.start))
            .field("end", &Address::from(self.end))
            .field("flags", &self.permissions())
            .field("name", &self.name().unwrap_or("<invalid>"))
            .finish()
    }
}

/// Request record of `GetMemory` and `SetMemory`.
///
/// `buf` is the address of `len` bytes in the caller's memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MemoryRecord {
    pub pid: Pid,
    _pad: u32,
    pub addr: u64,
    pub len: u64,
    pub buf: u64,
}

unsafe impl Pod for MemoryRecord {}

const _: [(); 32] = [(); size_of::<MemoryRecord>()];

impl MemoryRecord {
    pub fn new(pid: Pid, addr: Address, len: usize, buf: Address) -> Self {
        Self {
            pid,
            _pad: 0,
            addr: addr.as_u64(),
            len: len as u64,
            buf: buf.as_u64(),
        }
    }
}
