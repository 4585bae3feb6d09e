/*!
Single process resolver for raw memory images.

A memory image carries no process list. The address space to inspect is
described by its directory table base and the architecture of its page tables,
and is exposed under a fixed pid.
*/

use log::info;

use super::ConnectorArgs;
use crate::architecture::{ArchitectureIdent, DirectoryTranslator};
use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::mem::PhysicalMemory;
use crate::process::{
    MemoryContext, MemoryRegion, Pid, ProcessHandle, ProcessResolver, RegionCallback,
    Translation,
};
use crate::types::Address;

/// Pid the image address space is reported under unless configured otherwise.
pub const DEFAULT_IMAGE_PID: Pid = 1;

#[derive(Debug, Clone)]
pub struct ImageResolver {
    pid: Pid,
    translator: DirectoryTranslator,
    regions: Vec<MemoryRegion>,
}

impl ImageResolver {
    pub fn new(pid: Pid, arch: ArchitectureIdent, dtb: Address) -> Self {
        Self {
            pid,
            translator: arch.new_translator(dtb),
            regions: vec![],
        }
    }

    /// Builds a resolver from `arch=<x64|aarch64>,dtb=<address>[,pid=<pid>]`.
    ///
    /// `arch` defaults to x64, `dtb` is required and accepts hex with a `0x` prefix.
    pub fn with_args(args: &ConnectorArgs) -> Result<Self> {
        let arch = args
            .get_parsed::<ArchitectureIdent>("arch")?
            .unwrap_or(ArchitectureIdent::X64);

        let dtb = args
            .get("dtb")
            .ok_or_else(|| {
                Error(ErrorOrigin::Args, ErrorKind::Configuration).log_error("missing dtb argument")
            })
            .and_then(|dtb| parse_address(dtb))?;

        let pid = args.get_parsed::<Pid>("pid")?.unwrap_or(DEFAULT_IMAGE_PID);

        info!("image address space: pid={} arch={} dtb={:x}", pid, arch, dtb);
        Ok(Self::new(pid, arch, dtb))
    }

    /// Adds a region, regions are kept in ascending start address order.
    pub fn with_region(mut self, region: MemoryRegion) -> Self {
        let pos = self.regions.partition_point(|r| r.start < region.start);
        self.regions.insert(pos, MemoryRegion { pid: self.pid, ..region });
        self
    }

    pub fn translator(&self) -> &DirectoryTranslator {
        &self.translator
    }
}

/// Parses an address given in hex with a `0x` prefix or in decimal.
pub fn parse_address(value: &str) -> Result<Address> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed.map(Address::from).map_err(|_| {
        Error(ErrorOrigin::Args, ErrorKind::Configuration)
            .log_error(format_args!("invalid address {:?}", value))
    })
}

struct ImageContext<'a> {
    pid: Pid,
    translator: DirectoryTranslator,
    regions: &'a [MemoryRegion],
}

impl<'a> MemoryContext for ImageContext<'a> {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn translate(&mut self, mem: &mut dyn PhysicalMemory, addr: Address) -> Result<Translation> {
        let phys = self.translator.virt_to_phys(mem, addr)?;
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

impl ProcessResolver for ImageResolver {
    fn resolve(&self, pid: Pid) -> Result<ProcessHandle> {
        if pid != self.pid {
            return Err(Error(ErrorOrigin::ProcessResolver, ErrorKind::ProcessNotFound));
        }
        Ok(ProcessHandle::new(pid, 0))
    }

    fn lock_context(&self, handle: &ProcessHandle) -> Result<Box<dyn MemoryContext + '_>> {
        self.resolve(handle.pid())?;
        Ok(Box::new(ImageContext {
            pid: self.pid,
            translator: self.translator,
            regions: &self.regions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::PageTableLevel;
    use crate::dummy::DummyMemory;
    use crate::engine::Engine;
    use crate::types::{size, PermissionFlags};

    fn write_entry(mem: &mut DummyMemory, addr: u64, entry: u64) {
        mem.phys_write(Address::from(addr).into(), &entry).unwrap();
    }

    // maps 0x4040_3000 to 0x10000 with tables at 0x1000..0x4000
    fn aarch64_tables(mem: &mut DummyMemory) {
        let table = 0b11;
        write_entry(mem, 0x1000, 0x2000 | table);
        write_entry(mem, 0x2000 + 8, 0x3000 | table);
        write_entry(mem, 0x3000 + 2 * 8, 0x4000 | table);
        write_entry(mem, 0x4000 + 3 * 8, 0x10000 | table | (1 << 10));
    }

    #[test]
    fn args() {
        let args = ConnectorArgs::parse("image.raw,arch=arm64,dtb=0x1000,pid=42").unwrap();
        let resolver = ImageResolver::with_args(&args).unwrap();
        assert_eq!(resolver.translator().dtb(), Address::from(0x1000u64));
        assert!(resolver.resolve(42).is_ok());
        assert_eq!(
            resolver.resolve(1).unwrap_err().kind(),
            ErrorKind::ProcessNotFound
        );

        let args = ConnectorArgs::parse("image.raw,arch=x64").unwrap();
        assert_eq!(
            ImageResolver::with_args(&args).unwrap_err().kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn addresses() {
        assert_eq!(parse_address("0x7f00").unwrap(), Address::from(0x7f00u64));
        assert_eq!(parse_address("4096").unwrap(), Address::from(0x1000u64));
        assert!(parse_address("0xzz").is_err());
    }

    #[test]
    fn aarch64_engine() {
        let mut mem = DummyMemory::new(size::kb(128));
        aarch64_tables(&mut mem);
        mem.phys_write_raw(Address::from(0x10123u64).into(), &[5, 6, 7])
            .unwrap();

        let resolver =
            ImageResolver::new(DEFAULT_IMAGE_PID, ArchitectureIdent::AArch64, Address::from(0x1000u64))
                .with_region(MemoryRegion {
                    pid: 0,
                    start: Address::from(0x4040_3000u64),
                    end: Address::from(0x4040_4000u64),
                    permissions: PermissionFlags::READ,
                    backing_path: Some("/data/app.bin".into()),
                });
        let mut engine = Engine::new(resolver, mem);

        let mut out = [0u8; 3];
        engine
            .read(DEFAULT_IMAGE_PID, Address::from(0x4040_3123u64), &mut out)
            .unwrap();
        assert_eq!(out, [5, 6, 7]);

        assert_eq!(
            engine
                .translate(DEFAULT_IMAGE_PID, Address::from(0x4040_4000u64))
                .unwrap_err()
                .kind(),
            ErrorKind::TranslationFailed(PageTableLevel::Leaf)
        );

        let region = engine.find_mapping(DEFAULT_IMAGE_PID, "app").unwrap();
        assert_eq!(region.pid, DEFAULT_IMAGE_PID);
    }
}
