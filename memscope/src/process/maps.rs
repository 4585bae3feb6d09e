use log::debug;

use super::{MemoryContext, MemoryRegion};
use crate::error::{Error, ErrorKind, ErrorOrigin, Result};

/// Returns the first file-backed region whose backing path contains `name`.
///
/// Regions are visited in ascending start address order and anonymous regions are
/// skipped. The walk ends at the first match, later regions are never looked at.
/// An empty `name` matches the first file-backed region.
pub fn find_mapping(ctx: &mut dyn MemoryContext, name: &str) -> Result<MemoryRegion> {
    let mut found = None;

    ctx.region_list_callback(&mut |region| {
        let matches = region
            .backing_path
            .as_deref()
            .map_or(false, |path| path.contains(name));
        if matches {
            found = Some(region);
        }
        !matches
    })?;

    match found {
        Some(region) => {
            debug!(
                "pid {} mapping {:?} found at {:x}-{:x}",
                ctx.pid(),
                name,
                region.start,
                region.end
            );
            Ok(region)
        }
        None => Err(Error(ErrorOrigin::MappingEnumerator, ErrorKind::NotFound)),
    }
}

/// Collects all regions of the context, anonymous ones included.
pub fn region_list(ctx: &mut dyn MemoryContext) -> Result<Vec<MemoryRegion>> {
    let mut ret = vec![];
    ctx.region_list_callback(&mut |region| {
        ret.push(region);
        true
    })?;
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::PhysicalMemory;
    use crate::process::{Pid, RegionCallback, Translation};
    use crate::types::{Address, PermissionFlags};

    struct RegionsOnly {
        regions: Vec<MemoryRegion>,
        visited: usize,
    }

    impl MemoryContext for RegionsOnly {
        fn pid(&self) -> Pid {
            1
        }

        fn translate(
            &mut self,
            _mem: &mut dyn PhysicalMemory,
            _addr: Address,
        ) -> Result<Translation> {
            Err(Error(ErrorOrigin::VirtualTranslate, ErrorKind::NotSupported))
        }

        fn region_list_callback(&mut self, callback: RegionCallback) -> Result<()> {
            for region in self.regions.iter() {
                self.visited += 1;
                if !callback(region.clone()) {
                    break;
                }
            }
            Ok(())
        }
    }

    fn region(start: u64, path: Option<&str>) -> MemoryRegion {
        MemoryRegion {
            pid: 1,
            start: Address::from(start),
            end: Address::from(start + 0x1000),
            permissions: PermissionFlags::READ,
            backing_path: path.map(String::from),
        }
    }

    fn context() -> RegionsOnly {
        RegionsOnly {
            regions: vec![
                region(0x1000, None),
                region(0x2000, Some("/usr/bin/cat")),
                region(0x3000, Some("/usr/lib/libc.so.6")),
                region(0x4000, Some("/usr/lib/libc.so.6")),
                region(0x5000, Some("/usr/lib/libm.so.6")),
            ],
            visited: 0,
        }
    }

    #[test]
    fn first_match_stops_walk() {
        let mut ctx = context();
        let region = find_mapping(&mut ctx, "libc").unwrap();
        assert_eq!(region.start, Address::from(0x3000u64));
        assert_eq!(ctx.visited, 3);
    }

    #[test]
    fn not_found() {
        let mut ctx = context();
        assert_eq!(
            find_mapping(&mut ctx, "libz").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(ctx.visited, 5);
    }

    #[test]
    fn empty_name_skips_anonymous() {
        let mut ctx = context();
        let region = find_mapping(&mut ctx, "").unwrap();
        assert_eq!(region.backing_path.as_deref(), Some("/usr/bin/cat"));
    }

    #[test]
    fn idempotent() {
        let mut ctx = context();
        let first = find_mapping(&mut ctx, "lib").unwrap();
        let second = find_mapping(&mut ctx, "lib").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn list_all() {
        let mut ctx = context();
        let regions = region_list(&mut ctx).unwrap();
        assert_eq!(regions.len(), 5);
        assert!(regions[0].is_anonymous());
        assert_eq!(regions[4].size(), 0x1000);
    }
}
