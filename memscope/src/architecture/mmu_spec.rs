use crate::architecture::{Endianess, PageTableLevel};
use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::mem::PhysicalMemory;
use crate::types::{Address, PageType, PhysicalAddress};

#[cfg(feature = "trace_mmu")]
macro_rules! vtop_trace {
    ( $( $x:expr ),* ) => {
        log::trace!( $($x, )* );
    }
}

#[cfg(not(feature = "trace_mmu"))]
macro_rules! vtop_trace {
    ( $( $x:expr ),* ) => {};
}

/// The `ArchMMUSpec` structure defines how a real memory management unit should behave when
/// translating virtual memory addresses to physical ones.
///
/// The core logic of the page walk is the same on every supported architecture. x86-64 and
/// AArch64 (with a 4 KiB granule) both split a 48 bit virtual address into four 9-bit table
/// indices and a 12-bit page offset, they only differ in how a page table entry encodes its
/// present, writeable, no-exec and large page attributes. Those are captured by the predicate
/// functions of this structure.
///
/// Steps of the walk are indexed from 0 (the top-level directory) to 3 (the leaf table).
/// A terminal entry at step `n` maps a page whose size is the sum of all splits after `n`.
#[derive(Debug)]
pub struct ArchMMUSpec {
    /// defines the way virtual addresses gets split (the last element
    /// being the final physical page offset, and thus treated a bit differently)
    pub virtual_address_splits: &'static [u8],
    /// defines at which page mapping steps we can return a large page.
    /// Steps are indexed from 0, and the list has to be sorted, otherwise the code may fail.
    pub valid_final_page_steps: &'static [usize],
    /// define the physical address space upper bound (52 for x86_64)
    pub address_space_bits: u8,
    /// native pointer size in bytes for the architecture.
    pub addr_size: u8,
    /// size of an individual page table entry in bytes.
    pub pte_size: usize,
    /// byte order of page table entries.
    pub endianess: Endianess,
    /// returns true if the entry is present (valid).
    pub present_bit: fn(u64) -> bool,
    /// returns true if the entry allows writes.
    pub writeable_bit: fn(u64) -> bool,
    /// returns true if the entry forbids instruction fetches.
    pub nx_bit: fn(u64) -> bool,
    /// returns true if the entry maps a page instead of pointing to the next table.
    pub large_page_bit: fn(u64) -> bool,
}

impl ArchMMUSpec {
    /// Return the number of splits of virtual addresses
    ///
    /// The returned value will be one more than the number of page table levels
    pub fn split_count(&self) -> usize {
        self.virtual_address_splits.len()
    }

    /// Number of page table levels walked.
    pub fn level_count(&self) -> usize {
        self.split_count() - 1
    }

    /// Number of meaningful bits in a virtual address.
    pub fn virtual_address_bits(&self) -> u8 {
        self.virtual_address_splits.iter().sum::<u8>()
    }

    /// Number of low virtual address bits a terminal entry at `step` leaves as page offset.
    pub fn page_size_bits(&self, step: usize) -> u8 {
        self.virtual_address_splits[(step + 1)..].iter().sum::<u8>()
    }

    /// Get the size of a page mapped by a terminal entry at the given step.
    pub fn page_size_step(&self, step: usize) -> usize {
        1usize << self.page_size_bits(step)
    }

    /// Calculate the size of the page table at a specific step in bytes.
    pub fn pt_leaf_size(&self, step: usize) -> usize {
        (1 << self.virtual_address_splits[step]) * self.pte_size
    }

    /// Mask selecting the frame bits of an entry that maps a page of `2^page_bits` bytes.
    fn frame_mask(&self, page_bits: u8) -> u64 {
        Address::bit_mask(page_bits..=(self.address_space_bits - 1)).as_u64()
    }

    /// Mask selecting the address of the next table from a non-terminal entry.
    fn table_mask(&self) -> u64 {
        self.frame_mask(self.virtual_address_splits[self.level_count()])
    }

    /// Byte offset of the entry for `virt_addr` inside the table walked at `step`.
    pub(crate) fn virt_addr_to_pte_offset(&self, virt_addr: Address, step: usize) -> usize {
        let shift = self.page_size_bits(step);
        let index_bits = self.virtual_address_splits[step];
        let index = (virt_addr.as_u64() >> shift) & ((1u64 << index_bits) - 1);
        index as usize * self.pte_size
    }

    /// Checks that all bits above the translated range are copies of its top bit.
    pub fn is_canonical(&self, virt_addr: Address) -> bool {
        let bits = self.virtual_address_bits();
        if bits >= self.addr_size * 8 {
            return true;
        }

        let upper = Address::bit_mask((bits - 1)..=(self.addr_size * 8 - 1)).as_u64();
        let masked = virt_addr.as_u64() & upper;
        masked == 0 || masked == upper
    }

    fn read_entry<T: PhysicalMemory + ?Sized>(
        &self,
        mem: &mut T,
        pte_addr: Address,
        step: usize,
    ) -> Result<u64> {
        let mut buf = [0u8; 8];
        let out = &mut buf[..self.pte_size];
        mem.phys_read_raw_into(
            PhysicalAddress::with_page(
                pte_addr,
                PageType::PAGE_TABLE,
                self.pt_leaf_size(step),
            ),
            out,
        )?;

        Ok(match self.endianess {
            Endianess::LittleEndian => u64::from_le_bytes(buf),
            Endianess::BigEndian => u64::from_be_bytes(buf) >> (64 - self.pte_size * 8),
        })
    }

    /// Walks the page tables rooted at `dtb` and translates `virt_addr` into a physical address.
    ///
    /// Every failure carries the level whose entry was absent or malformed. An entry is
    /// malformed if it cannot be read, if it references a frame outside of the physical
    /// memory of `mem` or if it claims to map a large page at a level that cannot hold one.
    /// Addresses that are not canonical fail at the top level.
    pub fn virt_to_phys<T: PhysicalMemory + ?Sized>(
        &self,
        mem: &mut T,
        dtb: Address,
        virt_addr: Address,
    ) -> Result<PhysicalAddress> {
        vtop_trace!("virt_to_phys dtb={:x} virt_addr={:x}", dtb, virt_addr);

        let fail = |level: PageTableLevel| {
            Error(
                ErrorOrigin::VirtualTranslate,
                ErrorKind::TranslationFailed(level),
            )
        };

        if !self.is_canonical(virt_addr) {
            vtop_trace!("virt_addr {:x} is not canonical", virt_addr);
            return Err(fail(PageTableLevel::Top));
        }

        let max_address = mem.metadata().max_address;
        let mut table = Address::from(dtb.as_u64() & self.table_mask());

        for step in 0..self.level_count() {
            let level = PageTableLevel::from_step(step).ok_or_else(|| fail(PageTableLevel::Leaf))?;

            let pte_addr = table + self.virt_addr_to_pte_offset(virt_addr, step);
            let entry = self
                .read_entry(mem, pte_addr, step)
                .map_err(|err| fail(level).log_debug(err))?;

            vtop_trace!("step={} pte_addr={:x} entry={:x}", step, pte_addr, entry);

            if !(self.present_bit)(entry) {
                vtop_trace!("entry not present");
                return Err(fail(level));
            }

            let last = step + 1 == self.level_count();
            let large = !last && (self.large_page_bit)(entry);
            if large && self.valid_final_page_steps.binary_search(&step).is_err() {
                vtop_trace!("large page at step {} is not allowed", step);
                return Err(fail(level));
            }

            if last || large {
                let page_bits = self.page_size_bits(step);
                let frame = entry & self.frame_mask(page_bits);
                if frame > max_address.as_u64() {
                    vtop_trace!("frame {:x} outside of physical memory", frame);
                    return Err(fail(level));
                }

                let offset = virt_addr.as_u64() & ((1u64 << page_bits) - 1);
                let page_type = PageType::default()
                    .write((self.writeable_bit)(entry))
                    .noexec((self.nx_bit)(entry));

                vtop_trace!("found page frame={:x} page_bits={}", frame, page_bits);
                return Ok(PhysicalAddress::with_page(
                    Address::from(frame | offset),
                    page_type,
                    1usize << page_bits,
                ));
            }

            table = Address::from(entry & self.table_mask());
            if table > max_address {
                vtop_trace!("next table {:x} outside of physical memory", table);
                return Err(fail(level));
            }
        }

        Err(fail(PageTableLevel::Leaf))
    }
}

#[cfg(test)]
mod tests {
    use crate::architecture::{arm::aarch64, x86::x64, PageTableLevel};
    use crate::dummy::DummyMemory;
    use crate::error::ErrorKind;
    use crate::mem::PhysicalMemory;
    use crate::types::{size, Address, PageType};

    // virtual address with table indices [0, 1, 2, 3] and page offset 0x123
    const VADDR: u64 = 0x4040_3123;

    fn write_entry(mem: &mut DummyMemory, addr: u64, entry: u64) {
        mem.phys_write(Address::from(addr).into(), &entry).unwrap();
    }

    fn x64_tables(mem: &mut DummyMemory) {
        // present | writeable
        write_entry(mem, 0x1000, 0x2000 | 0b11);
        write_entry(mem, 0x2000 + 8, 0x3000 | 0b11);
        write_entry(mem, 0x3000 + 16, 0x4000 | 0b11);
        write_entry(mem, 0x4000 + 24, 0x10000 | 0b11 | (1 << 63));
    }

    #[test]
    fn x64_walk() {
        let mut mem = DummyMemory::new(size::mb(4));
        x64_tables(&mut mem);

        let pa = x64::ARCH_SPEC
            .virt_to_phys(&mut mem, Address::from(0x1000u64), Address::from(VADDR))
            .unwrap();
        assert_eq!(pa.address(), Address::from(0x10123u64));
        assert_eq!(pa.page_size(), size::kb(4));
        assert_eq!(pa.page_type(), PageType::WRITEABLE | PageType::NOEXEC);
    }

    #[test]
    fn x64_walk_large_page() {
        let mut mem = DummyMemory::new(size::mb(4));
        x64_tables(&mut mem);
        // present | writeable | huge page, 2 MiB frame at 0x200000
        write_entry(&mut mem, 0x3000 + 16, 0x20_0000 | 0b11 | (1 << 7));

        let pa = x64::ARCH_SPEC
            .virt_to_phys(&mut mem, Address::from(0x1000u64), Address::from(VADDR))
            .unwrap();
        assert_eq!(pa.address(), Address::from(0x20_3123u64));
        assert_eq!(pa.page_size(), size::mb(2));
    }

    #[test]
    fn x64_walk_huge_page() {
        let mut mem = DummyMemory::new(size::mb(4));
        x64_tables(&mut mem);
        write_entry(&mut mem, 0x2000 + 8, 0b11 | (1 << 7));

        let pa = x64::ARCH_SPEC
            .virt_to_phys(&mut mem, Address::from(0x1000u64), Address::from(VADDR))
            .unwrap();
        assert_eq!(pa.address(), Address::from(0x40_3123u64));
        assert_eq!(pa.page_size(), size::gb(1));
    }

    #[test]
    fn x64_failing_levels() {
        let mut mem = DummyMemory::new(size::mb(4));
        x64_tables(&mut mem);
        let dtb = Address::from(0x1000u64);

        let kind = |mem: &mut DummyMemory, vaddr: u64| {
            x64::ARCH_SPEC
                .virt_to_phys(mem, dtb, Address::from(vaddr))
                .unwrap_err()
                .kind()
        };

        // unused top-level slot
        assert_eq!(
            kind(&mut mem, 0x80_0000_0000),
            ErrorKind::TranslationFailed(PageTableLevel::Top)
        );
        // unused upper directory slot
        assert_eq!(
            kind(&mut mem, 0x8000_0000),
            ErrorKind::TranslationFailed(PageTableLevel::Upper)
        );
        // unused middle directory slot
        assert_eq!(
            kind(&mut mem, 0x4000_0000),
            ErrorKind::TranslationFailed(PageTableLevel::Middle)
        );
        // unused leaf slot
        assert_eq!(
            kind(&mut mem, 0x4040_0000),
            ErrorKind::TranslationFailed(PageTableLevel::Leaf)
        );
        // not canonical
        assert_eq!(
            kind(&mut mem, 0x0000_8000_0000_0000),
            ErrorKind::TranslationFailed(PageTableLevel::Top)
        );
    }

    #[test]
    fn x64_malformed_entries() {
        let mut mem = DummyMemory::new(size::mb(4));
        x64_tables(&mut mem);
        let dtb = Address::from(0x1000u64);

        // the page size bit is reserved in the top-level directory
        write_entry(&mut mem, 0x1000, 0x2000 | 0b11 | (1 << 7));
        assert_eq!(
            x64::ARCH_SPEC
                .virt_to_phys(&mut mem, dtb, Address::from(VADDR))
                .unwrap_err()
                .kind(),
            ErrorKind::TranslationFailed(PageTableLevel::Top)
        );

        // next table outside of physical memory
        write_entry(&mut mem, 0x1000, 0x2000 | 0b11);
        write_entry(&mut mem, 0x2000 + 8, 0x1_0000_0000 | 0b11);
        assert_eq!(
            x64::ARCH_SPEC
                .virt_to_phys(&mut mem, dtb, Address::from(VADDR))
                .unwrap_err()
                .kind(),
            ErrorKind::TranslationFailed(PageTableLevel::Upper)
        );

        // final frame outside of physical memory
        write_entry(&mut mem, 0x2000 + 8, 0x3000 | 0b11);
        write_entry(&mut mem, 0x4000 + 24, 0x8000_0000 | 0b11);
        assert_eq!(
            x64::ARCH_SPEC
                .virt_to_phys(&mut mem, dtb, Address::from(VADDR))
                .unwrap_err()
                .kind(),
            ErrorKind::TranslationFailed(PageTableLevel::Leaf)
        );
    }

    #[test]
    fn x64_unreadable_root() {
        let mut mem = DummyMemory::new(size::mb(4));
        assert_eq!(
            x64::ARCH_SPEC
                .virt_to_phys(
                    &mut mem,
                    Address::from(size::mb(8) as u64),
                    Address::from(VADDR)
                )
                .unwrap_err()
                .kind(),
            ErrorKind::TranslationFailed(PageTableLevel::Top)
        );
    }

    #[test]
    fn aarch64_walk() {
        let mut mem = DummyMemory::new(size::mb(4));
        // table descriptors
        write_entry(&mut mem, 0x1000, 0x2000 | 0b11);
        write_entry(&mut mem, 0x2000 + 8, 0x3000 | 0b11);
        write_entry(&mut mem, 0x3000 + 16, 0x4000 | 0b11);
        // page descriptor, access flag set, AP[2] clear, UXN set
        write_entry(&mut mem, 0x4000 + 24, 0x10000 | 0b11 | (1 << 10) | (1 << 54));

        let dtb = Address::from(0x1000u64);
        let pa = aarch64::ARCH_SPEC
            .virt_to_phys(&mut mem, dtb, Address::from(VADDR))
            .unwrap();
        assert_eq!(pa.address(), Address::from(0x10123u64));
        assert_eq!(pa.page_type(), PageType::WRITEABLE | PageType::NOEXEC);

        // read only page
        write_entry(&mut mem, 0x4000 + 24, 0x10000 | 0b11 | (1 << 10) | (1 << 7));
        let pa = aarch64::ARCH_SPEC
            .virt_to_phys(&mut mem, dtb, Address::from(VADDR))
            .unwrap();
        assert_eq!(pa.page_type(), PageType::READ_ONLY);

        // 2 MiB block descriptor at level 2
        write_entry(&mut mem, 0x3000 + 16, 0x20_0000 | 0b01 | (1 << 10));
        let pa = aarch64::ARCH_SPEC
            .virt_to_phys(&mut mem, dtb, Address::from(VADDR))
            .unwrap();
        assert_eq!(pa.address(), Address::from(0x20_3123u64));
        assert_eq!(pa.page_size(), size::mb(2));

        // block descriptors are not allowed at level 0
        write_entry(&mut mem, 0x1000, 0x2000 | 0b01);
        assert_eq!(
            aarch64::ARCH_SPEC
                .virt_to_phys(&mut mem, dtb, Address::from(VADDR))
                .unwrap_err()
                .kind(),
            ErrorKind::TranslationFailed(PageTableLevel::Top)
        );
    }

    #[test]
    fn canonical() {
        let spec = &x64::ARCH_SPEC;
        assert!(spec.is_canonical(Address::from(0x7fff_ffff_ffffu64)));
        assert!(spec.is_canonical(Address::from(0xffff_8000_0000_0000u64)));
        assert!(!spec.is_canonical(Address::from(0x0000_8000_0000_0000u64)));
        assert!(!spec.is_canonical(Address::from(0x0001_0000_0000_0000u64)));
    }

    #[test]
    fn page_sizes() {
        let spec = &x64::ARCH_SPEC;
        assert_eq!(spec.page_size_step(1), size::gb(1));
        assert_eq!(spec.page_size_step(2), size::mb(2));
        assert_eq!(spec.page_size_step(3), size::kb(4));
        assert_eq!(spec.pt_leaf_size(0), size::kb(4));
        assert_eq!(spec.virtual_address_bits(), 48);
    }
}
