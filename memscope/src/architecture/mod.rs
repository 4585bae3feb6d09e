/*!
Module for handling the page-table layouts of different architectures.

Each supported architecture is described by a static [`ArchMMUSpec`]
and identified by an [`ArchitectureIdent`]. The page walk itself is
shared between all of them, only the data in the MMU spec differs.
*/

pub mod arm;
pub mod x86;

mod mmu_spec;
pub use mmu_spec::ArchMMUSpec;

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, ErrorKind, ErrorOrigin, Result};
use crate::mem::PhysicalMemory;
use crate::types::{Address, PhysicalAddress};

/// Identifies the byte order of a architecture
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub enum Endianess {
    /// Little Endianess
    LittleEndian,
    /// Big Endianess
    BigEndian,
}

/// One of the four levels of a page table hierarchy, ordered from the root down.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub enum PageTableLevel {
    /// Top-level directory (PML4 / level 0).
    Top,
    /// Upper directory (PDPT / level 1).
    Upper,
    /// Middle directory (PD / level 2).
    Middle,
    /// Leaf table (PT / level 3).
    Leaf,
}

impl PageTableLevel {
    pub const ALL: [PageTableLevel; 4] = [
        PageTableLevel::Top,
        PageTableLevel::Upper,
        PageTableLevel::Middle,
        PageTableLevel::Leaf,
    ];

    /// Maps a zero based walk step to its level.
    pub fn from_step(step: usize) -> Option<Self> {
        Self::ALL.get(step).copied()
    }

    pub const fn step(self) -> usize {
        self as usize
    }

    pub fn to_str(self) -> &'static str {
        match self {
            PageTableLevel::Top => "top",
            PageTableLevel::Upper => "upper",
            PageTableLevel::Middle => "middle",
            PageTableLevel::Leaf => "leaf",
        }
    }
}

impl fmt::Display for PageTableLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

/// Supported page table layouts.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub enum ArchitectureIdent {
    /// x86-64 with 4-level paging.
    X64,
    /// AArch64 with a 4 KiB granule and 48 bit virtual addresses.
    AArch64,
}

impl ArchitectureIdent {
    pub fn mmu(self) -> &'static ArchMMUSpec {
        match self {
            ArchitectureIdent::X64 => &x86::x64::ARCH_SPEC,
            ArchitectureIdent::AArch64 => &arm::aarch64::ARCH_SPEC,
        }
    }

    /// Returns the number of bits of a pointers width.
    pub fn bits(self) -> u8 {
        self.mmu().addr_size * 8
    }

    pub fn endianess(self) -> Endianess {
        self.mmu().endianess
    }

    /// Returns the smallest page size of the architecture.
    pub fn page_size(self) -> usize {
        self.mmu().page_size_step(self.mmu().split_count() - 2)
    }

    pub fn new_translator(self, dtb: Address) -> DirectoryTranslator {
        DirectoryTranslator::new(self.mmu(), dtb)
    }
}

impl FromStr for ArchitectureIdent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "x64" | "x86_64" | "amd64" => Ok(ArchitectureIdent::X64),
            "aarch64" | "arm64" => Ok(ArchitectureIdent::AArch64),
            _ => Err(Error(ErrorOrigin::Args, ErrorKind::Configuration).log_error(s)),
        }
    }
}

impl fmt::Display for ArchitectureIdent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ArchitectureIdent::X64 => f.write_str("x64"),
            ArchitectureIdent::AArch64 => f.write_str("aarch64"),
        }
    }
}

/// Translates virtual addresses of a single address space by walking its page tables.
///
/// The translator is a pair of an architecture spec and the physical address of the
/// top-level table. It holds no state between calls, every translation is a fresh walk.
#[derive(Clone, Copy)]
pub struct DirectoryTranslator {
    spec: &'static ArchMMUSpec,
    dtb: Address,
}

impl DirectoryTranslator {
    pub fn new(spec: &'static ArchMMUSpec, dtb: Address) -> Self {
        Self { spec, dtb }
    }

    pub fn dtb(&self) -> Address {
        self.dtb
    }

    pub fn spec(&self) -> &'static ArchMMUSpec {
        self.spec
    }

    pub fn virt_to_phys<T: PhysicalMemory + ?Sized>(
        &self,
        mem: &mut T,
        addr: Address,
    ) -> Result<PhysicalAddress> {
        self.spec.virt_to_phys(mem, self.dtb, addr)
    }
}

impl fmt::Debug for DirectoryTranslator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DirectoryTranslator {{ dtb: {:x} }}", self.dtb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_steps() {
        for (step, level) in PageTableLevel::ALL.iter().enumerate() {
            assert_eq!(PageTableLevel::from_step(step), Some(*level));
            assert_eq!(level.step(), step);
        }
        assert_eq!(PageTableLevel::from_step(4), None);
    }

    #[test]
    fn ident_from_str() {
        assert_eq!("x64".parse::<ArchitectureIdent>(), Ok(ArchitectureIdent::X64));
        assert_eq!(
            "AArch64".parse::<ArchitectureIdent>(),
            Ok(ArchitectureIdent::AArch64)
        );
        assert!("mips".parse::<ArchitectureIdent>().is_err());
    }

    #[test]
    fn ident_props() {
        assert_eq!(ArchitectureIdent::X64.bits(), 64);
        assert_eq!(ArchitectureIdent::X64.page_size(), 0x1000);
        assert_eq!(ArchitectureIdent::AArch64.page_size(), 0x1000);
        assert_eq!(
            ArchitectureIdent::AArch64.endianess(),
            Endianess::LittleEndian
        );
    }
}
