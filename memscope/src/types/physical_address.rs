/*!
Abstraction over a physical address with optional page information.
*/

use super::{Address, PageType};

use std::fmt;

/// This type represents a wrapper over an [address](../address/index.html)
/// with additional information about the containing page in the physical memory domain.
///
/// Page table walks produce physical addresses with page information attached,
/// which is what bounds a physical window to the page the translated address lives in.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct PhysicalAddress {
    pub address: Address,
    pub page_type: PageType,
    page_size_log2: u8,
}

impl PhysicalAddress {
    /// A physical address with a value of zero and no page information.
    pub const NULL: PhysicalAddress = PhysicalAddress {
        address: Address::NULL,
        page_type: PageType::UNKNOWN,
        page_size_log2: 0,
    };

    /// Constructs a new `PhysicalAddress` from an `Address` with
    /// information about the page it is contained in.
    ///
    /// The page size must be a power of 2 and larger than one byte.
    #[inline]
    pub fn with_page(address: Address, page_type: PageType, page_size: usize) -> Self {
        debug_assert!(page_size.is_power_of_two() && page_size > 1);
        Self {
            address,
            page_type,
            page_size_log2: page_size.trailing_zeros() as u8,
        }
    }

    /// Checks wether the physical address also contains page informations or not.
    #[inline]
    pub const fn has_page(&self) -> bool {
        self.page_size_log2 != 0
    }

    #[inline]
    pub const fn address(&self) -> Address {
        self.address
    }

    #[inline]
    pub const fn page_type(&self) -> PageType {
        self.page_type
    }

    /// Returns the size of the containing page, or 0 without page information.
    #[inline]
    pub const fn page_size(&self) -> usize {
        if self.has_page() {
            1 << self.page_size_log2
        } else {
            0
        }
    }

    /// Returns the base address of the containing page.
    pub fn page_base(&self) -> Address {
        if !self.has_page() {
            Address::INVALID
        } else {
            self.address.as_page_aligned(self.page_size())
        }
    }

    /// Number of bytes from this address to the end of the containing page.
    pub fn remaining_in_page(&self) -> Option<usize> {
        if self.has_page() {
            Some(self.page_size() - self.address.page_offset(self.page_size()))
        } else {
            None
        }
    }

    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.address.as_u64()
    }

    #[inline]
    pub const fn as_usize(&self) -> usize {
        self.address.as_usize()
    }
}

impl Default for PhysicalAddress {
    fn default() -> Self {
        Self::NULL
    }
}

/// Converts an `Address` into a `PhysicalAddress` without page information.
impl From<Address> for PhysicalAddress {
    fn from(address: Address) -> Self {
        Self {
            address,
            page_type: PageType::UNKNOWN,
            page_size_log2: 0,
        }
    }
}

impl From<u64> for PhysicalAddress {
    fn from(item: u64) -> Self {
        Self::from(Address::from(item))
    }
}

impl From<PhysicalAddress> for Address {
    fn from(address: PhysicalAddress) -> Self {
        address.address
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.has_page() {
            write!(
                f,
                "{:x} ({:?}, page {:x})",
                self.address,
                self.page_type,
                self.page_size()
            )
        } else {
            write!(f, "{:x}", self.address)
        }
    }
}

impl fmt::LowerHex for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.address, f)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.address)
    }
}
