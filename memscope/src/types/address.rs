/*!
Abstraction over an address in a target process or in physical memory.
*/

use std::fmt;
use std::ops;

/// This type represents an address on the target system.
/// It internally holds a `u64` value but can also be used
/// when working with 32-bit targets.
///
/// # Examples
///
/// ```
/// use memscope::types::Address;
///
/// let addr = Address::from(0x1234u64);
/// assert_eq!(addr.as_u64(), 0x1234);
/// assert_eq!(addr + 0x10usize, Address::from(0x1244u64));
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct Address(u64);

impl Address {
    /// A address with the value of zero.
    pub const NULL: Address = Address(0);

    /// A address with an invalid value.
    pub const INVALID: Address = Address(!0);

    /// Returns an address with a value of zero.
    #[inline]
    pub const fn null() -> Self {
        Address::NULL
    }

    /// Returns an address with an invalid value.
    #[inline]
    pub const fn invalid() -> Self {
        Address::INVALID
    }

    /// Creates a bit mask covering the given range of bits (both ends inclusive).
    ///
    /// # Examples
    ///
    /// ```
    /// use memscope::types::Address;
    ///
    /// assert_eq!(Address::bit_mask(0..=11).as_u64(), 0xfff);
    /// assert_eq!(Address::bit_mask(12..=51).as_u64(), 0x000f_ffff_ffff_f000);
    /// ```
    pub const fn bit_mask(bits: ops::RangeInclusive<u8>) -> Address {
        Address((!0u64 >> (63 - *bits.end())) & !((1u64 << *bits.start()) - 1))
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != !0
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Aligns the address down to the given page size.
    ///
    /// The page size has to be a power of two.
    pub const fn as_page_aligned(self, page_size: usize) -> Self {
        Self(self.0 & !(page_size as u64 - 1))
    }

    /// Returns the offset of the address inside a page of the given size.
    pub const fn page_offset(self, page_size: usize) -> usize {
        (self.0 & (page_size as u64 - 1)) as usize
    }

    /// Returns true or false wether the bit at the specified index is either 0 or 1.
    /// An index of 0 will check the least significant bit.
    pub const fn bit_at(self, idx: u8) -> bool {
        (self.0 & (1 << idx)) != 0
    }

    pub fn checked_add(self, len: usize) -> Option<Self> {
        self.0.checked_add(len as u64).map(Self)
    }
}

impl From<u64> for Address {
    fn from(item: u64) -> Self {
        Self(item)
    }
}

impl From<usize> for Address {
    fn from(item: usize) -> Self {
        Self(item as u64)
    }
}

impl From<u32> for Address {
    fn from(item: u32) -> Self {
        Self(u64::from(item))
    }
}

impl From<Address> for u64 {
    fn from(address: Address) -> u64 {
        address.0
    }
}

impl ops::Add<usize> for Address {
    type Output = Self;

    fn add(self, other: usize) -> Self {
        Self(self.0 + other as u64)
    }
}

impl ops::AddAssign<usize> for Address {
    fn add_assign(&mut self, other: usize) {
        self.0 += other as u64
    }
}

impl ops::Sub<usize> for Address {
    type Output = Self;

    fn sub(self, other: usize) -> Self {
        Self(self.0 - other as u64)
    }
}

/// Distance between two addresses in bytes.
impl ops::Sub for Address {
    type Output = u64;

    fn sub(self, other: Self) -> u64 {
        self.0 - other.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}
