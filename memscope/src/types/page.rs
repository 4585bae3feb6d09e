/*!
This module contains data structures describing pages and memory region permissions.
*/

use bitflags::bitflags;

bitflags! {
    /// Describes the type of a page using a bitflag.
    #[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
    #[repr(transparent)]
    pub struct PageType: u8 {
        /// The page explicitly has no flags.
        const NONE = 0b0000_0000;
        /// The page type is not known.
        const UNKNOWN = 0b0000_0001;
        /// The page contains page table entries.
        const PAGE_TABLE = 0b0000_0010;
        /// The page is a writeable page.
        const WRITEABLE = 0b0000_0100;
        /// The page is read only.
        const READ_ONLY = 0b0000_1000;
        /// The page is not executable.
        const NOEXEC = 0b0001_0000;
    }
}

impl PageType {
    pub fn write(mut self, flag: bool) -> Self {
        self &= !(PageType::WRITEABLE | PageType::READ_ONLY | PageType::UNKNOWN);
        if flag {
            self | PageType::WRITEABLE
        } else {
            self | PageType::READ_ONLY
        }
    }

    pub fn noexec(mut self, flag: bool) -> Self {
        self &= !(PageType::NOEXEC);
        if flag {
            self | PageType::NOEXEC
        } else {
            self
        }
    }

    pub fn page_table(mut self, flag: bool) -> Self {
        self &= !(PageType::PAGE_TABLE | PageType::UNKNOWN);
        if flag {
            self | PageType::PAGE_TABLE
        } else {
            self
        }
    }
}

impl Default for PageType {
    fn default() -> Self {
        PageType::UNKNOWN
    }
}

bitflags! {
    /// Access permissions of a memory region.
    ///
    /// The bit values are part of the request protocol and match the
    /// `VM_READ`, `VM_WRITE` and `VM_EXEC` flags of a Linux `vm_area_struct`.
    #[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
    #[repr(transparent)]
    pub struct PermissionFlags: u64 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXEC = 0b100;
    }
}

impl PermissionFlags {
    /// Page type a page inside a region with these permissions is expected to have.
    pub fn page_type(self) -> PageType {
        PageType::default()
            .write(self.contains(PermissionFlags::WRITE))
            .noexec(!self.contains(PermissionFlags::EXEC))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_type_builders() {
        let pt = PageType::default().write(true).noexec(true);
        assert!(pt.contains(PageType::WRITEABLE | PageType::NOEXEC));
        assert!(!pt.contains(PageType::UNKNOWN));

        let pt = pt.write(false).noexec(false);
        assert_eq!(pt, PageType::READ_ONLY);
    }

    #[test]
    fn perms_wire_bits() {
        assert_eq!(PermissionFlags::READ.bits(), 1);
        assert_eq!(PermissionFlags::WRITE.bits(), 2);
        assert_eq!(PermissionFlags::EXEC.bits(), 4);
    }

    #[test]
    fn perms_page_type() {
        assert_eq!(
            (PermissionFlags::READ | PermissionFlags::EXEC).page_type(),
            PageType::READ_ONLY
        );
        assert_eq!(
            (PermissionFlags::READ | PermissionFlags::WRITE).page_type(),
            PageType::WRITEABLE | PageType::NOEXEC
        );
    }
}
