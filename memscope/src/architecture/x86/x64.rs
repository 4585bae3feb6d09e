use super::super::{ArchMMUSpec, DirectoryTranslator, Endianess};

use crate::types::Address;

/// x86-64 with 4-level paging.
///
/// 1 GiB pages are allowed in the upper directory, 2 MiB pages in the middle directory.
pub static ARCH_SPEC: ArchMMUSpec = ArchMMUSpec {
    virtual_address_splits: &[9, 9, 9, 9, 12],
    valid_final_page_steps: &[1, 2],
    address_space_bits: 52,
    addr_size: 8,
    pte_size: 8,
    endianess: Endianess::LittleEndian,
    present_bit: |e| e & 1 != 0,
    writeable_bit: |e| e & (1 << 1) != 0,
    nx_bit: |e| e & (1 << 63) != 0,
    large_page_bit: |e| e & (1 << 7) != 0,
};

pub fn new_translator(dtb: Address) -> DirectoryTranslator {
    DirectoryTranslator::new(&ARCH_SPEC, dtb)
}

#[cfg(test)]
mod tests {
    use super::ARCH_SPEC;
    use crate::types::size;

    #[test]
    fn x64_split_count() {
        assert_eq!(ARCH_SPEC.split_count(), 5);
        assert_eq!(ARCH_SPEC.level_count(), 4);
    }

    #[test]
    fn x64_pte_leaf_size() {
        assert_eq!(ARCH_SPEC.pt_leaf_size(0), size::kb(4));
        assert_eq!(ARCH_SPEC.pt_leaf_size(3), size::kb(4));
    }

    #[test]
    fn x64_entry_bits() {
        let entry = 0x8000_0000_0000_1083u64;
        assert!((ARCH_SPEC.present_bit)(entry));
        assert!((ARCH_SPEC.writeable_bit)(entry));
        assert!((ARCH_SPEC.nx_bit)(entry));
        assert!((ARCH_SPEC.large_page_bit)(entry));
        assert!(!(ARCH_SPEC.present_bit)(0x1000));
    }
}
