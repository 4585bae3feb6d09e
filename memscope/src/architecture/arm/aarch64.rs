use super::super::{ArchMMUSpec, DirectoryTranslator, Endianess};

use crate::types::Address;

/// AArch64 stage 1 translation with a 4 KiB granule and 48 bit virtual addresses.
///
/// Block descriptors (bit 1 clear) are valid at level 1 and level 2. Write access is
/// controlled by AP[2] (bit 7), user execute permission by UXN (bit 54).
/// Only the lower half (TTBR0) is walked.
pub static ARCH_SPEC: ArchMMUSpec = ArchMMUSpec {
    virtual_address_splits: &[9, 9, 9, 9, 12],
    valid_final_page_steps: &[1, 2],
    address_space_bits: 48,
    addr_size: 8,
    pte_size: 8,
    endianess: Endianess::LittleEndian,
    present_bit: |e| e & 1 != 0,
    writeable_bit: |e| e & (1 << 7) == 0,
    nx_bit: |e| e & (1 << 54) != 0,
    large_page_bit: |e| e & (1 << 1) == 0,
};

pub fn new_translator(ttbr0: Address) -> DirectoryTranslator {
    DirectoryTranslator::new(&ARCH_SPEC, ttbr0)
}

#[cfg(test)]
mod tests {
    use super::ARCH_SPEC;

    #[test]
    fn aarch64_descriptor_bits() {
        let table = 0x2000u64 | 0b11;
        let block = 0x20_0000u64 | 0b01;
        assert!(!(ARCH_SPEC.large_page_bit)(table));
        assert!((ARCH_SPEC.large_page_bit)(block));
        assert!((ARCH_SPEC.writeable_bit)(table));
        assert!(!(ARCH_SPEC.writeable_bit)(table | (1 << 7)));
    }
}
