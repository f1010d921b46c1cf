//! Property-based tests for register addressing.
//! Verifies invariants hold for ALL valid inputs, not just fixed examples.

#![allow(clippy::arithmetic_side_effects)]

use platform::regmap::{RegAddr, PAGES_PER_BOOK, REGS_PER_PAGE};

proptest::proptest! {
    /// Decomposition recovers the bank and offset of any constructed address.
    #[test]
    fn new_then_decompose_recovers_fields(book in 0u8..=255, page in 0u8..=255, reg in 0u8..128) {
        let addr = RegAddr::new(book, page, reg);
        assert_eq!(addr.bank(), (book, page));
        assert_eq!(addr.reg(), reg);
    }

    /// Decoding never panics for any raw value read from a blob.
    #[test]
    fn decompose_never_panics(raw in 0u32..=u32::MAX) {
        let addr = RegAddr::from_raw(raw);
        let _ = addr.bank();
        assert!(addr.reg() < 128);
    }

    /// Registers in the same page share a bank; the next page never does.
    #[test]
    fn same_page_same_bank(book in 0u8..=255, page in 0u8..255, a in 0u8..128, b in 0u8..128) {
        let x = RegAddr::new(book, page, a);
        let y = RegAddr::new(book, page, b);
        let z = RegAddr::new(book, page + 1, a);
        assert_eq!(x.bank(), y.bank());
        assert_ne!(x.bank(), z.bank());
        assert_eq!(z.raw() - x.raw(), REGS_PER_PAGE);
        assert!(z.raw() - x.raw() < PAGES_PER_BOOK * REGS_PER_PAGE);
    }
}
