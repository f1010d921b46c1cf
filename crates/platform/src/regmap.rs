//! Register addressing and the register-bus capability.
//!
//! Smart amplifiers expose a banked register map: every register lives in a
//! `(book, page)` bank and is addressed by a 7-bit offset inside that page.
//! The control plane works with flat addresses that encode all three parts,
//! and asks the transport to switch banks only when the per-channel cursor
//! actually changes.
//!
//! ```text
//! flat = book * 256 * 128 + page * 128 + reg      (reg < 128)
//! ```

/// Number of register offsets in one page.
pub const REGS_PER_PAGE: u32 = 128;

/// Number of pages in one book.
pub const PAGES_PER_BOOK: u32 = 256;

// ── RegAddr ──────────────────────────────────────────────────────────────────

/// Flat register address encoding a `(book, page, reg)` triple.
///
/// Invariant: `reg() < 128` and `book() <= 255` for values built with
/// [`RegAddr::new`]. Raw values from a blob are accepted as-is through
/// [`RegAddr::from_raw`]; out-of-range books saturate when decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct RegAddr(u32);

impl RegAddr {
    /// Build an address from its bank and in-page offset.
    ///
    /// `reg` is masked to 7 bits.
    #[must_use]
    pub const fn new(book: u8, page: u8, reg: u8) -> Self {
        Self(
            (book as u32) * PAGES_PER_BOOK * REGS_PER_PAGE
                + (page as u32) * REGS_PER_PAGE
                + (reg as u32 & 0x7F),
        )
    }

    /// Wrap a flat address read from a tuning blob.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Flat address value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Book number (saturates at 255 for malformed raw values).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // clamped to u8::MAX first
    pub fn book(self) -> u8 {
        let book = self.0 / (PAGES_PER_BOOK * REGS_PER_PAGE);
        book.min(u32::from(u8::MAX)) as u8
    }

    /// Page number inside the book.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // value < 256 by construction
    pub fn page(self) -> u8 {
        ((self.0 % (PAGES_PER_BOOK * REGS_PER_PAGE)) / REGS_PER_PAGE) as u8
    }

    /// Register offset inside the page (0..128).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // value < 128 by construction
    pub fn reg(self) -> u8 {
        (self.0 % REGS_PER_PAGE) as u8
    }

    /// `(book, page)` bank this register lives in.
    #[must_use]
    pub fn bank(self) -> (u8, u8) {
        (self.book(), self.page())
    }
}

impl core::fmt::Display for RegAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "B{:#04x}:P{:#04x}:R{:#04x}",
            self.book(),
            self.page(),
            self.reg()
        )
    }
}

// ── RegisterBus ──────────────────────────────────────────────────────────────

/// Addressed register access to one or more amplifier channels.
///
/// Implemented once per transport (I²C, SPI, a simulator). The transport
/// performs the physical bank switch in [`select_page`](Self::select_page);
/// callers are responsible for not issuing redundant switches.
///
/// Every method addresses a single `channel` (one physical amplifier on the
/// shared bus) except [`hw_reset`](Self::hw_reset), which toggles the shared
/// reset line and therefore affects every channel.
pub trait RegisterBus {
    /// Error type
    type Error: core::fmt::Debug;

    /// Switch the channel's active `(book, page)` bank.
    fn select_page(
        &mut self,
        channel: u8,
        book: u8,
        page: u8,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    /// Read one register.
    fn read(
        &mut self,
        channel: u8,
        addr: RegAddr,
    ) -> impl core::future::Future<Output = Result<u32, Self::Error>>;

    /// Write one register.
    fn write(
        &mut self,
        channel: u8,
        addr: RegAddr,
        value: u32,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    /// Write consecutive registers starting at `addr`.
    fn bulk_write(
        &mut self,
        channel: u8,
        addr: RegAddr,
        data: &[u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    /// Read-modify-write: `reg = (reg & !mask) | (value & mask)`.
    fn update_bits(
        &mut self,
        channel: u8,
        addr: RegAddr,
        mask: u32,
        value: u32,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    /// Pulse the shared hardware reset line.
    ///
    /// After this call every channel's register map, including the selected
    /// bank, is back at its power-on default.
    fn hw_reset(&mut self) -> impl core::future::Future<Output = Result<(), Self::Error>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn new_encodes_book_page_reg() {
        let addr = RegAddr::new(0x8C, 0x1E, 0x20);
        assert_eq!(addr.raw(), 0x8C * 256 * 128 + 0x1E * 128 + 0x20);
        assert_eq!(addr.bank(), (0x8C, 0x1E));
        assert_eq!(addr.reg(), 0x20);
    }

    #[test]
    fn reg_is_masked_to_seven_bits() {
        let addr = RegAddr::new(0, 1, 0xFF);
        assert_eq!(addr.page(), 1);
        assert_eq!(addr.reg(), 0x7F);
    }

    #[test]
    fn malformed_raw_book_saturates() {
        let addr = RegAddr::from_raw(u32::MAX);
        assert_eq!(addr.book(), u8::MAX);
    }

    #[test]
    fn display_shows_bank_and_offset() {
        let addr = RegAddr::new(0, 2, 0x0A);
        assert_eq!(format!("{addr}"), "B0x00:P0x02:R0x0a");
    }
}
