//! Connection state shared between the bit engine and foreground code.
use core::sync::atomic::Ordering;

use portable_atomic::AtomicU8;

/// One-byte state word of the driver.
///
/// RX and TX substates occupy disjoint bits so both directions progress
/// independently within the same tick. At most one receive and one transmit
/// substate bit is set at a time; `overflow` and `framing_error` are sticky
/// until explicitly cleared.
#[bitbybit::bitfield(u8, default = 0x0, debug, defmt_bitfields(feature = "defmt"))]
pub struct LinkState {
    #[bit(0, rw)]
    initialised: bool,
    /// Start edge seen, waiting for the first data-bit sample.
    #[bit(1, rw)]
    received_start: bool,
    /// Data bits of a frame are being sampled.
    #[bit(2, rw)]
    receiving: bool,
    /// Start bit is on the wire.
    #[bit(3, rw)]
    sent_start: bool,
    /// Data bits of a frame are being emitted.
    #[bit(4, rw)]
    sending: bool,
    /// Frame finished but the head byte could not be retired yet.
    #[bit(5, rw)]
    tx_locked: bool,
    /// A received byte was dropped because the RX FIFO was full.
    #[bit(6, rw)]
    overflow: bool,
    /// A frame arrived without its stop bit and was dropped.
    #[bit(7, rw)]
    framing_error: bool,
}

impl LinkState {
    /// True when no receive substate is active.
    #[inline]
    pub fn rx_idle(&self) -> bool {
        !self.received_start() && !self.receiving()
    }

    /// True when no transmit substate is active.
    #[inline]
    pub fn tx_idle(&self) -> bool {
        !self.sent_start() && !self.sending() && !self.tx_locked()
    }
}

/// Atomic cell holding a [LinkState].
///
/// Plain loads are single-byte atomic and safe from any context.
/// Read-modify-write cycles run inside a critical section so a tick cannot
/// interleave with a foreground update.
pub struct LinkStateCell(AtomicU8);

impl LinkStateCell {
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    #[inline]
    pub fn load(&self) -> LinkState {
        LinkState::new_with_raw_value(self.0.load(Ordering::Relaxed))
    }

    pub fn modify(&self, f: impl FnOnce(LinkState) -> LinkState) {
        critical_section::with(|_| {
            self.0.store(f(self.load()).raw_value(), Ordering::Relaxed);
        });
    }
}

impl Default for LinkStateCell {
    fn default() -> Self {
        Self::new()
    }
}
