//! Tick-rate derivation for the bit engine.
//!
//! The whole driver is clocked from a single periodic timer interrupt firing
//! at twice the baud rate: every interrupt is one half-bit tick, and a
//! per-direction phase toggle turns two ticks into one wire symbol. This
//! module selects the timer prescaler and 8-bit compare value for that rate
//! and the threshold used to classify where inside a half-bit a start edge
//! arrived.
pub type Hertz = fugit::HertzU32;

/// Half-bit ticks per wire symbol (2x oversampling).
pub const TICKS_PER_BIT: u32 = 2;

/// Supported baud rates.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Baud {
    B2400,
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
}

impl Baud {
    pub const fn bits_per_second(self) -> u32 {
        match self {
            Baud::B2400 => 2_400,
            Baud::B9600 => 9_600,
            Baud::B19200 => 19_200,
            Baud::B38400 => 38_400,
            Baud::B57600 => 57_600,
            Baud::B115200 => 115_200,
        }
    }
}

/// Hardware divider between the CPU clock and the timer clock.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Prescaler {
    Div1,
    Div8,
    Div64,
    Div256,
    Div1024,
}

impl Prescaler {
    pub const fn divisor(self) -> u32 {
        match self {
            Prescaler::Div1 => 1,
            Prescaler::Div8 => 8,
            Prescaler::Div64 => 64,
            Prescaler::Div256 => 256,
            Prescaler::Div1024 => 1024,
        }
    }
}

const PRESCALERS: [Prescaler; 5] = [
    Prescaler::Div1,
    Prescaler::Div8,
    Prescaler::Div64,
    Prescaler::Div256,
    Prescaler::Div1024,
];

/// No prescaler/compare pair realises the requested tick rate.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("no timer setting for {baud:?} at {f_cpu} Hz")]
pub struct InvalidTimingError {
    pub f_cpu: u32,
    pub baud: Baud,
}

/// Timer programming derived from the CPU clock and baud rate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickSettings {
    /// Timer input divider.
    pub prescaler: Prescaler,
    /// Compare value. The timer counts `0..=compare` and fires on match, so
    /// the tick period is `compare + 1` timer clocks.
    pub compare: u8,
    /// Start edges captured at a count below this arrived in the first half
    /// of the tick period. Sits past `compare / 2` because the captured
    /// count already includes the pin-change interrupt entry latency.
    ///
    /// At 57600 baud and above the margin between the two classifications
    /// gets thin; validate the phase behaviour on real wiring.
    pub edge_threshold: u8,
}

impl TickSettings {
    /// Derives the timer setting for `baud` from the CPU clock.
    ///
    /// Picks the smallest prescaler whose rounded tick period fits the 8-bit
    /// compare register, which maximises edge-classification resolution.
    /// Fails when no prescaler yields a usable period.
    pub const fn derive(f_cpu: Hertz, baud: Baud) -> Result<Self, InvalidTimingError> {
        let tick_rate = baud.bits_per_second() * TICKS_PER_BIT;
        let mut i = 0;
        while i < PRESCALERS.len() {
            let prescaler = PRESCALERS[i];
            let clocks_per_tick = prescaler.divisor() * tick_rate;
            let period = (f_cpu.raw() + clocks_per_tick / 2) / clocks_per_tick;
            if period >= 2 && period <= 256 {
                let compare = (period - 1) as u8;
                return Ok(TickSettings {
                    prescaler,
                    compare,
                    edge_threshold: compare / 2 + compare / 8,
                });
            }
            i += 1;
        }
        Err(InvalidTimingError {
            f_cpu: f_cpu.raw(),
            baud,
        })
    }
}

/// Periodic half-bit timer as seen by the bit engine.
///
/// Platform code implements this on a hardware timer in clear-on-compare
/// mode. [TickTimer::start] programs prescaler and compare value, zeroes the
/// count and enables the compare-match interrupt; the platform routes that
/// interrupt to [crate::uart::Uart::on_tick_interrupt].
pub trait TickTimer {
    fn start(&mut self, settings: &TickSettings);
    fn is_running(&self) -> bool;
    /// Live counter value in `0..=compare`. Sampled by the edge capture to
    /// locate a start edge within the current tick period; read it as early
    /// as possible, jitter here becomes sampling phase error.
    fn count(&self) -> u8;
}
