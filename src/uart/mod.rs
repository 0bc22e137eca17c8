//! # Software UART driver
//!
//! The core of this API is the [Uart] structure: a full-duplex 8-N-1 serial
//! port bit-banged over two GPIO pins and clocked entirely from one periodic
//! timer interrupt running at twice the baud rate. The transmit-only
//! [UartTx] variant drops the receive machinery at the type level.
//!
//! The driver owns no interrupt vectors; the platform routes its timer
//! compare-match vector to [Uart::on_tick_interrupt] and the pin-change
//! vector of the RX pin group to [Uart::on_rx_edge_interrupt]. All driver
//! methods take `&self`, so the canonical setup is a `static`:
//!
//! ```ignore
//! static UART: Uart<ConsoleTx, ConsoleRx, Tick0> =
//!     Uart::new(ConsoleTx::new(), ConsoleRx::new(), Tick0::new());
//!
//! fn main() {
//!     UART.init(Config::new(Hertz::from_raw(7_372_800)).baud(Baud::B9600))
//!         .unwrap();
//!     // ... route vectors, enable interrupts globally ...
//!     UART.send(b"ready\r\n");
//!     loop {
//!         if let Some(byte) = UART.read_byte() {
//!             UART.write_byte(byte).ok();
//!         }
//!     }
//! }
//! ```
use core::cell::RefCell;
use core::convert::Infallible;
use core::hint;
use core::sync::atomic::Ordering;

use critical_section::Mutex;
use portable_atomic::AtomicBool;

use crate::buffer::RingBuffer;
use crate::pins::{RxPin, TxPin};
use crate::state::{LinkState, LinkStateCell};
use crate::timing::{Baud, Hertz, InvalidTimingError, TickSettings, TickTimer};

mod rx;
mod tx;
pub use tx::UartTx;

/// Default capacity of the receive and transmit FIFOs.
pub const DEFAULT_BUFFER_SIZE: usize = 64;

//==================================================================================================
// Configuration
//==================================================================================================

/// UART configuration parameters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub f_cpu: Hertz,
    pub baud: Baud,
}

impl Config {
    pub fn new(f_cpu: Hertz) -> Self {
        Config {
            f_cpu,
            baud: Baud::B9600,
        }
    }

    pub fn baud(mut self, baud: Baud) -> Self {
        self.baud = baud;
        self
    }
}

//==================================================================================================
// Errors
//==================================================================================================

/// Initialisation failure. The driver stays uninitialised.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError {
    /// The tick timer is already running; the driver initialises once.
    #[error("driver is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Timing(#[from] InvalidTimingError),
}

/// Failure to queue a byte for transmission.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteError {
    /// The transmit FIFO is at capacity; retry after a frame drains.
    #[error("transmit buffer is full")]
    BufferFull,
    /// [Uart::init] has not completed successfully.
    #[error("driver is not initialised")]
    NotInitialised,
}

/// Sticky receive-side error flags.
///
/// Recorded by the bit engine, read with [Uart::errors] and cleared with
/// [Uart::clear_errors]. Neither condition stops reception: an overflowed or
/// malformed byte is dropped and the following frames flow normally.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartErrors {
    overflow: bool,
    framing: bool,
}

impl UartErrors {
    #[inline(always)]
    pub fn overflow(&self) -> bool {
        self.overflow
    }

    #[inline(always)]
    pub fn framing(&self) -> bool {
        self.framing
    }

    #[inline(always)]
    pub fn error(&self) -> bool {
        self.overflow || self.framing
    }
}

//==================================================================================================
// UART implementation
//==================================================================================================

/// Full-duplex software UART.
///
/// Shared state (the two FIFOs and the state word) lives behind atomics and
/// critical sections so the structure can sit in a `static` reachable from
/// both interrupt handlers and foreground code; [Uart::new] is `const` to
/// make that direct. Pins, timer and the per-frame bit cursors are interrupt
/// private.
pub struct Uart<
    Tx: TxPin,
    Rx: RxPin,
    Tim: TickTimer,
    const RX_N: usize = DEFAULT_BUFFER_SIZE,
    const TX_N: usize = DEFAULT_BUFFER_SIZE,
> {
    state: LinkStateCell,
    rx_enabled: AtomicBool,
    rx_buffer: RingBuffer<RX_N>,
    tx_buffer: RingBuffer<TX_N>,
    inner: Mutex<RefCell<Inner<Tx, Rx, Tim>>>,
}

struct Inner<Tx, Rx, Tim> {
    tx_pin: Tx,
    rx_pin: Rx,
    timer: Tim,
    settings: Option<TickSettings>,
    rx: rx::RxCursor,
    tx: tx::TxCursor,
}

impl<Tx: TxPin, Rx: RxPin, Tim: TickTimer, const RX_N: usize, const TX_N: usize>
    Uart<Tx, Rx, Tim, RX_N, TX_N>
{
    /// Creates the driver without touching the hardware.
    pub const fn new(tx_pin: Tx, rx_pin: Rx, timer: Tim) -> Self {
        Self {
            state: LinkStateCell::new(),
            rx_enabled: AtomicBool::new(false),
            rx_buffer: RingBuffer::new(),
            tx_buffer: RingBuffer::new(),
            inner: Mutex::new(RefCell::new(Inner {
                tx_pin,
                rx_pin,
                timer,
                settings: None,
                rx: rx::RxCursor::new(),
                tx: tx::TxCursor::new(),
            })),
        }
    }

    /// Claims the timer and starts the bit engine.
    ///
    /// Drives the TX line to its idle-high level, clears both FIFOs, arms
    /// start-edge capture on the RX pin and programs the tick timer to twice
    /// the requested baud rate. Fails if the timer is already running or no
    /// timer setting exists for the clock/baud pair; either way no partial
    /// initialisation is observable.
    ///
    /// The caller still routes the two interrupt vectors to
    /// [Self::on_tick_interrupt] and [Self::on_rx_edge_interrupt] and
    /// enables interrupts globally.
    pub fn init(&self, config: Config) -> Result<(), InitError> {
        let settings = TickSettings::derive(config.f_cpu, config.baud)?;
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if inner.timer.is_running() {
                return Err(InitError::AlreadyRunning);
            }
            self.rx_buffer.reset();
            self.tx_buffer.reset();
            inner.rx.reset();
            inner.tx.reset();
            inner.settings = Some(settings);
            inner.tx_pin.set_high();
            inner.rx_pin.enable_edge_capture();
            self.rx_enabled.store(true, Ordering::Relaxed);
            inner.timer.start(&settings);
            self.state.modify(|_| {
                let mut fresh = LinkState::new_with_raw_value(0);
                fresh.set_initialised(true);
                fresh
            });
            Ok(())
        })
    }

    /// Queues one byte for transmission.
    ///
    /// The byte is on the wire some frames later; ordering across accepted
    /// bytes is preserved. Spins only for the advisory FIFO lock, which no
    /// holder keeps across a tick.
    pub fn write_byte(&self, byte: u8) -> Result<(), WriteError> {
        tx::queue_byte(&self.state, &self.tx_buffer, byte)
    }

    /// Queues bytes until the FIFO fills up; returns how many were accepted.
    ///
    /// Not atomic: frames may already be leaving the wire while later bytes
    /// of `data` are still being queued.
    pub fn send(&self, data: &[u8]) -> usize {
        tx::queue_slice(&self.state, &self.tx_buffer, data)
    }

    /// Number of received bytes waiting in the RX FIFO.
    ///
    /// When a previously consumed byte has not been retired yet, this waits
    /// for the next tick to do so, keeping the returned count stable.
    pub fn bytes_available(&self) -> usize {
        if self.rx_buffer.is_empty() {
            return 0;
        }
        while self.rx_buffer.is_dirty() {
            hint::spin_loop();
        }
        self.rx_buffer.len()
    }

    /// Takes the oldest received byte, or [None] when the FIFO is empty.
    ///
    /// The byte is removed logically here and physically by the next tick's
    /// bottom half; two consecutive reads never return the same byte.
    pub fn read_byte(&self) -> Option<u8> {
        while self.rx_buffer.is_dirty() {
            hint::spin_loop();
        }
        if self.rx_buffer.is_empty() {
            return None;
        }
        let byte = self.rx_buffer.peek();
        self.rx_buffer.mark_consumed();
        Some(byte)
    }

    /// Re-arms start-edge capture.
    pub fn enable_rx(&self) {
        critical_section::with(|cs| {
            self.rx_enabled.store(true, Ordering::Relaxed);
            // Mid-frame the capture stays masked; the frame tail re-arms it.
            if self.state.load().rx_idle() {
                self.inner.borrow_ref_mut(cs).rx_pin.enable_edge_capture();
            }
        });
    }

    /// Masks start-edge capture. A frame already in flight still completes
    /// and is delivered.
    pub fn disable_rx(&self) {
        critical_section::with(|cs| {
            self.rx_enabled.store(false, Ordering::Relaxed);
            self.inner.borrow_ref_mut(cs).rx_pin.disable_edge_capture();
        });
    }

    /// Sticky receive error flags recorded by the bit engine.
    pub fn errors(&self) -> UartErrors {
        let state = self.state.load();
        UartErrors {
            overflow: state.overflow(),
            framing: state.framing_error(),
        }
    }

    /// Clears the sticky error flags.
    pub fn clear_errors(&self) {
        self.state.modify(|mut s| {
            s.set_overflow(false);
            s.set_framing_error(false);
            s
        });
    }

    /// True while frames are still queued or being emitted.
    pub fn tx_busy(&self) -> bool {
        !self.state.load().tx_idle() || !self.tx_buffer.is_empty()
    }

    /// Timer compare-match handler: one half-bit tick.
    ///
    /// Runs the receive half, the transmit half and the receive bottom half
    /// in that order. Must complete within one tick period; everything here
    /// is O(1) except the deferred FIFO compaction in the bottom half.
    pub fn on_tick_interrupt(&self) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if inner.settings.is_none() {
                return;
            }
            let rearm = self.rx_enabled.load(Ordering::Relaxed);
            let Inner {
                tx_pin,
                rx_pin,
                rx,
                tx,
                ..
            } = &mut *inner;
            rx::sample(rx, rx_pin, &self.rx_buffer, &self.state, rearm);
            tx::advance(tx, tx_pin, &self.tx_buffer, &self.state);
            rx::retire_consumed(&self.rx_buffer);
        });
    }

    /// Pin-change handler for the RX pin group.
    ///
    /// Snapshots the timer count before anything else; jitter between the
    /// wire edge and this read becomes sampling phase error.
    pub fn on_rx_edge_interrupt(&self) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let count = inner.timer.count();
            let Some(settings) = inner.settings else {
                return;
            };
            let Inner { rx_pin, rx, .. } = &mut *inner;
            rx::capture_start_edge(rx, rx_pin, &self.state, &settings, count);
        });
    }
}

//==================================================================================================
// Embedded HAL / IO integration
//==================================================================================================

impl<Tx: TxPin, Rx: RxPin, Tim: TickTimer, const RX_N: usize, const TX_N: usize>
    embedded_hal_nb::serial::ErrorType for Uart<Tx, Rx, Tim, RX_N, TX_N>
{
    type Error = Infallible;
}

impl<Tx: TxPin, Rx: RxPin, Tim: TickTimer, const RX_N: usize, const TX_N: usize>
    embedded_hal_nb::serial::Read<u8> for Uart<Tx, Rx, Tim, RX_N, TX_N>
{
    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        // A dirty head still belongs to the previous read.
        if self.rx_buffer.is_dirty() || self.rx_buffer.is_empty() {
            return Err(nb::Error::WouldBlock);
        }
        let byte = self.rx_buffer.peek();
        self.rx_buffer.mark_consumed();
        Ok(byte)
    }
}

impl<Tx: TxPin, Rx: RxPin, Tim: TickTimer, const RX_N: usize, const TX_N: usize>
    embedded_hal_nb::serial::Write<u8> for Uart<Tx, Rx, Tim, RX_N, TX_N>
{
    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.write_byte(word).map_err(|_| nb::Error::WouldBlock)
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        if self.tx_busy() {
            return Err(nb::Error::WouldBlock);
        }
        Ok(())
    }
}

impl<Tx: TxPin, Rx: RxPin, Tim: TickTimer, const RX_N: usize, const TX_N: usize>
    embedded_io::ErrorType for Uart<Tx, Rx, Tim, RX_N, TX_N>
{
    type Error = Infallible;
}

impl<Tx: TxPin, Rx: RxPin, Tim: TickTimer, const RX_N: usize, const TX_N: usize> embedded_io::Read
    for Uart<Tx, Rx, Tim, RX_N, TX_N>
{
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.bytes_available() == 0 {
            hint::spin_loop();
        }
        let mut read = 0;
        for byte in buf.iter_mut() {
            match <Self as embedded_hal_nb::serial::Read<u8>>::read(self) {
                Ok(w) => {
                    *byte = w;
                    read += 1;
                }
                Err(nb::Error::WouldBlock) => break,
            }
        }
        Ok(read)
    }
}

impl<Tx: TxPin, Rx: RxPin, Tim: TickTimer, const RX_N: usize, const TX_N: usize> embedded_io::Write
    for Uart<Tx, Rx, Tim, RX_N, TX_N>
{
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let written = self.send(buf);
            if written > 0 {
                return Ok(written);
            }
            hint::spin_loop();
        }
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        while self.tx_busy() {
            hint::spin_loop();
        }
        Ok(())
    }
}
