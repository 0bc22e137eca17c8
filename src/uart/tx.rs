//! Transmit bit engine and the transmit-only driver variant.
use core::cell::RefCell;
use core::convert::Infallible;
use core::hint;

use critical_section::Mutex;

use crate::buffer::RingBuffer;
use crate::pins::{PinState, TxPin};
use crate::state::{LinkState, LinkStateCell};
use crate::timing::{TickSettings, TickTimer};

use super::{Config, DEFAULT_BUFFER_SIZE, InitError, WriteError};

/// Working state of the transmit direction. Interrupt-private.
pub(crate) struct TxCursor {
    /// Free-running half-tick divider; the emitter advances on odd ticks.
    phase: bool,
    /// Data bits already emitted for the current frame.
    bit_counter: u8,
    /// Working copy of the byte on the wire.
    byte: u8,
}

impl TxCursor {
    pub(crate) const fn new() -> Self {
        Self {
            phase: false,
            bit_counter: 0,
            byte: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }
}

/// One half-bit tick of the transmit direction.
///
/// A new wire symbol goes out every other tick; the intervening ticks only
/// toggle the phase. The finished byte is retired from the FIFO together
/// with the stop bit; when the advisory lock blocks that, the retire is
/// retried on following ticks while the line idles high.
pub(crate) fn advance<Tx: TxPin, const N: usize>(
    cursor: &mut TxCursor,
    pin: &mut Tx,
    buffer: &RingBuffer<N>,
    state: &LinkStateCell,
) {
    cursor.phase = !cursor.phase;
    if !cursor.phase {
        return;
    }

    let current = state.load();
    if current.sent_start() {
        // The start bit has been on the wire for one bit time; data follows.
        pin.write(bit_level(cursor.byte, 0));
        cursor.bit_counter = 1;
        state.modify(|mut s| {
            s.set_sent_start(false);
            s.set_sending(true);
            s
        });
    } else if current.sending() {
        if cursor.bit_counter < 8 {
            pin.write(bit_level(cursor.byte, cursor.bit_counter));
            cursor.bit_counter += 1;
        } else {
            pin.set_high();
            match buffer.shift_down() {
                Ok(()) => state.modify(|mut s| {
                    s.set_sending(false);
                    s
                }),
                Err(_) => state.modify(|mut s| {
                    s.set_sending(false);
                    s.set_tx_locked(true);
                    s
                }),
            }
        }
    } else if current.tx_locked() {
        if buffer.shift_down().is_ok() {
            state.modify(|mut s| {
                s.set_tx_locked(false);
                s
            });
        }
    } else if !buffer.is_empty() {
        pin.set_low();
        cursor.byte = buffer.peek();
        cursor.bit_counter = 0;
        state.modify(|mut s| {
            s.set_sent_start(true);
            s
        });
    }
}

#[inline]
fn bit_level(byte: u8, bit: u8) -> PinState {
    PinState::from(byte & (1 << bit) != 0)
}

/// Appends a byte to a transmit FIFO under the advisory lock.
pub(crate) fn queue_byte<const N: usize>(
    state: &LinkStateCell,
    buffer: &RingBuffer<N>,
    byte: u8,
) -> Result<(), WriteError> {
    if !state.load().initialised() {
        return Err(WriteError::NotInitialised);
    }
    buffer.acquire_lock();
    let result = buffer.append(byte);
    buffer.release_lock();
    result.map_err(|_| WriteError::BufferFull)
}

/// Appends bytes until the first failure; returns how many were accepted.
pub(crate) fn queue_slice<const N: usize>(
    state: &LinkStateCell,
    buffer: &RingBuffer<N>,
    data: &[u8],
) -> usize {
    for (queued, byte) in data.iter().enumerate() {
        if queue_byte(state, buffer, *byte).is_err() {
            return queued;
        }
    }
    data.len()
}

//==================================================================================================
// Transmit-only driver
//==================================================================================================

/// Transmit-only software UART.
///
/// Carries no receive machinery at all: no edge capture, no RX FIFO, and the
/// receive API simply does not exist on this type. Useful for debug consoles
/// that only ever print.
///
/// Usage is identical to [super::Uart] minus the pin-change vector: route
/// the timer compare-match vector to [Self::on_tick_interrupt].
pub struct UartTx<Tx: TxPin, Tim: TickTimer, const TX_N: usize = DEFAULT_BUFFER_SIZE> {
    state: LinkStateCell,
    buffer: RingBuffer<TX_N>,
    inner: Mutex<RefCell<TxInner<Tx, Tim>>>,
}

struct TxInner<Tx, Tim> {
    pin: Tx,
    timer: Tim,
    cursor: TxCursor,
}

impl<Tx: TxPin, Tim: TickTimer, const TX_N: usize> UartTx<Tx, Tim, TX_N> {
    /// Creates the driver. `const`, so it can sit in a `static` when the pin
    /// and timer constructors are `const` too.
    pub const fn new(pin: Tx, timer: Tim) -> Self {
        Self {
            state: LinkStateCell::new(),
            buffer: RingBuffer::new(),
            inner: Mutex::new(RefCell::new(TxInner {
                pin,
                timer,
                cursor: TxCursor::new(),
            })),
        }
    }

    /// Claims the timer and starts the bit engine.
    ///
    /// See [super::Uart::init]; the receive-side steps do not apply.
    pub fn init(&self, config: Config) -> Result<(), InitError> {
        let settings = TickSettings::derive(config.f_cpu, config.baud)?;
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if inner.timer.is_running() {
                return Err(InitError::AlreadyRunning);
            }
            self.buffer.reset();
            inner.cursor.reset();
            inner.pin.set_high();
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
    pub fn write_byte(&self, byte: u8) -> Result<(), WriteError> {
        queue_byte(&self.state, &self.buffer, byte)
    }

    /// Queues bytes until the FIFO fills up; returns how many were accepted.
    pub fn send(&self, data: &[u8]) -> usize {
        queue_slice(&self.state, &self.buffer, data)
    }

    /// True while frames are still queued or being emitted.
    pub fn tx_busy(&self) -> bool {
        !self.state.load().tx_idle() || !self.buffer.is_empty()
    }

    /// Timer compare-match handler: one half-bit tick.
    pub fn on_tick_interrupt(&self) {
        critical_section::with(|cs| {
            if !self.state.load().initialised() {
                return;
            }
            let mut inner = self.inner.borrow_ref_mut(cs);
            let TxInner { pin, cursor, .. } = &mut *inner;
            advance(cursor, pin, &self.buffer, &self.state);
        });
    }
}

impl<Tx: TxPin, Tim: TickTimer, const TX_N: usize> embedded_hal_nb::serial::ErrorType
    for UartTx<Tx, Tim, TX_N>
{
    type Error = Infallible;
}

impl<Tx: TxPin, Tim: TickTimer, const TX_N: usize> embedded_hal_nb::serial::Write<u8>
    for UartTx<Tx, Tim, TX_N>
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

impl<Tx: TxPin, Tim: TickTimer, const TX_N: usize> embedded_io::ErrorType
    for UartTx<Tx, Tim, TX_N>
{
    type Error = Infallible;
}

impl<Tx: TxPin, Tim: TickTimer, const TX_N: usize> embedded_io::Write for UartTx<Tx, Tim, TX_N> {
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
