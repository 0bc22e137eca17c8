//! Software (bit-banged) full-duplex UART.
//!
//! Targets microcontrollers whose hardware offers no UART peripheral, only a
//! free-running 8-bit timer with a compare-match interrupt, GPIO and a
//! pin-change interrupt. One periodic timer interrupt running at twice the
//! baud rate clocks both directions of a standard 8-N-1 frame: the
//! [uart::Uart] driver samples the RX pin mid-bit, emits TX bits on its own
//! phase and moves bytes between interrupt context and the foreground FIFOs.
//!
//! Platform integration happens through three small traits: [pins::TxPin],
//! [pins::RxPin] and [timing::TickTimer]. The platform routes its timer
//! compare-match vector to [uart::Uart::on_tick_interrupt] and the pin-change
//! vector of the RX pin group to [uart::Uart::on_rx_edge_interrupt].
#![cfg_attr(not(test), no_std)]

pub mod buffer;
pub mod pins;
pub mod state;
pub mod timing;
pub mod uart;

pub use pins::{PinState, RxPin, TxPin};
pub use timing::{Baud, Hertz, InvalidTimingError, Prescaler, TickSettings, TickTimer};
pub use uart::{Config, DEFAULT_BUFFER_SIZE, InitError, Uart, UartErrors, UartTx, WriteError};
