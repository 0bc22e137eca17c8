//! Pin seam between the bit engine and platform GPIO.
//!
//! Both traits are deliberately infallible: they wrap single port-register
//! accesses on the kind of target this driver runs on. Platform crates
//! implement them on their own pin types, analogous to how a HAL wraps its
//! low-level GPIO layer behind `embedded-hal` traits.
pub use embedded_hal::digital::PinState;

/// Transmit line.
///
/// Expected to be a push-pull output, driven high (line idle) by
/// [crate::uart::Uart::init] before the first frame.
pub trait TxPin {
    fn write(&mut self, state: PinState);

    #[inline]
    fn set_high(&mut self) {
        self.write(PinState::High);
    }

    #[inline]
    fn set_low(&mut self) {
        self.write(PinState::Low);
    }
}

/// Receive line.
///
/// Expected to be a floating input (the remote transmitter drives the idle
/// level). The capture mask controls the pin-change interrupt of this pin;
/// the platform routes that interrupt to
/// [crate::uart::Uart::on_rx_edge_interrupt].
pub trait RxPin {
    fn read(&mut self) -> PinState;

    /// Unmasks the pin-change interrupt.
    fn enable_edge_capture(&mut self);

    /// Masks the pin-change interrupt.
    fn disable_edge_capture(&mut self);

    #[inline]
    fn is_low(&mut self) -> bool {
        self.read() == PinState::Low
    }

    #[inline]
    fn is_high(&mut self) -> bool {
        self.read() == PinState::High
    }
}
