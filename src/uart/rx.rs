//! Receive bit engine: start-edge capture, mid-bit sampling and the
//! deferred head-retire bottom half.
use arbitrary_int::u2;

use crate::buffer::RingBuffer;
use crate::pins::RxPin;
use crate::state::LinkStateCell;
use crate::timing::TickSettings;

/// Working state of the receive direction. Interrupt-private.
pub(crate) struct RxCursor {
    /// Half-tick divider within a frame; a bit is sampled when it flips back
    /// to odd. Re-seeded by every start edge, unlike the transmit phase.
    phase: bool,
    /// Data bits already sampled for the current frame.
    bit_counter: u8,
    /// Byte under assembly, filled LSB first.
    byte: u8,
    /// Half-ticks left until the first data-bit sample.
    sample_countdown: u2,
}

impl RxCursor {
    pub(crate) const fn new() -> Self {
        Self {
            phase: false,
            bit_counter: 0,
            byte: 0,
            sample_countdown: u2::new(0),
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Start-edge capture. `count` is the timer count snapshotted on handler
/// entry.
///
/// Commits to the frame: masks further pin-change capture and seeds the
/// sample countdown from where inside the half-bit the edge arrived, so that
/// the first data-bit sample lands mid-bit for any edge phase.
pub(crate) fn capture_start_edge<Rx: RxPin>(
    cursor: &mut RxCursor,
    pin: &mut Rx,
    state: &LinkStateCell,
    settings: &TickSettings,
    count: u8,
) {
    // Platforms with a shared pin-change vector report rising edges too;
    // only a low line is a start bit.
    if !pin.is_low() {
        return;
    }
    let current = state.load();
    if !current.initialised() || !current.rx_idle() {
        return;
    }
    pin.disable_edge_capture();
    cursor.sample_countdown = if count < settings.edge_threshold {
        u2::new(2)
    } else {
        u2::new(3)
    };
    state.modify(|mut s| {
        s.set_received_start(true);
        s
    });
}

/// One half-bit tick of the receive direction.
pub(crate) fn sample<Rx: RxPin, const N: usize>(
    cursor: &mut RxCursor,
    pin: &mut Rx,
    buffer: &RingBuffer<N>,
    state: &LinkStateCell,
    rearm_capture: bool,
) {
    let current = state.load();
    if current.received_start() {
        if cursor.sample_countdown.value() > 0 {
            cursor.sample_countdown = u2::new(cursor.sample_countdown.value() - 1);
        } else {
            // The countdown elapsed on the previous tick; this tick sits in
            // the middle of data bit 0.
            cursor.byte = pin.is_high() as u8;
            cursor.bit_counter = 1;
            cursor.phase = false;
            state.modify(|mut s| {
                s.set_received_start(false);
                s.set_receiving(true);
                s
            });
        }
    } else if current.receiving() {
        if cursor.phase {
            cursor.phase = false;
            if cursor.bit_counter < 8 {
                if pin.is_high() {
                    cursor.byte |= 1 << cursor.bit_counter;
                }
                cursor.bit_counter += 1;
            } else {
                finish_frame(cursor, pin, buffer, state, rearm_capture);
            }
        } else {
            cursor.phase = true;
        }
    }
}

/// Stop-bit inspection: commit the byte on a high line, drop it on a low
/// one. Either way the frame is over and capture re-arms for the next start
/// edge.
fn finish_frame<Rx: RxPin, const N: usize>(
    cursor: &mut RxCursor,
    pin: &mut Rx,
    buffer: &RingBuffer<N>,
    state: &LinkStateCell,
    rearm_capture: bool,
) {
    if pin.is_high() {
        if buffer.append(cursor.byte).is_err() {
            state.modify(|mut s| {
                s.set_overflow(true);
                s
            });
        }
    } else {
        state.modify(|mut s| {
            s.set_framing_error(true);
            s
        });
    }
    cursor.byte = 0;
    cursor.bit_counter = 0;
    state.modify(|mut s| {
        s.set_receiving(false);
        s
    });
    if rearm_capture {
        pin.enable_edge_capture();
    }
}

/// Bottom half of the tick: physically removes a byte the foreground has
/// consumed. Runs after both bit engines so the O(len) copy never delays a
/// sample or an emit.
pub(crate) fn retire_consumed<const N: usize>(buffer: &RingBuffer<N>) {
    if buffer.is_dirty() && buffer.shift_down().is_ok() {
        buffer.clear_dirty();
    }
}
