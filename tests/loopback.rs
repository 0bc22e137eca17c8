//! Simulated-wire tests for the bit engine.
//!
//! A fake pin pair and timer stand in for the hardware; the tests call the
//! interrupt entry points directly, one half-bit tick per step. External
//! transmitters are modelled as level scripts (two ticks per wire symbol),
//! played either just before a tick (the edge lands late in the tick period)
//! or just after one (the edge lands early), covering both sample-countdown
//! seeds.
use std::cell::Cell;
use std::rc::Rc;

use soft_uart::{
    Baud, Config, Hertz, PinState, RxPin, TickSettings, TickTimer, TxPin, Uart, WriteError,
};

const F_CPU: u32 = 7_372_800;

fn config(baud: Baud) -> Config {
    Config::new(Hertz::from_raw(F_CPU)).baud(baud)
}

#[derive(Clone)]
struct Wire(Rc<Cell<PinState>>);

impl Wire {
    fn new() -> Self {
        Wire(Rc::new(Cell::new(PinState::High)))
    }

    fn level(&self) -> PinState {
        self.0.get()
    }

    fn drive(&self, high: bool) {
        self.0.set(PinState::from(high));
    }
}

struct WireTx(Wire);

impl TxPin for WireTx {
    fn write(&mut self, state: PinState) {
        self.0.0.set(state);
    }
}

struct WireRx {
    wire: Wire,
    capture: Rc<Cell<bool>>,
}

impl RxPin for WireRx {
    fn read(&mut self) -> PinState {
        self.wire.level()
    }

    fn enable_edge_capture(&mut self) {
        self.capture.set(true);
    }

    fn disable_edge_capture(&mut self) {
        self.capture.set(false);
    }
}

struct FakeTimer {
    running: Rc<Cell<bool>>,
    count: Rc<Cell<u8>>,
    compare: Rc<Cell<u8>>,
}

impl TickTimer for FakeTimer {
    fn start(&mut self, settings: &TickSettings) {
        self.compare.set(settings.compare);
        self.running.set(true);
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }

    fn count(&self) -> u8 {
        self.count.get()
    }
}

type TestUart<const RX_N: usize, const TX_N: usize> = Uart<WireTx, WireRx, FakeTimer, RX_N, TX_N>;

/// Expands one 8-N-1 frame into per-tick line levels, two ticks per symbol.
fn frame_levels(byte: u8, stop_high: bool) -> Vec<bool> {
    let mut symbols = vec![false];
    for bit in 0..8 {
        symbols.push(byte & (1 << bit) != 0);
    }
    symbols.push(stop_high);
    symbols.into_iter().flat_map(|s| [s, s]).collect()
}

/// One driver wired to a scripted remote transmitter.
struct Bench<const RX_N: usize, const TX_N: usize> {
    uart: TestUart<RX_N, TX_N>,
    tx_wire: Wire,
    rx_wire: Wire,
    rx_capture: Rc<Cell<bool>>,
    timer_count: Rc<Cell<u8>>,
    timer_compare: Rc<Cell<u8>>,
    last_rx_level: PinState,
}

impl<const RX_N: usize, const TX_N: usize> Bench<RX_N, TX_N> {
    fn new() -> Self {
        let tx_wire = Wire::new();
        let rx_wire = Wire::new();
        let rx_capture = Rc::new(Cell::new(false));
        let timer_count = Rc::new(Cell::new(0));
        let timer_compare = Rc::new(Cell::new(0));
        let uart = Uart::new(
            WireTx(tx_wire.clone()),
            WireRx {
                wire: rx_wire.clone(),
                capture: rx_capture.clone(),
            },
            FakeTimer {
                running: Rc::new(Cell::new(false)),
                count: timer_count.clone(),
                compare: timer_compare.clone(),
            },
        );
        Bench {
            uart,
            tx_wire,
            rx_wire,
            rx_capture,
            timer_count,
            timer_compare,
            last_rx_level: PinState::High,
        }
    }

    fn init(&self, baud: Baud) {
        self.uart.init(config(baud)).unwrap();
    }

    fn fire_edge_if_falling(&mut self, count: u8) {
        let level = self.rx_wire.level();
        if self.rx_capture.get() && self.last_rx_level == PinState::High && level == PinState::Low {
            self.timer_count.set(count);
            self.uart.on_rx_edge_interrupt();
        }
        self.last_rx_level = level;
    }

    /// Plays levels that change just before each tick: the start edge is
    /// captured late in the tick period.
    fn play_late(&mut self, levels: &[bool]) {
        for &level in levels {
            self.rx_wire.drive(level);
            self.fire_edge_if_falling(self.timer_compare.get());
            self.uart.on_tick_interrupt();
        }
    }

    /// Plays levels that change just after each tick: the start edge is
    /// captured early in the tick period.
    fn play_early(&mut self, levels: &[bool]) {
        for &level in levels {
            self.uart.on_tick_interrupt();
            self.rx_wire.drive(level);
            self.fire_edge_if_falling(0);
        }
    }

    fn idle_ticks(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.fire_edge_if_falling(self.timer_compare.get());
            self.uart.on_tick_interrupt();
        }
    }

    /// Runs ticks and records the TX line level after each one.
    fn record_tx(&mut self, ticks: usize) -> Vec<bool> {
        let mut levels = Vec::with_capacity(ticks);
        for _ in 0..ticks {
            self.uart.on_tick_interrupt();
            levels.push(self.tx_wire.level() == PinState::High);
        }
        levels
    }
}

/// Two drivers cross-wired for loopback. Within a step A ticks first, so
/// each receiver observes the remote edge just before its own next tick.
struct PairBench<const RX_N: usize, const TX_N: usize> {
    a: TestUart<RX_N, TX_N>,
    b: TestUart<RX_N, TX_N>,
    wire_ab: Wire,
    wire_ba: Wire,
    a_capture: Rc<Cell<bool>>,
    b_capture: Rc<Cell<bool>>,
    a_count: Rc<Cell<u8>>,
    b_count: Rc<Cell<u8>>,
    compare: Rc<Cell<u8>>,
    a_last: PinState,
    b_last: PinState,
}

impl<const RX_N: usize, const TX_N: usize> PairBench<RX_N, TX_N> {
    fn new(baud: Baud) -> Self {
        let wire_ab = Wire::new();
        let wire_ba = Wire::new();
        let a_capture = Rc::new(Cell::new(false));
        let b_capture = Rc::new(Cell::new(false));
        let a_count = Rc::new(Cell::new(0));
        let b_count = Rc::new(Cell::new(0));
        let compare = Rc::new(Cell::new(0));
        let build = |tx: &Wire, rx: &Wire, capture: &Rc<Cell<bool>>, count: &Rc<Cell<u8>>| {
            Uart::new(
                WireTx(tx.clone()),
                WireRx {
                    wire: rx.clone(),
                    capture: capture.clone(),
                },
                FakeTimer {
                    running: Rc::new(Cell::new(false)),
                    count: count.clone(),
                    compare: compare.clone(),
                },
            )
        };
        let a = build(&wire_ab, &wire_ba, &a_capture, &a_count);
        let b = build(&wire_ba, &wire_ab, &b_capture, &b_count);
        a.init(config(baud)).unwrap();
        b.init(config(baud)).unwrap();
        PairBench {
            a,
            b,
            wire_ab,
            wire_ba,
            a_capture,
            b_capture,
            a_count,
            b_count,
            compare,
            a_last: PinState::High,
            b_last: PinState::High,
        }
    }

    fn step(&mut self) {
        let level = self.wire_ba.level();
        if self.a_capture.get() && self.a_last == PinState::High && level == PinState::Low {
            self.a_count.set(self.compare.get());
            self.a.on_rx_edge_interrupt();
        }
        self.a_last = level;
        self.a.on_tick_interrupt();

        let level = self.wire_ab.level();
        if self.b_capture.get() && self.b_last == PinState::High && level == PinState::Low {
            self.b_count.set(self.compare.get());
            self.b.on_rx_edge_interrupt();
        }
        self.b_last = level;
        self.b.on_tick_interrupt();
    }
}

/// Streams `data` from one side of the pair and collects it on the other.
fn pump_one_way<const RX_N: usize, const TX_N: usize>(
    bench: &mut PairBench<RX_N, TX_N>,
    data: &[u8],
) -> Vec<u8> {
    let mut queued = 0;
    let mut received = Vec::with_capacity(data.len());
    // 20 ticks per frame plus generous slack before giving up.
    for _ in 0..(data.len() + 4) * 64 {
        if received.len() == data.len() {
            break;
        }
        if queued < data.len() {
            queued += bench.a.send(&data[queued..]);
        }
        bench.step();
        if bench.b.bytes_available() > 0 {
            received.push(bench.b.read_byte().unwrap());
        }
    }
    received
}

//==================================================================================================
// Transmit waveform
//==================================================================================================

#[test]
fn transmit_waveform_is_8n1_lsb_first() {
    let mut bench = Bench::<64, 64>::new();
    bench.init(Baud::B9600);
    bench.uart.write_byte(0x41).unwrap();

    let levels = bench.record_tx(22);
    // A fresh symbol appears on every odd tick; sample the first of each pair.
    let symbols: Vec<bool> = levels.iter().step_by(2).copied().collect();
    // 0x41 LSB first: start, 1,0,0,0,0,0,1,0, stop.
    assert_eq!(
        symbols,
        vec![false, true, false, false, false, false, false, true, false, true, true]
    );
    assert!(!bench.uart.tx_busy());
}

#[test]
fn transmit_line_idles_high_after_init() {
    let bench = Bench::<64, 64>::new();
    bench.init(Baud::B9600);
    assert_eq!(bench.tx_wire.level(), PinState::High);
}

//==================================================================================================
// Receive decoding
//==================================================================================================

#[test]
fn receives_frame_with_late_start_edge() {
    let mut bench = Bench::<64, 64>::new();
    bench.init(Baud::B9600);
    bench.play_late(&frame_levels(0xaa, true));
    bench.idle_ticks(4);
    assert_eq!(bench.uart.bytes_available(), 1);
    assert_eq!(bench.uart.read_byte(), Some(0xaa));
    bench.idle_ticks(1);
    assert_eq!(bench.uart.bytes_available(), 0);
}

#[test]
fn receives_frame_with_early_start_edge() {
    let mut bench = Bench::<64, 64>::new();
    bench.init(Baud::B9600);
    bench.play_early(&frame_levels(0xaa, true));
    bench.idle_ticks(4);
    assert_eq!(bench.uart.read_byte(), Some(0xaa));
}

#[test]
fn receives_back_to_back_frames_in_order() {
    let mut bench = Bench::<64, 64>::new();
    bench.init(Baud::B19200);
    let mut levels = frame_levels(0xa5, true);
    levels.extend(frame_levels(0x5a, true));
    bench.play_late(&levels);
    bench.idle_ticks(4);
    assert_eq!(bench.uart.bytes_available(), 2);
    assert_eq!(bench.uart.read_byte(), Some(0xa5));
    bench.idle_ticks(1);
    assert_eq!(bench.uart.read_byte(), Some(0x5a));
}

#[test]
fn missing_stop_bit_drops_byte_and_flags_framing() {
    let mut bench = Bench::<64, 64>::new();
    bench.init(Baud::B9600);
    bench.play_late(&frame_levels(0x55, false));
    // Line returns to idle before the next, clean frame.
    bench.rx_wire.drive(true);
    bench.idle_ticks(4);
    bench.play_late(&frame_levels(0x66, true));
    bench.idle_ticks(4);

    assert!(bench.uart.errors().framing());
    assert!(!bench.uart.errors().overflow());
    assert_eq!(bench.uart.bytes_available(), 1);
    assert_eq!(bench.uart.read_byte(), Some(0x66));
}

#[test]
fn rx_overflow_is_sticky_and_reception_resumes() {
    let mut bench = Bench::<4, 64>::new();
    bench.init(Baud::B9600);
    for byte in 1..=7u8 {
        bench.play_late(&frame_levels(byte, true));
        bench.idle_ticks(2);
    }
    // Capacity bytes delivered, the rest dropped with the flag set.
    assert_eq!(bench.uart.bytes_available(), 4);
    assert!(bench.uart.errors().overflow());

    for expected in 1..=4u8 {
        assert_eq!(bench.uart.read_byte(), Some(expected));
        bench.idle_ticks(1);
    }
    bench.uart.clear_errors();

    bench.play_late(&frame_levels(8, true));
    bench.idle_ticks(4);
    assert!(!bench.uart.errors().overflow());
    assert_eq!(bench.uart.read_byte(), Some(8));
}

#[test]
fn disabled_receiver_ignores_frames() {
    let mut bench = Bench::<64, 64>::new();
    bench.init(Baud::B9600);
    bench.uart.disable_rx();
    bench.play_late(&frame_levels(0x77, true));
    bench.idle_ticks(4);
    assert_eq!(bench.uart.bytes_available(), 0);

    bench.uart.enable_rx();
    bench.play_late(&frame_levels(0x78, true));
    bench.idle_ticks(4);
    assert_eq!(bench.uart.read_byte(), Some(0x78));
}

//==================================================================================================
// Foreground contract
//==================================================================================================

#[test]
fn write_before_init_is_rejected() {
    let bench = Bench::<64, 64>::new();
    assert_eq!(bench.uart.write_byte(0x00), Err(WriteError::NotInitialised));
    assert_eq!(bench.uart.read_byte(), None);
}

#[test]
fn init_twice_fails_without_disturbing_the_driver() {
    let mut bench = Bench::<64, 64>::new();
    bench.init(Baud::B9600);
    assert_eq!(
        bench.uart.init(config(Baud::B9600)),
        Err(soft_uart::InitError::AlreadyRunning)
    );
    bench.uart.write_byte(0x42).unwrap();
    let levels = bench.record_tx(22);
    assert!(levels.contains(&false), "frame was never emitted");
}

#[test]
fn tx_buffer_full_recovers_after_draining() {
    let mut bench = Bench::<64, 4>::new();
    bench.init(Baud::B9600);
    for byte in 0..4u8 {
        bench.uart.write_byte(byte).unwrap();
    }
    assert_eq!(bench.uart.write_byte(4), Err(WriteError::BufferFull));
    // One whole frame retires its byte from the FIFO.
    bench.idle_ticks(24);
    bench.uart.write_byte(4).unwrap();
}

#[test]
fn send_reports_short_writes() {
    let bench = Bench::<64, 4>::new();
    bench.init(Baud::B9600);
    assert_eq!(bench.uart.send(&[1, 2, 3, 4, 5, 6]), 4);
    assert_eq!(bench.uart.send(&[7]), 0);
}

//==================================================================================================
// Loopback
//==================================================================================================

#[test]
fn loopback_full_byte_range() {
    let data: Vec<u8> = (0..=255u8).collect();
    let mut bench = PairBench::<64, 64>::new(Baud::B115200);
    let received = pump_one_way(&mut bench, &data);
    assert_eq!(received, data);
}

#[test]
fn loopback_at_every_baud() {
    for baud in [
        Baud::B9600,
        Baud::B19200,
        Baud::B38400,
        Baud::B57600,
        Baud::B115200,
    ] {
        let mut bench = PairBench::<64, 64>::new(baud);
        let received = pump_one_way(&mut bench, b"0123456789abcdef");
        assert_eq!(received, b"0123456789abcdef", "{baud:?}");
    }
}

#[test]
fn loopback_text_message() {
    let mut bench = PairBench::<64, 64>::new(Baud::B115200);
    let received = pump_one_way(&mut bench, b"Bits of sand");
    assert_eq!(received, b"Bits of sand");
}

#[test]
fn full_duplex_streams_stay_intact() {
    let a_to_b: Vec<u8> = (0..128u8).collect();
    let b_to_a: Vec<u8> = (0..128u8).rev().collect();
    let mut bench = PairBench::<64, 64>::new(Baud::B57600);

    let mut a_queued = 0;
    let mut b_queued = 0;
    let mut at_b = Vec::new();
    let mut at_a = Vec::new();
    for _ in 0..(a_to_b.len() + 4) * 64 {
        if at_b.len() == a_to_b.len() && at_a.len() == b_to_a.len() {
            break;
        }
        if a_queued < a_to_b.len() {
            a_queued += bench.a.send(&a_to_b[a_queued..]);
        }
        if b_queued < b_to_a.len() {
            b_queued += bench.b.send(&b_to_a[b_queued..]);
        }
        bench.step();
        if bench.b.bytes_available() > 0 {
            at_b.push(bench.b.read_byte().unwrap());
        }
        if bench.a.bytes_available() > 0 {
            at_a.push(bench.a.read_byte().unwrap());
        }
    }
    assert_eq!(at_b, a_to_b);
    assert_eq!(at_a, b_to_a);
}
