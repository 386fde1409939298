//! linsniff — passive LIN bus sniffer firmware
//!
//! Times the LIN RXD line with a GPIO edge interrupt to find break fields,
//! then reads the frame bytes with a UART. Decoded frames are streamed as
//! NDJSON over the console, which also accepts host commands.
//!
//! The main loop never yields: it polls host commands, then runs one
//! acquisition cycle, which spins until the edge interrupt reports a break.

#![no_std]
#![no_main]

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use critical_section::Mutex;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Event, Input, InputConfig, Io, Pull};
use esp_hal::time::Instant;
use esp_hal::uart::{Config as UartConfig, RxConfig, Uart, UartInterrupt};
use esp_hal::{handler, ram, Blocking};
use heapless::Deque;

use linsniff::capture::{self, LinUart};
use linsniff::comm::{self, LineReader, MessageSink, ReportConfig};
use linsniff::protocol::{HostCommand, VERSION};
use linsniff::{board, BusLine, BusMonitor, CycleOutcome, EdgeAction, MicrosClock, Sniffer};

#[cfg(not(any(feature = "board-xiao", feature = "board-devkitc")))]
compile_error!("firmware needs a board: build with --features xiao or --features devkitc");

#[cfg(feature = "board-devkitc")]
type LinRxPin = esp_hal::peripherals::GPIO16<'static>;
#[cfg(feature = "board-xiao")]
type LinRxPin = esp_hal::peripherals::GPIO2<'static>;

// ── Static shared state ──────────────────────────────────────────────

/// Bus state shared between the edge interrupt and the main loop
static MONITOR: BusMonitor = BusMonitor::new();

/// LIN RXD as a GPIO input — owned by the edge interrupt handler
static LIN_EDGE: Mutex<RefCell<Option<Input<'static>>>> = Mutex::new(RefCell::new(None));

/// Console UART and its line assembler — owned by the console interrupt
static CONSOLE: Mutex<RefCell<Option<Console>>> = Mutex::new(RefCell::new(None));

/// Host commands parsed in interrupt context, applied by the main loop
static COMMANDS: Mutex<RefCell<Deque<HostCommand, 4>>> = Mutex::new(RefCell::new(Deque::new()));

/// Commands lost to a full queue, reported from the main loop
static DROPPED_COMMANDS: AtomicU32 = AtomicU32::new(0);

struct Console {
    uart: Uart<'static, Blocking>,
    reader: LineReader,
}

// ── Hardware capabilities for the engine ─────────────────────────────

struct SystemClock;

impl MicrosClock for SystemClock {
    fn now_us(&self) -> u32 {
        // Truncation gives the wrapping 32-bit counter the engine expects
        Instant::now().duration_since_epoch().as_micros() as u32
    }
}

/// Both-edges interrupt on LIN RXD.
struct EdgeLine;

impl BusLine for EdgeLine {
    fn arm(&mut self) {
        critical_section::with(|cs| {
            if let Some(pin) = LIN_EDGE.borrow_ref_mut(cs).as_mut() {
                pin.clear_interrupt();
                pin.listen(Event::AnyEdge);
            }
        });
    }

    fn disarm(&mut self) {
        critical_section::with(|cs| {
            if let Some(pin) = LIN_EDGE.borrow_ref_mut(cs).as_mut() {
                pin.unlisten();
            }
        });
    }
}

/// LIN UART receiver.
///
/// The driver only offers non-blocking reads, so `available()` drains the
/// FIFO into a stash and counts everything that was pending.
struct LinPort {
    uart: Uart<'static, Blocking>,
    stash: heapless::Vec<u8, 16>,
    bit_rate: u32,
}

impl LinPort {
    fn drain(&mut self, stash: bool) -> usize {
        let Self { uart, stash: kept, .. } = self;
        capture::drain_fifo(
            |buf| uart.read_buffered(buf),
            |chunk| {
                if stash {
                    for &byte in chunk {
                        let _ = kept.push(byte);
                    }
                }
            },
        )
    }

    fn discard(&mut self) {
        self.drain(false);
        self.stash.clear();
    }
}

impl LinUart for LinPort {
    fn enable(&mut self, bit_rate: u32) {
        if bit_rate != self.bit_rate {
            let config = UartConfig::default().with_baudrate(bit_rate);
            match self.uart.apply_config(&config) {
                Ok(()) => self.bit_rate = bit_rate,
                Err(e) => log::error!("LIN UART config failed: {:?}", e),
            }
        }
        // Drop the break byte and anything older
        self.discard();
    }

    fn available(&mut self) -> usize {
        self.stash.len() + self.drain(true)
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.stash.len());
        buf[..n].copy_from_slice(&self.stash[..n]);
        n
    }

    fn disable(&mut self) {
        self.discard();
    }
}

// ── Interrupt handlers ───────────────────────────────────────────────

/// GPIO interrupt — break detector.
#[handler]
#[ram]
fn lin_edge_handler() {
    critical_section::with(|cs| {
        if let Some(pin) = LIN_EDGE.borrow_ref_mut(cs).as_mut() {
            if !pin.is_interrupt_set() {
                return;
            }
            pin.clear_interrupt();
            if MONITOR.on_edge(pin, &SystemClock) == EdgeAction::Disarm {
                pin.unlisten();
            }
        }
    });
}

/// Console RX interrupt — assembles NDJSON command lines.
///
/// A stop command halts the bus monitor right here so a main loop spinning
/// on a silent bus is released.
#[handler]
fn console_handler() {
    critical_section::with(|cs| {
        let mut console = CONSOLE.borrow_ref_mut(cs);
        let Some(console) = console.as_mut() else {
            return;
        };

        let mut chunk = [0u8; 16];
        while let Ok(n) = console.uart.read_buffered(&mut chunk) {
            if n == 0 {
                break;
            }
            for &byte in &chunk[..n] {
                let Some(cmd) = console.reader.feed(byte).and_then(comm::parse_command) else {
                    continue;
                };
                if cmd == HostCommand::Stop {
                    MONITOR.halt();
                    if let Some(pin) = LIN_EDGE.borrow_ref_mut(cs).as_mut() {
                        pin.unlisten();
                    }
                }
                if COMMANDS.borrow_ref_mut(cs).push_back(cmd).is_err() {
                    DROPPED_COMMANDS.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        console
            .uart
            .clear_interrupts(UartInterrupt::RxFifoFull.into());
    });
}

fn next_command() -> Option<HostCommand> {
    critical_section::with(|cs| COMMANDS.borrow_ref_mut(cs).pop_front())
}

// ── Entry point ──────────────────────────────────────────────────────

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    log::info!("linsniff v{} starting on {}", VERSION, board::BOARD_NAME);

    // The edge input and the UART receiver listen on the same pin.
    #[cfg(feature = "board-devkitc")]
    let (edge_pin, uart_pin): (LinRxPin, LinRxPin) = (
        peripherals.GPIO16,
        // SAFETY: both users only sample the pin; neither drives it.
        unsafe { esp_hal::peripherals::GPIO16::steal() },
    );
    #[cfg(feature = "board-xiao")]
    let (edge_pin, uart_pin): (LinRxPin, LinRxPin) = (
        peripherals.GPIO2,
        // SAFETY: both users only sample the pin; neither drives it.
        unsafe { esp_hal::peripherals::GPIO2::steal() },
    );

    #[cfg(feature = "board-devkitc")]
    let (console_rx, console_tx) = (peripherals.GPIO3, peripherals.GPIO1);
    #[cfg(feature = "board-xiao")]
    let (console_rx, console_tx) = (peripherals.GPIO44, peripherals.GPIO43);

    // ── Break detector input ───────────────────────────────────────────

    let mut io = Io::new(peripherals.IO_MUX);
    io.set_interrupt_handler(lin_edge_handler);

    let edge = Input::new(edge_pin, InputConfig::default().with_pull(Pull::Up));
    critical_section::with(|cs| {
        LIN_EDGE.borrow_ref_mut(cs).replace(edge);
    });

    // ── LIN UART ───────────────────────────────────────────────────────

    let lin_uart = Uart::new(
        peripherals.UART1,
        UartConfig::default().with_baudrate(board::DEFAULT_BIT_RATE),
    )
    .expect("LIN UART init failed")
    .with_rx(uart_pin);

    let port = LinPort {
        uart: lin_uart,
        stash: heapless::Vec::new(),
        bit_rate: board::DEFAULT_BIT_RATE,
    };

    log::info!("LIN RX on GPIO{}", board::LIN_RX_PIN);

    // ── Console ────────────────────────────────────────────────────────

    let mut console_uart = Uart::new(
        peripherals.UART0,
        UartConfig::default()
            .with_baudrate(comm::SERIAL_BAUD)
            .with_rx(RxConfig::default().with_fifo_full_threshold(1)),
    )
    .expect("Console UART init failed")
    .with_rx(console_rx)
    .with_tx(console_tx);
    console_uart.set_interrupt_handler(console_handler);
    console_uart.listen(UartInterrupt::RxFifoFull);
    critical_section::with(|cs| {
        CONSOLE.borrow_ref_mut(cs).replace(Console {
            uart: console_uart,
            reader: LineReader::new(),
        });
    });

    log::info!(
        "Console on GPIO{}/GPIO{} at {} baud",
        board::CONSOLE_RX_PIN,
        board::CONSOLE_TX_PIN,
        comm::SERIAL_BAUD
    );

    // ── Engine ─────────────────────────────────────────────────────────

    let mut sink = MessageSink::new(ReportConfig::new(), |line: &[u8]| {
        if let Ok(s) = core::str::from_utf8(line) {
            esp_println::print!("{}", s);
        }
    });

    let mut sniffer = Sniffer::new(&MONITOR, EdgeLine, port, Delay::new());
    sniffer.start();

    let idle = Delay::new();
    loop {
        let dropped = DROPPED_COMMANDS.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            log::warn!("Command queue full, dropped {} host commands", dropped);
        }
        while let Some(cmd) = next_command() {
            if let Some(reply) = comm::handle_command(cmd, &mut sniffer, &mut sink.config) {
                sink.send(&reply);
            }
        }

        if sniffer.run_cycle(&mut sink) == CycleOutcome::Idle {
            // Stopped — only host commands can change that
            idle.delay_millis(10);
        }
    }
}
