//! RS-485 Modbus Demo
//!
//! Runs a master and a slave against each other over an in-memory bus:
//! - Stepped poll loop on a manual clock (framing, transmit gating, hex dumps)
//! - Register store with a bound cell and a write hook
//! - Exception replies and the response timeout
//! - The async driver on the system clock
//!
//! Usage: cargo run --bin demo [baud_rate]
//! Example: cargo run --bin demo 19200

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use rs485_modbus::driver::{request, run_slave};
use rs485_modbus::frame::format_hex_packet;
use rs485_modbus::pdu::{AddressRange, WriteMultipleRegisters, WriteSingle};
use rs485_modbus::{
    Event, LinkConfig, ManualClock, Master, MemoryPort, ModbusCrc, Payload, RegisterStore, Slave,
    StoreLayout,
};
use tokio::sync::watch;

const SLAVE_STATION: u8 = 5;

type SteppedMaster = Master<MemoryPort, ManualClock>;
type SteppedSlave = Slave<MemoryPort, ManualClock>;

/// Advance the shared clock in 1 ms steps until the master reports an event
fn exchange(
    clock: &ManualClock,
    master: &mut SteppedMaster,
    slave: &mut SteppedSlave,
    store: &mut RegisterStore,
) -> Result<Event, Box<dyn std::error::Error>> {
    loop {
        clock.advance(1_000);
        slave.serve(store)?;
        if let Some(event) = master.update()? {
            return Ok(event);
        }
    }
}

fn describe(event: &Event) {
    match event {
        Event::Received(frame) => {
            let bytes = frame.to_bytes().unwrap_or_default();
            println!("    <- station {}: {}", frame.station, format_hex_packet(&bytes));
            println!("       {:?}", frame.payload);
        }
        Event::Failed(failure) => {
            println!(
                "    <- failed: {} (station={:?}, fc={:?})",
                failure.kind, failure.station, failure.function
            );
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let baud_rate = std::env::args()
        .nth(1)
        .map(|arg| arg.parse::<u32>())
        .transpose()?
        .unwrap_or(9600);
    let config = LinkConfig::new(baud_rate);

    println!("🚀 RS-485 Modbus v{} Demo", rs485_modbus::VERSION);
    println!("=============================");
    println!(
        "  {} baud: silence {}us, send-back delay {}us, response timeout {}us\n",
        config.baud_rate, config.silence_us, config.send_back_delay_us, config.response_timeout_us
    );

    // =========================================================================
    // Part 1: Register store
    // =========================================================================
    println!("📦 Part 1: Register Store");
    println!("-------------------------");

    let temperature = Rc::new(Cell::new(215u16));
    let mut store = RegisterStore::new(StoreLayout::uniform(16).with_input_registers(1, 15));
    store.input_registers_mut().bind(0, &temperature)?;
    store.holding_registers_mut().on_write(|address, old, new| {
        println!("    hook: holding[{}] {} -> {}", address, old, new);
    });
    for address in 0..4u16 {
        store.set_holding_register(address, address * 100).ok();
    }
    println!("  Input register 0 bound to a cell holding {}", temperature.get());
    println!("  Holding registers 0..4 preset to 0, 100, 200, 300");

    // =========================================================================
    // Part 2: Stepped exchange on a manual clock
    // =========================================================================
    println!("\n🔄 Part 2: Stepped Master/Slave Exchange");
    println!("-----------------------------------------");

    let (master_port, slave_port) = MemoryPort::pair();
    let clock = ManualClock::new();
    let mut master = Master::with_parts(master_port, clock.clone(), ModbusCrc::new(), config)?;
    let mut slave = Slave::with_parts(slave_port, clock.clone(), ModbusCrc::new(), SLAVE_STATION, config)?;

    let requests = [
        Payload::ReadInputRegisters(AddressRange::new(0, 2)),
        Payload::ReadHoldingRegisters(AddressRange::new(0, 4)),
        Payload::WriteSingleCoil(WriteSingle::coil(3, true)),
        Payload::WriteMultipleRegisters(WriteMultipleRegisters::new(1, &[0x1234, 0xABCD])?),
        Payload::ReadCoils(AddressRange::new(0, 8)),
    ];
    for payload in requests {
        master.set_request(payload);
        master.transmit(SLAVE_STATION)?;
        let sent = master.request().to_bytes()?;
        println!("    -> station {}: {}", SLAVE_STATION, format_hex_packet(&sent));
        let event = exchange(&clock, &mut master, &mut slave, &mut store)?;
        describe(&event);
        if let Event::Received(frame) = &event {
            store.process_response(frame, master.request())?;
        }
    }

    temperature.set(230);
    println!("  Cell updated to {}", temperature.get());
    master.set_request(Payload::ReadInputRegisters(AddressRange::new(0, 1)));
    master.transmit(SLAVE_STATION)?;
    describe(&exchange(&clock, &mut master, &mut slave, &mut store)?);

    // =========================================================================
    // Part 3: Failures
    // =========================================================================
    println!("\n⚠️  Part 3: Exceptions and Timeouts");
    println!("-----------------------------------");

    println!("  Reading past the end of the coil bank:");
    master.set_request(Payload::ReadCoils(AddressRange::new(10, 10)));
    master.transmit(SLAVE_STATION)?;
    describe(&exchange(&clock, &mut master, &mut slave, &mut store)?);

    println!("  Addressing a station nobody answers for:");
    master.set_request(Payload::ReadHoldingRegisters(AddressRange::new(0, 1)));
    master.transmit(SLAVE_STATION + 1)?;
    describe(&exchange(&clock, &mut master, &mut slave, &mut store)?);

    let stats = master.stats();
    println!(
        "  Master stats: {} received, {} failed, {} sent ({:.1}% failure rate)",
        stats.total_frames,
        stats.failed_frames,
        stats.transmitted_frames,
        stats.failure_rate() * 100.0
    );

    // =========================================================================
    // Part 4: Async driver
    // =========================================================================
    println!("\n⏱️  Part 4: Async Driver (system clock)");
    println!("--------------------------------------");

    let fast = LinkConfig::new(115_200).with_send_back_delay(2_000);
    let (master_port, slave_port) = MemoryPort::pair();
    let mut master = Master::new(master_port, fast)?;
    let mut slave = Slave::new(slave_port, SLAVE_STATION, fast)?;
    let tick = Duration::from_millis(1);

    let (stop, stopped) = watch::channel(false);
    let server = run_slave(&mut slave, &mut store, tick, stopped);
    let client = async {
        let reply = request(
            &mut master,
            SLAVE_STATION,
            Payload::ReadHoldingRegisters(AddressRange::new(0, 4)),
            tick,
        )
        .await;
        stop.send(true).ok();
        reply
    };
    let (served, reply) = tokio::join!(server, client);
    match reply {
        Ok(frame) => println!("    reply: {:?}", frame.payload),
        Err(e) => println!("    request failed: {}", e),
    }
    let served = served?;
    println!(
        "  Slave served {} frame(s), sent {}",
        served.total_frames, served.transmitted_frames
    );

    println!("\n🎉 Demo completed!");
    Ok(())
}
