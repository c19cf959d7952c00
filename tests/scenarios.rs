//! End-to-end master/slave exchanges over an in-memory bus

use std::cell::Cell;
use std::rc::Rc;

use rs485_modbus::pdu::{AddressRange, WriteMultipleCoils, WriteMultipleRegisters, WriteSingle};
use rs485_modbus::{
    Clock, DiagnoseCode, Event, FailType, Frame, LinkConfig, ManualClock, Master, MemoryPort, ModbusCrc,
    ModbusError, Payload, RegisterStore, Slave, StoreLayout, WritePolicy,
};

const STATION: u8 = 5;
const TICK: u64 = 500;

/// Master and slave wired back to back on a shared manual clock
struct Bus {
    clock: ManualClock,
    master: Master<MemoryPort, ManualClock>,
    slave: Slave<MemoryPort, ManualClock>,
    store: RegisterStore,
}

impl Bus {
    fn new(store: RegisterStore) -> Self {
        let (a, b) = MemoryPort::pair();
        let clock = ManualClock::new();
        let config = LinkConfig::default();
        Self {
            master: Master::with_parts(a, clock.clone(), ModbusCrc::new(), config).unwrap(),
            slave: Slave::with_parts(b, clock.clone(), ModbusCrc::new(), STATION, config).unwrap(),
            clock,
            store,
        }
    }

    /// Step both roles until the master reports an event
    fn run(&mut self) -> Event {
        for _ in 0..10_000 {
            self.clock.advance(TICK);
            self.slave.serve(&mut self.store).unwrap();
            if let Some(event) = self.master.update().unwrap() {
                return event;
            }
        }
        panic!("master produced no event");
    }

    fn request(&mut self, station: u8, payload: Payload) -> Event {
        self.master.set_request(payload);
        self.master.transmit(station).unwrap();
        self.run()
    }

    fn reply(&mut self, payload: Payload) -> Frame {
        match self.request(STATION, payload) {
            Event::Received(frame) => frame,
            other => panic!("expected a reply, got {:?}", other),
        }
    }
}

/// A slave fed raw bytes, for traffic a well-behaved master never sends
struct RawSlave {
    clock: ManualClock,
    slave: Slave<MemoryPort, ManualClock>,
    store: RegisterStore,
    events: Vec<Event>,
}

impl RawSlave {
    fn new(store: RegisterStore) -> Self {
        let clock = ManualClock::new();
        let slave = Slave::with_parts(
            MemoryPort::new(),
            clock.clone(),
            ModbusCrc::new(),
            STATION,
            LinkConfig::default(),
        )
        .unwrap();
        Self {
            clock,
            slave,
            store,
            events: Vec::new(),
        }
    }

    /// Feed `bytes` as one burst and collect whatever the slave sends back
    /// before the bus has been idle for two send-back delays
    fn exchange(&mut self, bytes: &[u8]) -> Vec<u8> {
        self.slave.transport().push_incoming(bytes);
        let ticks = 2 * self.slave.config().send_back_delay_us / TICK;
        for _ in 0..ticks {
            self.clock.advance(TICK);
            if let Some(event) = self.slave.serve(&mut self.store).unwrap() {
                self.events.push(event);
            }
            let sent = self.slave.transport().drain_outgoing();
            if !sent.is_empty() {
                return sent;
            }
        }
        Vec::new()
    }
}

fn sealed(body: &[u8]) -> Vec<u8> {
    let mut adu = body.to_vec();
    adu.extend_from_slice(&ModbusCrc::checksum(body).to_le_bytes());
    adu
}

fn uniform(size: usize) -> RegisterStore {
    RegisterStore::new(StoreLayout::uniform(size))
}

#[test]
fn read_holding_registers_reply_bytes() {
    let mut bus = Bus::new(uniform(8));
    bus.store.set_holding_register(0, 10).unwrap();
    bus.store.set_holding_register(1, 20).unwrap();

    let frame = bus.reply(Payload::ReadHoldingRegisters(AddressRange::new(0, 2)));
    assert_eq!(frame.station, STATION);
    assert_eq!(
        frame.to_bytes().unwrap(),
        sealed(&[0x05, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x14])
    );
    assert!(bus.master.available_to_transmit());
    assert!(!bus.slave.is_allowed_to_transmit());
    assert_eq!(bus.slave.stats().transmitted_frames, 1);
}

#[test]
fn write_single_coil_is_echoed_and_applied() {
    let mut bus = Bus::new(uniform(8));
    let frame = bus.reply(Payload::WriteSingleCoil(WriteSingle::coil(6, true)));
    assert_eq!(
        frame.payload,
        Payload::WriteSingleCoil(WriteSingle::new(6, 0xFF00))
    );
    assert_eq!(bus.store.coil(6), Ok(true));
}

#[test]
fn write_multiple_coils_byte_count_mismatch() {
    let mut raw = RawSlave::new(uniform(16));
    // quantity 10 needs 2 data bytes, only 1 is sent
    let reply = raw.exchange(&sealed(&[0x05, 0x0F, 0x00, 0x00, 0x00, 0x0A, 0x01, 0xFF]));
    assert_eq!(reply, sealed(&[0x05, 0x8F, 0x03]));
    assert_eq!(raw.store.coil(0), Ok(false));
}

#[test]
fn write_multiple_coils_applied() {
    let mut bus = Bus::new(uniform(16));
    let bits = [true, false, true, true, false, false, true, false, true, true];
    let request = WriteMultipleCoils::new(2, &bits).unwrap();
    let frame = bus.reply(Payload::WriteMultipleCoils(request));
    assert_eq!(
        frame.payload,
        Payload::WriteMultipleCoilsResponse(AddressRange::new(2, 10))
    );
    for (i, &bit) in bits.iter().enumerate() {
        assert_eq!(bus.store.coil(2 + i as u16), Ok(bit));
    }
}

#[test]
fn short_frame_reports_timedout_without_reply() {
    let mut raw = RawSlave::new(uniform(4));
    let reply = raw.exchange(&[0x05, 0x03, 0x00]);
    assert!(reply.is_empty());
    assert!(matches!(
        raw.events.as_slice(),
        [Event::Failed(failure)] if failure.kind == FailType::Timedout
    ));
    assert!(!raw.slave.is_allowed_to_transmit());
    assert_eq!(raw.slave.stats().failed_frames, 1);
}

#[test]
fn overflow_discards_burst_then_recovers() {
    let mut raw = RawSlave::new(uniform(4));
    let reply = raw.exchange(&[0x05; 400]);
    assert!(reply.is_empty());
    assert!(matches!(
        raw.events.first(),
        Some(Event::Failed(failure)) if failure.kind == FailType::Overflow
    ));
    assert_eq!(raw.events.len(), 1);

    raw.store.set_input_register(1, 0xBEEF).unwrap();
    let reply = raw.exchange(&sealed(&[0x05, 0x04, 0x00, 0x01, 0x00, 0x01]));
    assert_eq!(reply, sealed(&[0x05, 0x04, 0x02, 0xBE, 0xEF]));
}

#[test]
fn corrupted_crc_is_dropped() {
    let mut raw = RawSlave::new(uniform(4));
    let mut adu = sealed(&[0x05, 0x06, 0x00, 0x01, 0x00, 0x07]);
    let last = adu.len() - 1;
    adu[last] ^= 0x01;
    assert!(raw.exchange(&adu).is_empty());
    assert!(matches!(
        raw.events.as_slice(),
        [Event::Failed(failure)] if failure.kind == FailType::VerifyFailed
    ));
    assert_eq!(raw.store.holding_register(1), Ok(0));
}

#[test]
fn unsupported_function_gets_exception() {
    let mut raw = RawSlave::new(uniform(4));
    let reply = raw.exchange(&sealed(&[0x05, 0x2B, 0x0E, 0x01]));
    assert_eq!(reply, sealed(&[0x05, 0xAB, 0x01]));
}

#[test]
fn other_station_and_broadcast_get_no_reply() {
    let mut raw = RawSlave::new(uniform(4));
    assert!(raw
        .exchange(&sealed(&[0x06, 0x06, 0x00, 0x01, 0x00, 0x07]))
        .is_empty());
    assert_eq!(raw.store.holding_register(1), Ok(0));

    assert!(raw
        .exchange(&sealed(&[0x00, 0x06, 0x00, 0x01, 0x00, 0x07]))
        .is_empty());
    assert_eq!(raw.store.holding_register(1), Ok(7));
    assert_eq!(raw.slave.stats().transmitted_frames, 0);
}

#[test]
fn master_times_out_on_silent_station() {
    let mut bus = Bus::new(uniform(4));
    let started = bus.clock.now_micros();
    match bus.request(STATION + 1, Payload::ReadCoils(AddressRange::new(0, 1))) {
        Event::Failed(failure) => {
            assert_eq!(failure.kind, FailType::Timedout);
            assert_eq!(failure.station, Some(STATION + 1));
            assert_eq!(failure.function, Some(0x01));
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert!(bus.clock.now_micros() - started > bus.master.config().response_timeout_us);
    assert!(bus.master.available_to_transmit());
    assert_eq!(bus.master.stats().failed_frames, 1);
}

#[test]
fn exception_reply_surfaces_in_process_response() {
    let mut bus = Bus::new(uniform(4));
    let frame = bus.reply(Payload::ReadHoldingRegisters(AddressRange::new(3, 2)));
    assert_eq!(frame.function_code(), 0x83);

    let mut local = uniform(4);
    assert_eq!(
        local.process_response(&frame, bus.master.request()),
        Err(ModbusError::Exception {
            function: 0x03,
            code: DiagnoseCode::InvalidDataAddress,
        })
    );
}

#[test]
fn read_replies_are_mirrored_locally() {
    let mut bus = Bus::new(uniform(8));
    for address in 0..4u16 {
        bus.store.set_input_register(address, 0x100 + address).unwrap();
    }
    bus.store.set_discrete_input(5, true).unwrap();

    let mut local = uniform(8);
    let frame = bus.reply(Payload::ReadInputRegisters(AddressRange::new(1, 3)));
    local.process_response(&frame, bus.master.request()).unwrap();
    assert_eq!(local.input_register(0), Ok(0));
    assert_eq!(local.input_register(1), Ok(0x101));
    assert_eq!(local.input_register(3), Ok(0x103));

    let frame = bus.reply(Payload::ReadDiscreteInputs(AddressRange::new(0, 8)));
    local.process_response(&frame, bus.master.request()).unwrap();
    assert_eq!(local.discrete_input(5), Ok(true));
    assert_eq!(local.discrete_input(4), Ok(false));

    let frame = bus.reply(Payload::WriteMultipleRegisters(
        WriteMultipleRegisters::new(6, &[0xAAAA, 0x5555]).unwrap(),
    ));
    local.process_response(&frame, bus.master.request()).unwrap();
    assert_eq!(local.holding_register(6), Ok(0xAAAA));
    assert_eq!(local.holding_register(7), Ok(0x5555));
    assert_eq!(bus.store.holding_register(7), Ok(0x5555));
}

#[test]
fn bound_cells_and_hooks_follow_the_bus() {
    let setpoint = Rc::new(Cell::new(40u16));
    let writes = Rc::new(Cell::new(0u32));
    let mut store = RegisterStore::new(StoreLayout::uniform(4).with_holding_registers(2, 2));
    store.holding_registers_mut().bind(1, &setpoint).unwrap();
    let counter = writes.clone();
    store
        .holding_registers_mut()
        .on_write(move |_, _, _| counter.set(counter.get() + 1));
    store.holding_registers_mut().on_read(|_, value| value * 2);

    let mut bus = Bus::new(store);
    let frame = bus.reply(Payload::ReadHoldingRegisters(AddressRange::new(1, 1)));
    assert_eq!(frame.payload.register(0), Ok(80));

    bus.reply(Payload::WriteSingleRegister(WriteSingle::new(1, 55)));
    assert_eq!(setpoint.get(), 55);
    assert_eq!(writes.get(), 1);

    // address 0 was never bound
    let frame = bus.reply(Payload::ReadHoldingRegisters(AddressRange::new(0, 2)));
    assert_eq!(frame.function_code(), 0x83);
}

#[test]
fn all_or_nothing_policy_rejects_partial_writes() {
    let bound = Rc::new(Cell::new(0u16));
    let layout = StoreLayout::uniform(4).with_holding_registers(2, 2);
    let mut store = RegisterStore::new(layout).with_write_policy(WritePolicy::AllOrNothing);
    // address 1 stays unbound
    store.holding_registers_mut().bind(0, &bound).unwrap();
    let mut bus = Bus::new(store);

    let frame = bus.reply(Payload::WriteMultipleRegisters(
        WriteMultipleRegisters::new(0, &[1, 2]).unwrap(),
    ));
    assert_eq!(
        frame.payload,
        Payload::diagnose(0x10, DiagnoseCode::InvalidDataAddress)
    );
    assert_eq!(bound.get(), 0);

    bus.store.set_write_policy(WritePolicy::Partial);
    let frame = bus.reply(Payload::WriteMultipleRegisters(
        WriteMultipleRegisters::new(0, &[1, 2]).unwrap(),
    ));
    assert!(frame.payload.is_diagnose());
    assert_eq!(bound.get(), 1);
}
