//! Codec, framing and dispatch benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rs485_modbus::pdu::{AddressRange, WriteMultipleRegisters};
use rs485_modbus::receiver::FrameReceiver;
use rs485_modbus::{
    Checksum, Frame, FrameKind, MemoryPort, ModbusCrc, Payload, RegisterStore, StoreLayout,
    WordValues,
};

fn read_response(count: usize) -> Frame {
    let words: Vec<u16> = (0..count as u16).collect();
    Frame::new(
        1,
        Payload::ReadHoldingRegistersResponse(WordValues::from_words(&words)),
    )
}

fn benchmark_crc(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc16_modbus");
    for size in [8usize, 64, 256].iter() {
        let data: Vec<u8> = (0..*size).map(|i| i as u8).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            let mut crc = ModbusCrc::new();
            b.iter(|| crc.compute(black_box(data)))
        });
    }
    group.finish();
}

fn benchmark_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let mut crc = ModbusCrc::new();

    for count in [1usize, 16, 125].iter() {
        let mut frame = read_response(*count);
        let adu = frame.seal(&mut crc).unwrap();

        group.bench_with_input(BenchmarkId::new("encode", count), &frame, |b, frame| {
            b.iter(|| black_box(frame).to_bytes().unwrap())
        });
        group.bench_with_input(BenchmarkId::new("decode", count), &adu, |b, adu| {
            b.iter(|| Frame::decode(black_box(adu), FrameKind::Response).unwrap())
        });
    }
    group.finish();
}

fn benchmark_receiver(c: &mut Criterion) {
    let mut crc = ModbusCrc::new();
    let adu = read_response(125).seal(&mut crc).unwrap();

    c.bench_function("receiver_full_frame", |b| {
        let mut port = MemoryPort::new();
        let mut receiver = FrameReceiver::new(384, 4011);
        b.iter(|| {
            port.push_incoming(&adu);
            assert!(receiver.poll(&mut port, 0).is_none());
            black_box(receiver.poll(&mut port, 5_000))
        })
    });
}

fn benchmark_dispatch(c: &mut Criterion) {
    let mut store = RegisterStore::new(StoreLayout::uniform(256));
    let read = Frame::new(
        1,
        Payload::ReadHoldingRegisters(AddressRange::new(0, 125)),
    );
    let words: Vec<u16> = (0..123).collect();
    let write = Frame::new(
        1,
        Payload::WriteMultipleRegisters(WriteMultipleRegisters::new(0, &words).unwrap()),
    );

    let mut group = c.benchmark_group("dispatch");
    group.bench_function("read_holding_125", |b| {
        b.iter(|| store.process(black_box(&read)))
    });
    group.bench_function("write_multiple_123", |b| {
        b.iter(|| store.process(black_box(&write)))
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_crc,
    benchmark_codec,
    benchmark_receiver,
    benchmark_dispatch
);
criterion_main!(benches);
