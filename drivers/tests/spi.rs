//! SPI driver object against the simulated bus.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use periph_drivers::hal::spi::{SpiConfig, SpiErrors, SpiEvent, SpiFlags, SpiStatus};
use periph_drivers::peripheral::SpiDriver;
use periph_drivers::platform::sim::{SimSpi, board};
use periph_drivers::{
    AsyncTransfer, BlockingTransfer, DriverError, PeripheralDriver, SpiId, declare_driver,
    sim_platform,
};

sim_platform! {
    struct TestPlatform;
}

declare_driver! {
    static SPI: SpiDriver<TestPlatform, SimSpi> =
        (&board::SPIS, [SimSpi::new(), SimSpi::new(), SimSpi::new()]);
}

static SERIAL: Mutex<()> = Mutex::new(());
static EVENTS: AtomicU32 = AtomicU32::new(0);

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn record(events: SpiEvent) {
    EVENTS.fetch_or(events.bits(), Ordering::SeqCst);
}

fn take_events() -> SpiEvent {
    SpiEvent::from_bits_retain(EVENTS.swap(0, Ordering::SeqCst))
}

fn setup(config: SpiConfig) -> &'static SimSpi {
    SPI.deinit(SpiId::Spi1).unwrap();
    SPI.init(SpiId::Spi1, &config).unwrap();
    SPI.start(SpiId::Spi1);
    take_events();
    SPI.backend(SpiId::Spi1)
}

fn config() -> SpiConfig {
    SpiConfig::master(1_000_000).with_callback(record)
}

fn buffer(len: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; len].into_boxed_slice())
}

fn raise(times: usize) {
    for _ in 0..times {
        assert!(TestPlatform::raise(board::SPI1_IRQ));
    }
}

#[test]
fn test_full_duplex_transfer() {
    let _serial = serial();
    let backend = setup(config());
    backend.respond_with(&[1, 2, 3]);

    SPI.transfer(SpiId::Spi1, b"abc", buffer(3)).unwrap();
    assert_eq!(
        SPI.transfer(SpiId::Spi1, b"abc", buffer(3)),
        Err(DriverError::Busy)
    );

    raise(3);
    assert_eq!(take_events(), SpiEvent::empty());
    assert_eq!(SPI.progress(SpiId::Spi1), (2, 3));

    raise(1);
    assert_eq!(take_events(), SpiEvent::TRANSFER_COMPLETE);
    assert!(!SPI.get_status(SpiId::Spi1).contains(SpiStatus::BUSY));
    assert_eq!(backend.sent().bytes().collect::<Vec<_>>(), b"abc");
    assert_eq!(SPI.take_received(SpiId::Spi1).unwrap().data(), [1u8, 2, 3]);
}

#[test]
fn test_send_discards_replies() {
    let _serial = serial();
    let backend = setup(config());

    SPI.send(SpiId::Spi1, b"hi").unwrap();
    raise(3);

    assert_eq!(take_events(), SpiEvent::TRANSFER_COMPLETE);
    assert_eq!(backend.sent().bytes().collect::<Vec<_>>(), b"hi");
    assert!(SPI.take_received(SpiId::Spi1).is_none());
}

#[test]
fn test_receive_clocks_dummy_frames() {
    let _serial = serial();
    let backend = setup(config());
    backend.respond_with(&[0x10, 0x20]);

    SPI.receive(SpiId::Spi1, buffer(2)).unwrap();
    raise(3);

    assert_eq!(take_events(), SpiEvent::TRANSFER_COMPLETE);
    assert_eq!(backend.sent().frames(), &[0xFFu16, 0xFF]);
    assert_eq!(SPI.take_received(SpiId::Spi1).unwrap().data(), [0x10u8, 0x20]);
}

#[test]
fn test_wide_frames() {
    let _serial = serial();
    let backend = setup(config().with_data_size(16));
    backend.respond_with(&[0xBEEF]);

    SPI.transfer(SpiId::Spi1, &[0x34, 0x12], buffer(2)).unwrap();
    raise(2);

    assert_eq!(take_events(), SpiEvent::TRANSFER_COMPLETE);
    assert_eq!(backend.sent().frames(), &[0x1234u16]);
    assert_eq!(SPI.take_received(SpiId::Spi1).unwrap().data(), [0xEFu8, 0xBE]);

    // Half a frame cannot be moved.
    assert_eq!(SPI.send(SpiId::Spi1, b"odd"), Err(DriverError::Fail));
}

#[test]
fn test_overrun_aborts_transfer() {
    let _serial = serial();
    let backend = setup(config());

    SPI.transfer(SpiId::Spi1, b"abcd", buffer(4)).unwrap();
    raise(2);
    backend.inject_flags(SpiFlags::OVERRUN);
    raise(1);

    assert_eq!(take_events(), SpiEvent::DATA_LOST);
    assert_eq!(SPI.get_error(SpiId::Spi1), SpiErrors::DATA_LOST);
    assert!(!SPI.get_status(SpiId::Spi1).contains(SpiStatus::BUSY));
    assert_eq!(SPI.progress(SpiId::Spi1), (1, 4));

    let received = SPI.take_received(SpiId::Spi1).unwrap();
    assert!(!received.is_complete());

    // Sticky until the next transfer starts.
    assert_eq!(SPI.get_error(SpiId::Spi1), SpiErrors::DATA_LOST);
    SPI.send(SpiId::Spi1, b"x").unwrap();
    assert_eq!(SPI.get_error(SpiId::Spi1), SpiErrors::empty());
}

#[test]
fn test_mode_fault_while_idle() {
    let _serial = serial();
    let backend = setup(config());

    backend.inject_flags(SpiFlags::MODE_FAULT);
    raise(1);

    assert_eq!(take_events(), SpiEvent::MODE_FAULT);
    assert_eq!(SPI.get_error(SpiId::Spi1), SpiErrors::MODE_FAULT);
}

#[test]
fn test_polled_transfers() {
    let _serial = serial();
    let backend = setup(config());
    backend.respond_with(&[7, 8]);

    let mut reply = [0u8; 2];
    SPI.poll_transfer(SpiId::Spi1, b"ab", &mut reply, 10).unwrap();
    assert_eq!(reply, [7u8, 8]);

    SPI.poll_send(SpiId::Spi1, b"cd", 10).unwrap();
    assert_eq!(backend.sent().bytes().collect::<Vec<_>>(), b"abcd");

    let mut loopback = [0u8; 1];
    SPI.poll_receive(SpiId::Spi1, &mut loopback, 10).unwrap();
    assert_eq!(loopback, [0xFFu8]);

    assert_eq!(
        SPI.poll_transfer(SpiId::Spi1, b"ab", &mut [0u8; 3], 10),
        Err(DriverError::Fail)
    );
    assert_eq!(take_events(), SpiEvent::empty());
}

#[test]
fn test_polled_overrun() {
    let _serial = serial();
    let backend = setup(config());

    backend.inject_flags(SpiFlags::OVERRUN);
    assert_eq!(SPI.poll_send(SpiId::Spi1, b"a", 10), Err(DriverError::Fail));
    assert_eq!(SPI.get_error(SpiId::Spi1), SpiErrors::DATA_LOST);
}

#[test]
fn test_stop_aborts_transfer() {
    let _serial = serial();
    let backend = setup(config());

    SPI.receive(SpiId::Spi1, buffer(4)).unwrap();
    raise(2);
    SPI.stop(SpiId::Spi1);

    assert!(!backend.is_enabled());
    assert_eq!(SPI.get_status(SpiId::Spi1), SpiStatus::INITIALIZED);
    assert_eq!(take_events(), SpiEvent::empty());
    assert_eq!(SPI.take_received(SpiId::Spi1).unwrap().len(), 1);
}

#[test]
fn test_rejected_configuration() {
    let _serial = serial();
    SPI.deinit(SpiId::Spi2).unwrap();

    assert_eq!(
        SPI.init(SpiId::Spi2, &config().with_data_size(17)),
        Err(DriverError::Fail)
    );
    SPI.backend(SpiId::Spi2).fail_next_bring_up();
    assert_eq!(SPI.init(SpiId::Spi2, &config()), Err(DriverError::Fail));
    assert_eq!(SPI.get_status(SpiId::Spi2), SpiStatus::empty());
    assert_eq!(SPI.send(SpiId::Spi2, b"a"), Err(DriverError::Fail));
}
