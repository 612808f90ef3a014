//! I2C driver object against the simulated bus.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use periph_drivers::hal::i2c::{
    AddressBits, BusSpeed, I2cConfig, I2cErrors, I2cEvent, I2cFlags, I2cStatus, MemAddressSize,
};
use periph_drivers::peripheral::I2cDriver;
use periph_drivers::platform::sim::{SimI2c, board};
use periph_drivers::{DispatchMode, DriverError, I2cId, PeripheralDriver, declare_driver, sim_platform};

sim_platform! {
    struct TestPlatform;
}

declare_driver! {
    static I2C: I2cDriver<TestPlatform, SimI2c> =
        (&board::I2CS, [SimI2c::new(), SimI2c::new(), SimI2c::new()]);
}

const EEPROM: u16 = 0x50;
const MISSING: u16 = 0x51;
const OWN_ADDRESS: u16 = 0x30;

static SERIAL: Mutex<()> = Mutex::new(());
static EVENTS: AtomicU32 = AtomicU32::new(0);

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn record(events: I2cEvent) {
    EVENTS.fetch_or(events.bits(), Ordering::SeqCst);
}

fn take_events() -> I2cEvent {
    I2cEvent::from_bits_retain(EVENTS.swap(0, Ordering::SeqCst))
}

fn setup(id: I2cId, config: I2cConfig) -> &'static SimI2c {
    I2C.deinit(id).unwrap();
    I2C.init(id, &config).unwrap();
    I2C.start(id);
    I2C.dispatch_pending(id);
    take_events();
    I2C.backend(id)
}

fn master_config() -> I2cConfig {
    I2cConfig::new(BusSpeed::Fast).with_callback(record)
}

fn slave_config() -> I2cConfig {
    master_config().with_own_address(OWN_ADDRESS, AddressBits::Seven)
}

fn buffer(len: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; len].into_boxed_slice())
}

fn run_n(irq: i16, times: usize) {
    for _ in 0..times {
        assert!(TestPlatform::raise(irq));
    }
}

/// Service the event interrupt until the bus is released. Returns the number
/// of interrupts taken.
fn run_until_idle(id: I2cId, irq: i16) -> usize {
    for taken in 1..=64 {
        assert!(TestPlatform::raise(irq));
        if !I2C.get_status(id).contains(I2cStatus::BUSY) {
            return taken;
        }
    }
    panic!("transfer never finished");
}

#[test]
fn test_mem_write_then_read() {
    let _serial = serial();
    let backend = setup(I2cId::I2c1, master_config());
    assert!(backend.attach(EEPROM, 1));

    I2C.mem_write(I2cId::I2c1, EEPROM, 0x10, MemAddressSize::Bits8, b"hi")
        .unwrap();
    assert!(I2C.get_status(I2cId::I2c1).contains(I2cStatus::BUSY));
    // START, address, register, two data bytes, then STOP.
    assert_eq!(run_until_idle(I2cId::I2c1, board::I2C1_EV_IRQ), 6);

    assert_eq!(take_events(), I2cEvent::TRANSFER_COMPLETE);
    assert_eq!(I2C.progress(I2cId::I2c1), (2, 2));
    assert_eq!(&backend.memory(EEPROM).unwrap()[0x10..0x12], b"hi");
    assert_eq!(backend.written().bytes().collect::<Vec<_>>(), [0x10u8, b'h', b'i']);
    assert!(!I2C.is_bus_claimed(I2cId::I2c1));

    I2C.mem_read(
        I2cId::I2c1,
        EEPROM,
        0x10,
        MemAddressSize::Bits8,
        buffer(2),
    )
    .unwrap();
    run_until_idle(I2cId::I2c1, board::I2C1_EV_IRQ);

    assert_eq!(take_events(), I2cEvent::TRANSFER_COMPLETE);
    let received = I2C.take_received(I2cId::I2c1).unwrap();
    assert!(received.is_complete());
    assert_eq!(received.data(), b"hi");
}

#[test]
fn test_sixteen_bit_register_address() {
    let _serial = serial();
    let backend = setup(I2cId::I2c1, master_config());
    assert!(backend.attach(EEPROM, 2));

    I2C.mem_write(I2cId::I2c1, EEPROM, 0x0042, MemAddressSize::Bits16, b"x")
        .unwrap();
    run_until_idle(I2cId::I2c1, board::I2C1_EV_IRQ);

    assert_eq!(backend.written().bytes().collect::<Vec<_>>(), [0x00u8, 0x42, b'x']);
    assert_eq!(backend.memory(EEPROM).unwrap()[0x42], b'x');
}

#[test]
fn test_master_receive_single_byte() {
    let _serial = serial();
    let backend = setup(I2cId::I2c1, master_config());
    assert!(backend.attach(EEPROM, 1));
    backend.write_memory(EEPROM, 0, &[0xA5]);

    I2C.master_receive(I2cId::I2c1, EEPROM, buffer(1), false)
        .unwrap();
    run_until_idle(I2cId::I2c1, board::I2C1_EV_IRQ);

    assert_eq!(take_events(), I2cEvent::TRANSFER_COMPLETE);
    assert_eq!(I2C.take_received(I2cId::I2c1).unwrap().data(), [0xA5u8]);
}

#[test]
fn test_busy_while_transfer_in_flight() {
    let _serial = serial();
    let backend = setup(I2cId::I2c1, master_config());
    assert!(backend.attach(EEPROM, 1));

    I2C.master_transmit(I2cId::I2c1, EEPROM, b"abc", false).unwrap();
    assert_eq!(
        I2C.master_transmit(I2cId::I2c1, EEPROM, b"def", false),
        Err(DriverError::Busy)
    );
    assert_eq!(I2C.is_device_ready(I2cId::I2c1, EEPROM, 1), Err(DriverError::Busy));

    run_until_idle(I2cId::I2c1, board::I2C1_EV_IRQ);
    assert_eq!(backend.written().bytes().collect::<Vec<_>>(), b"abc");
}

#[test]
fn test_address_nack_ends_transfer() {
    let _serial = serial();
    let backend = setup(I2cId::I2c1, master_config());
    let stops = backend.stop_count();

    I2C.master_transmit(I2cId::I2c1, MISSING, b"abc", false).unwrap();
    run_until_idle(I2cId::I2c1, board::I2C1_EV_IRQ);

    assert_eq!(
        take_events(),
        I2cEvent::ADDRESS_NACK | I2cEvent::TRANSFER_COMPLETE | I2cEvent::TRANSFER_INCOMPLETE
    );
    assert_eq!(backend.stop_count(), stops + 1);
    assert_eq!(I2C.progress(I2cId::I2c1), (0, 3));
}

#[test]
fn test_register_address_nack_reports_address_nack() {
    let _serial = serial();
    let backend = setup(I2cId::I2c1, master_config());
    assert!(backend.attach(EEPROM, 1));

    I2C.mem_write(I2cId::I2c1, EEPROM, 0x10, MemAddressSize::Bits8, b"xy")
        .unwrap();
    // START, then the address; the register address is on the bus.
    run_n(board::I2C1_EV_IRQ, 2);
    assert_eq!(I2C.progress(I2cId::I2c1), (0, 2));
    backend.inject_flags(I2cFlags::ACK_FAILURE);
    assert!(TestPlatform::raise(board::I2C1_ER_IRQ));

    assert_eq!(
        take_events(),
        I2cEvent::ADDRESS_NACK | I2cEvent::TRANSFER_COMPLETE | I2cEvent::TRANSFER_INCOMPLETE
    );
    assert!(!I2C.get_status(I2cId::I2c1).contains(I2cStatus::BUSY));
}

#[test]
fn test_data_nack_is_not_address_nack() {
    let _serial = serial();
    let backend = setup(I2cId::I2c1, master_config());
    assert!(backend.attach(EEPROM, 1));

    I2C.master_transmit(I2cId::I2c1, EEPROM, b"ab", false).unwrap();
    run_n(board::I2C1_EV_IRQ, 3);
    assert_eq!(I2C.progress(I2cId::I2c1), (1, 2));
    backend.inject_flags(I2cFlags::ACK_FAILURE);
    assert!(TestPlatform::raise(board::I2C1_ER_IRQ));

    assert_eq!(
        take_events(),
        I2cEvent::TRANSFER_COMPLETE | I2cEvent::TRANSFER_INCOMPLETE
    );
}

#[test]
fn test_arbitration_lost_releases_without_stop() {
    let _serial = serial();
    let backend = setup(I2cId::I2c1, master_config());
    assert!(backend.attach(EEPROM, 1));
    let stops = backend.stop_count();

    I2C.master_transmit(I2cId::I2c1, EEPROM, b"abc", false).unwrap();
    assert!(TestPlatform::raise(board::I2C1_EV_IRQ));
    backend.inject_flags(I2cFlags::ARBITRATION_LOST);
    assert!(TestPlatform::raise(board::I2C1_ER_IRQ));

    assert_eq!(
        take_events(),
        I2cEvent::ARBITRATION_LOST | I2cEvent::TRANSFER_COMPLETE | I2cEvent::TRANSFER_INCOMPLETE
    );
    assert_eq!(I2C.get_error(I2cId::I2c1), I2cErrors::ARBITRATION_LOST);
    assert_eq!(backend.stop_count(), stops);
    assert!(!I2C.get_status(I2cId::I2c1).contains(I2cStatus::BUSY));

    // The next transfer starts with clean errors.
    I2C.master_transmit(I2cId::I2c1, EEPROM, b"abc", false).unwrap();
    assert_eq!(I2C.get_error(I2cId::I2c1), I2cErrors::empty());
}

#[test]
fn test_pending_transfer_keeps_bus() {
    let _serial = serial();
    let backend = setup(I2cId::I2c1, master_config());
    assert!(backend.attach(EEPROM, 1));
    let stops = backend.stop_count();

    I2C.master_transmit(I2cId::I2c1, EEPROM, &[0x20], true).unwrap();
    run_until_idle(I2cId::I2c1, board::I2C1_EV_IRQ);

    assert_eq!(take_events(), I2cEvent::TRANSFER_COMPLETE);
    assert!(I2C.is_bus_claimed(I2cId::I2c1));
    assert_eq!(backend.stop_count(), stops);

    I2C.stop(I2cId::I2c1);
    assert!(!I2C.is_bus_claimed(I2cId::I2c1));
    assert_eq!(backend.stop_count(), stops + 1);
}

#[test]
fn test_bus_error_sets_sticky_error() {
    let _serial = serial();
    let backend = setup(I2cId::I2c1, master_config());
    assert!(backend.attach(EEPROM, 1));

    I2C.master_transmit(I2cId::I2c1, EEPROM, b"ab", false).unwrap();
    run_n(board::I2C1_EV_IRQ, 3);
    backend.inject_flags(I2cFlags::BUS_ERROR);
    assert!(TestPlatform::raise(board::I2C1_ER_IRQ));

    assert_eq!(
        take_events(),
        I2cEvent::BUS_ERROR | I2cEvent::TRANSFER_COMPLETE | I2cEvent::TRANSFER_INCOMPLETE
    );
    assert_eq!(I2C.get_error(I2cId::I2c1), I2cErrors::BUS_ERROR);
    assert_eq!(I2C.progress(I2cId::I2c1), (1, 2));
}

#[test]
fn test_device_ready_probe() {
    let _serial = serial();
    let backend = setup(I2cId::I2c1, master_config());
    assert!(backend.attach(EEPROM, 1));

    assert_eq!(I2C.is_device_ready(I2cId::I2c1, EEPROM, 3), Ok(()));
    assert_eq!(I2C.is_device_ready(I2cId::I2c1, MISSING, 3), Err(DriverError::Fail));
    assert!(!I2C.get_status(I2cId::I2c1).contains(I2cStatus::BUSY));
    assert_eq!(I2C.is_device_ready(I2cId::I2c1, 0x0800, 1), Err(DriverError::Fail));
}

#[test]
fn test_device_ready_timeout_releases_bus() {
    let _serial = serial();
    let backend = setup(I2cId::I2c1, master_config());
    assert!(backend.attach(EEPROM, 1));
    let stops = backend.stop_count();

    backend.set_start_stalled(true);
    assert_eq!(
        I2C.is_device_ready(I2cId::I2c1, EEPROM, 2),
        Err(DriverError::Timeout)
    );
    // Every trial ends with a STOP, timed out or not.
    assert_eq!(backend.stop_count(), stops + 2);

    backend.set_start_stalled(false);
    assert_eq!(I2C.is_device_ready(I2cId::I2c1, EEPROM, 1), Ok(()));
}

#[test]
fn test_poll_transfers() {
    let _serial = serial();
    let backend = setup(I2cId::I2c1, master_config());
    assert!(backend.attach(EEPROM, 1));

    I2C.poll_send(I2cId::I2c1, EEPROM, &[0x20, 1, 2], 10).unwrap();
    assert_eq!(&backend.memory(EEPROM).unwrap()[0x20..0x22], &[1u8, 2]);

    I2C.poll_send(I2cId::I2c1, EEPROM, &[0x20], 10).unwrap();
    let mut data = [0u8; 2];
    I2C.poll_receive(I2cId::I2c1, EEPROM, &mut data, 10).unwrap();
    assert_eq!(data, [1u8, 2]);

    assert_eq!(
        I2C.poll_send(I2cId::I2c1, MISSING, &[0], 10),
        Err(DriverError::Fail)
    );
    assert_eq!(take_events(), I2cEvent::empty());
}

#[test]
fn test_slave_receive() {
    let _serial = serial();
    let backend = setup(I2cId::I2c2, slave_config());
    assert!(backend.is_listening());
    assert!(backend.interrupts_enabled());

    I2C.slave_receive(I2cId::I2c2, buffer(4)).unwrap();
    backend.remote_write(b"abc", false);
    run_n(board::I2C2_EV_IRQ, 3);
    assert_eq!(take_events(), I2cEvent::empty());

    backend.remote_stop();
    run_n(board::I2C2_EV_IRQ, 1);

    assert_eq!(
        take_events(),
        I2cEvent::TRANSFER_COMPLETE | I2cEvent::TRANSFER_INCOMPLETE
    );
    let received = I2C.take_received(I2cId::I2c2).unwrap();
    assert_eq!(received.data(), b"abc");
    assert!(!I2C.get_status(I2cId::I2c2).contains(I2cStatus::BUSY));
    assert!(backend.interrupts_enabled());
}

#[test]
fn test_slave_transmit() {
    let _serial = serial();
    let backend = setup(I2cId::I2c2, slave_config());

    I2C.slave_transmit(I2cId::I2c2, b"xyz").unwrap();
    backend.remote_read(3);
    run_until_idle(I2cId::I2c2, board::I2C2_EV_IRQ);

    assert_eq!(take_events(), I2cEvent::TRANSFER_COMPLETE);
    assert_eq!(backend.slave_sent().bytes().collect::<Vec<_>>(), b"xyz");
    assert_eq!(I2C.get_error(I2cId::I2c2), I2cErrors::empty());
}

#[test]
fn test_unarmed_slave_reports_direction() {
    let _serial = serial();
    let backend = setup(I2cId::I2c2, slave_config());

    backend.remote_read(1);
    run_n(board::I2C2_EV_IRQ, 1);
    assert_eq!(take_events(), I2cEvent::SLAVE_TRANSMIT);
    assert_eq!(backend.slave_sent().frames(), &[0xFFu16]);
    backend.remote_stop();
    run_n(board::I2C2_EV_IRQ, 1);

    backend.remote_write(&[], true);
    run_n(board::I2C2_EV_IRQ, 1);
    assert_eq!(take_events(), I2cEvent::SLAVE_RECEIVE | I2cEvent::GENERAL_CALL);
    assert!(I2C.get_status(I2cId::I2c2).contains(I2cStatus::GENERAL_CALL));
}

#[test]
fn test_deferred_dispatch() {
    let _serial = serial();
    let backend = setup(
        I2cId::I2c1,
        master_config().with_dispatch(DispatchMode::Deferred),
    );
    assert!(backend.attach(EEPROM, 1));

    I2C.master_transmit(I2cId::I2c1, EEPROM, b"z", false).unwrap();
    run_until_idle(I2cId::I2c1, board::I2C1_EV_IRQ);
    assert_eq!(take_events(), I2cEvent::empty());

    assert!(I2C.dispatch_pending(I2cId::I2c1));
    assert_eq!(take_events(), I2cEvent::TRANSFER_COMPLETE);
}

#[test]
fn test_invalid_requests() {
    let _serial = serial();
    I2C.deinit(I2cId::I2c3).unwrap();
    assert_eq!(
        I2C.master_transmit(I2cId::I2c3, EEPROM, b"a", false),
        Err(DriverError::Fail)
    );

    setup(I2cId::I2c3, master_config());
    assert_eq!(
        I2C.master_transmit(I2cId::I2c3, 0x0800, b"a", false),
        Err(DriverError::Fail)
    );
    assert_eq!(
        I2C.master_transmit(I2cId::I2c3, EEPROM, &[], false),
        Err(DriverError::Fail)
    );
    assert_eq!(
        I2C.init(I2cId::I2c3, &master_config().with_own_address(0x0800, AddressBits::Seven)),
        Err(DriverError::Fail)
    );

    let backend = I2C.backend(I2cId::I2c3);
    backend.fail_next_bring_up();
    assert_eq!(I2C.init(I2cId::I2c3, &master_config()), Err(DriverError::Fail));
    assert_eq!(I2C.get_status(I2cId::I2c3), I2cStatus::empty());
}
