//! USART driver object against the simulated board.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use periph_drivers::hal::dma::Direction;
use periph_drivers::hal::interrupt::InterruptController;
use periph_drivers::hal::usart::{
    UsartConfig, UsartErrors, UsartEvent, UsartFlags, UsartStatus,
};
use periph_drivers::irq::VectorBase;
use periph_drivers::peripheral::UsartDriver;
use periph_drivers::platform::sim::{SimUsart, board};
use periph_drivers::{
    AsyncTransfer, BlockingTransfer, DispatchMode, DriverError, PeripheralDriver, UsartId,
    declare_driver, sim_platform,
};

sim_platform! {
    struct TestPlatform;
}

declare_driver! {
    static USART: UsartDriver<TestPlatform, SimUsart> =
        (&board::USARTS, [SimUsart::new(), SimUsart::new(), SimUsart::new()]);
}

static SERIAL: Mutex<()> = Mutex::new(());

static EVENTS: AtomicU32 = AtomicU32::new(0);
static SENT_AT_CALLBACK: AtomicUsize = AtomicUsize::new(0);
/// USART2 status seen by the last completion callback.
static STATUS_AT_CALLBACK: AtomicU32 = AtomicU32::new(u32::MAX);

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn record(events: UsartEvent) {
    EVENTS.fetch_or(events.bits(), Ordering::SeqCst);
    if events.contains(UsartEvent::SEND_COMPLETE) {
        let (sent, _) = USART.progress(UsartId::Usart2, Direction::Tx);
        SENT_AT_CALLBACK.store(sent, Ordering::SeqCst);
    }
    if events.intersects(UsartEvent::SEND_COMPLETE | UsartEvent::RECEIVE_COMPLETE) {
        let status = USART.get_status(UsartId::Usart2);
        STATUS_AT_CALLBACK.store(status.bits(), Ordering::SeqCst);
    }
}

fn status_at_callback() -> UsartStatus {
    UsartStatus::from_bits_retain(STATUS_AT_CALLBACK.load(Ordering::SeqCst))
}

fn take_events() -> UsartEvent {
    UsartEvent::from_bits_retain(EVENTS.swap(0, Ordering::SeqCst))
}

fn setup(id: UsartId, config: UsartConfig) {
    USART.deinit(id).unwrap();
    USART.init(id, &config).unwrap();
    USART.start(id);
    USART.dispatch_pending(id);
    take_events();
    STATUS_AT_CALLBACK.store(u32::MAX, Ordering::SeqCst);
}

fn default_config() -> UsartConfig {
    UsartConfig::new_8n1(115_200).with_callback(record)
}

fn buffer(len: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; len].into_boxed_slice())
}

fn raise(irq: i16, times: usize) {
    for _ in 0..times {
        assert!(TestPlatform::raise(irq));
    }
}

#[test]
fn test_init_reports_initialized() {
    let _serial = serial();
    USART.deinit(UsartId::Usart2).unwrap();
    take_events();

    USART.init(UsartId::Usart2, &default_config()).unwrap();

    assert_eq!(take_events(), UsartEvent::INITIALIZED);
    assert_eq!(USART.get_status(UsartId::Usart2), UsartStatus::INITIALIZED);
    assert!(
        TestPlatform::core()
            .nvic()
            .is_enabled(board::USART2_IRQ)
            .unwrap()
    );
    assert_eq!(USART.backend(UsartId::Usart2).config().unwrap().baud_rate, 115_200);
}

#[test]
fn test_vector_table_relocates_once() {
    let _serial = serial();
    setup(UsartId::Usart1, default_config());
    setup(UsartId::Usart2, default_config());
    setup(UsartId::Usart2, default_config());

    let vectors = TestPlatform::core().vectors();
    assert!(vectors.is_relocated());
    assert_eq!(vectors.base().writes(), 1);
    assert_ne!(vectors.base().read(), vectors.base().boot_table());
}

#[test]
fn test_send_completes_from_interrupts() {
    let _serial = serial();
    setup(UsartId::Usart2, default_config());
    let backend = USART.backend(UsartId::Usart2);

    USART.send(UsartId::Usart2, b"Hello").unwrap();
    assert!(USART.get_status(UsartId::Usart2).contains(UsartStatus::TX_BUSY));

    raise(board::USART2_IRQ, 4);
    assert_eq!(take_events(), UsartEvent::empty());
    assert_eq!(USART.progress(UsartId::Usart2, Direction::Tx), (4, 5));

    raise(board::USART2_IRQ, 1);
    assert!(take_events().contains(UsartEvent::SEND_COMPLETE));
    assert_eq!(SENT_AT_CALLBACK.load(Ordering::SeqCst), 5);
    assert!(!status_at_callback().contains(UsartStatus::TX_BUSY));
    assert!(!USART.get_status(UsartId::Usart2).contains(UsartStatus::TX_BUSY));
    assert_eq!(backend.transmitted().bytes().collect::<Vec<_>>(), b"Hello");

    raise(board::USART2_IRQ, 1);
    assert_eq!(take_events(), UsartEvent::TX_COMPLETE);
}

#[test]
fn test_second_send_is_busy() {
    let _serial = serial();
    setup(UsartId::Usart2, default_config());

    USART.send(UsartId::Usart2, b"one").unwrap();
    assert_eq!(USART.send(UsartId::Usart2, b"two"), Err(DriverError::Busy));
    assert_eq!(USART.progress(UsartId::Usart2, Direction::Tx), (0, 3));

    raise(board::USART2_IRQ, 3);
    assert!(take_events().contains(UsartEvent::SEND_COMPLETE));
    assert_eq!(
        USART.backend(UsartId::Usart2).transmitted().bytes().collect::<Vec<_>>(),
        b"one"
    );
}

#[test]
fn test_send_and_receive_run_together() {
    let _serial = serial();
    setup(UsartId::Usart2, default_config());
    let backend = USART.backend(UsartId::Usart2);

    USART.send(UsartId::Usart2, b"ab").unwrap();
    USART.receive(UsartId::Usart2, buffer(2)).unwrap();
    let status = USART.get_status(UsartId::Usart2);
    assert!(status.contains(UsartStatus::TX_BUSY | UsartStatus::RX_BUSY));

    backend.inject_rx(b"xy");
    raise(board::USART2_IRQ, 2);

    let events = take_events();
    assert!(events.contains(UsartEvent::SEND_COMPLETE | UsartEvent::RECEIVE_COMPLETE));
    assert!(!status_at_callback().intersects(UsartStatus::TX_BUSY | UsartStatus::RX_BUSY));
    let received = USART.take_received(UsartId::Usart2).unwrap();
    assert_eq!(received.data(), b"xy");
}

#[test]
fn test_receive_completes() {
    let _serial = serial();
    setup(UsartId::Usart2, default_config());
    let backend = USART.backend(UsartId::Usart2);

    USART.receive(UsartId::Usart2, buffer(3)).unwrap();
    assert_eq!(USART.receive(UsartId::Usart2, buffer(3)), Err(DriverError::Busy));

    backend.inject_rx(b"abc");
    raise(board::USART2_IRQ, 3);

    let events = take_events();
    assert!(events.contains(UsartEvent::RECEIVE_COMPLETE));
    assert!(!events.contains(UsartEvent::RECEIVE_INCOMPLETE));
    assert!(!status_at_callback().contains(UsartStatus::RX_BUSY));
    assert!(!USART.get_status(UsartId::Usart2).contains(UsartStatus::RX_BUSY));

    let received = USART.take_received(UsartId::Usart2).unwrap();
    assert!(received.is_complete());
    assert_eq!(received.data(), b"abc");
    assert!(USART.take_received(UsartId::Usart2).is_none());
}

#[test]
fn test_framing_error_ends_receive() {
    let _serial = serial();
    setup(UsartId::Usart2, default_config());
    let backend = USART.backend(UsartId::Usart2);

    USART.receive(UsartId::Usart2, buffer(8)).unwrap();
    backend.inject_rx(b"abc");
    raise(board::USART2_IRQ, 3);
    assert_eq!(USART.progress(UsartId::Usart2, Direction::Rx), (3, 8));
    assert_eq!(USART.inspect_rx(UsartId::Usart2, |data| data.to_vec()).unwrap(), b"abc");

    backend.inject_flags(UsartFlags::FRAMING_ERROR);
    raise(board::USART2_IRQ, 1);

    assert_eq!(
        take_events(),
        UsartEvent::RX_FRAMING_ERROR
            | UsartEvent::RECEIVE_COMPLETE
            | UsartEvent::RECEIVE_INCOMPLETE
    );
    assert!(USART.get_error(UsartId::Usart2).contains(UsartErrors::RX_FRAMING_ERROR));
    assert!(!USART.get_status(UsartId::Usart2).contains(UsartStatus::RX_BUSY));
    assert_eq!(USART.progress(UsartId::Usart2, Direction::Rx), (3, 8));

    let received = USART.take_received(UsartId::Usart2).unwrap();
    assert!(!received.is_complete());
    assert_eq!(received.data(), b"abc");
}

#[test]
fn test_errors_stick_until_next_receive() {
    let _serial = serial();
    setup(UsartId::Usart2, default_config());
    let backend = USART.backend(UsartId::Usart2);

    backend.inject_flags(UsartFlags::PARITY_ERROR);
    USART.receive(UsartId::Usart2, buffer(1)).unwrap();
    raise(board::USART2_IRQ, 1);
    assert!(USART.get_error(UsartId::Usart2).contains(UsartErrors::RX_PARITY_ERROR));
    assert!(take_events().contains(UsartEvent::RECEIVE_INCOMPLETE));

    USART.receive(UsartId::Usart2, buffer(1)).unwrap();
    assert_eq!(USART.get_error(UsartId::Usart2), UsartErrors::empty());
}

#[test]
fn test_idle_line_reports_timeout() {
    let _serial = serial();
    setup(UsartId::Usart2, default_config());
    let backend = USART.backend(UsartId::Usart2);

    USART.receive(UsartId::Usart2, buffer(4)).unwrap();
    backend.inject_rx(b"z");
    raise(board::USART2_IRQ, 1);
    backend.inject_flags(UsartFlags::IDLE);
    raise(board::USART2_IRQ, 1);

    assert_eq!(take_events(), UsartEvent::RX_TIMEOUT);
    assert!(USART.get_status(UsartId::Usart2).contains(UsartStatus::RX_BUSY));
    assert_eq!(USART.progress(UsartId::Usart2, Direction::Rx), (1, 4));
}

#[test]
fn test_unrequested_frame_overflows() {
    let _serial = serial();
    setup(UsartId::Usart2, default_config());
    let backend = USART.backend(UsartId::Usart2);

    USART.receive(UsartId::Usart2, buffer(1)).unwrap();
    backend.inject_rx(b"12");
    raise(board::USART2_IRQ, 1);
    assert!(take_events().contains(UsartEvent::RECEIVE_COMPLETE));

    raise(board::USART2_IRQ, 1);
    assert_eq!(take_events(), UsartEvent::RX_OVERFLOW);
    assert!(USART.get_error(UsartId::Usart2).contains(UsartErrors::RX_OVERFLOW));
}

#[test]
fn test_stop_aborts_without_events() {
    let _serial = serial();
    setup(UsartId::Usart2, default_config());
    let backend = USART.backend(UsartId::Usart2);

    USART.send(UsartId::Usart2, b"long message").unwrap();
    USART.receive(UsartId::Usart2, buffer(4)).unwrap();
    backend.inject_rx(b"q");
    raise(board::USART2_IRQ, 1);
    take_events();

    USART.stop(UsartId::Usart2);

    assert!(!backend.is_enabled());
    assert_eq!(USART.get_status(UsartId::Usart2), UsartStatus::INITIALIZED);
    assert_eq!(take_events(), UsartEvent::empty());
    let received = USART.take_received(UsartId::Usart2).unwrap();
    assert_eq!(received.data(), b"q");

    // Nothing is left armed.
    raise(board::USART2_IRQ, 1);
    assert_eq!(take_events(), UsartEvent::empty());
}

#[test]
fn test_deferred_events_wait_for_dispatch() {
    let _serial = serial();
    setup(
        UsartId::Usart2,
        default_config().with_dispatch(DispatchMode::Deferred),
    );

    USART.send(UsartId::Usart2, b"x").unwrap();
    raise(board::USART2_IRQ, 2);
    assert_eq!(take_events(), UsartEvent::empty());

    assert!(USART.dispatch_pending(UsartId::Usart2));
    assert_eq!(
        take_events(),
        UsartEvent::SEND_COMPLETE | UsartEvent::TX_COMPLETE
    );
    assert!(!USART.dispatch_pending(UsartId::Usart2));
}

#[test]
fn test_dma_send() {
    let _serial = serial();
    setup(UsartId::Usart1, default_config());
    let backend = USART.backend(UsartId::Usart1);

    USART.send(UsartId::Usart1, b"dma!").unwrap();
    let request = backend.dma_request(Direction::Tx).unwrap();
    assert_eq!(request.len, 4);
    assert!(!request.circular);
    assert_eq!(USART.send(UsartId::Usart1, b"more"), Err(DriverError::Busy));

    assert!(backend.complete_dma(Direction::Tx, false));
    raise(board::DMA2_STREAM7_IRQ, 1);
    assert_eq!(take_events(), UsartEvent::SEND_COMPLETE);
    assert_eq!(USART.progress(UsartId::Usart1, Direction::Tx), (4, 4));
    assert_eq!(backend.transmitted().bytes().collect::<Vec<_>>(), b"dma!");

    raise(board::USART1_IRQ, 1);
    assert_eq!(take_events(), UsartEvent::TX_COMPLETE);
}

#[test]
fn test_dma_receive_halves() {
    let _serial = serial();
    setup(UsartId::Usart1, default_config());
    let backend = USART.backend(UsartId::Usart1);

    USART.receive(UsartId::Usart1, buffer(4)).unwrap();
    backend.inject_rx(b"wxyz");

    assert!(backend.complete_dma(Direction::Rx, true));
    raise(board::DMA2_STREAM2_IRQ, 1);
    assert_eq!(take_events(), UsartEvent::RECEIVE_HALF_COMPLETE);
    assert_eq!(USART.progress(UsartId::Usart1, Direction::Rx), (2, 4));

    assert!(backend.complete_dma(Direction::Rx, false));
    raise(board::DMA2_STREAM2_IRQ, 1);
    assert_eq!(take_events(), UsartEvent::RECEIVE_COMPLETE);
    assert!(!USART.get_status(UsartId::Usart1).contains(UsartStatus::RX_BUSY));
    assert_eq!(USART.take_received(UsartId::Usart1).unwrap().data(), b"wxyz");
}

#[test]
fn test_dma_fault_ends_receive() {
    let _serial = serial();
    setup(UsartId::Usart1, default_config());
    let backend = USART.backend(UsartId::Usart1);

    USART.receive(UsartId::Usart1, buffer(4)).unwrap();
    backend.fail_dma(Direction::Rx);
    raise(board::DMA2_STREAM2_IRQ, 1);

    assert_eq!(
        take_events(),
        UsartEvent::DMA_FAULT | UsartEvent::RECEIVE_COMPLETE | UsartEvent::RECEIVE_INCOMPLETE
    );
    assert!(USART.get_error(UsartId::Usart1).contains(UsartErrors::DMA_FAULT));
    assert!(backend.dma_request(Direction::Rx).is_none());
}

#[test]
fn test_circular_receive_keeps_running() {
    let _serial = serial();
    setup(UsartId::Usart3, default_config());
    let backend = USART.backend(UsartId::Usart3);

    USART.receive(UsartId::Usart3, buffer(4)).unwrap();
    assert!(backend.dma_request(Direction::Rx).unwrap().circular);
    backend.inject_rx(b"abcdefgh");

    for lap in [b"abcd", b"efgh"] {
        assert!(backend.complete_dma(Direction::Rx, false));
        raise(board::DMA1_STREAM1_IRQ, 1);
        assert_eq!(take_events(), UsartEvent::RECEIVE_COMPLETE);
        assert!(USART.get_status(UsartId::Usart3).contains(UsartStatus::RX_BUSY));
        assert_eq!(
            USART.inspect_rx(UsartId::Usart3, |data| data.to_vec()).unwrap(),
            lap
        );
    }

    USART.stop(UsartId::Usart3);
    assert!(backend.dma_request(Direction::Rx).is_none());
    assert_eq!(USART.take_received(UsartId::Usart3).unwrap().data(), b"efgh");
}

#[test]
fn test_poll_send_and_receive() {
    let _serial = serial();
    setup(UsartId::Usart2, default_config());
    let backend = USART.backend(UsartId::Usart2);

    USART.poll_send(UsartId::Usart2, b"ping", 10).unwrap();
    assert_eq!(backend.transmitted().bytes().collect::<Vec<_>>(), b"ping");

    backend.inject_rx(b"ok");
    let mut reply = [0u8; 2];
    USART.poll_receive(UsartId::Usart2, &mut reply, 10).unwrap();
    assert_eq!(&reply, b"ok");

    assert_eq!(USART.poll_send(UsartId::Usart2, &[], 10), Ok(()));
    assert_eq!(take_events(), UsartEvent::empty());
}

#[test]
fn test_poll_times_out() {
    let _serial = serial();
    setup(UsartId::Usart2, default_config());
    let backend = USART.backend(UsartId::Usart2);

    backend.set_tx_stalled(true);
    let start = TestPlatform::core().now_ms();
    let result = USART.poll_send(UsartId::Usart2, b"abc", 10);
    backend.set_tx_stalled(false);

    assert_eq!(result, Err(DriverError::Timeout));
    assert!(TestPlatform::core().now_ms().wrapping_sub(start) >= 10);
    assert!(backend.transmitted().is_empty());

    let mut reply = [0u8; 1];
    assert_eq!(
        USART.poll_receive(UsartId::Usart2, &mut reply, 5),
        Err(DriverError::Timeout)
    );
}

#[test]
fn test_poll_receive_reports_faults() {
    let _serial = serial();
    setup(UsartId::Usart2, default_config());
    let backend = USART.backend(UsartId::Usart2);

    backend.inject_flags(UsartFlags::OVERRUN);
    let mut reply = [0u8; 1];
    assert_eq!(
        USART.poll_receive(UsartId::Usart2, &mut reply, 10),
        Err(DriverError::Fail)
    );
    assert!(USART.get_error(UsartId::Usart2).contains(UsartErrors::RX_OVERFLOW));
}

#[test]
fn test_rejected_init_leaves_instance_down() {
    let _serial = serial();
    USART.deinit(UsartId::Usart2).unwrap();
    let backend = USART.backend(UsartId::Usart2);

    backend.fail_next_bring_up();
    assert_eq!(
        USART.init(UsartId::Usart2, &default_config()),
        Err(DriverError::Fail)
    );
    assert_eq!(USART.get_status(UsartId::Usart2), UsartStatus::empty());
    assert!(
        !TestPlatform::core()
            .nvic()
            .is_enabled(board::USART2_IRQ)
            .unwrap()
    );
    assert_eq!(USART.send(UsartId::Usart2, b"x"), Err(DriverError::Fail));
    assert_eq!(USART.poll_send(UsartId::Usart2, b"x", 1), Err(DriverError::Fail));

    USART.init(UsartId::Usart2, &default_config()).unwrap();
    assert!(USART.get_status(UsartId::Usart2).contains(UsartStatus::INITIALIZED));
}

#[test]
fn test_reinit_aborts_transfers() {
    let _serial = serial();
    setup(UsartId::Usart2, default_config());

    USART.send(UsartId::Usart2, b"pending").unwrap();
    USART.init(UsartId::Usart2, &default_config()).unwrap();

    assert_eq!(USART.get_status(UsartId::Usart2), UsartStatus::INITIALIZED);
    assert_eq!(USART.progress(UsartId::Usart2, Direction::Tx), (0, 0));
    USART.send(UsartId::Usart2, b"next").unwrap();
}
