//! `log` backend writing records to a USART.
//!
//! Records go out through [`BlockingTransfer::poll_send`], so logging works
//! before interrupts are set up and from interrupt context. The port must use
//! byte-wide frames. A record logged while another is being written (from an
//! interrupt, or by the driver itself) is dropped rather than interleaved.
//!
//! # Usage
//!
//! ```ignore
//! static LOGGER: UsartLogger<SimPlatform, SimUsart> =
//!     UsartLogger::new(&USART, UsartId::Usart2);
//!
//! logger::init(&LOGGER, log::LevelFilter::Debug)?;
//! log::info!("boot");
//! ```

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, Ordering};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::config::LOG_WRITE_TIMEOUT_MS;
use crate::hal::BlockingTransfer;
use crate::hal::usart::UsartBackend;
use crate::peripheral::UsartDriver;
use crate::platform::Platform;
use crate::registry::UsartId;

pub struct UsartLogger<P: Platform, B: UsartBackend + 'static> {
    driver: &'static UsartDriver<P, B>,
    port: UsartId,
    writing: AtomicBool,
}

impl<P: Platform, B: UsartBackend + 'static> UsartLogger<P, B> {
    pub const fn new(driver: &'static UsartDriver<P, B>, port: UsartId) -> Self {
        Self {
            driver,
            port,
            writing: AtomicBool::new(false),
        }
    }
}

/// Writer adapter for `core::fmt::Write`, expanding `\n` to `\r\n`.
struct PortWriter<'a, P: Platform, B: UsartBackend> {
    driver: &'a UsartDriver<P, B>,
    port: UsartId,
}

impl<P: Platform, B: UsartBackend> Write for PortWriter<'_, P, B> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut lines = s.split('\n');
        if let Some(first) = lines.next() {
            self.put(first.as_bytes())?;
        }
        for line in lines {
            self.put(b"\r\n")?;
            self.put(line.as_bytes())?;
        }
        Ok(())
    }
}

impl<P: Platform, B: UsartBackend> PortWriter<'_, P, B> {
    fn put(&self, bytes: &[u8]) -> fmt::Result {
        self.driver
            .poll_send(self.port, bytes, LOG_WRITE_TIMEOUT_MS)
            .map_err(|_| fmt::Error)
    }
}

impl<P: Platform, B: UsartBackend + 'static> Log for UsartLogger<P, B>
where
    UsartDriver<P, B>: Sync,
{
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if self.writing.swap(true, Ordering::Acquire) {
            return;
        }

        let mut writer = PortWriter {
            driver: self.driver,
            port: self.port,
        };
        let _ = writeln!(
            writer,
            "[{:<5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );

        self.writing.store(false, Ordering::Release);
    }

    fn flush(&self) {}
}

/// Route the `log` facade to `logger`.
///
/// # Errors
///
/// Fails if a logger was already installed.
pub fn init<P: Platform, B: UsartBackend + 'static>(
    logger: &'static UsartLogger<P, B>,
    level: LevelFilter,
) -> Result<(), SetLoggerError>
where
    UsartDriver<P, B>: Sync,
{
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}
