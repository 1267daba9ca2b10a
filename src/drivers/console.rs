//! Console device
//!
//! stdin and stdout of every user process, and the sink for kernel logs.
//!
//! # Security Considerations
//! - `put_buf` is the unit of atomicity: one `write(1, ..)` call is
//!   delivered as one block, never interleaved with another call
//! - Console traffic never takes the file system lock

use alloc::sync::Arc;
use core::fmt::{self, Write};

use log::{Level, LevelFilter, Metadata, Record};
use spin::Once;

/// Console interface provided by the platform.
pub trait Console: Send + Sync {
    /// Write `bytes` as one uninterrupted block.
    fn put_buf(&self, bytes: &[u8]);

    /// Block until one byte of keyboard input is available.
    fn getc(&self) -> u8;
}

/// Adapter so formatted output can be built up and flushed as one block.
struct LineBuffer<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl Write for LineBuffer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

/// Longest log line; longer records are truncated.
const LOG_LINE_MAX: usize = 256;

/// `log` backend that writes records to the console.
pub struct ConsoleLogger {
    console: Once<Arc<dyn Console>>,
    level: Level,
}

impl ConsoleLogger {
    pub const fn new(level: Level) -> Self {
        Self {
            console: Once::new(),
            level,
        }
    }

    /// Attach the console. Later calls are ignored.
    pub fn attach(&self, console: Arc<dyn Console>) {
        self.console.call_once(|| console);
    }

    fn format(record: &Record<'_>, out: &mut [u8]) -> usize {
        let mut line = LineBuffer { buf: out, len: 0 };
        let _ = write!(line, "[{}] {}", record.level(), record.args());
        if line.len == line.buf.len() {
            line.len -= 1;
        }
        line.buf[line.len] = b'\n';
        line.len + 1
    }
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(console) = self.console.get() {
            let mut buf = [0u8; LOG_LINE_MAX];
            let len = Self::format(record, &mut buf);
            console.put_buf(&buf[..len]);
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger::new(Level::Trace);

/// Route the `log` facade to `console`, showing records up to `level`.
///
/// Only the first call installs the logger; every call sets the level.
pub fn init_logger(console: Arc<dyn Console>, level: LevelFilter) {
    LOGGER.attach(console);
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
