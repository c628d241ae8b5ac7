//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Keep a bounded in-memory tail of recent log output for the diagnostics page
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` wins over the configured level
//! - The tail holds bytes, not lines; the oldest bytes are evicted first

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_TAIL_BYTES: usize = 8172;

/// Bounded byte buffer of the most recent log output.
#[derive(Clone)]
pub struct LogTail {
    inner: Arc<Mutex<VecDeque<u8>>>,
    capacity: usize,
}

impl LogTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, bytes: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut buffer) = self.inner.lock() else {
            return;
        };
        let bytes = if bytes.len() > self.capacity {
            &bytes[bytes.len() - self.capacity..]
        } else {
            bytes
        };
        let overflow = (buffer.len() + bytes.len()).saturating_sub(self.capacity);
        buffer.drain(..overflow);
        buffer.extend(bytes);
    }

    /// Current contents, lossily decoded.
    pub fn contents(&self) -> String {
        match self.inner.lock() {
            Ok(buffer) => {
                let (front, back) = buffer.as_slices();
                let mut bytes = Vec::with_capacity(buffer.len());
                bytes.extend_from_slice(front);
                bytes.extend_from_slice(back);
                String::from_utf8_lossy(&bytes).into_owned()
            }
            Err(_) => String::new(),
        }
    }
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_BYTES)
    }
}

pub struct LogTailWriter {
    tail: LogTail,
}

impl io::Write for LogTailWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tail.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogTail {
    type Writer = LogTailWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogTailWriter { tail: self.clone() }
    }
}

/// Install the global subscriber: stdout plus the in-memory tail.
pub fn init_logging(level: &str, tail: LogTail) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("version_proxy={level},tower_http={level}").into());

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(tail))
        .try_init();

    if let Err(e) = installed {
        eprintln!("logging already initialized: {e}");
    }
}
