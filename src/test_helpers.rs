//! Scripted serial port for driving the session against canned firmware
//! traffic.

use std::collections::VecDeque;
use std::vec::Vec;

use embassy_futures::yield_now;
use embedded_io_async::{ErrorType, Read, Write};

/// A mock AT channel.
///
/// Reads pull from a byte queue; an empty queue suspends the reader until
/// more bytes are scripted (the caller's deadline is what ends the wait).
/// Writes are recorded verbatim, and may arm canned replies: when the
/// recorded TX stream ends with the front trigger, that trigger fires once
/// and its reply is queued for reading. Triggers fire strictly in the order
/// they were scripted.
pub struct MockSerial {
    rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    scripted: VecDeque<(Vec<u8>, Vec<u8>)>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
            scripted: VecDeque::new(),
        }
    }

    pub fn with_rx(bytes: &[u8]) -> Self {
        let mut serial = Self::new();
        serial.push_rx(bytes);
        serial
    }

    pub fn push_rx(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    /// Arm a canned reply: once the TX stream ends with `trigger`, `reply`
    /// becomes readable.
    pub fn expect(&mut self, trigger: &[u8], reply: &[u8]) {
        self.scripted.push_back((trigger.to_vec(), reply.to_vec()));
    }

    pub fn rx_remaining(&self) -> usize {
        self.rx.len()
    }

    pub fn tx_str(&self) -> String {
        String::from_utf8_lossy(&self.tx).into_owned()
    }

    fn fire_triggers(&mut self) {
        while let Some((trigger, _)) = self.scripted.front() {
            if self.tx.ends_with(trigger) {
                let (_, reply) = self.scripted.pop_front().unwrap();
                self.rx.extend(reply);
            } else {
                break;
            }
        }
    }
}

impl ErrorType for MockSerial {
    type Error = core::convert::Infallible;
}

impl Read for MockSerial {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        loop {
            if !self.rx.is_empty() && !buf.is_empty() {
                let n = buf.len().min(self.rx.len());
                for slot in buf[..n].iter_mut() {
                    *slot = self.rx.pop_front().unwrap();
                }
                return Ok(n);
            }
            yield_now().await;
        }
    }
}

impl Write for MockSerial {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.tx.extend_from_slice(buf);
        self.fire_triggers();
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
