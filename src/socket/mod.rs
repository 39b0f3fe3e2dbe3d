mod ring_buffer;
mod set;

pub use ring_buffer::RingBuffer;
pub use set::SocketSet;

use core::fmt;

use embassy_time::Duration;

/// Capacity of each socket's local receive buffer. The firmware is the
/// ultimate bound on how much it reports as available; this only needs to
/// cover one ingress chunk.
pub const SOCKET_RX_CAPACITY: usize = 1024;

/// How long a socket read waits for each payload byte the firmware has
/// already confirmed.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Identifies one of the firmware's connection slots ("mux").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SocketHandle(pub usize);

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-connection state for one mux slot.
///
/// `available` and `connected` are caches of the firmware's view, refreshed
/// by URCs or explicit status polls. `got_data` is the sticky "poll before
/// trusting the cache" marker a bare data-indication URC leaves behind.
#[derive(Debug)]
pub struct Socket {
    handle: SocketHandle,
    pub(crate) rx: RingBuffer<SOCKET_RX_CAPACITY>,
    pub(crate) available: usize,
    pub(crate) connected: bool,
    pub(crate) got_data: bool,
    pub(crate) read_timeout: Duration,
}

impl Socket {
    pub(crate) fn new(handle: SocketHandle) -> Self {
        Self {
            handle,
            rx: RingBuffer::new(),
            available: 0,
            connected: false,
            got_data: false,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    /// Back to a clean slate; used on every connect.
    pub(crate) fn reset(&mut self) {
        self.rx.clear();
        self.available = 0;
        self.connected = false;
        self.got_data = false;
    }
}
