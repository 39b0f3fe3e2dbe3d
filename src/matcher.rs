//! The wait-for-response engine.
//!
//! AT modems interleave three kinds of traffic on one byte stream: the
//! terminal reply to the command currently in flight (`OK`, `ERROR`, or a
//! command-specific `+XYZ:` line), payload fields belonging to that reply,
//! and unsolicited result codes that may show up at any point in between.
//! [`wait_response`] consumes the stream one byte at a time, testing the
//! accumulated suffix against a small ordered set of terminal patterns and
//! against the vendor's URC table, until a terminal matches or the deadline
//! passes.
//!
//! The engine is deliberately free of modem state; URC side effects are
//! applied through the [`UrcSink`] trait so the matcher can be driven against
//! a scripted stream in isolation.

use embassy_futures::yield_now;
use embassy_time::{with_deadline, Duration, Instant};
use embedded_io_async::{Error as _, Read};
use heapless::Vec;

use crate::error::Error;

pub const MAX_TERMINALS: usize = 5;

/// Capacity of the response accumulator. Longer replies are still matched
/// correctly (the accumulator slides), but captured text is clipped to the
/// trailing bytes.
pub const RESPONSE_CAPACITY: usize = 256;

pub type ResponseBuf = Vec<u8, RESPONSE_CAPACITY>;

pub const OK_TERMINAL: &[u8] = b"OK\r\n";
pub const ERROR_TERMINAL: &[u8] = b"ERROR\r\n";
pub const CME_ERROR_TERMINAL: &[u8] = b"\r\n+CME ERROR:";
pub const CMS_ERROR_TERMINAL: &[u8] = b"\r\n+CMS ERROR:";

/// Timeout of the degenerate `wait_response()` call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Deadline for the inline field scans that follow a matched prefix or URC.
pub(crate) const SCAN_TIMEOUT: Duration = Duration::from_millis(1000);

/// An ordered set of up to [`MAX_TERMINALS`] terminal patterns.
///
/// `OK\r\n` and `ERROR\r\n` occupy the first two slots by default, with the
/// verbose `+CME ERROR:` / `+CMS ERROR:` markers behind them; [`with`] and
/// [`without`] override individual slots. Slot `i` reports as match index
/// `i + 1`; index 0 is reserved for timeout.
///
/// [`with`]: Terminals::with
/// [`without`]: Terminals::without
#[derive(Clone, Copy)]
pub struct Terminals<'a> {
    slots: [Option<&'a [u8]>; MAX_TERMINALS],
}

impl Default for Terminals<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Terminals<'a> {
    pub const fn new() -> Self {
        Self {
            slots: [
                Some(OK_TERMINAL),
                Some(ERROR_TERMINAL),
                Some(CME_ERROR_TERMINAL),
                Some(CMS_ERROR_TERMINAL),
                None,
            ],
        }
    }

    /// No terminals at all; the call runs to its deadline, pumping URCs.
    pub const fn none() -> Self {
        Self {
            slots: [None; MAX_TERMINALS],
        }
    }

    /// The usual override: a command-specific reply prefix in the first slot,
    /// error markers left in place.
    pub fn first(pattern: &'a [u8]) -> Self {
        Self::new().with(0, pattern)
    }

    pub fn with(mut self, slot: usize, pattern: &'a [u8]) -> Self {
        self.slots[slot] = Some(pattern);
        self
    }

    pub fn without(mut self, slot: usize) -> Self {
        self.slots[slot] = None;
        self
    }

    fn match_suffix(&self, buf: &[u8]) -> Option<(usize, &'a [u8])> {
        self.slots
            .iter()
            .enumerate()
            .find_map(|(slot, pattern)| match pattern {
                Some(p) if buf.ends_with(p) => Some((slot, *p)),
                _ => None,
            })
    }
}

/// Outcome of one [`wait_response`] call.
pub struct MatchResult {
    index: usize,
    /// Everything accumulated before the terminal, excluding the terminal
    /// itself. Empty on timeout.
    pub data: ResponseBuf,
}

impl MatchResult {
    /// 1-based slot of the matched terminal; 0 if the call timed out.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn timed_out(&self) -> bool {
        self.index == 0
    }

    pub fn text(&self) -> &str {
        core::str::from_utf8(&self.data).unwrap_or("")
    }
}

/// What to do when a URC pattern matches the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrcAction {
    /// `<prefix> <mux>,<len>` — the firmware buffered `len` bytes for a
    /// socket.
    DataAvailable,
    /// `<prefix> <mux>` — data arrived, amount unknown until polled.
    DataIndication,
    /// `<prefix> <mux>,<state>` — connection state change; state 1 means
    /// still connected, anything else closed.
    SocketState,
    /// Informational line (network name, time zone, ...); consume to end of
    /// line.
    Discard,
    /// A boot banner appeared mid-conversation: the module reset behind our
    /// back.
    ModemReset,
}

/// One entry of a vendor's URC table.
pub struct UrcPattern {
    pub pattern: &'static [u8],
    pub action: UrcAction,
}

/// Side-effect receiver for intercepted URCs.
///
/// The modem session implements this over its socket registry; tests record
/// the calls.
pub trait UrcSink {
    fn data_available(&mut self, mux: usize, len: usize);
    fn data_indication(&mut self, mux: usize);
    fn socket_closed(&mut self, mux: usize);
    fn modem_reset(&mut self);
}

/// Read the stream until one of `terminals` matches or `timeout` passes.
///
/// Returns the matched slot as a 1-based index (first slot to match wins;
/// since matching happens after every byte, the pattern that *completes
/// first in the stream* wins regardless of slot order — slot order only
/// breaks ties between patterns finishing on the same byte). Index 0 means
/// timeout; residual bytes are logged and dropped, never replayed into the
/// next call.
///
/// URC patterns are tested after the terminals on every byte. A URC match
/// consumes the URC's fields inline, applies its effect through `sink`,
/// clears the accumulator and keeps the call going.
pub async fn wait_response<R, S>(
    stream: &mut R,
    urcs: &[UrcPattern],
    sink: &mut S,
    timeout: Duration,
    terminals: &Terminals<'_>,
) -> Result<MatchResult, Error>
where
    R: Read,
    S: UrcSink,
{
    let deadline = Instant::now() + timeout;
    let mut buf = ResponseBuf::new();

    loop {
        let Some(byte) = read_byte_until(stream, deadline).await? else {
            let residue = trim_ascii(&buf);
            if !residue.is_empty() {
                debug!("unhandled response bytes: {:?}", crate::fmt::Bytes(residue));
            }
            return Ok(MatchResult {
                index: 0,
                data: ResponseBuf::new(),
            });
        };
        if byte == 0 {
            // Line noise shows up as NUL bytes now and then.
            continue;
        }
        if buf.is_full() {
            buf.remove(0);
        }
        buf.push(byte).ok();

        // Terminals take precedence over the URC table: a command that names
        // a `+XYZ:` reply as its terminator must win over the same prefix
        // registered as a URC.
        if let Some((slot, pattern)) = terminals.match_suffix(&buf) {
            if pattern == CME_ERROR_TERMINAL || pattern == CMS_ERROR_TERMINAL {
                let detail = text_before::<_, 48>(stream, b'\n').await?;
                warn!("modem error: {}", detail.as_str());
            }
            let len = buf.len() - pattern.len();
            buf.truncate(len);
            return Ok(MatchResult {
                index: slot + 1,
                data: buf,
            });
        }

        if let Some(urc) = urcs.iter().find(|u| buf.ends_with(u.pattern)) {
            dispatch_urc(stream, urc.action, sink).await?;
            buf.clear();
        }
    }
}

async fn dispatch_urc<R, S>(stream: &mut R, action: UrcAction, sink: &mut S) -> Result<(), Error>
where
    R: Read,
    S: UrcSink,
{
    match action {
        UrcAction::DataAvailable => {
            let mux = int_before(stream, b',').await?;
            let len = int_before(stream, b'\n').await?;
            if let (Some(mux), Some(len)) = (mux, len) {
                if mux >= 0 && len >= 0 {
                    debug!("{} bytes pending on socket {}", len, mux);
                    sink.data_available(mux as usize, len as usize);
                }
            }
        }
        UrcAction::DataIndication => {
            if let Some(mux) = int_before(stream, b'\n').await? {
                if mux >= 0 {
                    sink.data_indication(mux as usize);
                }
            }
        }
        UrcAction::SocketState => {
            let mux = int_before(stream, b',').await?;
            let state = int_before(stream, b'\n').await?;
            if let (Some(mux), Some(state)) = (mux, state) {
                if mux >= 0 && state != 1 {
                    debug!("socket {} closed by peer", mux);
                    sink.socket_closed(mux as usize);
                }
            }
        }
        UrcAction::Discard => {
            skip_until(stream, b'\n').await?;
        }
        UrcAction::ModemReset => {
            warn!("unexpected module reset");
            sink.modem_reset();
        }
    }
    Ok(())
}

/// Pull one byte, waiting no longer than `deadline`. `Ok(None)` on timeout.
pub(crate) async fn read_byte_until<R: Read>(
    stream: &mut R,
    deadline: Instant,
) -> Result<Option<u8>, Error> {
    let mut byte = [0u8; 1];
    loop {
        match with_deadline(deadline, stream.read(&mut byte)).await {
            Ok(Ok(0)) => {
                // Nothing buffered; yield and poll again until the deadline.
                yield_now().await;
                if Instant::now() >= deadline {
                    return Ok(None);
                }
            }
            Ok(Ok(_)) => return Ok(Some(byte[0])),
            Ok(Err(e)) => return Err(Error::Serial(e.kind())),
            Err(_) => return Ok(None),
        }
    }
}

pub(crate) async fn read_byte_timeout<R: Read>(
    stream: &mut R,
    timeout: Duration,
) -> Result<Option<u8>, Error> {
    read_byte_until(stream, Instant::now() + timeout).await
}

/// Consume bytes up to and including `delim`. `Ok(false)` if the scan
/// deadline passed first.
pub async fn skip_until<R: Read>(stream: &mut R, delim: u8) -> Result<bool, Error> {
    let deadline = Instant::now() + SCAN_TIMEOUT;
    while let Some(byte) = read_byte_until(stream, deadline).await? {
        if byte == delim {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn field_before<R: Read, const N: usize>(
    stream: &mut R,
    delim: u8,
) -> Result<Vec<u8, N>, Error> {
    let deadline = Instant::now() + SCAN_TIMEOUT;
    let mut raw = Vec::new();
    while let Some(byte) = read_byte_until(stream, deadline).await? {
        if byte == delim {
            break;
        }
        // Oversized fields keep the head; the delimiter is still honored.
        raw.push(byte).ok();
    }
    Ok(raw)
}

/// Read an integer field terminated by `delim` (delimiter consumed).
pub async fn int_before<R: Read>(stream: &mut R, delim: u8) -> Result<Option<i32>, Error> {
    let raw = field_before::<_, 16>(stream, delim).await?;
    Ok(core::str::from_utf8(&raw)
        .ok()
        .and_then(|s| s.trim().parse().ok()))
}

/// Read a float field terminated by `delim` (delimiter consumed).
pub async fn float_before<R: Read>(stream: &mut R, delim: u8) -> Result<Option<f32>, Error> {
    let raw = field_before::<_, 24>(stream, delim).await?;
    Ok(core::str::from_utf8(&raw)
        .ok()
        .and_then(|s| s.trim().parse().ok()))
}

/// Read a text field terminated by `delim` (delimiter consumed), trimmed.
/// Truncates at `N` bytes.
pub async fn text_before<R: Read, const N: usize>(
    stream: &mut R,
    delim: u8,
) -> Result<heapless::String<N>, Error> {
    let raw = field_before::<_, N>(stream, delim).await?;
    let mut out = heapless::String::new();
    if let Ok(s) = core::str::from_utf8(&raw) {
        out.push_str(s.trim()).ok();
    }
    Ok(out)
}

pub(crate) fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockSerial;
    use embassy_futures::block_on;

    #[derive(Default)]
    struct RecordingSink {
        available: std::vec::Vec<(usize, usize)>,
        indications: std::vec::Vec<usize>,
        closed: std::vec::Vec<usize>,
        resets: usize,
    }

    impl UrcSink for RecordingSink {
        fn data_available(&mut self, mux: usize, len: usize) {
            self.available.push((mux, len));
        }

        fn data_indication(&mut self, mux: usize) {
            self.indications.push(mux);
        }

        fn socket_closed(&mut self, mux: usize) {
            self.closed.push(mux);
        }

        fn modem_reset(&mut self) {
            self.resets += 1;
        }
    }

    static URCS: &[UrcPattern] = &[
        UrcPattern {
            pattern: b"+CARECV:",
            action: UrcAction::DataAvailable,
        },
        UrcPattern {
            pattern: b"+CADATAIND:",
            action: UrcAction::DataIndication,
        },
        UrcPattern {
            pattern: b"+CASTATE:",
            action: UrcAction::SocketState,
        },
        UrcPattern {
            pattern: b"*PSNWID:",
            action: UrcAction::Discard,
        },
        UrcPattern {
            pattern: b"\r\nSMS Ready\r\n",
            action: UrcAction::ModemReset,
        },
    ];

    fn wait(
        stream: &mut MockSerial,
        sink: &mut RecordingSink,
        timeout: Duration,
        terminals: &Terminals<'_>,
    ) -> MatchResult {
        block_on(wait_response(stream, URCS, sink, timeout, terminals)).unwrap()
    }

    #[test]
    fn ok_terminal_matches_and_captures_preceding_text() {
        let mut stream = MockSerial::with_rx(b"+CSQ: 5\r\n\r\nOK\r\n");
        let mut sink = RecordingSink::default();

        let r = wait(
            &mut stream,
            &mut sink,
            Duration::from_millis(200),
            &Terminals::new(),
        );
        assert_eq!(r.index(), 1);
        assert_eq!(r.data.as_slice(), b"+CSQ: 5\r\n\r\n");
    }

    #[test]
    fn first_pattern_to_complete_in_stream_wins() {
        // ERROR sits in slot 2 but arrives first.
        let mut stream = MockSerial::with_rx(b"ERROR\r\n");
        let mut sink = RecordingSink::default();

        let r = wait(
            &mut stream,
            &mut sink,
            Duration::from_millis(200),
            &Terminals::new(),
        );
        assert_eq!(r.index(), 2);
    }

    #[test]
    fn overlapping_suffixes_resolve_by_slot_order_on_same_byte() {
        // "CONNECT OK\r\n" and "OK\r\n" complete on the same byte; the
        // earlier slot must win.
        let terminals = Terminals::none()
            .with(0, b"CONNECT OK\r\n")
            .with(1, b"OK\r\n");
        let mut stream = MockSerial::with_rx(b"CONNECT OK\r\n");
        let mut sink = RecordingSink::default();

        let r = wait(&mut stream, &mut sink, Duration::from_millis(200), &terminals);
        assert_eq!(r.index(), 1);

        // A bare OK still reaches the second slot.
        let mut stream = MockSerial::with_rx(b"\r\nOK\r\n");
        let r = wait(&mut stream, &mut sink, Duration::from_millis(200), &terminals);
        assert_eq!(r.index(), 2);
    }

    #[test]
    fn timeout_returns_zero_within_poll_granularity() {
        let mut stream = MockSerial::with_rx(b"+CSQ");
        let mut sink = RecordingSink::default();

        let before = Instant::now();
        let r = wait(
            &mut stream,
            &mut sink,
            Duration::from_millis(80),
            &Terminals::new(),
        );
        let elapsed = Instant::now() - before;

        assert_eq!(r.index(), 0);
        assert!(r.data.is_empty());
        assert!(elapsed >= Duration::from_millis(80));
        assert!(elapsed < Duration::from_millis(1000));
    }

    #[test]
    fn residue_is_not_replayed_into_the_next_call() {
        // A terminal split across two calls is lost; documented boundary.
        let mut stream = MockSerial::with_rx(b"OK\r");
        let mut sink = RecordingSink::default();

        let r = wait(
            &mut stream,
            &mut sink,
            Duration::from_millis(50),
            &Terminals::new(),
        );
        assert_eq!(r.index(), 0);

        stream.push_rx(b"\n");
        let r = wait(
            &mut stream,
            &mut sink,
            Duration::from_millis(50),
            &Terminals::new(),
        );
        assert_eq!(r.index(), 0);
    }

    #[test]
    fn urc_is_intercepted_without_terminating_the_call() {
        let mut stream = MockSerial::with_rx(b"\r\n+CARECV: 1,42\r\n\r\nOK\r\n");
        let mut sink = RecordingSink::default();

        let r = wait(
            &mut stream,
            &mut sink,
            Duration::from_millis(200),
            &Terminals::new(),
        );
        assert_eq!(r.index(), 1);
        assert_eq!(sink.available, [(1, 42)]);
    }

    #[test]
    fn socket_state_urc_only_reports_closures() {
        let mut stream =
            MockSerial::with_rx(b"+CASTATE: 1,0\r\n+CASTATE: 0,1\r\nOK\r\n");
        let mut sink = RecordingSink::default();

        let r = wait(
            &mut stream,
            &mut sink,
            Duration::from_millis(200),
            &Terminals::new(),
        );
        assert_eq!(r.index(), 1);
        assert_eq!(sink.closed, [1]);
    }

    #[test]
    fn reset_banner_reaches_the_sink() {
        let mut stream = MockSerial::with_rx(b"\r\nSMS Ready\r\nOK\r\n");
        let mut sink = RecordingSink::default();

        let r = wait(
            &mut stream,
            &mut sink,
            Duration::from_millis(200),
            &Terminals::new(),
        );
        assert_eq!(r.index(), 1);
        assert_eq!(sink.resets, 1);
    }

    #[test]
    fn nul_bytes_are_discarded() {
        let mut stream = MockSerial::with_rx(b"O\0K\r\0\n");
        let mut sink = RecordingSink::default();

        let r = wait(
            &mut stream,
            &mut sink,
            Duration::from_millis(200),
            &Terminals::new(),
        );
        assert_eq!(r.index(), 1);
    }

    #[test]
    fn cme_error_detail_is_consumed() {
        let mut stream = MockSerial::with_rx(b"\r\n+CME ERROR: SIM not inserted\r\n");
        let mut sink = RecordingSink::default();

        let r = wait(
            &mut stream,
            &mut sink,
            Duration::from_millis(200),
            &Terminals::new(),
        );
        assert_eq!(r.index(), 3);
        // The verbose text must not leak into a later exchange.
        assert!(stream.rx_remaining() <= 1);
    }

    #[test]
    fn scan_helpers_parse_fields() {
        let mut stream = MockSerial::with_rx(b" 3,128\r\n12.5,x\r\nname\r\n");

        assert_eq!(block_on(int_before(&mut stream, b',')).unwrap(), Some(3));
        assert_eq!(block_on(int_before(&mut stream, b'\n')).unwrap(), Some(128));
        assert_eq!(
            block_on(float_before(&mut stream, b',')).unwrap(),
            Some(12.5)
        );
        assert!(block_on(skip_until(&mut stream, b'\n')).unwrap());
        let text: heapless::String<16> = block_on(text_before(&mut stream, b'\n')).unwrap();
        assert_eq!(text.as_str(), "name");
    }
}
