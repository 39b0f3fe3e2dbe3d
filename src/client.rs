use core::fmt::Write as _;

use embassy_time::{Duration, Instant, Timer};
use embedded_hal::digital::OutputPin;
use embedded_io_async::{Error as _, Read, Write};
use heapless::String;

use crate::config::NoPin;
use crate::error::Error;
use crate::gsm::{Gsm, SimStatus};
use crate::matcher::{self, MatchResult, Terminals, UrcSink, DEFAULT_TIMEOUT};
use crate::modules::{Module, VendorProfile, SIM7000_MUX_COUNT};
use crate::socket::{SocketHandle, SocketSet};

/// Longest `AT...` line the session will format, SNI and certificate names
/// included.
pub(crate) const COMMAND_CAPACITY: usize = 144;

/// One modem session per physical serial link.
///
/// Owns the transport, the vendor profile and the socket registry; all
/// command traffic is strictly half-duplex request/response, with URCs folded
/// into whichever wait happens to be in flight. `N` is the registry width and
/// should match [`Module::max_mux`] (see the `MUX_COUNT` consts in
/// [`crate::modules`]).
pub struct Modem<AT, RST = NoPin, const N: usize = SIM7000_MUX_COUNT> {
    pub(crate) stream: AT,
    pub(crate) module: Module,
    rst_pin: Option<RST>,
    pub(crate) sockets: SocketSet<N>,
    initialized: bool,
    pending_reset: bool,
}

/// Applies intercepted URCs to the socket registry.
struct SessionSink<'a, const N: usize> {
    sockets: &'a mut SocketSet<N>,
    pending_reset: &'a mut bool,
    recv_ceiling: usize,
}

impl<const N: usize> UrcSink for SessionSink<'_, N> {
    fn data_available(&mut self, mux: usize, len: usize) {
        if let Some(socket) = self.sockets.get_mut(SocketHandle(mux)) {
            if len <= self.recv_ceiling {
                // The URC carried a believable length; the cache is fresh.
                socket.available = len;
                socket.got_data = false;
            } else {
                socket.got_data = true;
            }
        }
    }

    fn data_indication(&mut self, mux: usize) {
        if let Some(socket) = self.sockets.get_mut(SocketHandle(mux)) {
            socket.got_data = true;
        }
    }

    fn socket_closed(&mut self, mux: usize) {
        if let Some(socket) = self.sockets.get_mut(SocketHandle(mux)) {
            socket.connected = false;
            socket.available = 0;
        }
    }

    fn modem_reset(&mut self) {
        *self.pending_reset = true;
    }
}

impl<AT, const N: usize> Modem<AT, NoPin, N>
where
    AT: Read + Write,
{
    pub fn new(stream: AT, module: Module) -> Self {
        Self::build(stream, module, None)
    }
}

impl<AT, RST, const N: usize> Modem<AT, RST, N>
where
    AT: Read + Write,
    RST: OutputPin,
{
    pub fn with_reset_pin(stream: AT, module: Module, rst_pin: RST) -> Self {
        Self::build(stream, module, Some(rst_pin))
    }

    fn build(stream: AT, module: Module, rst_pin: Option<RST>) -> Self {
        debug_assert!(N <= module.max_mux());
        Self {
            stream,
            module,
            rst_pin,
            sockets: SocketSet::new(),
            initialized: false,
            pending_reset: false,
        }
    }

    pub(crate) fn profile(&self) -> &'static VendorProfile {
        self.module.profile()
    }

    /// Format and send one `AT...` command line.
    pub(crate) async fn send_at(&mut self, args: core::fmt::Arguments<'_>) -> Result<(), Error> {
        let mut line: String<COMMAND_CAPACITY> = String::new();
        line.push_str("AT").map_err(|_| Error::CommandTooLong)?;
        write!(line, "{}", args)?;
        trace!("-> {}", line.as_str());
        self.write_raw(line.as_bytes()).await?;
        self.write_raw(self.profile().line_term).await?;
        self.flush_raw().await
    }

    pub(crate) async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| Error::Serial(e.kind()))
    }

    pub(crate) async fn flush_raw(&mut self) -> Result<(), Error> {
        self.stream
            .flush()
            .await
            .map_err(|e| Error::Serial(e.kind()))
    }

    /// Run the matcher without the reset-recovery hook. The init script uses
    /// this; everything else goes through [`wait`](Self::wait).
    pub(crate) async fn wait_raw(
        &mut self,
        timeout: Duration,
        terminals: &Terminals<'_>,
    ) -> Result<MatchResult, Error> {
        let profile = self.module.profile();
        let mut sink = SessionSink {
            sockets: &mut self.sockets,
            pending_reset: &mut self.pending_reset,
            recv_ceiling: profile.max_recv_chunk,
        };
        matcher::wait_response(&mut self.stream, profile.urcs, &mut sink, timeout, terminals).await
    }

    /// Wait for a terminal, then self-heal if the boot banner was spotted
    /// mid-stream: the module rebooted, so the init script is re-run before
    /// the caller regains control.
    pub(crate) async fn wait(
        &mut self,
        timeout: Duration,
        terminals: &Terminals<'_>,
    ) -> Result<MatchResult, Error> {
        let result = self.wait_raw(timeout, terminals).await?;
        if self.pending_reset {
            self.pending_reset = false;
            if self.initialized {
                info!("re-initializing after unexpected module reset");
                self.run_init_script().await?;
            }
        }
        Ok(result)
    }

    /// The degenerate wait: a second of patience and the stock terminals.
    pub(crate) async fn wait_default(&mut self) -> Result<MatchResult, Error> {
        self.wait(DEFAULT_TIMEOUT, &Terminals::new()).await
    }

    /// Probe with bare `AT` until the module answers or `timeout` passes.
    pub async fn test_at(&mut self, timeout: Duration) -> Result<bool, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            self.send_at(format_args!("")).await?;
            if self
                .wait_raw(Duration::from_millis(200), &Terminals::new())
                .await?
                .index()
                == 1
            {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            Timer::after(Duration::from_millis(100)).await;
        }
    }

    /// The command sequence that brings the module to a known state. Must not
    /// route through [`wait`](Self::wait) — this is also the reset-recovery
    /// path.
    async fn run_init_script(&mut self) -> Result<bool, Error> {
        if !self.test_at(Duration::from_secs(10)).await? {
            return Ok(false);
        }

        // Echo off
        self.send_at(format_args!("E0")).await?;
        if self
            .wait_raw(DEFAULT_TIMEOUT, &Terminals::new())
            .await?
            .index()
            != 1
        {
            return Ok(false);
        }

        // Verbose error codes when a diagnostic sink is compiled in
        let cmee = if cfg!(any(feature = "defmt", feature = "log")) {
            2
        } else {
            0
        };
        self.send_at(format_args!("+CMEE={}", cmee)).await?;
        self.wait_raw(DEFAULT_TIMEOUT, &Terminals::new()).await?;

        // Local timestamps from the network
        self.send_at(format_args!("+CLTS=1")).await?;
        if self
            .wait_raw(Duration::from_secs(10), &Terminals::new())
            .await?
            .index()
            != 1
        {
            return Ok(false);
        }

        self.pending_reset = false;
        Ok(true)
    }

    /// Bring the module to a known state: probe, echo off, error reporting,
    /// network timestamps, SIM readiness. Unlocks the SIM with `pin` when it
    /// asks for one.
    pub async fn init(&mut self, pin: Option<&str>) -> Result<bool, Error> {
        if !self.run_init_script().await? {
            return Ok(false);
        }
        self.initialized = true;

        let name = self.modem_name().await?;
        info!("module identified as {}", name.as_str());

        let status = self.sim_status().await?;
        match (status, pin) {
            (SimStatus::Ready, _) => Ok(true),
            (SimStatus::PinRequired, Some(pin)) => {
                self.unlock_sim(pin).await?;
                Ok(self.sim_status().await? == SimStatus::Ready)
            }
            // Locked with no PIN on hand still counts as alive.
            (SimStatus::PinRequired, None) => Ok(true),
            _ => Ok(false),
        }
    }

    /// Reboot the module and re-initialize. Prefers the reset line when one
    /// is wired, the `+CFUN` cycle otherwise.
    pub async fn restart(&mut self, pin: Option<&str>) -> Result<bool, Error> {
        self.initialized = false;
        if self.rst_pin.is_some() {
            self.hard_reset().await;
        } else {
            self.send_at(format_args!("E0")).await?;
            self.wait_default().await?;
            if !self.set_functionality(0, false).await? {
                return Ok(false);
            }
            if !self.set_functionality(1, true).await? {
                return Ok(false);
            }
            // The ready banner beats the URC table here: it is the expected
            // terminal, not an unexpected reset.
            self.wait(self.module.reboot_wait(), &Terminals::first(b"SMS Ready"))
                .await?;
        }
        self.init(pin).await
    }

    async fn hard_reset(&mut self) {
        if let Some(rst) = self.rst_pin.as_mut() {
            rst.set_low().ok();
            Timer::after(Duration::from_millis(100)).await;
            rst.set_high().ok();
            Timer::after(self.module.boot_wait()).await;
        }
    }

    /// `AT+CFUN=<fun>[,1]`; the optional reset flag reboots the module.
    pub async fn set_functionality(&mut self, fun: u8, reset: bool) -> Result<bool, Error> {
        if reset {
            self.send_at(format_args!("+CFUN={},1", fun)).await?;
        } else {
            self.send_at(format_args!("+CFUN={}", fun)).await?;
        }
        Ok(self
            .wait(Duration::from_secs(10), &Terminals::new())
            .await?
            .index()
            == 1)
    }

    /// Organized power-down. The module confirms before dropping off the bus.
    pub async fn power_off(&mut self) -> Result<bool, Error> {
        self.send_at(format_args!("+CPOWD=1")).await?;
        Ok(self
            .wait(DEFAULT_TIMEOUT, &Terminals::first(b"NORMAL POWER DOWN"))
            .await?
            .index()
            == 1)
    }

    /// Slow-clock (sleep) control. Serial communication stops while enabled;
    /// pull DTR low to talk to the module again.
    pub async fn sleep_enable(&mut self, enable: bool) -> Result<bool, Error> {
        self.send_at(format_args!("+CSCLK={}", enable as u8)).await?;
        Ok(self.wait_default().await?.index() == 1)
    }

    /// Model identifier reported by `AT+GMM`, e.g. `SIM7000G`.
    pub async fn modem_name(&mut self) -> Result<String<32>, Error> {
        self.send_at(format_args!("+GMM")).await?;
        let result = self.wait(Duration::from_secs(5), &Terminals::new()).await?;
        let mut name = String::new();
        if result.index() == 1 {
            for &byte in matcher::trim_ascii(&result.data) {
                let ch = if byte == b'_' { ' ' } else { byte as char };
                if name.push(ch).is_err() {
                    break;
                }
            }
        }
        Ok(name)
    }

    /// Pump URCs while the application is idle, and refresh any socket whose
    /// data-indication flag is set.
    pub async fn maintain(&mut self) -> Result<(), Error> {
        let mut flagged = None;
        for socket in self.sockets.iter_mut() {
            if socket.got_data {
                socket.got_data = false;
                flagged = Some(socket.handle());
            }
        }
        // One status walk covers every mux, so a single poll suffices.
        if let Some(handle) = flagged {
            self.poll_available(handle).await?;
        }
        self.wait(Duration::from_millis(15), &Terminals::none())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockSerial;
    use embassy_futures::block_on;

    fn scripted_init(serial: &mut MockSerial) {
        serial.expect(b"AT\r\n", b"\r\nOK\r\n");
        serial.expect(b"ATE0\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CMEE=0\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CLTS=1\r\n", b"\r\nOK\r\n");
    }

    fn scripted_full_init(serial: &mut MockSerial) {
        scripted_init(serial);
        serial.expect(b"AT+GMM\r\n", b"\r\nSIM7000G\r\n\r\nOK\r\n");
        serial.expect(b"AT+CPIN?\r\n", b"\r\n+CPIN: READY\r\n\r\nOK\r\n");
    }

    #[test]
    fn init_brings_up_a_ready_module() {
        let mut serial = MockSerial::new();
        scripted_full_init(&mut serial);

        let mut modem: Modem<MockSerial, NoPin, 2> = Modem::new(serial, Module::Sim7000);
        assert!(block_on(modem.init(None)).unwrap());

        let tx = modem.stream.tx_str();
        assert!(tx.contains("ATE0\r\n"));
        assert!(tx.contains("AT+CLTS=1\r\n"));
    }

    #[test]
    fn modem_name_strips_framing_and_underscores() {
        let mut serial = MockSerial::new();
        serial.expect(b"AT+GMM\r\n", b"\r\nSIM7000G_A\r\n\r\nOK\r\n");

        let mut modem: Modem<MockSerial, NoPin, 2> = Modem::new(serial, Module::Sim7000);
        let name = block_on(modem.modem_name()).unwrap();
        assert_eq!(name.as_str(), "SIM7000G A");
    }

    #[test]
    fn unexpected_reset_banner_reruns_the_init_script() {
        let mut serial = MockSerial::new();
        scripted_full_init(&mut serial);

        let mut modem: Modem<MockSerial, NoPin, 2> = Modem::new(serial, Module::Sim7000);
        assert!(block_on(modem.init(None)).unwrap());
        let commands_before = modem.stream.tx.len();

        // A boot banner folded into an ordinary exchange must trigger the
        // recovery script before the call returns.
        scripted_init(&mut modem.stream);
        modem.stream.push_rx(b"\r\nSMS Ready\r\n\r\nOK\r\n");
        let result = block_on(modem.wait_default()).unwrap();

        assert_eq!(result.index(), 1);
        let replayed =
            std::string::String::from_utf8_lossy(&modem.stream.tx[commands_before..]).into_owned();
        assert!(replayed.contains("ATE0\r\n"));
        assert!(replayed.contains("AT+CLTS=1\r\n"));
    }

    #[test]
    fn test_at_gives_up_after_the_deadline() {
        let serial = MockSerial::new();
        let mut modem: Modem<MockSerial, NoPin, 2> = Modem::new(serial, Module::Sim7000);
        assert!(!block_on(modem.test_at(Duration::from_millis(350))).unwrap());
        assert!(modem.stream.tx_str().contains("AT\r\n"));
    }
}
