//! Socket operations over the connection application command set:
//! `+CACID` / `+CAOPEN` / `+CASEND` / `+CARECV` / `+CASTATE` / `+CACLOSE`.

use embassy_time::{Duration, Instant};
use embedded_hal::digital::OutputPin;
use embedded_io_async::{ErrorType, Read, Write};

use crate::error::Error;
use crate::matcher::{self, Terminals, DEFAULT_TIMEOUT, ERROR_TERMINAL, OK_TERMINAL};
use crate::socket::SocketHandle;
use crate::Modem;

impl<AT, RST, const N: usize> Modem<AT, RST, N>
where
    AT: Read + Write,
    RST: OutputPin,
{
    /// Claim a mux slot for a new connection. Out-of-range requests wrap
    /// modulo the slot count; an occupied slot is overwritten.
    pub fn bind(&mut self, requested: usize) -> SocketHandle {
        self.sockets.bind(requested)
    }

    /// Deadline for each payload byte of a `+CARECV` exchange on this socket.
    pub fn set_read_timeout(&mut self, handle: SocketHandle, timeout: Duration) {
        if let Some(socket) = self.sockets.get_mut(handle) {
            socket.read_timeout = timeout;
        }
    }

    /// Open a plain TCP connection. `handle` is updated in place when the
    /// firmware grants a different mux than requested.
    pub async fn connect(
        &mut self,
        handle: &mut SocketHandle,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<bool, Error> {
        self.open_connection(handle, host, port, false, None, timeout)
            .await
    }

    /// Open a TLS connection, optionally pinning a CA certificate previously
    /// stored in the module's file system. The handshake itself happens in
    /// the firmware.
    pub async fn connect_secure(
        &mut self,
        handle: &mut SocketHandle,
        host: &str,
        port: u16,
        certificate: Option<&str>,
        timeout: Duration,
    ) -> Result<bool, Error> {
        self.open_connection(handle, host, port, true, certificate, timeout)
            .await
    }

    async fn open_connection(
        &mut self,
        handle: &mut SocketHandle,
        host: &str,
        port: u16,
        ssl: bool,
        certificate: Option<&str>,
        timeout: Duration,
    ) -> Result<bool, Error> {
        if self.sockets.get(*handle).is_none() {
            return Ok(false);
        }

        // Every connect starts from a closed, empty socket.
        self.close(*handle, Duration::from_secs(15)).await?;
        if let Some(socket) = self.sockets.get_mut(*handle) {
            socket.reset();
        }

        let mux = handle.0;
        self.send_at(format_args!("+CACID={}", mux)).await?;
        if self.wait(timeout, &Terminals::new()).await?.index() != 1 {
            return Ok(false);
        }

        if ssl {
            // TLS 1.2. The parameter names must be lower case, whatever the
            // manual says.
            self.send_at(format_args!("+CSSLCFG=\"sslversion\",0,3"))
                .await?;
            if self
                .wait(Duration::from_secs(5), &Terminals::new())
                .await?
                .index()
                != 1
            {
                return Ok(false);
            }
        }

        self.send_at(format_args!("+CASSLCFG={},ssl,{}", mux, ssl as u8))
            .await?;
        self.wait_default().await?;

        if ssl {
            self.send_at(format_args!("+CSSLCFG=\"ctxindex\",0")).await?;
            if self
                .wait(Duration::from_secs(5), &Terminals::first(b"+CSSLCFG:"))
                .await?
                .index()
                != 1
            {
                return Ok(false);
            }
            // Certificate information; nothing we need.
            matcher::skip_until(&mut self.stream, b'\n').await?;
            self.wait_default().await?;

            if let Some(certificate) = certificate {
                self.send_at(format_args!("+CASSLCFG={},CACERT,\"{}\"", mux, certificate))
                    .await?;
                if self
                    .wait(Duration::from_secs(5), &Terminals::new())
                    .await?
                    .index()
                    != 1
                {
                    return Ok(false);
                }
            }

            self.send_at(format_args!("+CASSLCFG={},protocol,0", mux))
                .await?;
            self.wait_default().await?;

            self.send_at(format_args!("+CSSLCFG=\"sni\",{},\"{}\"", mux, host))
                .await?;
            self.wait_default().await?;
        }

        match self.profile().caopen_pdp_index {
            Some(pdp) => {
                self.send_at(format_args!(
                    "+CAOPEN={},{},\"TCP\",\"{}\",{}",
                    mux, pdp, host, port
                ))
                .await?
            }
            None => {
                self.send_at(format_args!("+CAOPEN={},\"{}\",{}", mux, host, port))
                    .await?
            }
        }
        if self
            .wait(timeout, &Terminals::first(b"\r\n+CAOPEN:"))
            .await?
            .index()
            != 1
        {
            return Ok(false);
        }

        // `+CAOPEN: <cid>,<result>` — some firmware grants a different cid
        // than requested; re-register under the granted one.
        let granted = matcher::int_before(&mut self.stream, b',').await?;
        let result = matcher::int_before(&mut self.stream, b'\n').await?;
        self.wait_default().await?;

        if let Some(granted) = granted {
            if granted >= 0 && granted as usize != handle.0 {
                *handle = self.sockets.rebind(*handle, granted as usize);
            }
        }

        let opened = result == Some(0);
        if !opened {
            warn!("connection to {}:{} failed, result {:?}", host, port, result);
        }
        if let Some(socket) = self.sockets.get_mut(*handle) {
            socket.connected = opened;
        }
        Ok(opened)
    }

    /// Hand up to one send chunk to the firmware. Returns how many bytes it
    /// actually accepted — possibly fewer than offered; the caller resends
    /// the remainder.
    pub async fn write(&mut self, handle: SocketHandle, data: &[u8]) -> Result<usize, Error> {
        let Some(socket) = self.sockets.get(handle) else {
            return Ok(0);
        };
        if !socket.connected || data.is_empty() {
            return Ok(0);
        }

        let chunk = data.len().min(self.profile().max_send_chunk);
        self.send_at(format_args!("+CASEND={},{}", handle.0, chunk))
            .await?;
        if self
            .wait(DEFAULT_TIMEOUT, &Terminals::first(b">"))
            .await?
            .index()
            != 1
        {
            return Ok(0);
        }

        // Payload goes straight to the wire, not through the command path.
        self.write_raw(&data[..chunk]).await?;
        self.flush_raw().await?;

        // `+CASEND: <cid>,<result>,<sendlen>` follows the modem's own OK.
        if self
            .wait(DEFAULT_TIMEOUT, &Terminals::first(b"\r\n+CASEND:"))
            .await?
            .index()
            != 1
        {
            return Ok(0);
        }
        matcher::skip_until(&mut self.stream, b',').await?;
        if matcher::int_before(&mut self.stream, b',').await? != Some(0) {
            return Ok(0);
        }
        let accepted = matcher::int_before(&mut self.stream, b'\n').await?.unwrap_or(0);
        Ok((accepted.max(0) as usize).min(chunk))
    }

    /// Drain locally buffered bytes, then pull more from the firmware while
    /// it reports any. A closed socket reads only what is already local.
    pub async fn read(&mut self, handle: SocketHandle, buf: &mut [u8]) -> Result<usize, Error> {
        let Some(socket) = self.sockets.get_mut(handle) else {
            return Ok(0);
        };
        let mut count = socket.rx.dequeue_slice(buf);

        while count < buf.len() {
            let Some(socket) = self.sockets.get(handle) else {
                break;
            };
            if !socket.connected || socket.available == 0 {
                break;
            }
            if self.socket_ingress(handle).await? == 0 {
                break;
            }
            if let Some(socket) = self.sockets.get_mut(handle) {
                count += socket.rx.dequeue_slice(&mut buf[count..]);
            }
        }
        Ok(count)
    }

    /// One `+CARECV` exchange: request a bounded chunk, then pull exactly the
    /// confirmed count straight off the wire. Losing a byte here would
    /// desynchronize every later exchange.
    async fn socket_ingress(&mut self, handle: SocketHandle) -> Result<usize, Error> {
        let (requested, read_timeout) = {
            let Some(socket) = self.sockets.get(handle) else {
                return Ok(0);
            };
            let ceiling = self.profile().max_recv_chunk;
            (
                socket.available.min(socket.rx.window()).min(ceiling),
                socket.read_timeout,
            )
        };
        if requested == 0 {
            return Ok(0);
        }

        self.send_at(format_args!("+CARECV={},{}", handle.0, requested))
            .await?;
        if self
            .wait(DEFAULT_TIMEOUT, &Terminals::first(b"+CARECV:"))
            .await?
            .index()
            != 1
        {
            return Ok(0);
        }

        let confirmed = matcher::int_before(&mut self.stream, b',').await?.unwrap_or(-1);
        if confirmed <= 0 {
            self.wait_default().await?;
            self.poll_available(handle).await?;
            return Ok(0);
        }

        for _ in 0..confirmed {
            match matcher::read_byte_timeout(&mut self.stream, read_timeout).await? {
                Some(byte) => {
                    if let Some(socket) = self.sockets.get_mut(handle) {
                        socket.rx.enqueue_byte(byte);
                    }
                }
                None => break,
            }
        }
        self.wait_default().await?;

        // Re-establish an accurate count before anyone trusts the cache
        // again.
        self.poll_available(handle).await?;
        Ok(confirmed as usize)
    }

    /// Unread byte count: local buffer plus the firmware-side cache. A cold
    /// cache (zero, or flagged by a data indication) triggers a combined
    /// liveness + availability poll.
    pub async fn available(&mut self, handle: SocketHandle) -> Result<usize, Error> {
        let Some(socket) = self.sockets.get(handle) else {
            return Ok(0);
        };
        let needs_poll = socket.rx.is_empty()
            && (socket.got_data || (socket.available == 0 && socket.connected));
        if needs_poll {
            if let Some(socket) = self.sockets.get_mut(handle) {
                socket.got_data = false;
            }
            self.poll_available(handle).await?;
        }

        let Some(socket) = self.sockets.get(handle) else {
            return Ok(0);
        };
        Ok(socket.rx.len() + socket.available)
    }

    /// Cached connection state. Locally buffered bytes keep a socket
    /// readable even after the peer closed.
    pub async fn connected(&mut self, handle: SocketHandle) -> Result<bool, Error> {
        let Some(socket) = self.sockets.get(handle) else {
            return Ok(false);
        };
        if !socket.rx.is_empty() {
            return Ok(true);
        }
        Ok(socket.connected)
    }

    /// Ask the firmware how much it buffered, for every mux in one exchange.
    /// Muxes the reply skips hold nothing and are zeroed. Returns the count
    /// for `handle`.
    pub async fn poll_available(&mut self, handle: SocketHandle) -> Result<usize, Error> {
        if self.sockets.get(handle).is_none() {
            return Ok(0);
        }
        // Asking about buffered data with no live connection locks the
        // module up until a power cycle; check liveness first.
        if !self.poll_connected(handle).await? {
            return Ok(0);
        }

        let status_timeout = self.profile().status_timeout;
        self.send_at(format_args!("+CARECV?")).await?;
        let terminals = Terminals::new()
            .with(0, b"+CARECV:")
            .with(1, OK_TERMINAL)
            .with(2, ERROR_TERMINAL);

        let mut mux = 0;
        while mux < N {
            let result = self.wait(status_timeout, &terminals).await?;
            match result.index() {
                1 => {
                    let ret_mux = matcher::int_before(&mut self.stream, b',').await?.unwrap_or(-1);
                    let count = matcher::int_before(&mut self.stream, b'\n').await?.unwrap_or(0);
                    if ret_mux >= 0 {
                        let ret_mux = ret_mux as usize;
                        if let Some(socket) = self.sockets.get_mut(SocketHandle(ret_mux)) {
                            socket.available = count.max(0) as usize;
                            socket.got_data = false;
                        }
                        // Only muxes holding data report; the ones skipped in
                        // between hold nothing.
                        if ret_mux > mux {
                            for missing in mux..ret_mux {
                                if let Some(socket) = self.sockets.get_mut(SocketHandle(missing)) {
                                    socket.available = 0;
                                }
                            }
                            mux = ret_mux;
                        }
                    }
                }
                2 => {
                    // OK already — every remaining mux holds nothing.
                    for missing in mux..N {
                        if let Some(socket) = self.sockets.get_mut(SocketHandle(missing)) {
                            socket.available = 0;
                        }
                    }
                    break;
                }
                _ => break,
            }
            if mux == N - 1 {
                // Every mux reported; the closing OK is still in the stream.
                self.wait_default().await?;
            }
            mux += 1;
        }

        self.poll_connected(handle).await?;
        Ok(self.sockets.get(handle).map(|s| s.available).unwrap_or(0))
    }

    /// Ask the firmware which connections are still up, for every mux in one
    /// exchange. Returns the state for `handle`.
    pub async fn poll_connected(&mut self, handle: SocketHandle) -> Result<bool, Error> {
        if self.sockets.get(handle).is_none() {
            return Ok(false);
        }

        let status_timeout = self.profile().status_timeout;
        self.send_at(format_args!("+CASTATE?")).await?;
        let terminals = Terminals::new()
            .with(0, b"+CASTATE:")
            .with(1, OK_TERMINAL)
            .with(2, ERROR_TERMINAL);

        let mut mux = 0;
        while mux < N {
            let result = self.wait(status_timeout, &terminals).await?;
            match result.index() {
                1 => {
                    let ret_mux = matcher::int_before(&mut self.stream, b',').await?.unwrap_or(-1);
                    let state = matcher::int_before(&mut self.stream, b'\n').await?.unwrap_or(0);
                    if ret_mux >= 0 {
                        let ret_mux = ret_mux as usize;
                        if let Some(socket) = self.sockets.get_mut(SocketHandle(ret_mux)) {
                            socket.connected = state == 1;
                            if state != 1 {
                                socket.available = 0;
                            }
                        }
                        if ret_mux > mux {
                            for missing in mux..ret_mux {
                                if let Some(socket) = self.sockets.get_mut(SocketHandle(missing)) {
                                    socket.connected = false;
                                    socket.available = 0;
                                }
                            }
                            mux = ret_mux;
                        }
                    }
                }
                2 => {
                    for missing in mux..N {
                        if let Some(socket) = self.sockets.get_mut(SocketHandle(missing)) {
                            socket.connected = false;
                            socket.available = 0;
                        }
                    }
                    break;
                }
                _ => break,
            }
            if mux == N - 1 {
                self.wait_default().await?;
            }
            mux += 1;
        }

        Ok(self.sockets.get(handle).map(|s| s.connected).unwrap_or(false))
    }

    /// Drain and discard whatever is still buffered (bounded by `max_wait`),
    /// then close. Closing is best-effort: locally the socket is gone no
    /// matter what the firmware answers.
    pub async fn close(&mut self, handle: SocketHandle, max_wait: Duration) -> Result<(), Error> {
        self.dump_buffer(handle, max_wait).await?;

        self.send_at(format_args!("+CACLOSE={}", handle.0)).await?;
        if let Some(socket) = self.sockets.get_mut(handle) {
            socket.connected = false;
            socket.available = 0;
        }
        self.wait(Duration::from_secs(3), &Terminals::new()).await?;
        Ok(())
    }

    async fn dump_buffer(&mut self, handle: SocketHandle, max_wait: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + max_wait;
        while Instant::now() < deadline {
            match self.sockets.get_mut(handle) {
                Some(socket) => socket.rx.clear(),
                None => return Ok(()),
            }
            if self.available(handle).await? == 0 {
                break;
            }
            if self.socket_ingress(handle).await? == 0 {
                break;
            }
        }
        if let Some(socket) = self.sockets.get_mut(handle) {
            socket.rx.clear();
        }
        Ok(())
    }

    /// Borrow one socket as a byte stream, for stacking an MQTT or HTTP
    /// client on top.
    pub fn socket_client(&mut self, handle: SocketHandle) -> SocketClient<'_, AT, RST, N> {
        SocketClient {
            modem: self,
            handle,
        }
    }
}

/// `embedded-io-async` adapter over one socket.
pub struct SocketClient<'a, AT, RST, const N: usize> {
    modem: &'a mut Modem<AT, RST, N>,
    handle: SocketHandle,
}

impl<AT, RST, const N: usize> ErrorType for SocketClient<'_, AT, RST, N> {
    type Error = Error;
}

impl<AT, RST, const N: usize> Read for SocketClient<'_, AT, RST, N>
where
    AT: Read + Write,
    RST: OutputPin,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        loop {
            let count = self.modem.read(self.handle, buf).await?;
            if count > 0 || buf.is_empty() {
                return Ok(count);
            }
            if !self.modem.connected(self.handle).await? {
                // Closed and drained: end of stream.
                return Ok(0);
            }
            self.modem.maintain().await?;
        }
    }
}

impl<AT, RST, const N: usize> Write for SocketClient<'_, AT, RST, N>
where
    AT: Read + Write,
    RST: OutputPin,
{
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.modem.write(self.handle, buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NoPin;
    use crate::modules::Module;
    use crate::test_helpers::MockSerial;
    use embassy_futures::block_on;

    type TestModem = Modem<MockSerial, NoPin, 2>;

    fn connected_modem() -> (TestModem, SocketHandle) {
        let mut serial = MockSerial::new();
        // connect(): close-first, mux select, plain-TCP ssl flag, open.
        serial.expect(b"AT+CACLOSE=0\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CACID=0\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CASSLCFG=0,ssl,0\r\n", b"\r\nOK\r\n");
        serial.expect(
            b"AT+CAOPEN=0,\"example.com\",80\r\n",
            b"\r\n+CAOPEN: 0,0\r\n\r\nOK\r\n",
        );

        let mut modem: TestModem = Modem::new(serial, Module::Sim7000);
        let mut handle = modem.bind(0);
        let opened = block_on(modem.connect(
            &mut handle,
            "example.com",
            80,
            Duration::from_secs(75),
        ))
        .unwrap();
        assert!(opened);
        (modem, handle)
    }

    #[test]
    fn scenario_connect_partial_send_urc_close() {
        let (mut modem, handle) = connected_modem();
        assert!(block_on(modem.connected(handle)).unwrap());

        // 17 bytes offered, firmware accepts 10.
        modem.stream.expect(b"AT+CASEND=0,17\r\n", b"\r\n>");
        modem
            .stream
            .expect(b"0123456789abcdefg", b"\r\nOK\r\n\r\n+CASEND: 0,0,10\r\n");
        let written = block_on(modem.write(handle, b"0123456789abcdefg")).unwrap();
        assert_eq!(written, 10);

        // A data URC with an explicit length refreshes the cache; the
        // following available() must not poll.
        modem.stream.push_rx(b"+CARECV: 0,42\r\n");
        block_on(modem.maintain()).unwrap();
        let tx_before = modem.stream.tx.len();
        assert_eq!(block_on(modem.available(handle)).unwrap(), 42);
        assert_eq!(modem.stream.tx.len(), tx_before);

        // Peer closes; a read afterwards must not issue a receive command.
        modem.stream.push_rx(b"+CASTATE: 0,0\r\n");
        block_on(modem.maintain()).unwrap();
        assert!(!block_on(modem.connected(handle)).unwrap());

        let tx_before = modem.stream.tx.len();
        let mut buf = [0u8; 5];
        assert_eq!(block_on(modem.read(handle, &mut buf)).unwrap(), 0);
        assert_eq!(modem.stream.tx.len(), tx_before);
    }

    #[test]
    fn failed_open_reports_result_code_as_false() {
        let mut serial = MockSerial::new();
        serial.expect(b"AT+CACLOSE=0\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CACID=0\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CASSLCFG=0,ssl,0\r\n", b"\r\nOK\r\n");
        // Result 23: remote refused.
        serial.expect(
            b"AT+CAOPEN=0,\"example.com\",81\r\n",
            b"\r\n+CAOPEN: 0,23\r\n\r\nOK\r\n",
        );

        let mut modem: TestModem = Modem::new(serial, Module::Sim7000);
        let mut handle = modem.bind(0);
        let opened = block_on(modem.connect(
            &mut handle,
            "example.com",
            81,
            Duration::from_secs(75),
        ))
        .unwrap();
        assert!(!opened);
        assert!(!block_on(modem.connected(handle)).unwrap());
    }

    #[test]
    fn granted_mux_rebinds_the_socket() {
        let mut serial = MockSerial::new();
        serial.expect(b"AT+CACLOSE=0\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CACID=0\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CASSLCFG=0,ssl,0\r\n", b"\r\nOK\r\n");
        // Firmware picks mux 1 instead of the requested 0.
        serial.expect(
            b"AT+CAOPEN=0,\"example.com\",80\r\n",
            b"\r\n+CAOPEN: 1,0\r\n\r\nOK\r\n",
        );

        let mut modem: TestModem = Modem::new(serial, Module::Sim7000);
        let mut handle = modem.bind(0);
        assert!(block_on(modem.connect(
            &mut handle,
            "example.com",
            80,
            Duration::from_secs(75),
        ))
        .unwrap());

        assert_eq!(handle, SocketHandle(1));
        assert!(modem.sockets.get(SocketHandle(0)).is_none());
        assert!(block_on(modem.connected(handle)).unwrap());
    }

    #[test]
    fn receive_pulls_confirmed_count_into_the_ring() {
        let (mut modem, handle) = connected_modem();

        if let Some(socket) = modem.sockets.get_mut(handle) {
            socket.available = 5;
        }
        modem
            .stream
            .expect(b"AT+CARECV=0,5\r\n", b"+CARECV: 5,hello\r\nOK\r\n");
        // The post-read poll chain.
        modem
            .stream
            .expect(b"AT+CASTATE?\r\n", b"+CASTATE: 0,1\r\n\r\nOK\r\n");
        modem.stream.expect(b"AT+CARECV?\r\n", b"\r\nOK\r\n");
        modem
            .stream
            .expect(b"AT+CASTATE?\r\n", b"+CASTATE: 0,1\r\n\r\nOK\r\n");

        let mut buf = [0u8; 5];
        let count = block_on(modem.read(handle, &mut buf)).unwrap();
        assert_eq!(count, 5);
        assert_eq!(&buf, b"hello");
        // The all-muxes walk zeroed the firmware-side cache.
        assert_eq!(modem.sockets.get(handle).unwrap().available, 0);
    }

    #[test]
    fn status_walk_zero_fills_skipped_muxes() {
        let (mut modem, handle) = connected_modem();
        let second = modem.bind(1);
        {
            // Pretend mux 1 was opened as well and both carry stale counts.
            let socket = modem.sockets.get_mut(second).unwrap();
            socket.connected = true;
            socket.available = 7;
        }
        if let Some(socket) = modem.sockets.get_mut(handle) {
            socket.available = 7;
        }

        modem.stream.expect(
            b"AT+CASTATE?\r\n",
            b"+CASTATE: 0,1\r\n+CASTATE: 1,1\r\n\r\nOK\r\n",
        );
        // Only mux 1 reports data; mux 0 must be zero-filled.
        modem
            .stream
            .expect(b"AT+CARECV?\r\n", b"+CARECV: 1,99\r\n\r\nOK\r\n");
        modem.stream.expect(
            b"AT+CASTATE?\r\n",
            b"+CASTATE: 0,1\r\n+CASTATE: 1,1\r\n\r\nOK\r\n",
        );

        let available = block_on(modem.poll_available(handle)).unwrap();
        assert_eq!(available, 0);
        assert_eq!(modem.sockets.get(second).unwrap().available, 99);
    }

    #[test]
    fn socket_client_reads_and_writes_as_a_byte_stream() {
        let (mut modem, handle) = connected_modem();
        modem
            .sockets
            .get_mut(handle)
            .unwrap()
            .rx
            .enqueue_slice(b"ping");
        modem.stream.expect(b"AT+CASEND=0,4\r\n", b"\r\n>");
        modem
            .stream
            .expect(b"pong", b"\r\nOK\r\n\r\n+CASEND: 0,0,4\r\n");

        let mut client = modem.socket_client(handle);
        let mut buf = [0u8; 8];
        let count = block_on(client.read(&mut buf)).unwrap();
        assert_eq!(&buf[..count], b"ping");

        let written = block_on(client.write(b"pong")).unwrap();
        assert_eq!(written, 4);
    }

    #[test]
    fn close_is_locally_honored_even_on_error() {
        let (mut modem, handle) = connected_modem();

        // dump_buffer's availability probe runs before the close command.
        modem
            .stream
            .expect(b"AT+CASTATE?\r\n", b"+CASTATE: 0,1\r\n\r\nOK\r\n");
        modem.stream.expect(b"AT+CARECV?\r\n", b"\r\nOK\r\n");
        modem
            .stream
            .expect(b"AT+CASTATE?\r\n", b"+CASTATE: 0,1\r\n\r\nOK\r\n");
        modem.stream.expect(b"AT+CACLOSE=0\r\n", b"\r\nERROR\r\n");

        block_on(modem.close(handle, Duration::from_secs(1))).unwrap();
        assert!(!block_on(modem.connected(handle)).unwrap());
    }
}
