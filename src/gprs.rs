//! Packet data: attach, application-network activation, local address.

use embassy_time::Duration;
use embedded_hal::digital::OutputPin;
use embedded_io_async::{Read, Write};
use heapless::String;
use no_std_net::IpAddr;

use crate::error::Error;
use crate::matcher::{self, Terminals, DEFAULT_TIMEOUT};
use crate::Modem;

/// Packet-data capability.
#[allow(async_fn_in_trait)]
pub trait Gprs {
    async fn gprs_connect(
        &mut self,
        apn: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<bool, Error>;
    async fn gprs_disconnect(&mut self) -> Result<bool, Error>;
    async fn local_ip(&mut self) -> Result<Option<IpAddr>, Error>;
}

impl<AT, RST, const N: usize> Gprs for Modem<AT, RST, N>
where
    AT: Read + Write,
    RST: OutputPin,
{
    /// Attach and bring up the application network connection.
    ///
    /// The PDP context is defined but deliberately *not* activated by hand —
    /// `+CNACT` takes care of that, and doing both confuses the firmware.
    async fn gprs_connect(
        &mut self,
        apn: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<bool, Error> {
        self.gprs_disconnect().await?;

        self.send_at(format_args!("+CGDCONT=1,\"IP\",\"{}\"", apn))
            .await?;
        self.wait_default().await?;

        self.send_at(format_args!("+CGATT=1")).await?;
        if self
            .wait(Duration::from_secs(60), &Terminals::new())
            .await?
            .index()
            != 1
        {
            return Ok(false);
        }

        // Bearer credentials for applications based on IP.
        match (user, password) {
            (Some(user), Some(password)) => {
                self.send_at(format_args!(
                    "+CNCFG=1,\"{}\",\"{}\",\"{}\"",
                    apn, user, password
                ))
                .await?
            }
            (Some(user), None) => {
                self.send_at(format_args!("+CNCFG=1,\"{}\",\"{}\"", apn, user))
                    .await?
            }
            _ => self.send_at(format_args!("+CNCFG=1,\"{}\"", apn)).await?,
        }
        self.wait_default().await?;

        // Activation flakes on a fresh attach; re-issue the whole command a
        // few times rather than trusting a single answer.
        let mut active = false;
        let mut tries = 0;
        while !active && tries < 5 {
            self.send_at(format_args!("+CNACT=1,\"{}\"", apn)).await?;
            let result = self
                .wait(
                    Duration::from_secs(60),
                    &Terminals::new()
                        .with(0, b"\r\n+APP PDP: ACTIVE")
                        .with(1, b"\r\n+APP PDP: DEACTIVE"),
                )
                .await?;
            self.wait_default().await?;
            active = result.index() == 1;
            tries += 1;
        }
        Ok(active)
    }

    /// `+CNACT=0` closes *all* open application connections.
    async fn gprs_disconnect(&mut self) -> Result<bool, Error> {
        self.send_at(format_args!("+CNACT=0")).await?;
        if self
            .wait(Duration::from_secs(60), &Terminals::new())
            .await?
            .index()
            != 1
        {
            return Ok(false);
        }

        self.send_at(format_args!("+CGATT=0")).await?;
        Ok(self
            .wait(Duration::from_secs(60), &Terminals::new())
            .await?
            .index()
            == 1)
    }

    /// Address of the active application connection, if any.
    async fn local_ip(&mut self) -> Result<Option<IpAddr>, Error> {
        self.send_at(format_args!("+CNACT?")).await?;
        if self
            .wait(DEFAULT_TIMEOUT, &Terminals::first(b"+CNACT:"))
            .await?
            .index()
            != 1
        {
            return Ok(None);
        }
        matcher::skip_until(&mut self.stream, b'"').await?;
        let raw: String<40> = matcher::text_before(&mut self.stream, b'"').await?;
        matcher::skip_until(&mut self.stream, b'\n').await?;
        self.wait_default().await?;
        Ok(raw.as_str().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NoPin;
    use crate::modules::Module;
    use crate::test_helpers::MockSerial;
    use embassy_futures::block_on;
    use no_std_net::Ipv4Addr;

    type TestModem = Modem<MockSerial, NoPin, 2>;

    #[test]
    fn activation_retries_until_the_network_reports_active() {
        let mut serial = MockSerial::new();
        serial.expect(b"AT+CNACT=0\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CGATT=0\r\n", b"\r\nOK\r\n");
        serial.expect(
            b"AT+CGDCONT=1,\"IP\",\"internet\"\r\n",
            b"\r\nOK\r\n",
        );
        serial.expect(b"AT+CGATT=1\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CNCFG=1,\"internet\"\r\n", b"\r\nOK\r\n");
        // First try deactivates, second succeeds.
        serial.expect(
            b"AT+CNACT=1,\"internet\"\r\n",
            b"\r\nOK\r\n\r\n+APP PDP: DEACTIVE\r\n",
        );
        serial.expect(
            b"AT+CNACT=1,\"internet\"\r\n",
            b"\r\nOK\r\n\r\n+APP PDP: ACTIVE\r\n",
        );

        let mut modem: TestModem = Modem::new(serial, Module::Sim7000);
        assert!(block_on(modem.gprs_connect("internet", None, None)).unwrap());

        let tx = modem.stream.tx_str();
        assert_eq!(tx.matches("AT+CNACT=1,\"internet\"\r\n").count(), 2);
    }

    #[test]
    fn local_ip_parses_the_quoted_address() {
        let mut serial = MockSerial::new();
        serial.expect(
            b"AT+CNACT?\r\n",
            b"\r\n+CNACT: 1,\"10.92.17.203\"\r\n\r\nOK\r\n",
        );

        let mut modem: TestModem = Modem::new(serial, Module::Sim7000);
        let ip = block_on(modem.local_ip()).unwrap();
        assert_eq!(ip, Some(IpAddr::V4(Ipv4Addr::new(10, 92, 17, 203))));
    }
}
