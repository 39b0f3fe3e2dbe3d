//! Text-mode SMS.

use embassy_time::Duration;
use embedded_hal::digital::OutputPin;
use embedded_io_async::{Read, Write};

use crate::error::Error;
use crate::matcher::Terminals;
use crate::Modem;

/// Messaging capability.
#[allow(async_fn_in_trait)]
pub trait Sms {
    async fn send_sms(&mut self, number: &str, text: &str) -> Result<bool, Error>;
}

impl<AT, RST, const N: usize> Sms for Modem<AT, RST, N>
where
    AT: Read + Write,
    RST: OutputPin,
{
    /// Send a text-mode SMS: switch to text mode, request the `>` prompt,
    /// stream the body and commit with Ctrl-Z.
    async fn send_sms(&mut self, number: &str, text: &str) -> Result<bool, Error> {
        self.send_at(format_args!("+CMGF=1")).await?;
        if self.wait_default().await?.index() != 1 {
            return Ok(false);
        }

        self.send_at(format_args!("+CSCS=\"GSM\"")).await?;
        self.wait_default().await?;

        self.send_at(format_args!("+CMGS=\"{}\"", number)).await?;
        if self
            .wait(Duration::from_secs(5), &Terminals::first(b">"))
            .await?
            .index()
            != 1
        {
            return Ok(false);
        }

        self.write_raw(text.as_bytes()).await?;
        self.write_raw(&[0x1a]).await?;
        self.flush_raw().await?;

        // The network can take its time accepting.
        Ok(self
            .wait(Duration::from_secs(60), &Terminals::new())
            .await?
            .index()
            == 1)
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

    #[test]
    fn sms_body_follows_the_prompt_and_ends_with_ctrl_z() {
        let mut serial = MockSerial::new();
        serial.expect(b"AT+CMGF=1\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CSCS=\"GSM\"\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CMGS=\"+4512345678\"\r\n", b"\r\n> ");
        serial.expect(b"hello\x1a", b"\r\n+CMGS: 1\r\n\r\nOK\r\n");

        let mut modem: TestModem = Modem::new(serial, Module::Sim7000);
        assert!(block_on(modem.send_sms("+4512345678", "hello")).unwrap());
        assert!(modem.stream.tx.ends_with(b"hello\x1a"));
    }

    #[test]
    fn missing_prompt_aborts_the_send() {
        let mut serial = MockSerial::new();
        serial.expect(b"AT+CMGF=1\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CSCS=\"GSM\"\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+CMGS=\"+4512345678\"\r\n", b"\r\nERROR\r\n");

        let mut modem: TestModem = Modem::new(serial, Module::Sim7000);
        assert!(!block_on(modem.send_sms("+4512345678", "hello")).unwrap());
        assert!(!modem.stream.tx_str().contains("hello"));
    }
}
