//! Battery charge queries.

use embedded_hal::digital::OutputPin;
use embedded_io_async::{Read, Write};

use crate::error::Error;
use crate::matcher::{self, Terminals, DEFAULT_TIMEOUT};
use crate::Modem;

/// `+CBC` answer: charge state, percentage, supply voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryStatus {
    /// 0 not charging, 1 charging, 2 charge done.
    pub charge_state: u8,
    pub percent: u8,
    pub voltage_mv: u16,
}

/// Battery monitoring capability.
#[allow(async_fn_in_trait)]
pub trait Battery {
    async fn battery_status(&mut self) -> Result<Option<BatteryStatus>, Error>;
}

impl<AT, RST, const N: usize> Battery for Modem<AT, RST, N>
where
    AT: Read + Write,
    RST: OutputPin,
{
    async fn battery_status(&mut self) -> Result<Option<BatteryStatus>, Error> {
        self.send_at(format_args!("+CBC")).await?;
        if self
            .wait(DEFAULT_TIMEOUT, &Terminals::first(b"+CBC:"))
            .await?
            .index()
            != 1
        {
            return Ok(None);
        }

        let charge_state = matcher::int_before(&mut self.stream, b',').await?.unwrap_or(0);
        let percent = matcher::int_before(&mut self.stream, b',').await?.unwrap_or(0);
        let voltage = matcher::int_before(&mut self.stream, b'\n').await?.unwrap_or(0);
        self.wait_default().await?;

        Ok(Some(BatteryStatus {
            charge_state: charge_state.clamp(0, 2) as u8,
            percent: percent.clamp(0, 100) as u8,
            voltage_mv: voltage.clamp(0, i32::from(u16::MAX)) as u16,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NoPin;
    use crate::modules::Module;
    use crate::test_helpers::MockSerial;
    use embassy_futures::block_on;

    #[test]
    fn battery_fields_are_decoded() {
        let mut serial = MockSerial::new();
        serial.expect(b"AT+CBC\r\n", b"\r\n+CBC: 1,83,4054\r\n\r\nOK\r\n");

        let mut modem: Modem<MockSerial, NoPin, 2> = Modem::new(serial, Module::Sim7000);
        let status = block_on(modem.battery_status()).unwrap().expect("status");
        assert_eq!(
            status,
            BatteryStatus {
                charge_state: 1,
                percent: 83,
                voltage_mv: 4054,
            }
        );
    }
}
