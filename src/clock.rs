//! Network clock and NTP synchronization.

use embassy_time::Duration;
use embedded_hal::digital::OutputPin;
use embedded_io_async::{Read, Write};
use heapless::String;

use crate::error::Error;
use crate::matcher::{self, Terminals, DEFAULT_TIMEOUT};
use crate::Modem;

/// Decoded `+CCLK?` answer. The offset is in quarter hours, as the network
/// reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NetworkTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub timezone_quarters: i8,
}

/// Time-sync capability.
#[allow(async_fn_in_trait)]
pub trait Clock {
    async fn network_time(&mut self) -> Result<Option<NetworkTime>, Error>;
    async fn ntp_sync(&mut self, server: &str, tz_quarters: i8) -> Result<bool, Error>;
}

impl<AT, RST, const N: usize> Clock for Modem<AT, RST, N>
where
    AT: Read + Write,
    RST: OutputPin,
{
    /// Network-supplied local time. Needs `+CLTS=1` (part of init) and a
    /// registered network.
    async fn network_time(&mut self) -> Result<Option<NetworkTime>, Error> {
        self.send_at(format_args!("+CCLK?")).await?;
        if self
            .wait(DEFAULT_TIMEOUT, &Terminals::first(b"+CCLK: \""))
            .await?
            .index()
            != 1
        {
            return Ok(None);
        }
        let raw: String<24> = matcher::text_before(&mut self.stream, b'"').await?;
        matcher::skip_until(&mut self.stream, b'\n').await?;
        self.wait_default().await?;
        Ok(parse_cclk(raw.as_str()))
    }

    /// Sync the module clock from an NTP server. `tz_quarters` is the local
    /// offset in quarter hours.
    async fn ntp_sync(&mut self, server: &str, tz_quarters: i8) -> Result<bool, Error> {
        self.send_at(format_args!("+CNTP=\"{}\",{}", server, tz_quarters))
            .await?;
        if self.wait_default().await?.index() != 1 {
            return Ok(false);
        }

        self.send_at(format_args!("+CNTP")).await?;
        if self
            .wait(Duration::from_secs(10), &Terminals::first(b"+CNTP:"))
            .await?
            .index()
            != 1
        {
            return Ok(false);
        }
        let code = matcher::int_before(&mut self.stream, b'\n').await?;
        self.wait_default().await?;
        Ok(code == Some(1))
    }
}

/// `"yy/MM/dd,hh:mm:ss±zz"`, already unquoted.
fn parse_cclk(raw: &str) -> Option<NetworkTime> {
    let (date, time) = raw.split_once(',')?;

    let mut date = date.split('/');
    let year = 2000 + date.next()?.trim().parse::<u16>().ok()?;
    let month = date.next()?.parse::<u8>().ok()?;
    let day = date.next()?.parse::<u8>().ok()?;

    let mut time_parts = time.split(':');
    let hour = time_parts.next()?.parse::<u8>().ok()?;
    let minute = time_parts.next()?.parse::<u8>().ok()?;
    let rest = time_parts.next()?;
    if rest.len() < 2 {
        return None;
    }
    let (second, zone) = rest.split_at(2);
    let second = second.parse::<u8>().ok()?;
    let timezone_quarters = zone.parse::<i8>().unwrap_or(0);

    Some(NetworkTime {
        year,
        month,
        day,
        hour,
        minute,
        second,
        timezone_quarters,
    })
}
