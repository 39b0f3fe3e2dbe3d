//! GNSS power control and position fixes.

use embassy_time::Duration;
use embedded_hal::digital::OutputPin;
use embedded_io_async::{Read, Write};

use crate::error::Error;
use crate::matcher::{self, Terminals};
use crate::Modem;

/// One decoded `+CGNSINF` fix.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GnssFix {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub latitude: f32,
    pub longitude: f32,
    /// MSL altitude in meters.
    pub altitude: f32,
    /// Speed over ground in knots.
    pub speed: f32,
    /// Horizontal dilution of precision.
    pub accuracy: f32,
    pub satellites_visible: u8,
    pub satellites_used: u8,
}

/// Location capability.
#[allow(async_fn_in_trait)]
pub trait Gnss {
    async fn enable_gnss(&mut self) -> Result<bool, Error>;
    async fn disable_gnss(&mut self) -> Result<bool, Error>;
    async fn gnss_fix(&mut self, timeout: Duration) -> Result<Option<GnssFix>, Error>;
}

impl<AT, RST, const N: usize> Gnss for Modem<AT, RST, N>
where
    AT: Read + Write,
    RST: OutputPin,
{
    async fn enable_gnss(&mut self) -> Result<bool, Error> {
        self.send_at(format_args!("+CGNSPWR=1")).await?;
        Ok(self.wait_default().await?.index() == 1)
    }

    async fn disable_gnss(&mut self) -> Result<bool, Error> {
        self.send_at(format_args!("+CGNSPWR=0")).await?;
        Ok(self.wait_default().await?.index() == 1)
    }

    /// Query `+CGNSINF` and decode the fix, if the receiver has one.
    async fn gnss_fix(&mut self, timeout: Duration) -> Result<Option<GnssFix>, Error> {
        self.send_at(format_args!("+CGNSINF")).await?;
        if self
            .wait(timeout, &Terminals::first(b"+CGNSINF:"))
            .await?
            .index()
            != 1
        {
            return Ok(None);
        }

        matcher::skip_until(&mut self.stream, b',').await?; // GNSS run status
        if matcher::int_before(&mut self.stream, b',').await? != Some(1) {
            // No fix: toss the row of commas.
            matcher::skip_until(&mut self.stream, b'\n').await?;
            self.wait_default().await?;
            return Ok(None);
        }

        let mut fix = GnssFix::default();

        // UTC timestamp, fixed-width fields: yyyyMMddhhmmss.sss
        fix.year = int_exact(&mut self.stream, 4).await?.unwrap_or(0) as u16;
        fix.month = int_exact(&mut self.stream, 2).await?.unwrap_or(0) as u8;
        fix.day = int_exact(&mut self.stream, 2).await?.unwrap_or(0) as u8;
        fix.hour = int_exact(&mut self.stream, 2).await?.unwrap_or(0) as u8;
        fix.minute = int_exact(&mut self.stream, 2).await?.unwrap_or(0) as u8;
        fix.second = matcher::float_before(&mut self.stream, b',')
            .await?
            .unwrap_or(0.0) as u8;

        fix.latitude = matcher::float_before(&mut self.stream, b',')
            .await?
            .unwrap_or(0.0);
        fix.longitude = matcher::float_before(&mut self.stream, b',')
            .await?
            .unwrap_or(0.0);
        fix.altitude = matcher::float_before(&mut self.stream, b',')
            .await?
            .unwrap_or(0.0);
        fix.speed = matcher::float_before(&mut self.stream, b',')
            .await?
            .unwrap_or(0.0);

        matcher::skip_until(&mut self.stream, b',').await?; // course over ground
        matcher::skip_until(&mut self.stream, b',').await?; // fix mode
        matcher::skip_until(&mut self.stream, b',').await?; // reserved1
        fix.accuracy = matcher::float_before(&mut self.stream, b',')
            .await?
            .unwrap_or(0.0);
        matcher::skip_until(&mut self.stream, b',').await?; // PDOP
        matcher::skip_until(&mut self.stream, b',').await?; // VDOP
        matcher::skip_until(&mut self.stream, b',').await?; // reserved2
        fix.satellites_visible = matcher::int_before(&mut self.stream, b',')
            .await?
            .unwrap_or(0) as u8;
        fix.satellites_used = matcher::int_before(&mut self.stream, b',')
            .await?
            .unwrap_or(0) as u8;
        matcher::skip_until(&mut self.stream, b'\n').await?; // remaining fields

        self.wait_default().await?;
        Ok(Some(fix))
    }
}

/// Parse a fixed-width integer straight off the stream.
async fn int_exact<R: Read>(stream: &mut R, digits: usize) -> Result<Option<u32>, Error> {
    let mut value: u32 = 0;
    for _ in 0..digits {
        match matcher::read_byte_timeout(stream, matcher::SCAN_TIMEOUT).await? {
            Some(byte) if byte.is_ascii_digit() => {
                value = value * 10 + u32::from(byte - b'0');
            }
            _ => return Ok(None),
        }
    }
    Ok(Some(value))
}
