//! SIM, identity and network-registration commands.

use core::fmt::Write as _;

use embassy_time::{Duration, Instant, Timer};
use embedded_hal::digital::OutputPin;
use embedded_io_async::{Read, Write};
use heapless::String;

use crate::error::Error;
use crate::matcher::{self, Terminals, DEFAULT_TIMEOUT};
use crate::Modem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SimStatus {
    Ready,
    PinRequired,
    PukRequired,
    Missing,
    Unknown,
}

/// `+CEREG` / `+CGREG` <stat> values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistrationStatus {
    NotRegistered,
    Home,
    Searching,
    Denied,
    Unknown,
    Roaming,
}

impl From<u8> for RegistrationStatus {
    fn from(stat: u8) -> Self {
        match stat {
            0 => Self::NotRegistered,
            1 => Self::Home,
            2 => Self::Searching,
            3 => Self::Denied,
            5 => Self::Roaming,
            _ => Self::Unknown,
        }
    }
}

impl RegistrationStatus {
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Home | Self::Roaming)
    }
}

/// SIM and network-registration capability.
#[allow(async_fn_in_trait)]
pub trait Gsm {
    async fn sim_status(&mut self) -> Result<SimStatus, Error>;
    async fn unlock_sim(&mut self, pin: &str) -> Result<bool, Error>;
    async fn registration_status(&mut self) -> Result<RegistrationStatus, Error>;
    async fn is_network_connected(&mut self) -> Result<bool, Error>;
    async fn wait_for_network(&mut self, timeout: Duration) -> Result<bool, Error>;
    async fn signal_quality(&mut self) -> Result<u8, Error>;
    async fn operator_name(&mut self) -> Result<String<24>, Error>;
    async fn imei(&mut self) -> Result<String<20>, Error>;
    async fn imsi(&mut self) -> Result<String<20>, Error>;
    async fn ccid(&mut self) -> Result<String<20>, Error>;
}

impl<AT, RST, const N: usize> Gsm for Modem<AT, RST, N>
where
    AT: Read + Write,
    RST: OutputPin,
{
    /// `+CPIN?`, retried a few times — the SIM needs a moment after boot.
    async fn sim_status(&mut self) -> Result<SimStatus, Error> {
        for _ in 0..3 {
            self.send_at(format_args!("+CPIN?")).await?;
            let result = self
                .wait(Duration::from_secs(5), &Terminals::first(b"+CPIN:"))
                .await?;
            if result.index() != 1 {
                Timer::after(Duration::from_millis(1000)).await;
                continue;
            }
            let code: String<24> = matcher::text_before(&mut self.stream, b'\n').await?;
            self.wait_default().await?;
            return Ok(match code.as_str() {
                "READY" => SimStatus::Ready,
                "SIM PIN" => SimStatus::PinRequired,
                "SIM PUK" => SimStatus::PukRequired,
                "NOT INSERTED" => SimStatus::Missing,
                _ => SimStatus::Unknown,
            });
        }
        Ok(SimStatus::Unknown)
    }

    async fn unlock_sim(&mut self, pin: &str) -> Result<bool, Error> {
        self.send_at(format_args!("+CPIN=\"{}\"", pin)).await?;
        Ok(self.wait_default().await?.index() == 1)
    }

    /// EPS registration first; fall back to GPRS when the board is on 2G or
    /// simply being moody.
    async fn registration_status(&mut self) -> Result<RegistrationStatus, Error> {
        let eps = self.registration_status_xreg("CEREG").await?;
        if eps.is_registered() {
            return Ok(eps);
        }
        self.registration_status_xreg("CGREG").await
    }

    async fn is_network_connected(&mut self) -> Result<bool, Error> {
        Ok(self.registration_status().await?.is_registered())
    }

    /// Poll registration until it succeeds or `timeout` passes.
    async fn wait_for_network(&mut self, timeout: Duration) -> Result<bool, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_network_connected().await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            Timer::after(Duration::from_millis(250)).await;
        }
    }

    /// `+CSQ` RSSI indication, 0..31 or 99 when unknown.
    async fn signal_quality(&mut self) -> Result<u8, Error> {
        self.send_at(format_args!("+CSQ")).await?;
        let result = self
            .wait(DEFAULT_TIMEOUT, &Terminals::first(b"+CSQ:"))
            .await?;
        if result.index() != 1 {
            return Ok(99);
        }
        let rssi = matcher::int_before(&mut self.stream, b',').await?.unwrap_or(99);
        matcher::skip_until(&mut self.stream, b'\n').await?;
        self.wait_default().await?;
        Ok(rssi.clamp(0, 99) as u8)
    }

    /// Currently registered operator, long alphanumeric format.
    async fn operator_name(&mut self) -> Result<String<24>, Error> {
        self.send_at(format_args!("+COPS?")).await?;
        let result = self
            .wait(DEFAULT_TIMEOUT, &Terminals::first(b"+COPS:"))
            .await?;
        if result.index() != 1 {
            return Ok(String::new());
        }
        let line: String<48> = matcher::text_before(&mut self.stream, b'\n').await?;
        self.wait_default().await?;
        let mut name = String::new();
        name.push_str(quoted(line.as_str())).ok();
        Ok(name)
    }

    async fn imei(&mut self) -> Result<String<20>, Error> {
        self.identity(format_args!("+GSN")).await
    }

    async fn imsi(&mut self) -> Result<String<20>, Error> {
        self.identity(format_args!("+CIMI")).await
    }

    async fn ccid(&mut self) -> Result<String<20>, Error> {
        self.identity(format_args!("+CCID")).await
    }
}

impl<AT, RST, const N: usize> Modem<AT, RST, N>
where
    AT: Read + Write,
    RST: OutputPin,
{
    async fn registration_status_xreg(&mut self, cmd: &str) -> Result<RegistrationStatus, Error> {
        self.send_at(format_args!("+{}?", cmd)).await?;

        let mut prefix: String<12> = String::new();
        write!(prefix, "+{}:", cmd)?;
        let result = self
            .wait(DEFAULT_TIMEOUT, &Terminals::first(prefix.as_bytes()))
            .await?;
        if result.index() != 1 {
            return Ok(RegistrationStatus::Unknown);
        }

        // `+CxREG: <n>,<stat>[,...]`
        matcher::skip_until(&mut self.stream, b',').await?;
        let rest: String<24> = matcher::text_before(&mut self.stream, b'\n').await?;
        self.wait_default().await?;

        let stat = rest
            .split(',')
            .next()
            .and_then(|s| s.trim().parse::<u8>().ok())
            .unwrap_or(4);
        Ok(RegistrationStatus::from(stat))
    }

    /// The identity queries all answer with one bare line before the OK.
    async fn identity(&mut self, cmd: core::fmt::Arguments<'_>) -> Result<String<20>, Error> {
        self.send_at(cmd).await?;
        let result = self.wait_default().await?;
        let mut id = String::new();
        if result.index() == 1 {
            for &byte in matcher::trim_ascii(&result.data) {
                if id.push(byte as char).is_err() {
                    break;
                }
            }
        }
        Ok(id)
    }
}

/// First double-quoted section of a response line.
fn quoted(line: &str) -> &str {
    let mut parts = line.split('"');
    parts.next();
    parts.next().unwrap_or("")
}
