pub(crate) mod sim7000;
pub(crate) mod sim7080;

pub use sim7000::MUX_COUNT as SIM7000_MUX_COUNT;
pub use sim7080::MUX_COUNT as SIM7080_MUX_COUNT;

use embassy_time::Duration;

use crate::matcher::UrcPattern;

/// Per-vendor wire constants the session consults on every exchange.
pub struct VendorProfile {
    pub name: &'static str,
    /// Line terminator the firmware speaks.
    pub line_term: &'static [u8],
    /// Unsolicited patterns recognized mid-wait.
    pub urcs: &'static [UrcPattern],
    /// PDP index field of `+CAOPEN`, for firmware revisions that want it.
    pub caopen_pdp_index: Option<u8>,
    /// Ceiling on one `+CASEND` exchange.
    pub max_send_chunk: usize,
    /// Ceiling on one `+CARECV` exchange.
    pub max_recv_chunk: usize,
    /// How long `+CAOPEN` may take to report a result.
    pub open_timeout: Duration,
    /// Per-line timeout of the `+CARECV?` / `+CASTATE?` status walks.
    pub status_timeout: Duration,
}

/// The supported cellular modules. SIM7070/SIM7080/SIM7090 share a firmware
/// family and differ from the SIM7000 mostly in mux width and `+CAOPEN`
/// syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Module {
    Sim7000,
    Sim7070,
    Sim7080,
    Sim7090,
}

impl Module {
    pub(crate) fn profile(&self) -> &'static VendorProfile {
        match self {
            Self::Sim7000 => &sim7000::PROFILE,
            Self::Sim7070 | Self::Sim7080 | Self::Sim7090 => &sim7080::PROFILE,
        }
    }

    /// Number of concurrent connections the firmware multiplexes.
    pub const fn max_mux(&self) -> usize {
        match self {
            Self::Sim7000 => sim7000::MUX_COUNT,
            Self::Sim7070 | Self::Sim7080 | Self::Sim7090 => sim7080::MUX_COUNT,
        }
    }

    /// How long to wait before the module is ready after power-on.
    pub(crate) fn boot_wait(&self) -> Duration {
        Duration::from_secs(5)
    }

    /// How long a commanded reboot may take before the ready banner shows.
    pub(crate) fn reboot_wait(&self) -> Duration {
        Duration::from_secs(30)
    }
}
