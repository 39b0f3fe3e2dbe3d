//! SIM7070 / SIM7080 / SIM7090 series. Same connection application command
//! set as the SIM7000, wider mux space, and `+CAOPEN` carries the PDP index
//! and connection type.

use embassy_time::Duration;

use super::VendorProfile;
use crate::matcher::{UrcAction, UrcPattern};

pub const MUX_COUNT: usize = 12;

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
        pattern: b"*PSUTTZ:",
        action: UrcAction::Discard,
    },
    UrcPattern {
        pattern: b"+CTZV:",
        action: UrcAction::Discard,
    },
    UrcPattern {
        pattern: b"DST: ",
        action: UrcAction::Discard,
    },
    UrcPattern {
        pattern: b"\r\nSMS Ready\r\n",
        action: UrcAction::ModemReset,
    },
];

pub(crate) static PROFILE: VendorProfile = VendorProfile {
    name: "SIM7080",
    line_term: b"\r\n",
    urcs: URCS,
    caopen_pdp_index: Some(0),
    max_send_chunk: 1459,
    max_recv_chunk: 1024,
    open_timeout: Duration::from_secs(75),
    status_timeout: Duration::from_secs(3),
};
