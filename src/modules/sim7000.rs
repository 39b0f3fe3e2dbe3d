//! SIM7000 series (CAT-M / NB-IoT), "connection application" firmware.

use embassy_time::Duration;

use super::VendorProfile;
use crate::matcher::{UrcAction, UrcPattern};

pub const MUX_COUNT: usize = 2;

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
    // Network-pushed name/time/zone refreshes; nothing to keep.
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
    // The boot banner showing up mid-conversation means the module reset
    // behind our back.
    UrcPattern {
        pattern: b"\r\nSMS Ready\r\n",
        action: UrcAction::ModemReset,
    },
];

pub(crate) static PROFILE: VendorProfile = VendorProfile {
    name: "SIM7000",
    line_term: b"\r\n",
    urcs: URCS,
    caopen_pdp_index: None,
    max_send_chunk: 1459,
    // The module freezes until a power cycle when asked to hand over more
    // than it buffered; stay at the documented ceiling.
    max_recv_chunk: 1024,
    open_timeout: Duration::from_secs(75),
    status_timeout: Duration::from_secs(3),
};
