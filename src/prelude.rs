//! Capability traits, ready for glob import.

pub use crate::battery::Battery;
pub use crate::clock::Clock;
pub use crate::gnss::Gnss;
pub use crate::gprs::Gprs;
pub use crate::gsm::Gsm;
pub use crate::sms::Sms;
