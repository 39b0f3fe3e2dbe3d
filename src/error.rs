use embedded_io_async::ErrorKind;

/// Transport-level faults.
///
/// Protocol outcomes (timeout, `ERROR` terminal, nonzero result codes) are
/// reported as values (`MatchResult` index 0, `Ok(false)`, `Ok(0)`), never as
/// an `Err`. Only the serial link itself, or a locally exhausted buffer, can
/// fail a call.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The underlying serial stream reported an I/O error.
    Serial(ErrorKind),

    /// A formatted command line did not fit the command buffer.
    CommandTooLong,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter<'_>) {
        match self {
            Self::Serial(e) => defmt::write!(f, "Serial({:?})", defmt::Debug2Format(e)),
            Self::CommandTooLong => defmt::write!(f, "CommandTooLong"),
            _ => defmt::write!(f, "non_exhaustive"),
        }
    }
}

impl From<core::fmt::Error> for Error {
    fn from(_: core::fmt::Error) -> Self {
        Self::CommandTooLong
    }
}

impl embedded_io_async::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Serial(kind) => *kind,
            _ => ErrorKind::Other,
        }
    }
}
