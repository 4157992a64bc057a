//! Error types shared across the monitoring crates.
//!
//! [`CryoError`] covers the failure modes of the instrument protocol layer
//! and the response parsers. Driver and daemon code wraps these in
//! `anyhow::Error` with added context; tests match on the variants.
//!
//! Two variants deserve attention when deciding how to recover:
//!
//! - [`CryoError::NoEchoedCommand`] means the echo read back from the wire
//!   did not match the command that was sent. The framing is desynchronized
//!   and the device should be treated as unavailable until the next poll.
//! - [`CryoError::InvalidChannel`] is a programming error, not a device
//!   condition. It is raised before any I/O and must never be papered over
//!   with a sentinel value.

use thiserror::Error;

/// Convenience alias for results using the shared error type.
pub type CryoResult<T> = std::result::Result<T, CryoError>;

/// Failure modes of instrument communication and response parsing.
#[derive(Error, Debug)]
pub enum CryoError {
    /// Underlying I/O failure (port not found, read/write error).
    ///
    /// Fatal for the current query; the device is assumed unreachable
    /// until the next polling attempt.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The echoed command in the response did not match the command sent.
    ///
    /// Indicates framing desynchronization. Callers substitute a sentinel
    /// value rather than retrying within the same cycle.
    #[error("device '{device}' did not echo command {command:?}")]
    NoEchoedCommand { device: String, command: String },

    /// The echo matched but no answer followed for a query that requires one.
    #[error("device '{device}' returned no answer to {command:?}")]
    NoResponse { device: String, command: String },

    /// The answer could not be parsed as a numeric quantity.
    #[error("malformed quantity in answer {answer:?}")]
    MalformedQuantity { answer: String },

    /// The answer carried a unit token outside the closed vocabulary.
    #[error("unrecognized unit {token:?} in answer {answer:?}")]
    UnrecognizedUnit { token: String, answer: String },

    /// Arithmetic or comparison attempted between quantities of different units.
    #[error("unit mismatch: {left} vs {right}")]
    UnitMismatch { left: &'static str, right: &'static str },

    /// A channel outside the instrument's allow-list was requested.
    ///
    /// Rejected before any I/O occurs; never substituted with a sentinel.
    #[error("invalid channel {channel}, allowed channels are {allowed:?}")]
    InvalidChannel { channel: u8, allowed: &'static [u8] },

    /// A channel measurement was requested before the instrument signaled
    /// readiness. Callers may retry once or skip this polling cycle.
    #[error("channel {channel} on device '{device}' has no data ready")]
    DataNotReady { device: String, channel: u8 },

    /// The device did not complete the exchange within the configured window.
    #[error("device '{device}' timed out responding to {command:?}")]
    Timeout { device: String, command: String },

    /// A dispatched task did not produce a result before the caller's deadline.
    ///
    /// The task itself keeps running; only the wait is abandoned.
    #[error("task '{label}' did not finish within {waited_ms} ms")]
    TaskTimedOut { label: String, waited_ms: u64 },

    /// A dispatched task's worker disappeared (panicked or was cancelled).
    #[error("task '{label}' was aborted before completion")]
    TaskAborted { label: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = CryoError::NoEchoedCommand {
            device: "lm510".into(),
            command: "*STB?".into(),
        };
        assert_eq!(err.to_string(), "device 'lm510' did not echo command \"*STB?\"");

        let err = CryoError::InvalidChannel {
            channel: 7,
            allowed: &[1, 2],
        };
        assert!(err.to_string().contains("allowed channels are [1, 2]"));
    }

    #[test]
    fn transport_wraps_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such port");
        let err = CryoError::from(io);
        assert!(matches!(err, CryoError::Transport(_)));
    }
}
