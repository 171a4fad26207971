//! # Error Taxonomy
//!
//! All fallible operations in this crate return `eyre::Result`, with an
//! [`OnionError`] at the root of the report so callers can classify failures
//! without parsing messages:
//!
//! - [`OnionError::BadArgument`]: the caller handed us something invalid
//!   (page size not a power of two, revision id out of range, a write past
//!   the addressed space, conflicting revision-index inserts).
//! - [`OnionError::Corrupt`]: the bytes on disk are not a well-formed onion
//!   file (signature/version mismatch, checksum mismatch, truncated or
//!   oversized records, unaligned logical addresses).
//! - [`OnionError::Io`]: the backing store failed; the underlying
//!   `std::io::Error` is preserved as the source.
//! - [`OnionError::Unsupported`]: a recognized but refused request
//!   (write-locked file, canonical-embedded store target, force-recovery
//!   open).
//!
//! Decode errors are surfaced to the caller unchanged; nothing in this crate
//! retries. Callers can recover the kind from a report with
//! `err.downcast_ref::<OnionError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OnionError {
    #[error("invalid argument: {0}")]
    BadArgument(String),

    #[error("corrupt onion data: {0}")]
    Corrupt(String),

    #[error("i/o failure")]
    Io(#[source] std::io::Error),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

pub(crate) fn bad_argument(msg: impl Into<String>) -> eyre::Report {
    OnionError::BadArgument(msg.into()).into()
}

pub(crate) fn corrupt(msg: impl Into<String>) -> eyre::Report {
    OnionError::Corrupt(msg.into()).into()
}

pub(crate) fn unsupported(msg: impl Into<String>) -> eyre::Report {
    OnionError::Unsupported(msg.into()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_survives_context_wrapping() {
        use eyre::WrapErr;

        let result: eyre::Result<()> =
            Err(corrupt("checksum mismatch")).wrap_err("failed to ingest header");

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OnionError>(),
            Some(OnionError::Corrupt(_))
        ));
    }

    #[test]
    fn io_errors_preserve_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = OnionError::Io(io);

        let source = std::error::Error::source(&err).unwrap();
        let inner = source.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(inner.kind(), std::io::ErrorKind::NotFound);
    }
}
