use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the sampling backends.
#[derive(Debug, Error)]
pub enum Error {
    /// The kernel counter interface failed (ioctl, poll or mmap).
    #[error("kernel hardware counter interface error")]
    Io(#[from] io::Error),

    /// The readiness poll reported no data within the wait.
    #[error("timed out waiting for a counter sample")]
    Timeout,

    /// The kernel produced a malformed or inconsistent record stream.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The operation is not valid in the current sampling mode.
    #[error("operation is not valid in this sampling mode")]
    InvalidMode,

    /// Ring buffer or session capacity is exhausted.
    #[error("counter capacity exhausted")]
    NotPermitted,

    /// A sample is already checked out from this backend.
    #[error("a sample is already checked out")]
    SampleInFlight,

    /// The sample handle does not belong to this backend.
    #[error("foreign or stale sample handle")]
    InvalidHandle,

    /// The counter configuration was rejected.
    #[error("invalid counter configuration: {0}")]
    Config(&'static str),
}

impl Error {
    /// Raw OS error number, if this is an I/O error carrying one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

/// Structural errors from the binary record decoders.
///
/// The kernel hands records over as fixed-stride tagged items. Decoding
/// validates the structure against the enumerated block extents; any
/// violation surfaces here and the affected ring-buffer slot is released
/// before the error is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// An item carried a type tag this version does not know.
    #[error("unknown record type {0:#06x}")]
    UnknownRecord(u16),

    /// A record that must appear at most once appeared twice.
    #[error("duplicate {0} record")]
    DuplicateRecord(&'static str),

    /// A required record was missing at the end of the sequence.
    #[error("missing {0} record")]
    MissingRecord(&'static str),

    /// Items continued after the sentinel record.
    #[error("records continue past the sentinel")]
    TrailingRecords,

    /// No sentinel record terminated the sequence.
    #[error("record sequence is not terminated")]
    MissingSentinel,

    /// Block descriptors disagree on the counter set.
    #[error("counter set differs between block descriptors")]
    CounterSetMismatch,

    /// Block descriptors disagree on the number of counters per block.
    #[error("counters-per-block differs between block descriptors")]
    ValuesPerBlockMismatch,

    /// A block descriptor reported more instances than the format allows.
    #[error("block instance count out of range")]
    TooManyInstances,

    /// Sample info reported more clock domains than the format allows.
    #[error("clock domain count out of range")]
    ClockDomainsOutOfRange,

    /// A record named a counter set this version does not know.
    #[error("unknown counter set")]
    UnknownCounterSet,

    /// A mandatory request descriptor is unsupported for our API version.
    #[error("request descriptor not supported by this API version")]
    UnsupportedRequest,

    /// A block record named a type outside the enumerated extents.
    #[error("block type out of range")]
    BlockTypeOutOfRange,

    /// A block record named an index outside the enumerated extents.
    #[error("block index out of range")]
    BlockIndexOutOfRange,

    /// The number of block records did not match the extents.
    #[error("block record count does not match extents")]
    BlockCountMismatch,

    /// The metadata list lies outside the mapped region.
    #[error("metadata list exceeds the mapped region")]
    MetadataOutOfBounds,
}
