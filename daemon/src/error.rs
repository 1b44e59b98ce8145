//! Error kinds shared across the daemon.

use thiserror::Error;

/// Everything that can go wrong between the contact sampler and the
/// kernel HID sink.
///
/// `SamplerIo` and `MapMissing` are recoverable in place (a skipped scan
/// tick, a dropped event); all other kinds propagate to the top level.
#[derive(Debug, Error)]
pub enum Error {
    /// Hardware initialisation or self-check failed at startup.
    #[error("sampler probe failed: {0}")]
    ProbeFailed(String),

    /// A transient sampler read error; the current scan tick is skipped.
    #[error("sampler i/o error: {0}")]
    SamplerIo(String),

    /// A codetable row carries a chord code outside 1..=31.
    #[error("config line {line}: 'dcode' must be a number in 1 to 31")]
    ConfigBadCode {
        /// 1-based line number of the offending row.
        line: usize,
    },

    /// A codetable row has an empty base-key column.
    #[error("config line {line}: 'key' column is empty")]
    ConfigMissingBase {
        /// 1-based line number of the offending row.
        line: usize,
    },

    /// A resolved symbol has no scancode table entry; the event is dropped.
    #[error("no scancode entry for {0:?}")]
    MapMissing(String),

    /// The uhid character device went away or refused a report.
    #[error("hid sink closed: {0}")]
    HidSinkClosed(String),

    /// The event loop was interrupted by SIGINT.
    #[error("interrupted")]
    Cancelled,
}
