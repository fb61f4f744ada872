//! Logging setup for flightlink.
//!
//! Dialogue progress is logged by `flightlink::session` at debug level;
//! every frame sent, received or dropped is logged by
//! `flightlink::transport` at trace level. The verbosity flags pick which of
//! the two show up. `RUST_LOG` overrides the selection entirely.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Target prefix of everything this crate logs.
const CRATE_TARGET: &str = "flightlink";

/// Target of the frame-level logs.
const TRANSPORT_TARGET: &str = "flightlink::transport";

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Peer connections, warnings and errors.
    #[default]
    Normal,
    /// Dialogue start and end, without frame traffic.
    Verbose,
    /// Every frame sent, received or dropped.
    Trace,
}

impl Verbosity {
    /// Verbosity selected by a `-v` count and a quiet flag.
    ///
    /// Quiet wins over any number of `-v`.
    #[must_use]
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// Most detailed level logged by the crate.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Filter directives for this verbosity.
    ///
    /// The transport stays at info until frame tracing is asked for, so
    /// `-v` shows dialogues without the bytes behind them.
    #[must_use]
    pub fn directives(&self) -> String {
        let level = self.to_level_filter();
        match self {
            Self::Verbose => format!("{CRATE_TARGET}={level},{TRANSPORT_TARGET}=info"),
            _ => format!("{CRATE_TARGET}={level}"),
        }
    }
}

/// Initialize the logging system.
///
/// Call once at startup; later calls are ignored. Logs go to stderr so
/// command output on stdout stays machine-readable.
///
/// # Examples
///
/// ```no_run
/// use flightlink::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::from_flags(1, false));
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directives()));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbosity == Verbosity::Trace)
            .with_file(false)
            .with_line_number(false),
    );

    // a subscriber may already be installed, by a test or an embedding host
    let _ = subscriber.try_init();
}
