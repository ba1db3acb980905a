//! Book Club Election Engine
//!
//! Members nominate books, the club opens an election over a ranked shortlist,
//! members cast weighted votes and a winner is recorded. The ranking of
//! candidates and the tally of votes are the core; chat commands, scraping and
//! posting live behind the traits in [`ports`].

pub mod config;
pub mod election;
pub mod errors;
pub mod ports;
pub mod ranking;
pub mod scheduler;
pub mod store;
pub mod tally;
pub mod types;

// Re-export commonly used types
pub use election::{ElectionManager, ElectionResult};
pub use errors::{Error, Result};
pub use ranking::{CandidateStanding, Reason, Standings};
pub use scheduler::CloseScheduler;
pub use store::Store;

use config::LoggingConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the `RUST_LOG` filter, defaulting to `bookclub=info`
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookclub=info".into()),
        )
        .try_init()
        .map_err(|e| Error::internal(format!("logging already initialized: {e}")))?;

    tracing::info!("📚 Book club election engine v{} initialized", VERSION);
    Ok(())
}

/// Initialize logging from configuration; `json` or `pretty` output
pub fn init_with(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(format!("bookclub={}", logging.level))
        .map_err(|e| Error::config(format!("invalid LOG_LEVEL: {e}")))?;

    let installed = match logging.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        "pretty" => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init(),
        other => return Err(Error::config(format!("unknown LOG_FORMAT: {other}"))),
    };
    installed.map_err(|e| Error::internal(format!("logging already initialized: {e}")))?;

    tracing::info!(format = %logging.format, "📚 Book club election engine v{} initialized", VERSION);
    Ok(())
}
