/*!
 * Ferry - chat file relay to S3-compatible object storage
 *
 * Pulls an inbound file from a messaging transport, streams it to an object
 * store with throttled progress reporting, and hands back time-limited,
 * player-friendly links:
 * - Rate-limited progress rendering onto any status surface
 * - Blocking store uploads offloaded to a worker thread with an inactivity timeout
 * - Pre-signed or public-bucket primary URLs, plus player variants for video
 * - Volatile registry of relayed files with time-based expiry
 * - Unconditional cleanup of temporary artifacts
 */

pub mod cli_style;
pub mod config;
pub mod credentials;
pub mod error;
pub mod format;
pub mod link;
pub mod logging;
pub mod media;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod server;
pub mod stage;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use config::FerryConfig;
pub use error::{RelayError, Result};
pub use link::{AccessPolicy, LinkGenerator, LinkRecord, PlayerVariant};
pub use media::{IncomingFile, MediaKind, SourceLocator, SourceMedia};
pub use orchestrator::{RelayOptions, RelayOrchestrator, TaskStage};
pub use progress::{ProgressReporter, StatusSurface};
pub use registry::{FileId, RelayRegistry};
pub use store::{ObjectRef, ObjectStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
