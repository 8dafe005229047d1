//! Tool-provider host.
//!
//! Launches tool providers as child processes, talks JSON-RPC 2.0 to them
//! over line-delimited stdio, and presents their tools as one catalog.
//!
//! Architecture:
//! - `types`: JSON-RPC envelopes, provider configs, catalog entries
//! - `errors`: `ProviderError` and its recovery classes
//! - `logs`: per-provider stderr capture (bounded ring buffer)
//! - `transport`: id-correlated request/response over stdin/stdout
//! - `lifecycle`: spawn, handshake and SIGTERM/SIGKILL shutdown of one process
//! - `registry`: templates and the persisted config store
//! - `manager`: the running set, lazy start, protocol convenience calls
//! - `router`: combined catalog and call dispatch by global tool name

pub mod errors;
pub mod lifecycle;
pub mod logs;
pub mod manager;
pub mod registry;
pub mod router;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::{ErrorKind, ProviderError};
pub use lifecycle::{RunningProvider, StopOutcome};
pub use logs::{LogEntry, LogLevel};
pub use manager::ProviderManager;
pub use registry::{Registry, RegistryWarning, BUILTIN_TEMPLATES};
pub use router::{Catalog, CatalogFailure, ToolRoute, ToolRouter};
pub use types::{CatalogEntry, LaunchSpec, ProviderConfig, ProviderStatus, ProviderTemplate};
