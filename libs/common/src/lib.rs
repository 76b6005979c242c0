//! Shared infrastructure for cryosrv services
//!
//! Bootstrap helpers used by every binary in the workspace: logging setup,
//! startup banner, and graceful-shutdown plumbing. Anything device- or
//! protocol-specific lives in the service crates, not here.

pub mod bootstrap;
pub mod logging;
pub mod shutdown;

pub use bootstrap::{print_startup_banner, ServiceInfo};
pub use shutdown::{shutdown_token, wait_for_shutdown};
