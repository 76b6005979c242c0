//! Unified service bootstrap utilities
//!
//! Common startup functionality: service metadata and the startup banner
//! printed at the top of every log so restarts are easy to find when
//! scanning back through a long-running instance's output.

use tracing::info;

/// Service metadata for startup
pub struct ServiceInfo {
    /// Service name (e.g., "cryosrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    /// Create new service info
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: description.into(),
        }
    }
}

/// Print unified startup banner for any service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
  ██████╗██████╗ ██╗   ██╗ ██████╗ ███████╗██████╗ ██╗   ██╗
 ██╔════╝██╔══██╗╚██╗ ██╔╝██╔═══██╗██╔════╝██╔══██╗██║   ██║
 ██║     ██████╔╝ ╚████╔╝ ██║   ██║███████╗██████╔╝██║   ██║
 ██║     ██╔══██╗  ╚██╔╝  ██║   ██║╚════██║██╔══██╗╚██╗ ██╔╝
 ╚██████╗██║  ██║   ██║   ╚██████╔╝███████║██║  ██║ ╚████╔╝
  ╚═════╝╚═╝  ╚═╝   ╚═╝    ╚═════╝ ╚══════╝╚═╝  ╚═╝  ╚═══╝
    "#;

    info!("{}", banner);
    info!("");
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!(" PID: {}", std::process::id());
    info!("");
}
