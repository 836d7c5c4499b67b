//! Document sync workspace facade.
//!
//! Re-exports the sync core so hosts can depend on a single crate. With the
//! `desktop-shims` feature (on by default) [`desktop_coordinator`] wires the
//! desktop bridges and returns a ready coordinator.

pub use bridge_traits;
pub use core_runtime;
pub use core_sync;

pub use core_runtime::config::{CoreConfig, SyncSettings};
pub use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
pub use core_sync::{CloudDelegate, Result, SyncCoordinator, SyncError};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;

/// Build a coordinator on the desktop bridges and run setup
///
/// Returns the coordinator even when no container is reachable; the delegate
/// hears `availability_changed(false, ..)` in that case.
#[cfg(feature = "desktop-shims")]
pub async fn desktop_coordinator(
    settings: SyncSettings,
    delegate: Option<std::sync::Arc<dyn CloudDelegate>>,
) -> Result<SyncCoordinator> {
    let config = CoreConfig::builder().settings(settings).build()?;
    let coordinator = SyncCoordinator::new(config, delegate)?;
    coordinator.setup(None).await?;
    Ok(coordinator)
}
