//! One-time driver registration.
//!
//! Registration is serialized through a single process-wide lock so two
//! components starting at once never race to register the same driver.

use std::fs::File;
use std::sync::{Mutex, PoisonError};

use rowtide_core::{ConnectionSettings, DriverKind};
use tracing::{debug, info};

use crate::error::{DbResult, PluginLoadingError};

static REGISTERED: Mutex<Vec<DriverKind>> = Mutex::new(Vec::new());

/// Check the driver's libraries are readable, resolve its name and record
/// the registration.
pub fn load_driver(settings: &ConnectionSettings) -> DbResult<DriverKind> {
    let mut registered = REGISTERED.lock().unwrap_or_else(PoisonError::into_inner);

    for path in &settings.driver_library {
        File::open(path).map_err(|e| PluginLoadingError::LibraryUnreadable {
            path: path.clone(),
            message: e.to_string(),
        })?;
    }

    let kind = DriverKind::from_name(&settings.driver).ok_or_else(|| {
        PluginLoadingError::UnknownDriver {
            name: settings.driver.clone(),
        }
    })?;

    if registered.contains(&kind) {
        debug!(driver = %kind, "Driver already registered");
    } else {
        info!(driver = %kind, libraries = settings.driver_library.len(), "Registered driver");
        registered.push(kind);
    }

    Ok(kind)
}
