//! Application state management
//! This module defines and manages the global application state.

use std::sync::Arc;

use log::info;

use crate::config::CoordinatorConfig;
use crate::core::bluetooth::OmiConnectionProvider;
use crate::core::DeviceCoordinator;

/// Global application state
///
/// The BLE radio is a singleton resource, so exactly one coordinator exists
/// per process; screens and tasks receive it by reference from here.
pub struct AppState {
    coordinator: Arc<DeviceCoordinator>,
}

impl AppState {
    /// Creates a new AppState instance. The BLE capability itself is
    /// acquired lazily on the coordinator's first operation.
    pub fn new(config: CoordinatorConfig) -> Self {
        info!("Initializing device coordinator...");
        let provider = Arc::new(OmiConnectionProvider);
        Self {
            coordinator: Arc::new(DeviceCoordinator::new(provider, config)),
        }
    }

    /// Gets a shared reference to the device coordinator
    pub fn coordinator(&self) -> Arc<DeviceCoordinator> {
        self.coordinator.clone()
    }
}
