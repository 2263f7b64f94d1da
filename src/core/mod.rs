//! Core functionality for the Omi device bridge
//! This module contains the device connection coordinator and its SDK backends

pub mod bluetooth;

pub use bluetooth::DeviceCoordinator;
