//! Control plane: pulls work items off the queue and feeds the worker.

pub mod control;

pub use control::{ControlConfig, ControlPlane};
