//! `vna-core`
//!
//! Core trait definitions and types for vna-daq instrument drivers.
//!
//! This crate provides the building blocks shared by driver crates:
//!
//! - [`scpi`]: byte-stream transport (SCPI socket or serial) and the
//!   [`ScpiConnection`] request/response adapter
//! - [`block`]: IEEE-488.2 definite-length block codec for bulk transfers
//! - [`capabilities`]: capability traits drivers implement
//!   ([`SweepControl`], [`Settable`], [`SnpSource`])
//! - [`driver`]: the [`DriverFactory`] plugin API and the
//!   [`DeviceComponents`] capability bag
//!
//! Driver crates depend on this crate, implement the capability traits for
//! their hardware, and expose a factory for registry-driven construction.

// Re-export commonly used types
pub use anyhow::Result;

pub mod block;
pub mod capabilities;
pub mod driver;
pub mod scpi;

pub use block::BlockError;
pub use capabilities::{
    DeviceCategory, Settable, SnpFormat, SnpRequest, SnpSource, SweepControl,
};
pub use driver::{Capability, DeviceComponents, DriverFactory};
pub use scpi::{
    connect_tcp, wrap_shared, DynStream, ScpiConnection, ScpiError, SharedStream,
};
