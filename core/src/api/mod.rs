//! Command surface consumed by the CLI and any transport layered on top.
//!
//! Versioned modules (currently `v1`) keep request and response shapes
//! stable while the registry internals change.

pub mod v1;
