//! pummel: adaptive HTTP load generator.
//!
//! The binary in `main.rs` wires the CLI onto these modules. The heart is
//! [`loader::Loader`], the three-phase controller that bursts, calibrates,
//! and then ramps load against the target while the sampler feeds the
//! report.

pub mod cli;
pub mod driver;
pub mod loader;
pub mod pushgateway;
pub mod summary;
