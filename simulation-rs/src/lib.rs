//! # Simulation
//!
//! Per-request behavior shaping for the fake service node:
//!
//! - [`RequestDuration`]: the target total duration of a request
//! - [`Injector`]: probabilistic error and delay injection
//! - [`LoadGenerator`]: synthetic CPU and memory load held by a [`LoadGuard`]

pub mod injector;
pub mod load;
pub mod timing;

pub use injector::{ErrorDefinition, InjectedFault, Injector};
pub use load::{LoadGenerator, LoadGuard};
pub use timing::{remaining, DurationPolicy, RequestDuration};
