//! # Error Handling
//!
//! Standardized error types shared by the fake service node crates.
//!
//! - [`InjectedError`]: a synthetic failure chosen by the error injector
//! - [`UpstreamError`]: one upstream call failed at the transport level
//! - [`ServiceError`]: startup and server failures of the process itself

pub mod types;

pub use types::{
    InjectedError, Result, ServiceError, UpstreamError, UpstreamErrorKind, INJECTED_ERROR_MESSAGE,
};
