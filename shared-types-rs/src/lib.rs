pub mod response;
pub mod target;

pub use response::{format_duration, Response, UpstreamResult};
pub use target::{TargetError, Transport, UpstreamTarget};
