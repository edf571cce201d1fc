//! HTTP client pipeline
//!
//! Wraps every REST call: injects credentials, coordinates one token refresh
//! on authorization failure and replays the requests blocked behind it.

pub mod coordinator;
pub mod pipeline;
pub mod request;
pub mod response;

pub use coordinator::RefreshCoordinator;
pub use pipeline::ApiClient;
pub use request::{ApiRequest, DEVICE_ID_HEADER};
pub use response::ApiResponse;
