pub mod client;
pub mod errors;
pub mod provider;
pub mod registry;

pub use client::{
    HttpBody, HttpMethod, TransportError, TransportErrorKind, UpstreamClient,
    UpstreamClientConfig, UpstreamHttpRequest, UpstreamHttpResponse, WreqUpstreamClient,
};
pub use errors::{UpstreamError, UpstreamErrorKind, parse_retry_after};
pub use provider::{ChatProvider, ChatStream, Headers, header_get, header_set};
pub use registry::ProviderRegistry;
