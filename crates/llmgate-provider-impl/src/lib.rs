//! Provider adapters. The OpenAI-compatible template covers most
//! upstreams; Vertex, DashScope, and the HuggingFace Router have bespoke
//! request/response handling but expose the same capability set.

pub mod dashscope;
pub mod endpoints;
pub mod huggingface;
pub mod openai_compat;
pub mod vertex;

pub use endpoints::{EndpointEnv, build_registry};
pub use openai_compat::{AuthStyle, EndpointConfig, OpenAiCompatProvider};
