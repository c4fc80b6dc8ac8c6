//! Provider stream adapters.
//!
//! Each adapter consumes one provider family's native streaming protocol
//! and emits canonical [`StreamEvent`]s. Dispatch is a closed enum chosen
//! once per agent at construction; no provider-specific shape leaves this
//! module.

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::api::ChatMessage;
use crate::core::event::EventStream;
use crate::tools::SchemaShape;

pub mod anthropic;
pub mod openai;

#[cfg(test)]
pub mod mock;

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;

/// One provider call: the replayed conversation, the tool schema already
/// shaped for the family, and per-agent extra model arguments merged into
/// the request body.
#[derive(Clone, Debug)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tool_schema: Value,
    pub extra_args: Map<String, Value>,
}

#[derive(Clone)]
pub enum ProviderAdapter {
    OpenAi(OpenAiAdapter),
    Anthropic(AnthropicAdapter),
    #[cfg(test)]
    Mock(mock::MockAdapter),
}

impl ProviderAdapter {
    /// Which schema wire format this family expects from the registry.
    pub fn schema_shape(&self) -> SchemaShape {
        match self {
            ProviderAdapter::OpenAi(_) => SchemaShape::OpenAi,
            ProviderAdapter::Anthropic(_) => SchemaShape::Anthropic,
            #[cfg(test)]
            ProviderAdapter::Mock(_) => SchemaShape::OpenAi,
        }
    }

    /// Opens a fresh provider stream for `request`. Each call opens a new
    /// underlying connection; the returned stream is finite and cannot be
    /// restarted. Cancelling `cancel` tears the connection down.
    pub fn open_stream(&self, request: ProviderRequest, cancel: CancellationToken) -> EventStream {
        match self {
            ProviderAdapter::OpenAi(adapter) => adapter.open_stream(request, cancel),
            ProviderAdapter::Anthropic(adapter) => adapter.open_stream(request, cancel),
            #[cfg(test)]
            ProviderAdapter::Mock(adapter) => adapter.open_stream(request, cancel),
        }
    }
}
