pub mod llm_client;
pub mod transport;

pub use llm_client::{CompletionClient, ModelParams, RetryPolicy};
pub use transport::{
    await_first_fragment, ChatMessage, ChatRequest, ChatTransport, FragmentStream, OpenAiTransport,
    Role,
};
