//! 聊天补全传输层
//!
//! `ChatTransport` 只负责把一次请求发出去并取回文本，不做重试和超时；
//! 这些由 `CompletionClient` 负责。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（如 DeepSeek）

use std::pin::Pin;

use async_openai::{
    config::OpenAIConfig,
    error::{OpenAIError, StreamError},
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionStreamResponse,
    },
    Client,
};
use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use tracing::debug;

use crate::config::Config;
use crate::error::TransportError;

/// 文本片段流：惰性、有限、不可重启
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

/// 单条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// 与提供方无关的聊天请求
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    /// 第一条系统消息（测试和日志使用）
    pub fn system_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// 用户消息
    pub fn user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// 聊天补全传输能力
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// 发送一次普通请求，返回完整文本
    async fn send(&self, request: &ChatRequest) -> Result<String, TransportError>;

    /// 打开一个流式请求，返回文本片段流
    async fn open_stream(&self, request: &ChatRequest) -> Result<FragmentStream, TransportError>;
}

/// 基于 async-openai 的传输实现
pub struct OpenAiTransport {
    client: Client<OpenAIConfig>,
    timeout_secs: u64,
    stream_timeout_secs: u64,
}

impl OpenAiTransport {
    /// 创建新的传输实例
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            timeout_secs: config.timeout_secs,
            stream_timeout_secs: config.stream_timeout_secs,
        }
    }

    fn build_request(
        request: &ChatRequest,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest, TransportError> {
        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            let built = match message.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(message.content.as_str())
                    .build()
                    .map(ChatCompletionRequestMessage::System),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(message.content.as_str())
                    .build()
                    .map(ChatCompletionRequestMessage::User),
            }
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
            messages.push(built);
        }

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&request.model)
            .messages(messages)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens);
        if stream {
            args.stream(true);
        }
        args.build()
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl ChatTransport for OpenAiTransport {
    async fn send(&self, request: &ChatRequest) -> Result<String, TransportError> {
        debug!("调用 LLM API，模型: {}", request.model);
        let api_request = Self::build_request(request, false)?;

        let response = self
            .client
            .chat()
            .create(api_request)
            .await
            .map_err(|e| classify(e, self.timeout_secs))?;

        Ok(response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default())
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<FragmentStream, TransportError> {
        debug!("发送流式请求，模型: {}", request.model);
        let api_request = Self::build_request(request, true)?;

        let secs = self.stream_timeout_secs;
        let raw = self
            .client
            .chat()
            .create_stream(api_request)
            .await
            .map_err(|e| classify(e, secs))?;

        // 连接失败和错误状态码会作为流的第一个条目出现
        let items = raw.map(move |chunk| match chunk {
            Ok(response) => Ok(delta_content(response)),
            Err(e) => Err(classify(e, secs)),
        });
        await_first_fragment(items).await
    }
}

/// 等到第一个有内容的片段再交出片段流
///
/// 第一个片段之前出现的错误作为建立连接失败返回，由调用方的重试策略处理；
/// 之后的错误留在流中，由消费方报告为中断。
///
/// # 参数
/// - `items`: 原始条目，`Ok(None)` 表示没有文本内容的片段（角色声明、结束标记等）
pub async fn await_first_fragment<S>(mut items: S) -> Result<FragmentStream, TransportError>
where
    S: Stream<Item = Result<Option<String>, TransportError>> + Send + Unpin + 'static,
{
    let first = loop {
        match items.next().await {
            Some(Ok(Some(fragment))) => break Some(fragment),
            Some(Ok(None)) => continue,
            Some(Err(e)) => return Err(e),
            None => break None,
        }
    };

    let rest = items.filter_map(|item| async move { item.transpose() });
    Ok(Box::pin(stream::iter(first.map(Ok)).chain(rest)))
}

fn delta_content(response: CreateChatCompletionStreamResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
}

/// 把 async-openai 的错误归类为传输错误
///
/// `timeout_secs` 只用于超时错误的描述。
fn classify(err: OpenAIError, timeout_secs: u64) -> TransportError {
    match err {
        OpenAIError::Reqwest(e) => classify_http(&e, timeout_secs),
        OpenAIError::StreamError(stream_err) => match *stream_err {
            StreamError::ReqwestEventSource(reqwest_eventsource::Error::Transport(e)) => {
                classify_http(&e, timeout_secs)
            }
            other => TransportError::Stream(other.to_string()),
        },
        // 5xx 的响应体不是 JSON 时，async-openai 只保留原文，type 和 code 都为空
        OpenAIError::ApiError(api) if api.r#type.is_none() && api.code.is_none() => {
            TransportError::Server(api.message)
        }
        OpenAIError::ApiError(api) => TransportError::Api(api.message),
        other => TransportError::Protocol(other.to_string()),
    }
}

fn classify_http(err: &reqwest::Error, timeout_secs: u64) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout { secs: timeout_secs }
    } else if let Some(status) = err.status() {
        TransportError::Status {
            code: status.as_u16(),
            message: err.to_string(),
        }
    } else {
        TransportError::Connect(err.to_string())
    }
}
