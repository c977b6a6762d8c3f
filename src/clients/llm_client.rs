//! LLM 补全客户端
//!
//! 在 `ChatTransport` 之上提供重试、退避、超时，以及深度思考等前置指令约定。
//! 所有失败都以 `Err(LlmError)` 返回，不会把错误描述伪装成补全文本。

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::clients::transport::{
    ChatMessage, ChatRequest, ChatTransport, FragmentStream, OpenAiTransport,
};
use crate::config::Config;
use crate::error::{LlmError, TransportError};

/// 深度思考指令
pub const DEEP_THOUGHT_INSTRUCTION: &str = "请进行深度思考，逐步分析问题";
/// 联网搜索指令
pub const WEB_SEARCH_INSTRUCTION: &str = "你可以使用联网搜索功能获取最新信息";

/// 单次调用的模型参数
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// 追加一条深度思考的系统指令
    pub deep_thought: bool,
    /// 追加一条联网搜索的系统指令
    pub web_search: bool,
    pub timeout_secs: u64,
    pub stream_timeout_secs: u64,
    /// `generate` 是否走流式请求
    pub stream: bool,
}

impl ModelParams {
    pub fn with_deep_thought(mut self, enabled: bool) -> Self {
        self.deep_thought = enabled;
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }
}

/// 重试策略
///
/// 第 n 次重试前等待 `backoff_factor * 2^(n-1)` 秒。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff_factor: f64,
    pub retry_statuses: Vec<u16>,
}

impl RetryPolicy {
    /// 不重试（测试使用）
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff_factor: 0.0,
            retry_statuses: Vec::new(),
        }
    }

    /// 第 `retry`（从 1 开始）次重试前的等待时间
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 || self.backoff_factor <= 0.0 {
            return Duration::ZERO;
        }
        let exponent = (retry - 1).min(16) as i32;
        Duration::from_secs_f64(self.backoff_factor * 2f64.powi(exponent))
    }

    /// 该错误是否值得重试
    pub fn is_retryable(&self, err: &TransportError) -> bool {
        match err {
            TransportError::Status { code, .. } => self.retry_statuses.contains(code),
            TransportError::Server(_)
            | TransportError::Timeout { .. }
            | TransportError::Connect(_) => true,
            TransportError::Api(_) | TransportError::Protocol(_) | TransportError::Stream(_) => {
                false
            }
        }
    }
}

/// LLM 补全客户端
#[derive(Clone)]
pub struct CompletionClient {
    transport: Arc<dyn ChatTransport>,
    retry: RetryPolicy,
}

impl CompletionClient {
    /// 创建连接真实 API 的客户端
    pub fn new(config: &Config) -> Self {
        Self::with_transport(Arc::new(OpenAiTransport::new(config)), config.retry_policy())
    }

    /// 使用自定义传输层创建客户端
    pub fn with_transport(transport: Arc<dyn ChatTransport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// 构建消息列表
    ///
    /// 顺序：系统消息 → 深度思考指令 → 联网搜索指令 → 用户消息
    pub fn build_request(
        prompt: &str,
        system_message: Option<&str>,
        params: &ModelParams,
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(4);
        if let Some(sys_msg) = system_message {
            messages.push(ChatMessage::system(sys_msg));
        }
        if params.deep_thought {
            messages.push(ChatMessage::system(DEEP_THOUGHT_INSTRUCTION));
        }
        if params.web_search {
            messages.push(ChatMessage::system(WEB_SEARCH_INSTRUCTION));
        }
        messages.push(ChatMessage::user(prompt));

        ChatRequest {
            model: params.model.clone(),
            messages,
            max_tokens: params.max_output_tokens,
            temperature: params.temperature,
        }
    }

    /// 普通补全请求
    ///
    /// # 返回
    /// 去除首尾空白的响应文本；空内容视为失败
    pub async fn complete(
        &self,
        prompt: &str,
        system_message: Option<&str>,
        params: &ModelParams,
    ) -> Result<String, LlmError> {
        let request = Self::build_request(prompt, system_message, params);
        info!(
            "发送请求到 LLM API，模型={}，超时={}秒",
            params.model, params.timeout_secs
        );
        debug!("用户消息长度: {} 字符", prompt.chars().count());

        let secs = params.timeout_secs;
        let transport = &self.transport;
        let request = &request;
        let content = self
            .with_retry(&params.model, || async move {
                match timeout(Duration::from_secs(secs), transport.send(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout { secs }),
                }
            })
            .await?;

        non_empty(content, &params.model)
    }

    /// 流式补全请求
    ///
    /// 只有建立连接的过程会重试；返回的流一旦开始消费就不能重启。
    pub async fn complete_streaming(
        &self,
        prompt: &str,
        system_message: Option<&str>,
        params: &ModelParams,
    ) -> Result<FragmentStream, LlmError> {
        let request = Self::build_request(prompt, system_message, params);
        info!(
            "发送流式请求到 LLM API，模型={}，超时={}秒",
            params.model, params.stream_timeout_secs
        );

        let secs = params.stream_timeout_secs;
        let transport = &self.transport;
        let request = &request;
        self.with_retry(&params.model, || async move {
            match timeout(Duration::from_secs(secs), transport.open_stream(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout { secs }),
            }
        })
        .await
    }

    /// 消费完整个片段流并拼接
    ///
    /// 每个片段的等待时间不超过 `stream_timeout_secs`。
    pub async fn drain_stream(
        mut stream: FragmentStream,
        params: &ModelParams,
    ) -> Result<String, LlmError> {
        let idle = Duration::from_secs(params.stream_timeout_secs);
        let mut full_response = String::new();
        let mut received = 0usize;

        loop {
            let next = match timeout(idle, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    return Err(LlmError::StreamInterrupted {
                        model: params.model.clone(),
                        received,
                        source: TransportError::Timeout {
                            secs: params.stream_timeout_secs,
                        },
                    })
                }
            };

            match next {
                Some(Ok(fragment)) => {
                    received += 1;
                    full_response.push_str(&fragment);
                }
                Some(Err(e)) => {
                    return Err(LlmError::StreamInterrupted {
                        model: params.model.clone(),
                        received,
                        source: e,
                    })
                }
                None => break,
            }
        }

        info!("流式响应完成，共 {} 个片段", received);
        non_empty(full_response, &params.model)
    }

    /// 按 `params.stream` 选择普通或流式请求，总是返回完整文本
    pub async fn generate(
        &self,
        prompt: &str,
        system_message: Option<&str>,
        params: &ModelParams,
    ) -> Result<String, LlmError> {
        if params.stream {
            let stream = self.complete_streaming(prompt, system_message, params).await?;
            Self::drain_stream(stream, params).await
        } else {
            self.complete(prompt, system_message, params).await
        }
    }

    async fn with_retry<T, F, Fut>(&self, model: &str, mut attempt: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, TransportError>>,
    {
        let max_attempts = self.retry.retries + 1;
        let mut attempt_no = 1;

        loop {
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !self.retry.is_retryable(&err) {
                warn!("LLM API 调用失败（不可重试）: {}", err);
                return Err(LlmError::Rejected {
                    model: model.to_string(),
                    source: err,
                });
            }

            if attempt_no >= max_attempts {
                warn!("LLM API 调用失败，已重试 {} 次: {}", self.retry.retries, err);
                return Err(LlmError::RetriesExhausted {
                    model: model.to_string(),
                    attempts: max_attempts,
                    source: err,
                });
            }

            let delay = self.retry.delay_for(attempt_no);
            warn!(
                "LLM API 调用失败 (尝试 {}/{})，{:.1} 秒后重试: {}",
                attempt_no,
                max_attempts,
                delay.as_secs_f64(),
                err
            );
            sleep(delay).await;
            attempt_no += 1;
        }
    }
}

fn non_empty(content: String, model: &str) -> Result<String, LlmError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(LlmError::EmptyContent {
            model: model.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::transport::{await_first_fragment, Role};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 按顺序返回预设结果的传输层
    struct QueueTransport {
        responses: Mutex<VecDeque<Result<String, TransportError>>>,
        calls: Mutex<usize>,
    }

    impl QueueTransport {
        fn new(responses: Vec<Result<String, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }

        fn next(&self) -> Result<String, TransportError> {
            *self.calls.lock().unwrap() += 1;
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connect("队列已空".to_string())))
        }
    }

    #[async_trait]
    impl ChatTransport for QueueTransport {
        async fn send(&self, _request: &ChatRequest) -> Result<String, TransportError> {
            self.next()
        }

        async fn open_stream(&self, _request: &ChatRequest) -> Result<FragmentStream, TransportError> {
            let text = self.next()?;
            let fragments: Vec<Result<String, TransportError>> =
                text.chars().map(|c| Ok(c.to_string())).collect();
            Ok(Box::pin(futures::stream::iter(fragments)))
        }
    }

    /// 每次调用先等待预设时长再成功的传输层
    struct SlowTransport {
        delays: Mutex<VecDeque<Duration>>,
        calls: Mutex<usize>,
    }

    impl SlowTransport {
        fn new(delays: Vec<Duration>) -> Arc<Self> {
            Arc::new(Self {
                delays: Mutex::new(delays.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }

        async fn wait(&self) {
            *self.calls.lock().unwrap() += 1;
            let delay = self.delays.lock().unwrap().pop_front().unwrap_or(Duration::ZERO);
            sleep(delay).await;
        }
    }

    #[async_trait]
    impl ChatTransport for SlowTransport {
        async fn send(&self, _request: &ChatRequest) -> Result<String, TransportError> {
            self.wait().await;
            Ok("摘要".to_string())
        }

        async fn open_stream(&self, _request: &ChatRequest) -> Result<FragmentStream, TransportError> {
            self.wait().await;
            Ok(Box::pin(futures::stream::iter(vec![Ok("摘要".to_string())])))
        }
    }

    /// 连接错误作为流的第一个条目出现的传输层
    struct LazyStreamTransport {
        opens: Mutex<VecDeque<Vec<Result<Option<String>, TransportError>>>>,
        calls: Mutex<usize>,
    }

    impl LazyStreamTransport {
        fn new(opens: Vec<Vec<Result<Option<String>, TransportError>>>) -> Arc<Self> {
            Arc::new(Self {
                opens: Mutex::new(opens.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ChatTransport for LazyStreamTransport {
        async fn send(&self, _request: &ChatRequest) -> Result<String, TransportError> {
            Err(TransportError::Protocol("只支持流式请求".to_string()))
        }

        async fn open_stream(&self, _request: &ChatRequest) -> Result<FragmentStream, TransportError> {
            *self.calls.lock().unwrap() += 1;
            let items = self.opens.lock().unwrap().pop_front().unwrap_or_default();
            await_first_fragment(futures::stream::iter(items)).await
        }
    }

    fn refused() -> TransportError {
        TransportError::Connect("error sending request: connection refused".to_string())
    }

    fn params() -> ModelParams {
        Config::default().model_params()
    }

    fn fast_retry(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff_factor: 0.0,
            retry_statuses: vec![500, 502, 504],
        }
    }

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            code,
            message: "server error".to_string(),
        }
    }

    #[test]
    fn test_build_request_prepends_instruction_turns() {
        let deep = params().with_deep_thought(true);
        let request = CompletionClient::build_request("讲义", Some("你是助手"), &deep);

        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::System, Role::User]);
        assert_eq!(request.messages[0].content, "你是助手");
        assert_eq!(request.messages[1].content, DEEP_THOUGHT_INSTRUCTION);
        assert_eq!(request.max_tokens, 32768);

        let plain = CompletionClient::build_request("讲义", None, &params());
        assert_eq!(plain.messages.len(), 1);
    }

    #[test]
    fn test_backoff_delays() {
        let policy = RetryPolicy {
            retries: 3,
            backoff_factor: 0.3,
            retry_statuses: vec![500],
        };
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs_f64(0.3));
        assert_eq!(policy.delay_for(2), Duration::from_secs_f64(0.6));
        assert_eq!(policy.delay_for(3), Duration::from_secs_f64(1.2));
    }

    #[test]
    fn test_retryable_classes() {
        let policy = fast_retry(3);
        assert!(policy.is_retryable(&status(502)));
        assert!(!policy.is_retryable(&status(401)));
        assert!(policy.is_retryable(&TransportError::Timeout { secs: 1 }));
        assert!(policy.is_retryable(&TransportError::Connect("reset".to_string())));
        assert!(!policy.is_retryable(&TransportError::Api("bad key".to_string())));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let transport = QueueTransport::new(vec![Err(status(502)), Err(status(500)), Ok("  摘要  ".to_string())]);
        let client = CompletionClient::with_transport(transport.clone(), fast_retry(3));

        let text = client.complete("讲义", None, &params()).await.unwrap();
        assert_eq!(text, "摘要");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let transport = QueueTransport::new(vec![Err(status(504)), Err(status(504)), Err(status(504))]);
        let client = CompletionClient::with_transport(transport.clone(), fast_retry(2));

        let err = client.complete("讲义", None, &params()).await.unwrap_err();
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let transport = QueueTransport::new(vec![Err(status(401)), Ok("不会用到".to_string())]);
        let client = CompletionClient::with_transport(transport.clone(), fast_retry(3));

        let err = client.complete("讲义", None, &params()).await.unwrap_err();
        assert!(matches!(err, LlmError::Rejected { .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_content_is_error() {
        let transport = QueueTransport::new(vec![Ok("   \n".to_string())]);
        let client = CompletionClient::with_transport(transport, RetryPolicy::none());

        let err = client.complete("讲义", None, &params()).await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyContent { .. }));
    }

    #[tokio::test]
    async fn test_streaming_drains_all_fragments() {
        let transport = QueueTransport::new(vec![Ok("流式摘要".to_string())]);
        let client = CompletionClient::with_transport(transport, RetryPolicy::none());
        let params = ModelParams {
            stream: true,
            ..params()
        };

        let text = client.generate("讲义", None, &params).await.unwrap();
        assert_eq!(text, "流式摘要");
    }

    #[tokio::test]
    async fn test_stream_error_midway_is_not_restarted() {
        let params = params();
        let fragments: Vec<Result<String, TransportError>> = vec![
            Ok("前半".to_string()),
            Err(TransportError::Stream("连接重置".to_string())),
            Ok("后半".to_string()),
        ];
        let stream: FragmentStream = Box::pin(futures::stream::iter(fragments));

        let err = CompletionClient::drain_stream(stream, &params).await.unwrap_err();
        assert!(matches!(err, LlmError::StreamInterrupted { received: 1, .. }));
    }

    #[test]
    fn test_drain_stream_blocking() {
        let params = params();
        let stream: FragmentStream = Box::pin(futures::stream::iter(vec![
            Ok("a".to_string()),
            Ok("b".to_string()),
        ]));
        let text = tokio_test::block_on(CompletionClient::drain_stream(stream, &params)).unwrap();
        assert_eq!(text, "ab");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_times_out_and_retries() {
        let transport = SlowTransport::new(vec![Duration::from_secs(3600)]);
        let client = CompletionClient::with_transport(transport.clone(), fast_retry(2));
        let params = ModelParams {
            timeout_secs: 10,
            ..params()
        };

        let text = client.complete("讲义", None, &params).await.unwrap();
        assert_eq!(text, "摘要");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_retries() {
        let hour = Duration::from_secs(3600);
        let transport = SlowTransport::new(vec![hour, hour, hour]);
        let client = CompletionClient::with_transport(transport.clone(), fast_retry(2));
        let params = ModelParams {
            timeout_secs: 10,
            ..params()
        };

        let err = client.complete("讲义", None, &params).await.unwrap_err();
        match err {
            LlmError::RetriesExhausted {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(source, TransportError::Timeout { secs: 10 });
            }
            other => panic!("错误类型不对: {:?}", other),
        }
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_open_timeout_is_retried() {
        let transport = SlowTransport::new(vec![Duration::from_secs(3600)]);
        let client = CompletionClient::with_transport(transport.clone(), fast_retry(1));
        let params = ModelParams {
            stream: true,
            stream_timeout_secs: 5,
            ..params()
        };

        let text = client.generate("讲义", None, &params).await.unwrap();
        assert_eq!(text, "摘要");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_idle_timeout_interrupts() {
        let params = ModelParams {
            stream_timeout_secs: 5,
            ..params()
        };
        let stream: FragmentStream = Box::pin(
            futures::stream::iter(vec![Ok("前半".to_string())]).chain(futures::stream::pending()),
        );

        let err = CompletionClient::drain_stream(stream, &params).await.unwrap_err();
        match err {
            LlmError::StreamInterrupted {
                received, source, ..
            } => {
                assert_eq!(received, 1);
                assert_eq!(source, TransportError::Timeout { secs: 5 });
            }
            other => panic!("错误类型不对: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_error_on_first_stream_item_is_retried() {
        let transport = LazyStreamTransport::new(vec![
            vec![Err(refused())],
            vec![Ok(None), Ok(Some("流式".to_string())), Ok(Some("摘要".to_string()))],
        ]);
        let client = CompletionClient::with_transport(transport.clone(), fast_retry(2));
        let params = ModelParams {
            stream: true,
            ..params()
        };

        let text = client.generate("讲义", None, &params).await.unwrap();
        assert_eq!(text, "流式摘要");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_stream_connect_errors_exhaust_retries_like_batch() {
        let transport = LazyStreamTransport::new(vec![
            vec![Err(refused())],
            vec![Err(refused())],
            vec![Err(refused())],
        ]);
        let client = CompletionClient::with_transport(transport.clone(), fast_retry(2));
        let params = ModelParams {
            stream: true,
            ..params()
        };

        let err = client.generate("讲义", None, &params).await.unwrap_err();
        assert!(matches!(
            err,
            LlmError::RetriesExhausted {
                attempts: 3,
                source: TransportError::Connect(_),
                ..
            }
        ));
        assert_eq!(transport.calls(), 3);
    }
}
