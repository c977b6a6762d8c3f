use std::path::PathBuf;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// LLM 服务错误
    #[error("LLM错误: {0}")]
    Llm(#[from] LlmError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 流程错误（压缩阶段失败等致命错误）
    #[error("流程错误: {0}")]
    Pipeline(#[from] PipelineError),
    /// 其他错误
    #[error("错误: {0}")]
    Other(String),
}

/// 传输层错误
///
/// 只描述"一次请求为什么失败"，是否重试由 `RetryPolicy` 决定。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// 服务端返回非成功状态码
    #[error("HTTP 状态码 {code}: {message}")]
    Status { code: u16, message: String },
    /// 服务器错误，响应中没有可用的状态码
    #[error("服务器错误: {0}")]
    Server(String),
    /// 请求超时
    #[error("请求超时 ({secs} 秒)")]
    Timeout { secs: u64 },
    /// 连接失败
    #[error("连接失败: {0}")]
    Connect(String),
    /// API 返回错误对象
    #[error("API 返回错误: {0}")]
    Api(String),
    /// 请求或响应格式错误
    #[error("协议错误: {0}")]
    Protocol(String),
    /// 流式响应中断
    #[error("流式响应中断: {0}")]
    Stream(String),
}

/// LLM 服务错误
#[derive(Debug, Error)]
pub enum LlmError {
    /// 重试次数耗尽
    #[error("LLM API调用失败 (模型: {model}, 共尝试 {attempts} 次): {source}")]
    RetriesExhausted {
        model: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    /// 不可重试的失败
    #[error("LLM API调用被拒绝 (模型: {model}): {source}")]
    Rejected {
        model: String,
        #[source]
        source: TransportError,
    },
    /// 流式响应在中途失败（流不可重启）
    #[error("LLM 流式响应失败 (模型: {model}, 已接收 {received} 个片段): {source}")]
    StreamInterrupted {
        model: String,
        received: usize,
        #[source]
        source: TransportError,
    },
    /// 返回内容为空
    #[error("LLM返回内容为空 (模型: {model})")]
    EmptyContent { model: String },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 文件不存在
    #[error("文件不存在: {}", .path.display())]
    NotFound { path: PathBuf },
    /// 读取文件失败
    #[error("读取文件失败 ({}): {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({}): {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 创建目录失败
    #[error("创建目录失败 ({}): {source}", .path.display())]
    DirectoryCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// PDF 文本提取失败
    #[error("PDF文本提取失败 ({}): {message}", .path.display())]
    ExtractFailed { path: PathBuf, message: String },
    /// TOML 解析失败
    #[error("TOML解析失败 ({}): {source}", .path.display())]
    TomlParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// JSON 序列化失败
    #[error("JSON序列化失败 ({}): {source}", .path.display())]
    JsonFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 字数限制必须大于 0
    #[error("字数限制需大于 0 (当前: {value})")]
    InvalidLimit { value: i64 },
    /// API key 未提供
    #[error("API key 未提供")]
    EmptyApiKey,
    /// 数量参数必须大于 0
    #[error("{name} 必须大于 0")]
    ZeroCount { name: &'static str },
    /// 自定义预算表无法解析
    #[error("无法解析字数预算表 '{value}': 需要以逗号分隔的正整数")]
    InvalidSchedule { value: String },
}

/// 流程错误
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 压缩阶段某轮失败，整个运行中止
    #[error("生成阶段第 {round} 轮失败: {source}")]
    CompressionFailed {
        round: usize,
        #[source]
        source: LlmError,
    },
    /// 原文修复失败
    #[error("原文修复失败: {source}")]
    RepairFailed {
        #[source]
        source: LlmError,
    },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_error_display() {
        let err: AppError = PipelineError::CompressionFailed {
            round: 2,
            source: LlmError::RetriesExhausted {
                model: "deepseek-reasoner".to_string(),
                attempts: 4,
                source: TransportError::Status {
                    code: 502,
                    message: "bad gateway".to_string(),
                },
            },
        }
        .into();

        let text = err.to_string();
        assert!(text.contains("生成阶段第 2 轮失败"));
        assert!(text.contains("共尝试 4 次"));
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error;

        let err = LlmError::Rejected {
            model: "m".to_string(),
            source: TransportError::Api("invalid key".to_string()),
        };
        let source = err.source().expect("应该有 source");
        assert_eq!(source.to_string(), "API 返回错误: invalid key");
    }
}
