use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::clients::{ModelParams, RetryPolicy};
use crate::error::{AppResult, ConfigError, FileError};
use crate::models::DEFAULT_VISIBLE_CHAR_CAP;

/// 程序配置
///
/// 运行开始时构造一次，显式传入各层，不使用全局状态。
#[derive(Clone, Debug)]
pub struct Config {
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// 普通请求超时（秒）
    pub timeout_secs: u64,
    /// 流式请求每个片段的等待超时（秒）
    pub stream_timeout_secs: u64,
    /// 是否使用流式请求
    pub stream: bool,
    /// 压缩阶段是否附加深度思考指令
    pub deep_thought_compression: bool,
    /// 是否附加联网搜索指令
    pub web_search: bool,
    // --- 重试配置 ---
    pub retries: u32,
    pub backoff_factor: f64,
    pub retry_statuses: Vec<u16>,
    // --- 流程配置 ---
    /// 每轮预算的全局可见字符上限
    pub visible_char_cap: usize,
    /// 生成阶段轮数
    pub gen_rounds: usize,
    /// 验证阶段轮数
    pub val_rounds: usize,
    /// 每轮验证的题目数量
    pub val_problems: usize,
    /// 每轮优化最多带入的未解答题目数
    pub max_gap_questions: usize,
    /// 运行目录的父目录
    pub output_root: PathBuf,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.deepseek.com/v1".to_string(),
            llm_model_name: "deepseek-reasoner".to_string(),
            max_output_tokens: 32768,
            temperature: 0.7,
            timeout_secs: 300,
            stream_timeout_secs: 300,
            stream: false,
            deep_thought_compression: true,
            web_search: false,
            retries: 3,
            backoff_factor: 0.3,
            retry_statuses: vec![500, 502, 504],
            visible_char_cap: DEFAULT_VISIBLE_CHAR_CAP,
            gen_rounds: 3,
            val_rounds: 2,
            val_problems: 5,
            max_gap_questions: 10,
            output_root: PathBuf::from("."),
            verbose_logging: false,
        }
    }
}

/// TOML 配置文件，所有字段可选
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    llm: LlmSection,
    retry: RetrySection,
    pipeline: PipelineSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LlmSection {
    api_key: Option<String>,
    api_base_url: Option<String>,
    model_name: Option<String>,
    max_output_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    stream_timeout_secs: Option<u64>,
    stream: Option<bool>,
    deep_thought_compression: Option<bool>,
    web_search: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RetrySection {
    retries: Option<u32>,
    backoff_factor: Option<f64>,
    statuses: Option<Vec<u16>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PipelineSection {
    visible_char_cap: Option<usize>,
    gen_rounds: Option<usize>,
    val_rounds: Option<usize>,
    val_problems: Option<usize>,
    max_gap_questions: Option<usize>,
    output_root: Option<PathBuf>,
    verbose_logging: Option<bool>,
}

impl Config {
    /// 默认值 + 环境变量
    pub fn from_env() -> Self {
        Self::default().with_env(|name| std::env::var(name).ok())
    }

    /// 默认值 + TOML 配置文件
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| FileError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::default().with_toml_str(&content, path)
    }

    fn with_toml_str(mut self, content: &str, path: &Path) -> AppResult<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| FileError::TomlParseFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        let llm = file.llm;
        set(&mut self.llm_api_key, llm.api_key);
        set(&mut self.llm_api_base_url, llm.api_base_url);
        set(&mut self.llm_model_name, llm.model_name);
        set(&mut self.max_output_tokens, llm.max_output_tokens);
        set(&mut self.temperature, llm.temperature);
        set(&mut self.timeout_secs, llm.timeout_secs);
        set(&mut self.stream_timeout_secs, llm.stream_timeout_secs);
        set(&mut self.stream, llm.stream);
        set(&mut self.deep_thought_compression, llm.deep_thought_compression);
        set(&mut self.web_search, llm.web_search);

        let retry = file.retry;
        set(&mut self.retries, retry.retries);
        set(&mut self.backoff_factor, retry.backoff_factor);
        set(&mut self.retry_statuses, retry.statuses);

        let pipeline = file.pipeline;
        set(&mut self.visible_char_cap, pipeline.visible_char_cap);
        set(&mut self.gen_rounds, pipeline.gen_rounds);
        set(&mut self.val_rounds, pipeline.val_rounds);
        set(&mut self.val_problems, pipeline.val_problems);
        set(&mut self.max_gap_questions, pipeline.max_gap_questions);
        set(&mut self.output_root, pipeline.output_root);
        set(&mut self.verbose_logging, pipeline.verbose_logging);

        Ok(self)
    }

    /// 用环境变量覆盖配置
    ///
    /// `lookup` 通常是 `std::env::var`，测试时可以传入固定表，避免并发测试互相干扰。
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        set(&mut self.llm_api_key, lookup("LLM_API_KEY"));
        set(&mut self.llm_api_base_url, lookup("LLM_API_BASE_URL"));
        set(&mut self.llm_model_name, lookup("LLM_MODEL_NAME"));
        if let Some(v) = lookup("VERBOSE_LOGGING") {
            self.verbose_logging = v.parse().unwrap_or(self.verbose_logging);
        }
        if let Some(v) = lookup("DEEPSEEK_MAX_VISIBLE_CHARS") {
            match v.trim().parse::<usize>() {
                Ok(cap) => self.visible_char_cap = cap,
                Err(_) => {
                    warn!(
                        "环境变量 DEEPSEEK_MAX_VISIBLE_CHARS='{}' 无法解析，使用默认值 {}",
                        v, DEFAULT_VISIBLE_CHAR_CAP
                    );
                    self.visible_char_cap = DEFAULT_VISIBLE_CHAR_CAP;
                }
            }
        }
        self
    }

    /// 生成默认的模型调用参数
    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            model: self.llm_model_name.clone(),
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
            deep_thought: false,
            web_search: self.web_search,
            timeout_secs: self.timeout_secs,
            stream_timeout_secs: self.stream_timeout_secs,
            stream: self.stream,
        }
    }

    /// 生成重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            backoff_factor: self.backoff_factor,
            retry_statuses: self.retry_statuses.clone(),
        }
    }
}

/// 单次运行的入口参数
#[derive(Debug, Clone)]
pub struct RunParams {
    /// 讲义文件（PDF 或文本）
    pub source_path: PathBuf,
    /// 最终可见字符限制
    pub final_limit: i64,
    /// 自定义每轮预算，覆盖标准预算表
    pub schedule: Option<Vec<usize>>,
    /// 是否先用 LLM 修复 PDF 提取的文本
    pub repair_source: bool,
}

impl RunParams {
    /// 检查运行前置条件，返回最终字数限制
    ///
    /// 文件不存在、限制不大于 0、API key 为空都会直接拒绝。
    pub fn validate(&self, config: &Config) -> AppResult<usize> {
        if !self.source_path.is_file() {
            return Err(FileError::NotFound {
                path: self.source_path.clone(),
            }
            .into());
        }

        if self.final_limit <= 0 {
            return Err(ConfigError::InvalidLimit {
                value: self.final_limit,
            }
            .into());
        }

        if config.llm_api_key.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey.into());
        }

        if config.val_rounds > 0 && config.val_problems == 0 {
            return Err(ConfigError::ZeroCount {
                name: "valproblems",
            }
            .into());
        }

        if matches!(&self.schedule, Some(limits) if limits.is_empty()) {
            return Err(ConfigError::InvalidSchedule {
                value: String::new(),
            }
            .into());
        }

        Ok(self.final_limit as usize)
    }
}

/// 解析 `8000,3000,1000` 形式的预算表
pub fn parse_schedule(value: &str) -> Result<Vec<usize>, ConfigError> {
    let invalid = || ConfigError::InvalidSchedule {
        value: value.to_string(),
    };

    let limits = value
        .split(',')
        .map(|part| part.trim().parse::<usize>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>, _>>()?;

    if limits.is_empty() || limits.contains(&0) {
        return Err(invalid());
    }
    Ok(limits)
}

/// 有值时覆盖
fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gen_rounds, 3);
        assert_eq!(config.val_rounds, 2);
        assert_eq!(config.val_problems, 5);
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.visible_char_cap, 30000);
    }

    #[test]
    fn test_env_cap_override() {
        let config = Config::default().with_env(env(&[("DEEPSEEK_MAX_VISIBLE_CHARS", "12000")]));
        assert_eq!(config.visible_char_cap, 12000);

        let config = Config::default().with_env(env(&[("DEEPSEEK_MAX_VISIBLE_CHARS", "很多")]));
        assert_eq!(config.visible_char_cap, DEFAULT_VISIBLE_CHAR_CAP);
    }

    #[test]
    fn test_env_api_settings() {
        let config = Config::default().with_env(env(&[
            ("LLM_API_KEY", "sk-test"),
            ("LLM_MODEL_NAME", "deepseek-chat"),
        ]));
        assert_eq!(config.llm_api_key, "sk-test");
        assert_eq!(config.llm_model_name, "deepseek-chat");
        assert_eq!(config.model_params().model, "deepseek-chat");
    }

    #[test]
    fn test_toml_overlay() {
        let content = r#"
            [llm]
            model_name = "deepseek-chat"
            stream = true

            [retry]
            retries = 5
            statuses = [429, 500]

            [pipeline]
            gen_rounds = 4
            visible_char_cap = 8000
        "#;
        let config = Config::default()
            .with_toml_str(content, Path::new("cheatsheet.toml"))
            .unwrap();

        assert_eq!(config.llm_model_name, "deepseek-chat");
        assert!(config.stream);
        assert_eq!(config.retry_policy().retries, 5);
        assert_eq!(config.retry_statuses, vec![429, 500]);
        assert_eq!(config.gen_rounds, 4);
        assert_eq!(config.visible_char_cap, 8000);
        // 未出现的键保持默认值
        assert_eq!(config.val_rounds, 2);
    }

    #[test]
    fn test_toml_parse_error() {
        let result = Config::default().with_toml_str("[llm\nmodel_name=", Path::new("bad.toml"));
        assert!(matches!(
            result,
            Err(AppError::File(FileError::TomlParseFailed { .. }))
        ));
    }

    #[test]
    fn test_run_params_validation() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("lecture.txt");
        std::fs::write(&source, "讲义").unwrap();

        let config = Config {
            llm_api_key: "sk-test".to_string(),
            ..Config::default()
        };
        let params = RunParams {
            source_path: source.clone(),
            final_limit: 2000,
            schedule: None,
            repair_source: false,
        };
        assert_eq!(params.validate(&config).unwrap(), 2000);

        let zero = RunParams { final_limit: 0, ..params.clone() };
        assert!(matches!(
            zero.validate(&config),
            Err(AppError::Config(ConfigError::InvalidLimit { value: 0 }))
        ));

        let missing = RunParams {
            source_path: dir.path().join("missing.pdf"),
            ..params.clone()
        };
        assert!(matches!(
            missing.validate(&config),
            Err(AppError::File(FileError::NotFound { .. }))
        ));

        let no_key = Config::default();
        assert!(matches!(
            params.validate(&no_key),
            Err(AppError::Config(ConfigError::EmptyApiKey))
        ));
    }

    #[test]
    fn test_parse_schedule() {
        assert_eq!(parse_schedule("8000, 3000,1000").unwrap(), vec![8000, 3000, 1000]);
        assert!(parse_schedule("8000,abc").is_err());
        assert!(parse_schedule("0,100").is_err());
        assert!(parse_schedule("").is_err());
    }
}
