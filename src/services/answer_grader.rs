//! 评分服务 - 业务能力层
//!
//! 把自由文本的解答转换成结构化的逐题判定。`Grader` trait 是替换点，
//! 测试可以换成确定性的评分器。

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::clients::{CompletionClient, ModelParams};
use crate::error::LlmError;
use crate::models::{GradeOutcome, VerdictRecord};
use crate::utils::logging::truncate_text;

const GRADER_SYSTEM_MESSAGE: &str = concat!(
    "你是一个解答解析器。任务：",
    "1. 分析提供的解答文本；",
    "2. 识别每道题的题目内容；",
    "3. 判断每道题的状态（正确、错误或无法解答）；",
    "4. 输出严格的JSON格式，不包含任何额外文本。",
);

/// 贪婪匹配第一个 `[` 到最后一个 `]`
static GREEDY_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").unwrap());

/// 评分能力
#[async_trait]
pub trait Grader: Send + Sync {
    /// 评分一份解答
    ///
    /// `Err` 表示调用本身失败；`Ok(Unparseable)` 表示调用成功但响应无法解析。
    async fn grade(&self, transcript: &str) -> Result<GradeOutcome, LlmError>;
}

/// 基于 LLM 的评分服务
#[derive(Clone)]
pub struct AnswerGrader {
    client: CompletionClient,
    params: ModelParams,
}

impl AnswerGrader {
    pub fn new(client: CompletionClient, params: ModelParams) -> Self {
        Self { client, params }
    }

    pub fn build_prompt(transcript: &str) -> String {
        format!(
            "请分析以下解答文本，提取每道题的状态（正确、错误或无法解答）：\n{}\n\n\
             输出格式要求：\
             1. 输出JSON格式；\
             2. 包含一个数组，每个元素是一个对象；\
             3. 每个对象包含两个字段：'question'（题目内容）和'status'（状态）；\
             4. 状态只能是'正确'、'错误'或'无法解答'；\
             5. 不要包含其他内容。",
            transcript
        )
    }
}

#[async_trait]
impl Grader for AnswerGrader {
    async fn grade(&self, transcript: &str) -> Result<GradeOutcome, LlmError> {
        info!("🔍 解析解答结果...");
        let prompt = Self::build_prompt(transcript);
        let raw = self
            .client
            .generate(&prompt, Some(GRADER_SYSTEM_MESSAGE), &self.params)
            .await?;
        Ok(parse_grader_response(&raw))
    }
}

/// 解析评分器的响应
///
/// 依次尝试：整体严格解析 → 贪婪匹配 `[...]` → 从每个 `[` 开始的第一个平衡括号区域。
/// 全部失败时记录原始响应并返回 `Unparseable`。
pub fn parse_grader_response(raw: &str) -> GradeOutcome {
    if let Ok(records) = serde_json::from_str::<Vec<VerdictRecord>>(raw.trim()) {
        return GradeOutcome::Parsed(records);
    }
    warn!("解析评分结果 JSON 失败，尝试提取有效 JSON");

    if let Some(found) = GREEDY_ARRAY.find(raw) {
        if let Ok(records) = serde_json::from_str::<Vec<VerdictRecord>>(found.as_str()) {
            return GradeOutcome::Parsed(records);
        }
    }

    for (start, _) in raw.match_indices('[') {
        if let Some(region) = balanced_region(&raw[start..]) {
            if let Ok(records) = serde_json::from_str::<Vec<VerdictRecord>>(region) {
                return GradeOutcome::Parsed(records);
            }
        }
    }

    warn!("无法解析为有效 JSON: {}", truncate_text(raw, 200));
    debug!("评分原始响应: {}", raw);
    GradeOutcome::Unparseable(raw.to_string())
}

/// 从 `[` 开始截取第一个括号平衡的区域，忽略 JSON 字符串内部的括号
fn balanced_region(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}
