//! 出题服务 - 业务能力层
//!
//! 只负责"根据讲义出选择题"，不解析题目结构，结构由评分服务重新推导。

use tracing::{info, warn};

use crate::clients::{CompletionClient, ModelParams};

const SYNTHESIZER_SYSTEM_MESSAGE: &str = concat!(
    "您是一位经验丰富的考试命题专家。任务：",
    "1. 你需要根据文本内容，推断出课程主题，并根据历史经验综合判断这门课的重点，",
    "忽略无关内容，如话题的引入、老师的闲聊、无聊的举例等；",
    "2. 只生成选择题（单选或多选），不要生成其他题型；",
    "3. 题目难度接近期末考试水平，避免对同一知识点重复出题；",
    "4. 格式要求：每道题以题号开始（如：1.），然后是题目内容，",
    "选项以A、B、C、D等大写字母开头，最后一行标注'答案：'和正确答案（如：答案：A）；",
    "5. 确保题目覆盖所有重要知识点。",
);

/// 出题服务
#[derive(Clone)]
pub struct QuestionSynthesizer {
    client: CompletionClient,
}

impl QuestionSynthesizer {
    pub fn new(client: CompletionClient) -> Self {
        Self { client }
    }

    /// 构造出题请求的用户消息
    pub fn build_prompt(content: &str, count: usize) -> String {
        format!(
            "请基于以下文本内容，生成{}道选择题（单选或多选）。确保题目覆盖文本中的重要知识点和易错点：\n{}",
            count, content
        )
    }

    /// 生成选择题
    ///
    /// # 参数
    /// - `content`: 原始讲义（不是当前摘要）
    /// - `count`: 题目数量
    ///
    /// # 返回
    /// 题目原文；任何失败都记录日志并返回 `None`，调用方应跳过本轮验证
    pub async fn generate(
        &self,
        content: &str,
        count: usize,
        params: &ModelParams,
    ) -> Option<String> {
        info!("📝 生成 {} 道选择题...", count);
        let prompt = Self::build_prompt(content, count);

        match self
            .client
            .generate(&prompt, Some(SYNTHESIZER_SYSTEM_MESSAGE), params)
            .await
        {
            Ok(questions) => Some(questions),
            Err(e) => {
                warn!("题目生成失败: {}", e);
                None
            }
        }
    }
}
