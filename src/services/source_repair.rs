//! 原文修复服务 - 业务能力层
//!
//! PDF 转出的纯文本常有乱码、断行和公式丢失，这里让模型修复后逐字输出 Markdown。

use tracing::info;

use crate::clients::{CompletionClient, ModelParams};
use crate::error::LlmError;

const REPAIR_SYSTEM_MESSAGE: &str = concat!(
    "这些是一门课程的课件或者笔记，你需要注意：我们直接通过某种工具将其转换成了纯文本，",
    "可能会造成格式错误，乱码或者信息丢失，请务必先根据已有的知识进行修复，",
    "然后逐字逐句的以 Markdown 的格式输出，你需要用 $ 包裹公式而不是括号和斜杠，",
    "输出修复后的内容，不要进行包括概括，内容拓展等的任何操作！！！",
);

/// 原文修复服务
#[derive(Clone)]
pub struct SourceRepair {
    client: CompletionClient,
}

impl SourceRepair {
    pub fn new(client: CompletionClient) -> Self {
        Self { client }
    }

    /// 修复提取文本
    ///
    /// 总是附加深度思考指令；失败时直接返回错误，由调用方中止运行。
    pub async fn repair(&self, text: &str, params: &ModelParams) -> Result<String, LlmError> {
        info!("🔧 修复提取文本 ({} 字符)...", text.chars().count());
        let params = params.clone().with_deep_thought(true);
        self.client
            .generate(text, Some(REPAIR_SYSTEM_MESSAGE), &params)
            .await
    }
}
