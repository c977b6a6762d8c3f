//! 压缩流程 - 流程层
//!
//! 定义压缩阶段"一轮"的处理：构造本轮系统指令 → 补全 → 保存 `gen{i}.txt`。
//! 任何一轮失败都会中止整个运行。

use tracing::{error, info};

use crate::clients::{CompletionClient, ModelParams};
use crate::error::{AppResult, PipelineError};
use crate::infrastructure::{ArtifactName, ArtifactStore};
use crate::utils::{count_visible_chars, Language};
use crate::workflow::round_ctx::RoundCtx;

/// 压缩流程
pub struct CompressionRound {
    client: CompletionClient,
    params: ModelParams,
    language: Option<Language>,
}

impl CompressionRound {
    /// # 参数
    /// - `params`: 模型参数，是否附加深度思考由调用方决定
    /// - `language`: 原始讲义的主要语言
    pub fn new(client: CompletionClient, params: ModelParams, language: Option<Language>) -> Self {
        Self {
            client,
            params,
            language,
        }
    }

    /// 构造本轮系统指令
    pub fn build_system_message(ctx: &RoundCtx, limit: usize, language: Option<Language>) -> String {
        let lang_instruction = language
            .map(|lang| format!("若原文主要使用{}，请使用相同语言输出摘要。", lang.label()))
            .unwrap_or_default();
        let round = ctx.round;

        if ctx.is_first() {
            format!(
                "您是一位高效的学术助手和专业的总结者，\
                 当前扮演角色：经验丰富的考试复习摘要助手（迭代{round}），\
                 你需要把用户给出的资料进行高度的概括，帮助用户制作半开卷考试的入场资料。\
                 由于半开卷考试的纸张大小有限，目标可见字符数严格不超过 {limit}。\
                 任务：将提供的讲义浓缩成简洁、高度可扫描的考试复习备忘录，字数严格不超过 {limit} 字（可见字符）。\
                 请先估算最终摘要的可见字符长度，如果可能超过限制，请预先规划删除策略。\
                 侧重核心概念、定义、关键公式、重要步骤和易混淆考点。\
                 请仅基于提供文本，不含外部信息或臆造内容。\
                 请以Markdown格式输出，加粗关键术语，~划掉~表示可弱化。\
                 第一次摘要时，请识别并对关键考点使用**加粗**标注，以便后续保留；\
                 思考流程：识别主题→提炼定义、公式、见解和记忆提示；\
                 若内容过多，请大胆删除与考试无关知识点，以确保输出长度不超过 {limit} 字；\
                 若已满足限制，无需压缩；{lang_instruction}\
                 同时，请始终满足以下要求：\n\
                 1. 明确课程名称，推测学生的前置知识，例如在数据结构与算法课程中，默认学生已掌握至少一门编程语言；\n\
                 2. 你的资料可能是课件、教材或课堂录音转写，请删除考试中绝对不会遇到的内容（如话题的引入，老师的闲聊，无聊的举例等），\
                 以及学生能在考场上现场推出的内容，例如基于前置知识的平凡计算过程；\n\
                 3. 用户群体均为准备期末考试的大学生，默认他们有较好的高中数理基础和生活常识；\n\
                 4. 始终保持可读性。"
            )
        } else {
            format!(
                "您是一位更高级的考试复习摘要专家（迭代{round}）。基于上一次结果，精简至严格不超过 {limit} 字：\
                 请首先评估当前摘要长度，若超过限制，务必进一步删除非核心内容；\
                 确认覆盖所有核心考点；保留**加粗**，弱化或删除~划掉~；\
                 若已满足限制，无需再次压缩；压缩困难时可删除更细节的非考试相关内容；\
                 {lang_instruction}优化表达，增加记忆提示；保持逻辑连贯、易快速浏览；\
                 只依据上一轮的摘要内容，不引入外部信息。\
                 同时，请始终满足以下要求：\n\
                 1. 明确课程名称，推测学生的前置知识；\n\
                 2. 删除考试中绝对不会遇到的内容（如话题的引入，老师的闲聊，无聊的举例等）和学生能在考场上现场推出的内容；\n\
                 3. 用户群体均为准备期末考试的大学生；\n\
                 4. 以Markdown格式输出，加粗关键术语，~划掉~表示可弱化。"
            )
        }
    }

    /// 执行一轮压缩
    ///
    /// # 参数
    /// - `current`: 当前摘要（第 1 轮为原始讲义）
    /// - `limit`: 本轮目标可见字符数
    ///
    /// # 返回
    /// 本轮输出；补全失败时返回 `PipelineError::CompressionFailed`
    pub async fn run(
        &self,
        ctx: &RoundCtx,
        limit: usize,
        current: &str,
        store: &ArtifactStore,
    ) -> AppResult<String> {
        info!("{} 🗜️ 开始压缩，目标 {} 字", ctx, limit);
        let system_message = Self::build_system_message(ctx, limit, self.language);

        let output = match self
            .client
            .generate(current, Some(&system_message), &self.params)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                error!("{} ❌ 压缩调用失败: {}", ctx, e);
                return Err(PipelineError::CompressionFailed {
                    round: ctx.round,
                    source: e,
                }
                .into());
            }
        };

        store.save_text(ArtifactName::Generation(ctx.round), &output)?;
        let visible = count_visible_chars(&output);
        if visible > limit {
            info!("{} ✓ 压缩完成: {} 字 (超出目标 {} 字)", ctx, visible, limit);
        } else {
            info!("{} ✓ 压缩完成: {} 字 (目标 {} 字)", ctx, visible, limit);
        }

        Ok(output)
    }
}
