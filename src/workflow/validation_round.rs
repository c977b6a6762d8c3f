//! 验证流程 - 流程层
//!
//! 定义验证阶段"一轮"的完整处理流程：
//! 1. 保存 `gen{j}_pre.txt`
//! 2. 根据原始讲义出题 → `val{j}.txt`
//! 3. 只用当前摘要答题 → `result{j}.txt`
//! 4. 评分 → `result{j}.json` + `visual{j}.txt`
//! 5. 针对错题优化摘要 → `gen{j}_post.txt`
//!
//! 出题、答题、评分任何一步失败都只跳过本轮；优化失败则通知驱动器提前结束验证阶段。

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::clients::{CompletionClient, ModelParams};
use crate::error::AppResult;
use crate::infrastructure::{ArtifactName, ArtifactStore};
use crate::models::{GradeOutcome, RoundTally};
use crate::services::{ExamSolver, Grader, QuestionSynthesizer};
use crate::utils::{count_visible_chars, logging};
use crate::workflow::round_ctx::RoundCtx;

/// 跳过本轮的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 出题失败
    SynthesisFailed,
    /// 答题失败
    SolveFailed,
    /// 评分调用失败
    GradingFailed,
    /// 评分结果无法解析
    Unparseable,
    /// 评分结果为空
    NoRecords,
}

impl SkipReason {
    pub fn describe(self) -> &'static str {
        match self {
            SkipReason::SynthesisFailed => "题目生成失败",
            SkipReason::SolveFailed => "题目解答失败",
            SkipReason::GradingFailed => "解答解析调用失败",
            SkipReason::Unparseable => "解答解析结果无法识别",
            SkipReason::NoRecords => "解答解析结果为空",
        }
    }
}

/// 一轮验证的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// 完成优化，得到新的摘要
    Refined { artifact: String, tally: RoundTally },
    /// 本轮被跳过，摘要不变
    Skipped(SkipReason),
    /// 优化调用失败，验证阶段应立即结束
    RefinementFailed { tally: RoundTally },
}

/// 验证流程
///
/// - 编排一轮"出题 → 答题 → 评分 → 优化"
/// - 题目总是根据原始讲义生成，答题总是只使用当前摘要
/// - 不持有轮次之间的状态
pub struct ValidationRound {
    synthesizer: QuestionSynthesizer,
    solver: ExamSolver,
    grader: Arc<dyn Grader>,
    client: CompletionClient,
    params: ModelParams,
    val_problems: usize,
    max_gap_questions: usize,
    final_limit: usize,
}

impl ValidationRound {
    pub fn new(
        client: CompletionClient,
        grader: Arc<dyn Grader>,
        params: ModelParams,
        val_problems: usize,
        max_gap_questions: usize,
        final_limit: usize,
    ) -> Self {
        Self {
            synthesizer: QuestionSynthesizer::new(client.clone()),
            solver: ExamSolver::new(client.clone()),
            grader,
            client,
            params,
            val_problems,
            max_gap_questions,
            final_limit,
        }
    }

    /// 执行一轮验证
    ///
    /// # 参数
    /// - `source`: 原始讲义
    /// - `current`: 当前摘要
    ///
    /// # 返回
    /// 只有写文件失败会返回 `Err`，其余失败都体现在 `ValidationOutcome` 中
    pub async fn run(
        &self,
        ctx: &RoundCtx,
        source: &str,
        current: &str,
        store: &ArtifactStore,
    ) -> AppResult<ValidationOutcome> {
        store.save_text(ArtifactName::Pre(ctx.round), current)?;

        // ========== 1. 出题 ==========
        let Some(questions) = self
            .synthesizer
            .generate(source, self.val_problems, &self.params)
            .await
        else {
            return Ok(self.skip(ctx, SkipReason::SynthesisFailed));
        };
        let path = store.save_text(ArtifactName::Questions(ctx.round), &questions)?;
        info!("{} ✓ 已保存选择题: {}", ctx, path.display());

        // ========== 2. 答题 ==========
        let transcript = match self.solver.solve(&questions, current, &self.params).await {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!("{} 答题调用失败: {}", ctx, e);
                return Ok(self.skip(ctx, SkipReason::SolveFailed));
            }
        };
        let path = store.save_text(ArtifactName::Transcript(ctx.round), &transcript)?;
        info!("{} ✓ 已保存解答: {}", ctx, path.display());

        // ========== 3. 评分 ==========
        let records = match self.grader.grade(&transcript).await {
            Ok(GradeOutcome::Parsed(records)) if !records.is_empty() => records,
            Ok(GradeOutcome::Parsed(_)) => return Ok(self.skip(ctx, SkipReason::NoRecords)),
            Ok(GradeOutcome::Unparseable(raw)) => {
                logging::append_run_log(
                    &store.path_of(ArtifactName::RunLog),
                    &format!("{} 评分原始响应无法解析:\n{}", ctx, raw),
                )?;
                return Ok(self.skip(ctx, SkipReason::Unparseable));
            }
            Err(e) => {
                warn!("{} 评分调用失败: {}", ctx, e);
                return Ok(self.skip(ctx, SkipReason::GradingFailed));
            }
        };

        let tally = RoundTally::from_records(&records);
        store.save_text(ArtifactName::Visual(ctx.round), &tally.visualization)?;
        store.save_json(ArtifactName::Tally(ctx.round), &tally)?;
        info!("{} 可视化结果: {}", ctx, tally.visualization);
        info!(
            "{} 正确: {}题, 错误: {}题, 无法解答: {}题",
            ctx, tally.correct_count, tally.incorrect_count, tally.unsolved_count
        );

        // ========== 4. 针对错题优化 ==========
        let gaps = tally.gap_questions(self.max_gap_questions);
        info!("{} 发现 {} 道错误或无法解答的题目", ctx, gaps.len());

        let prompt = Self::build_refinement_prompt(current, source, &gaps, self.final_limit);
        let system_message = Self::build_refinement_system_message(ctx, self.final_limit);

        info!("{} 🔄 基于反馈优化摘要...", ctx);
        let artifact = match self
            .client
            .generate(&prompt, Some(&system_message), &self.params)
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => {
                error!("{} ❌ 摘要优化失败，提前结束验证阶段: {}", ctx, e);
                return Ok(ValidationOutcome::RefinementFailed { tally });
            }
        };

        store.save_text(ArtifactName::Post(ctx.round), &artifact)?;
        info!(
            "{} ✓ 验证迭代完成，摘要已更新 ({} 字)",
            ctx,
            count_visible_chars(&artifact)
        );

        Ok(ValidationOutcome::Refined { artifact, tally })
    }

    fn skip(&self, ctx: &RoundCtx, reason: SkipReason) -> ValidationOutcome {
        warn!("{} ⚠️ {}，跳过本轮验证", ctx, reason.describe());
        ValidationOutcome::Skipped(reason)
    }

    /// 构造优化请求的用户消息
    pub fn build_refinement_prompt(
        current: &str,
        source: &str,
        gaps: &[&str],
        final_limit: usize,
    ) -> String {
        let gap_list = gaps
            .iter()
            .map(|q| format!("- {}", q))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "当前摘要：\n{current}\n\n\
             原始文本：\n{source}\n\n\
             无法解答的题目：\n{gap_list}\n\n\
             任务：优化摘要以覆盖未解答题目所需的知识点，同时保持严格不超过 {final_limit} 字。\
             优化策略：\
             1. 保留所有已覆盖的知识点；\
             2. 添加解答题目所需的关键信息；\
             3. 删除相对次要的内容以保持长度；\
             4. 确保新摘要能解答上述题目。"
        )
    }

    /// 构造优化请求的系统指令，总是以最终字数限制为目标
    pub fn build_refinement_system_message(ctx: &RoundCtx, final_limit: usize) -> String {
        let round = ctx.round;
        format!(
            "您是一位更高级的考试复习摘要专家（验证迭代{round}）。基于上一次结果，精简至严格不超过 {final_limit} 字，\
             如果你要加入新的内容，请务必保证加入后也满足字数要求：\
             请首先评估当前摘要长度，若超过限制，务必进一步删除非核心内容；\
             确认覆盖所有核心考点；保留**加粗**，弱化或删除~划掉~；\
             压缩困难时可删除更细节的非考试相关内容；\
             优化表达，增加记忆提示；保持逻辑连贯、易快速浏览。\
             要求：\
             1. 分析未解答题目缺失的知识点；\
             2. 从原始文本中提取必要信息添加到摘要，始终忽略无用信息（如话题的引入，老师的闲聊，无聊的举例等），\
             如果你觉得某一道题目的考察是无用的，也需要忽略；\
             3. 删除相对次要的内容以保持长度限制；\
             4. 确保新摘要能解答这些题目；\
             5. 保持Markdown格式和重点标注。\
             最终摘要必须严格不超过 {final_limit} 字。"
        )
    }
}
