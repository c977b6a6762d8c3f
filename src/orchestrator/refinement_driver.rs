//! 迭代优化驱动器 - 编排层
//!
//! ## 职责
//!
//! 按严格的线性顺序执行两个阶段，把"当前摘要"在轮次之间传递：
//!
//! ```text
//! Compressing(1..N) ──> Validating(1..M) ──> Done
//! ```
//!
//! - 压缩阶段任何一轮失败：整个运行失败，不写 `final_summary.txt`
//! - 验证阶段某轮出题/答题/评分失败：跳过该轮
//! - 验证阶段优化失败：提前结束验证阶段
//! - 取消：在每轮开始前检查，已提交的摘要照常写入 `final_summary.txt`
//!
//! 任何时刻只有一个补全调用在进行，下一轮总是在上一轮的摘要提交后才开始。

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::clients::CompletionClient;
use crate::config::Config;
use crate::error::AppResult;
use crate::infrastructure::{ArtifactName, ArtifactStore};
use crate::models::{BudgetSchedule, RoundTally};
use crate::services::{AnswerGrader, Grader};
use crate::utils::{count_visible_chars, detect_language};
use crate::workflow::{
    CompressionRound, RoundCtx, SkipReason, ValidationOutcome, ValidationRound,
};

/// 协作式取消标记
///
/// 只在轮次边界检查，不会打断正在进行的补全调用。
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 驱动器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// 尚未开始
    Idle,
    Compressing { round: usize, total: usize },
    Validating { round: usize, total: usize },
    Done,
}

/// 运行结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// 所有轮次执行完毕
    Completed,
    /// 验证阶段第 `round` 轮优化失败
    RefinementFailed { round: usize },
    /// 收到取消请求
    Cancelled,
}

/// 单轮验证的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStatus {
    Refined,
    Skipped(SkipReason),
    RefinementFailed,
}

/// 单轮验证报告
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub round: usize,
    pub status: RoundStatus,
    pub tally: Option<RoundTally>,
}

/// 运行报告
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// `final_summary.txt` 路径
    pub final_artifact: PathBuf,
    pub final_visible_chars: usize,
    pub schedule: BudgetSchedule,
    pub validation: Vec<ValidationReport>,
    pub stop_reason: StopReason,
}

/// 迭代优化驱动器
pub struct RefinementDriver {
    config: Config,
    client: CompletionClient,
    grader: Arc<dyn Grader>,
    cancel: CancelFlag,
    state: DriverState,
}

impl RefinementDriver {
    pub fn new(config: Config, client: CompletionClient) -> Self {
        let grader = Arc::new(AnswerGrader::new(client.clone(), config.model_params()));
        Self {
            config,
            client,
            grader,
            cancel: CancelFlag::new(),
            state: DriverState::Idle,
        }
    }

    /// 替换评分器
    pub fn with_grader(mut self, grader: Arc<dyn Grader>) -> Self {
        self.grader = grader;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// 执行完整的两阶段流程
    ///
    /// # 参数
    /// - `source`: 原始讲义，整个运行期间不变
    /// - `schedule`: 压缩阶段每轮的字数预算，长度即压缩轮数
    /// - `final_limit`: 最终字数限制，验证阶段的优化总是以它为目标
    /// - `store`: 本次运行的产物目录
    ///
    /// # 返回
    /// 压缩阶段失败时返回 `Err`；其余情况都会写入 `final_summary.txt` 并返回报告
    pub async fn run(
        &mut self,
        source: &str,
        schedule: &BudgetSchedule,
        final_limit: usize,
        store: &ArtifactStore,
    ) -> AppResult<RunReport> {
        if let Some(round) = schedule.first_increase() {
            warn!(
                "⚠️ 字数预算在第 {} 轮增大 ({:?})，按原样执行",
                round,
                schedule.limits()
            );
        }

        let mut current = source.to_string();
        let mut validation = Vec::new();

        let stop_reason = match self.compress(source, schedule, store, &mut current).await? {
            Some(reason) => reason,
            None => {
                self.validate(source, final_limit, store, &mut current, &mut validation)
                    .await?
            }
        };

        // ========== 收尾 ==========
        self.state = DriverState::Done;
        let final_artifact = store.save_text(ArtifactName::Final, &current)?;
        let final_visible_chars = count_visible_chars(&current);
        info!("✅ 最终摘要已保存 ({} 字, {:?})", final_visible_chars, stop_reason);

        Ok(RunReport {
            final_artifact,
            final_visible_chars,
            schedule: schedule.clone(),
            validation,
            stop_reason,
        })
    }

    /// 压缩阶段
    ///
    /// 返回 `Some(Cancelled)` 表示提前结束，`None` 表示正常进入验证阶段
    async fn compress(
        &mut self,
        source: &str,
        schedule: &BudgetSchedule,
        store: &ArtifactStore,
        current: &mut String,
    ) -> AppResult<Option<StopReason>> {
        let params = self
            .config
            .model_params()
            .with_deep_thought(self.config.deep_thought_compression);
        let round = CompressionRound::new(self.client.clone(), params, detect_language(source));
        let total = schedule.len();

        for (idx, &limit) in schedule.limits().iter().enumerate() {
            let ctx = RoundCtx::compression(idx + 1, total);
            if self.cancel.is_cancelled() {
                warn!("{} 收到取消请求，停止压缩", ctx);
                return Ok(Some(StopReason::Cancelled));
            }

            self.state = DriverState::Compressing {
                round: ctx.round,
                total,
            };
            *current = round.run(&ctx, limit, current, store).await?;
        }

        Ok(None)
    }

    /// 验证阶段
    async fn validate(
        &mut self,
        source: &str,
        final_limit: usize,
        store: &ArtifactStore,
        current: &mut String,
        reports: &mut Vec<ValidationReport>,
    ) -> AppResult<StopReason> {
        let total = self.config.val_rounds;
        let round = ValidationRound::new(
            self.client.clone(),
            self.grader.clone(),
            self.config.model_params(),
            self.config.val_problems,
            self.config.max_gap_questions,
            final_limit,
        );

        for j in 1..=total {
            let ctx = RoundCtx::validation(j, total);
            if self.cancel.is_cancelled() {
                warn!("{} 收到取消请求，停止验证", ctx);
                return Ok(StopReason::Cancelled);
            }

            self.state = DriverState::Validating { round: j, total };
            info!("\n=== 验证阶段迭代 {}/{} ===", j, total);

            match round.run(&ctx, source, current, store).await? {
                ValidationOutcome::Refined { artifact, tally } => {
                    *current = artifact;
                    reports.push(ValidationReport {
                        round: j,
                        status: RoundStatus::Refined,
                        tally: Some(tally),
                    });
                }
                ValidationOutcome::Skipped(reason) => {
                    reports.push(ValidationReport {
                        round: j,
                        status: RoundStatus::Skipped(reason),
                        tally: None,
                    });
                }
                ValidationOutcome::RefinementFailed { tally } => {
                    reports.push(ValidationReport {
                        round: j,
                        status: RoundStatus::RefinementFailed,
                        tally: Some(tally),
                    });
                    return Ok(StopReason::RefinementFailed { round: j });
                }
            }
        }

        Ok(StopReason::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_driver_starts_idle() {
        let config = Config::default();
        let client = CompletionClient::new(&config);
        let driver = RefinementDriver::new(config, client);
        assert_eq!(driver.state(), DriverState::Idle);
    }
}
