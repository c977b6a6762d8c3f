//! 运行生命周期 - 编排层
//!
//! ## 职责
//!
//! 1. **前置检查**：文件存在、字数限制大于 0、API key 非空，失败时不创建任何目录
//! 2. **读取讲义**：PDF 或文本，可选地先修复提取文本
//! 3. **运行目录**：创建唯一的 `output_*` 目录并写入 `run.log`
//! 4. **预算表**：标准预算表或自定义预算表，统一应用全局上限
//! 5. **委托驱动器**：交给 `RefinementDriver` 执行两阶段流程
//! 6. **输出统计**：最终字数、各轮验证结果和文件说明

use std::sync::Arc;

use tracing::{info, warn};

use crate::clients::CompletionClient;
use crate::config::{Config, RunParams};
use crate::error::{AppResult, PipelineError};
use crate::infrastructure::{ArtifactName, ArtifactStore, SourceLoader};
use crate::models::BudgetSchedule;
use crate::orchestrator::refinement_driver::{
    CancelFlag, RefinementDriver, RoundStatus, RunReport, StopReason,
};
use crate::services::{Grader, SourceRepair};
use crate::utils::logging;

/// 应用主结构
pub struct App {
    config: Config,
    params: RunParams,
    client: CompletionClient,
    grader: Option<Arc<dyn Grader>>,
    cancel: CancelFlag,
}

impl App {
    /// 使用真实 API 创建应用
    pub fn new(config: Config, params: RunParams) -> Self {
        let client = CompletionClient::new(&config);
        Self::with_client(config, params, client)
    }

    /// 使用自定义客户端创建应用
    pub fn with_client(config: Config, params: RunParams, client: CompletionClient) -> Self {
        Self {
            config,
            params,
            client,
            grader: None,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_grader(mut self, grader: Arc<dyn Grader>) -> Self {
        self.grader = Some(grader);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> AppResult<RunReport> {
        let final_limit = self.params.validate(&self.config)?;

        // ========== 读取讲义 ==========
        let mut source = SourceLoader::load(&self.params.source_path).await?;

        let store = ArtifactStore::create_run_dir(&self.config.output_root)?;
        let log_path = store.path_of(ArtifactName::RunLog);
        logging::init_log_file(&log_path)?;
        info!("📁 所有输出文件将保存到: {}", store.dir().display());

        if self.params.repair_source {
            store.save_text(ArtifactName::Extracted, &source)?;
            source = SourceRepair::new(self.client.clone())
                .repair(&source, &self.config.model_params())
                .await
                .map_err(|e| PipelineError::RepairFailed { source: e })?;
            logging::append_run_log(&log_path, "原文修复完成")?;
        }

        store.save_text(ArtifactName::Raw, &source)?;

        // ========== 预算表 ==========
        let schedule = match &self.params.schedule {
            Some(limits) => BudgetSchedule::custom(limits.clone(), self.config.visible_char_cap),
            None => BudgetSchedule::standard(
                final_limit,
                self.config.gen_rounds,
                self.config.visible_char_cap,
            ),
        };

        logging::log_run_start(
            store.dir(),
            final_limit,
            schedule.limits(),
            self.config.val_rounds,
            self.config.val_problems,
            self.config.timeout_secs,
        );
        logging::append_run_log(
            &log_path,
            &format!(
                "最终字数限制: {}，预算表: {:?}，验证轮数: {}，题目数量: {}",
                final_limit,
                schedule.limits(),
                self.config.val_rounds,
                self.config.val_problems
            ),
        )?;

        // ========== 两阶段流程 ==========
        let mut driver = RefinementDriver::new(self.config.clone(), self.client.clone())
            .with_cancel_flag(self.cancel.clone());
        if let Some(grader) = &self.grader {
            driver = driver.with_grader(grader.clone());
        }

        let report = match driver.run(&source, &schedule, final_limit, &store).await {
            Ok(report) => report,
            Err(e) => {
                logging::append_run_log(&log_path, &format!("运行失败: {}", e))?;
                return Err(e);
            }
        };

        // ========== 输出统计 ==========
        self.log_report(&report, &log_path)?;
        logging::log_run_summary(&report.final_artifact, report.final_visible_chars, final_limit);
        logging::log_artifact_legend();

        Ok(report)
    }

    fn log_report(&self, report: &RunReport, log_path: &std::path::Path) -> AppResult<()> {
        for round in &report.validation {
            let line = match (&round.status, &round.tally) {
                (RoundStatus::Skipped(reason), _) => {
                    format!("验证第 {} 轮: 已跳过 ({})", round.round, reason.describe())
                }
                (status, Some(tally)) => format!(
                    "验证第 {} 轮: {} 正确 {} / 错误 {} / 无法解答 {}{}",
                    round.round,
                    tally.visualization,
                    tally.correct_count,
                    tally.incorrect_count,
                    tally.unsolved_count,
                    if *status == RoundStatus::RefinementFailed {
                        " (优化失败)"
                    } else {
                        ""
                    }
                ),
                (_, None) => format!("验证第 {} 轮: 无统计", round.round),
            };
            info!("{}", line);
            logging::append_run_log(log_path, &line)?;
        }

        match report.stop_reason {
            StopReason::Completed => {}
            StopReason::RefinementFailed { round } => {
                warn!("⚠️ 验证第 {} 轮优化失败，使用上一次成功的摘要", round)
            }
            StopReason::Cancelled => warn!("⚠️ 运行已取消，使用最后提交的摘要"),
        }

        logging::append_run_log(
            log_path,
            &format!(
                "结束 ({:?}): {} 字 -> {}",
                report.stop_reason,
                report.final_visible_chars,
                report.final_artifact.display()
            ),
        )
    }
}
