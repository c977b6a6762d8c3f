//! # Exam Cheatsheet
//!
//! 把课程讲义（PDF 或文本）迭代压缩成半开卷考试用的复习摘要
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `ArtifactStore` - 唯一的运行目录持有者，写入各阶段产物
//! - `SourceLoader` - 读取讲义，提取 PDF 文本
//!
//! ### ② 客户端层（Clients）
//! - `ChatTransport` - 传输能力，可替换为测试桩
//! - `CompletionClient` - 重试、退避、超时、深度思考指令
//!
//! ### ③ 业务能力层（Services）
//! - `QuestionSynthesizer` / `ExamSolver` / `AnswerGrader` / `SourceRepair`
//!
//! ### ④ 流程层（Workflow）
//! - `CompressionRound` - 压缩阶段的一轮
//! - `ValidationRound` - 验证阶段的一轮（出题 → 答题 → 评分 → 优化）
//!
//! ### ⑤ 编排层（Orchestration）
//! - `RefinementDriver` - 两阶段状态机
//! - `App` - 一次运行的完整生命周期

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{ChatTransport, CompletionClient, ModelParams, RetryPolicy};
pub use config::{parse_schedule, Config, RunParams};
pub use error::{AppError, AppResult};
pub use infrastructure::{ArtifactName, ArtifactStore, SourceLoader};
pub use models::{BudgetSchedule, RoundTally, Verdict, VerdictRecord};
pub use orchestrator::{App, CancelFlag, RefinementDriver, RunReport, StopReason};
