//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `app` - 运行生命周期
//! - 前置检查、读取讲义、创建运行目录
//! - 计算预算表
//! - 输出最终统计和文件说明
//!
//! ### `refinement_driver` - 两阶段状态机
//! - 压缩阶段：逐轮缩减到预算
//! - 验证阶段：出题 → 答题 → 评分 → 针对错题优化
//! - 取消与提前结束
//!
//! ## 层次关系
//!
//! ```text
//! app (一次运行)
//!     ↓
//! refinement_driver (Compressing → Validating → Done)
//!     ↓
//! workflow::{CompressionRound, ValidationRound} (一轮)
//!     ↓
//! services (能力层：出题 / 答题 / 评分 / 修复)
//!     ↓
//! clients + infrastructure (补全调用、产物目录)
//! ```

pub mod app;
pub mod refinement_driver;

pub use app::App;
pub use refinement_driver::{
    CancelFlag, DriverState, RefinementDriver, RoundStatus, RunReport, StopReason,
    ValidationReport,
};
