//! 轮次上下文
//!
//! 封装"我正在执行哪个阶段的第几轮"这一信息，用作日志前缀

use std::fmt::Display;

/// 阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// 压缩阶段
    Compression,
    /// 验证阶段
    Validation,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Compression => "压缩",
            Stage::Validation => "验证",
        }
    }
}

/// 轮次上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundCtx {
    pub stage: Stage,
    /// 当前轮次（从1开始）
    pub round: usize,
    /// 本阶段总轮数
    pub total: usize,
}

impl RoundCtx {
    pub fn compression(round: usize, total: usize) -> Self {
        Self {
            stage: Stage::Compression,
            round,
            total,
        }
    }

    pub fn validation(round: usize, total: usize) -> Self {
        Self {
            stage: Stage::Validation,
            round,
            total,
        }
    }

    pub fn is_first(&self) -> bool {
        self.round == 1
    }
}

impl Display for RoundCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} {}/{}]", self.stage.label(), self.round, self.total)
    }
}
