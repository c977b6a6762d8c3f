//! 字数预算表
//!
//! 每轮压缩的可见字符目标，运行开始时计算一次。

use serde::Serialize;

/// 默认的全局可见字符上限
pub const DEFAULT_VISIBLE_CHAR_CAP: usize = 30_000;

/// 每轮压缩的目标可见字符数，按轮次顺序排列
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetSchedule {
    limits: Vec<usize>,
}

impl BudgetSchedule {
    /// 标准预算表：第 1 轮 5 倍、第 2 轮 2 倍、之后各轮等于最终限制，全部不超过 `cap`
    pub fn standard(final_limit: usize, rounds: usize, cap: usize) -> Self {
        let limits = (0..rounds)
            .map(|i| match i {
                0 => final_limit.saturating_mul(5),
                1 => final_limit.saturating_mul(2),
                _ => final_limit,
            })
            .map(|limit| limit.min(cap))
            .collect();

        Self { limits }
    }

    /// 自定义预算表，同样应用 `cap`；不检查是否递减
    pub fn custom(limits: Vec<usize>, cap: usize) -> Self {
        Self {
            limits: limits.into_iter().map(|limit| limit.min(cap)).collect(),
        }
    }

    pub fn limits(&self) -> &[usize] {
        &self.limits
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    /// 第 `round` 轮（从 1 开始）的目标
    pub fn limit_for(&self, round: usize) -> Option<usize> {
        round.checked_sub(1).and_then(|i| self.limits.get(i).copied())
    }

    /// 第一个比上一轮目标更大的轮次（从 1 开始），预算表单调不增时返回 `None`
    pub fn first_increase(&self) -> Option<usize> {
        self.limits
            .windows(2)
            .position(|pair| pair[1] > pair[0])
            .map(|i| i + 2)
    }
}
