//! 答题服务 - 业务能力层
//!
//! 模拟"只带复习摘要进考场"：只允许使用给定摘要回答题目。

use tracing::info;

use crate::clients::{CompletionClient, ModelParams};
use crate::error::LlmError;

const SOLVER_SYSTEM_MESSAGE: &str = concat!(
    "你是一位考生，只能使用提供的复习摘要（cheatsheet）来解答问题。严格规则：",
    "1. 只能使用摘要中的信息，不能使用任何外部知识或前置知识；",
    "2. 对于每道题，客观评估解答状态：",
    "摘要中有足够信息且你的解答正确 → '正确'；",
    "摘要中有信息但你的解答错误 → '错误'；",
    "摘要中缺少解答所需的关键信息 → '无法解答'；",
    "3. 诚实评估，不要猜测；",
    "4. 所有题目都是选择题，请选择正确的选项。",
);

/// 答题服务
#[derive(Clone)]
pub struct ExamSolver {
    client: CompletionClient,
}

impl ExamSolver {
    pub fn new(client: CompletionClient) -> Self {
        Self { client }
    }

    pub fn build_prompt(questions: &str, cheatsheet: &str) -> String {
        format!(
            "你正在参加半开卷考试，只能参考以下摘要内容：\n{}\n\n\
             请尝试解答以下题目（只能使用摘要中的信息）：\n{}\n\n\
             输出要求：\
             1. 对于每道题，先完整写出题目；\
             2. 然后写'解答：'和你的解答（包括选择的选项）；\
             3. 最后写'状态：'并给出以下三种状态之一：\
             正确（摘要中有足够信息，你给出了正确答案）、\
             错误（摘要中有足够信息，但你的解答错误）、\
             无法解答（摘要中缺少解答所需的关键信息）。",
            cheatsheet, questions
        )
    }

    /// 只用摘要解答题目
    ///
    /// # 返回
    /// 解答原文。其中的自评状态仅供参考，以评分服务的结果为准
    pub async fn solve(
        &self,
        questions: &str,
        cheatsheet: &str,
        params: &ModelParams,
    ) -> Result<String, LlmError> {
        info!("✍️ 使用摘要解答选择题...");
        let prompt = Self::build_prompt(questions, cheatsheet);
        self.client
            .generate(&prompt, Some(SOLVER_SYSTEM_MESSAGE), params)
            .await
    }
}
