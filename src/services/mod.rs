//! 业务能力层（Services）
//!
//! 每个服务只描述"我能做什么"，各自发起一次补全调用，不关心轮次和流程顺序。
//!
//! - `QuestionSynthesizer` - 根据原始讲义出选择题
//! - `ExamSolver` - 只用当前摘要答题
//! - `AnswerGrader` - 把解答转换成逐题判定
//! - `SourceRepair` - 修复 PDF 提取的文本

pub mod answer_grader;
pub mod exam_solver;
pub mod question_synthesizer;
pub mod source_repair;

pub use answer_grader::{parse_grader_response, AnswerGrader, Grader};
pub use exam_solver::ExamSolver;
pub use question_synthesizer::QuestionSynthesizer;
pub use source_repair::SourceRepair;
