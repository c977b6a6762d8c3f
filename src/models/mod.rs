pub mod budget;
pub mod verdict;

pub use budget::{BudgetSchedule, DEFAULT_VISIBLE_CHAR_CAP};
pub use verdict::{GradeOutcome, RoundTally, Verdict, VerdictRecord};
