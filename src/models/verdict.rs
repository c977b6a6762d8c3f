use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 评分器输出的单题记录
///
/// `status` 保留模型的原始文本，解释时按子串宽松匹配，兼容历史数据。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VerdictRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub question: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String,
}

/// `null` 视为空字符串，数字等标量按 JSON 文本保留
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    })
}

/// 单题判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// 正确
    Correct,
    /// 错误
    Incorrect,
    /// 无法解答
    Unanswerable,
    /// 无法识别的状态
    Unknown,
}

impl Verdict {
    /// 按子串包含关系解析状态文本
    ///
    /// "无法解答" 与 "错误" 先于 "正确" 判断，避免 "不正确" 被误判。
    pub fn from_status(status: &str) -> Self {
        let lower = status.to_lowercase();
        if status.contains("无法解答") || lower.contains("unanswerable") {
            Verdict::Unanswerable
        } else if status.contains("错误")
            || status.contains("不正确")
            || lower.contains("incorrect")
        {
            Verdict::Incorrect
        } else if status.contains("正确") || lower.contains("correct") {
            Verdict::Correct
        } else {
            Verdict::Unknown
        }
    }

    /// 可视化字符：🟩 正确，🟥 错误或无法解答，⬜ 未知
    pub fn glyph(self) -> char {
        match self {
            Verdict::Correct => '🟩',
            Verdict::Incorrect | Verdict::Unanswerable => '🟥',
            Verdict::Unknown => '⬜',
        }
    }

    /// 是否需要在优化阶段补充知识点
    pub fn is_gap(self) -> bool {
        matches!(self, Verdict::Incorrect | Verdict::Unanswerable)
    }
}

impl VerdictRecord {
    pub fn new(question: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            status: status.into(),
        }
    }

    pub fn verdict(&self) -> Verdict {
        Verdict::from_status(&self.status)
    }
}

/// 评分器输出的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradeOutcome {
    /// 成功解析出的记录
    Parsed(Vec<VerdictRecord>),
    /// 无法解析的原始响应
    Unparseable(String),
}

/// 一轮验证的统计，写入 `result{j}.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundTally {
    pub visualization: String,
    pub correct_count: usize,
    pub incorrect_count: usize,
    pub unsolved_count: usize,
    pub details: Vec<VerdictRecord>,
}

impl RoundTally {
    pub fn from_records(records: &[VerdictRecord]) -> Self {
        let mut tally = Self {
            visualization: String::with_capacity(records.len() * 4),
            correct_count: 0,
            incorrect_count: 0,
            unsolved_count: 0,
            details: records.to_vec(),
        };

        for record in records {
            let verdict = record.verdict();
            tally.visualization.push(verdict.glyph());
            match verdict {
                Verdict::Correct => tally.correct_count += 1,
                Verdict::Incorrect => tally.incorrect_count += 1,
                Verdict::Unanswerable => tally.unsolved_count += 1,
                Verdict::Unknown => {}
            }
        }

        tally
    }

    /// 按记录顺序取前 `limit` 道错误或无法解答的题目
    pub fn gap_questions(&self, limit: usize) -> Vec<&str> {
        self.details
            .iter()
            .filter(|r| r.verdict().is_gap() && !r.question.is_empty())
            .take(limit)
            .map(|r| r.question.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_substring_matching() {
        assert_eq!(Verdict::from_status("正确"), Verdict::Correct);
        assert_eq!(Verdict::from_status("状态：正确 ✅"), Verdict::Correct);
        assert_eq!(Verdict::from_status("错误"), Verdict::Incorrect);
        assert_eq!(Verdict::from_status("不正确"), Verdict::Incorrect);
        assert_eq!(Verdict::from_status("无法解答"), Verdict::Unanswerable);
        assert_eq!(Verdict::from_status("Incorrect"), Verdict::Incorrect);
        assert_eq!(Verdict::from_status("correct"), Verdict::Correct);
        assert_eq!(Verdict::from_status("不确定"), Verdict::Unknown);
        assert_eq!(Verdict::from_status(""), Verdict::Unknown);
    }

    #[test]
    fn test_tally_visualization_matches_records() {
        let records = vec![
            VerdictRecord::new("1. 快速排序的平均复杂度？", "正确"),
            VerdictRecord::new("2. 堆的性质？", "错误"),
            VerdictRecord::new("3. 红黑树的高度？", "无法解答"),
            VerdictRecord::new("4. ???", "跳过"),
            VerdictRecord::new("5. 哈希冲突？", "正确"),
        ];
        let tally = RoundTally::from_records(&records);

        assert_eq!(tally.visualization, "🟩🟥🟥⬜🟩");
        assert_eq!(tally.visualization.chars().count(), records.len());
        for (glyph, record) in tally.visualization.chars().zip(&records) {
            assert_eq!(glyph, record.verdict().glyph());
        }
        assert_eq!(tally.correct_count, 2);
        assert_eq!(tally.incorrect_count, 1);
        assert_eq!(tally.unsolved_count, 1);
    }

    #[test]
    fn test_gap_questions_keeps_order_and_limit() {
        let records: Vec<VerdictRecord> = (1..=15)
            .map(|i| VerdictRecord::new(format!("题目{}", i), if i % 5 == 0 { "正确" } else { "无法解答" }))
            .collect();
        let tally = RoundTally::from_records(&records);

        let gaps = tally.gap_questions(10);
        assert_eq!(gaps.len(), 10);
        assert_eq!(gaps[0], "题目1");
        assert_eq!(gaps[4], "题目6");
        assert_eq!(gaps[9], "题目12");
    }

    #[test]
    fn test_tally_json_shape() {
        let tally = RoundTally::from_records(&[VerdictRecord::new("q", "正确")]);
        let json = serde_json::to_value(&tally).unwrap();

        for key in ["visualization", "correct_count", "incorrect_count", "unsolved_count", "details"] {
            assert!(json.get(key).is_some(), "缺少字段 {}", key);
        }
        assert_eq!(json["details"][0]["status"], "正确");
    }

    #[test]
    fn test_record_missing_fields_default() {
        let record: VerdictRecord = serde_json::from_str(r#"{"question": "q"}"#).unwrap();
        assert_eq!(record.verdict(), Verdict::Unknown);
    }

    #[test]
    fn test_record_tolerates_null_and_scalars() {
        let records: Vec<VerdictRecord> = serde_json::from_str(
            r#"[{"question": 3, "status": null}, {"question": "q", "status": "正确"}]"#,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].question, "3");
        assert_eq!(records[0].status, "");
        assert_eq!(records[0].verdict(), Verdict::Unknown);
        assert_eq!(records[1].verdict(), Verdict::Correct);
    }
}
