//! 文本度量工具
//!
//! 语言检测与可见字符计数，用于确定每轮的字数预算并在事后报告是否达标。
//! 字数限制只作为指令交给 LLM，这里的计数从不在调用过程中强制执行。

use once_cell::sync::Lazy;
use regex::Regex;

/// 文本的主要语言
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    /// 中日韩统一表意文字占比超过 30%
    Cjk,
    /// 其他
    Other,
}

impl Language {
    /// 写进提示词时使用的名称
    pub fn label(self) -> &'static str {
        match self {
            Language::Cjk => "中文",
            Language::Other => "English",
        }
    }
}

const CJK_RATIO_THRESHOLD: f64 = 0.3;

/// 粗略检测文本的主要语言
///
/// 空文本返回 `None`；否则统计 CJK 统一表意文字区块 (U+4E00..=U+9FFF)
/// 的码点数占全部码点数的比例，大于 0.3 判定为 CJK。
pub fn detect_language(text: &str) -> Option<Language> {
    let total = text.chars().count();
    if total == 0 {
        return None;
    }

    let cjk = text
        .chars()
        .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
        .count();

    if cjk as f64 / total as f64 > CJK_RATIO_THRESHOLD {
        Some(Language::Cjk)
    } else {
        Some(Language::Other)
    }
}

/// 按顺序执行的 Markdown 清理规则：(模式, 替换)
static MARKUP_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        // 代码块整体删除
        (r"(?s)```.*?```", ""),
        (r"`([^`]+)`", "$1"),
        (r"!\[([^\]]*)\]\([^)]+\)", "$1"),
        (r"\[([^\]]+)\]\([^)]+\)", "$1"),
        (r"(^|\n)#+\s*", "$1"),
        (r"\*\*(.*?)\*\*", "$1"),
        (r"__(.*?)__", "$1"),
        (r"\*(.*?)\*", "$1"),
        (r"_(.*?)_", "$1"),
        (r"~~(.*?)~~", "$1"),
        (r"(^|\n)>\s?", "$1"),
        (r"(^|\n)[-*+]\s+", "$1"),
        (r"<[^>]+>", ""),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("内置正则表达式必须合法"),
            replacement,
        )
    })
    .collect()
});

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("内置正则表达式必须合法"));

fn strip_once(text: &str) -> String {
    MARKUP_RULES
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

/// 去除 Markdown 语法，只保留可见内容
///
/// 每条规则的替换结果都严格短于匹配内容，所以反复执行直到不再变化一定会终止，
/// 且结果满足 `strip_markup(strip_markup(x)) == strip_markup(x)`。
pub fn strip_markup(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = strip_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// 统计可见字符数（去除 Markdown 语法和所有空白后的码点数）
pub fn count_visible_chars(text: &str) -> usize {
    let stripped = strip_markup(text);
    WHITESPACE.replace_all(&stripped, "").chars().count()
}
