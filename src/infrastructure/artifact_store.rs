//! 运行目录与中间产物持久化
//!
//! 每次运行独占一个 `output_YYYYmmdd_HHMMSS` 目录，目录内每个文件只由一个阶段写入一次。

use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{AppError, AppResult, FileError};

/// 中间产物名称
///
/// 文件名是对外约定，其他工具可能依赖这些名称。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactName {
    /// 原始讲义 `gen0_raw.txt`
    Raw,
    /// 修复前的提取文本 `extracted.txt`
    Extracted,
    /// 压缩第 i 轮输出 `gen{i}.txt`
    Generation(usize),
    /// 验证第 j 轮输入 `gen{j}_pre.txt`
    Pre(usize),
    /// 验证第 j 轮题目 `val{j}.txt`
    Questions(usize),
    /// 验证第 j 轮解答 `result{j}.txt`
    Transcript(usize),
    /// 验证第 j 轮统计 `result{j}.json`
    Tally(usize),
    /// 验证第 j 轮可视化 `visual{j}.txt`
    Visual(usize),
    /// 验证第 j 轮优化结果 `gen{j}_post.txt`
    Post(usize),
    /// 最终摘要 `final_summary.txt`
    Final,
    /// 运行日志 `run.log`
    RunLog,
}

impl ArtifactName {
    pub fn file_name(&self) -> String {
        match self {
            ArtifactName::Raw => "gen0_raw.txt".to_string(),
            ArtifactName::Extracted => "extracted.txt".to_string(),
            ArtifactName::Generation(i) => format!("gen{}.txt", i),
            ArtifactName::Pre(j) => format!("gen{}_pre.txt", j),
            ArtifactName::Questions(j) => format!("val{}.txt", j),
            ArtifactName::Transcript(j) => format!("result{}.txt", j),
            ArtifactName::Tally(j) => format!("result{}.json", j),
            ArtifactName::Visual(j) => format!("visual{}.txt", j),
            ArtifactName::Post(j) => format!("gen{}_post.txt", j),
            ArtifactName::Final => "final_summary.txt".to_string(),
            ArtifactName::RunLog => "run.log".to_string(),
        }
    }

    /// 文件说明表中使用的样例（按出现顺序）
    pub fn legend_samples() -> [ArtifactName; 10] {
        [
            ArtifactName::Raw,
            ArtifactName::Generation(0),
            ArtifactName::Pre(0),
            ArtifactName::Questions(0),
            ArtifactName::Transcript(0),
            ArtifactName::Tally(0),
            ArtifactName::Visual(0),
            ArtifactName::Post(0),
            ArtifactName::Final,
            ArtifactName::RunLog,
        ]
    }

    /// 轮次用 X 表示的文件名模式，例如 `genX_pre.txt`
    pub fn legend_pattern(&self) -> String {
        match self {
            ArtifactName::Generation(_) => "genX.txt".to_string(),
            ArtifactName::Pre(_) => "genX_pre.txt".to_string(),
            ArtifactName::Questions(_) => "valX.txt".to_string(),
            ArtifactName::Transcript(_) => "resultX.txt".to_string(),
            ArtifactName::Tally(_) => "resultX.json".to_string(),
            ArtifactName::Visual(_) => "visualX.txt".to_string(),
            ArtifactName::Post(_) => "genX_post.txt".to_string(),
            other => other.file_name(),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ArtifactName::Raw => "原始输入文本",
            ArtifactName::Extracted => "修复前的 PDF 提取文本",
            ArtifactName::Generation(_) => "压缩阶段第 X 轮的输出",
            ArtifactName::Pre(_) => "验证阶段第 X 轮的输入",
            ArtifactName::Questions(_) => "验证阶段第 X 轮的验证题目",
            ArtifactName::Transcript(_) => "验证阶段第 X 轮的题目解答",
            ArtifactName::Tally(_) => "验证阶段第 X 轮的统计（正确/错误/无法解答数量）",
            ArtifactName::Visual(_) => "验证阶段第 X 轮的可视化颜色条（🟩=正确, 🟥=错误/无法解答）",
            ArtifactName::Post(_) => "验证阶段第 X 轮优化后的输出",
            ArtifactName::Final => "最终输出",
            ArtifactName::RunLog => "运行日志",
        }
    }
}

impl Display for ArtifactName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// 运行目录
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// 在 `root` 下创建唯一的运行目录
    ///
    /// 名称冲突时依次尝试 `_2`、`_3` 后缀，`create_dir` 保证不会与并发运行共享目录。
    pub fn create_run_dir(root: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(root).map_err(|e| FileError::DirectoryCreateFailed {
            path: root.to_path_buf(),
            source: e,
        })?;

        let base = format!("output_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"));
        let mut suffix = 1;
        loop {
            let name = if suffix == 1 {
                base.clone()
            } else {
                format!("{}_{}", base, suffix)
            };
            let dir = root.join(&name);

            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    debug!("创建运行目录: {}", dir.display());
                    return Ok(Self { dir });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => {
                    return Err(FileError::DirectoryCreateFailed { path: dir, source: e }.into())
                }
            }
        }
    }

    /// 使用已存在的目录
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: ArtifactName) -> PathBuf {
        self.dir.join(name.file_name())
    }

    /// 写入文本产物
    ///
    /// # 返回
    /// 返回写入的文件路径
    pub fn save_text(&self, name: ArtifactName, content: &str) -> AppResult<PathBuf> {
        let path = self.path_of(name);
        std::fs::write(&path, content).map_err(|e| AppError::file_write_failed(&path, e))?;
        debug!("已保存 {} ({} 字节)", name, content.len());
        Ok(path)
    }

    /// 写入 JSON 产物（缩进格式，保留中文）
    pub fn save_json<T: Serialize>(&self, name: ArtifactName, value: &T) -> AppResult<PathBuf> {
        let path = self.path_of(name);
        let json = serde_json::to_string_pretty(value).map_err(|e| FileError::JsonFailed {
            path: path.clone(),
            source: e,
        })?;
        std::fs::write(&path, json).map_err(|e| AppError::file_write_failed(&path, e))?;
        debug!("已保存 {}", name);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_file_names() {
        assert_eq!(ArtifactName::Raw.file_name(), "gen0_raw.txt");
        assert_eq!(ArtifactName::Generation(3).file_name(), "gen3.txt");
        assert_eq!(ArtifactName::Pre(1).file_name(), "gen1_pre.txt");
        assert_eq!(ArtifactName::Questions(2).file_name(), "val2.txt");
        assert_eq!(ArtifactName::Transcript(1).file_name(), "result1.txt");
        assert_eq!(ArtifactName::Tally(1).file_name(), "result1.json");
        assert_eq!(ArtifactName::Visual(1).file_name(), "visual1.txt");
        assert_eq!(ArtifactName::Post(2).file_name(), "gen2_post.txt");
        assert_eq!(ArtifactName::Final.file_name(), "final_summary.txt");
    }

    #[test]
    fn test_legend_patterns() {
        assert_eq!(ArtifactName::Pre(7).legend_pattern(), "genX_pre.txt");
        assert_eq!(ArtifactName::Final.legend_pattern(), "final_summary.txt");
        assert!(ArtifactName::legend_samples()
            .iter()
            .all(|name| !name.description().is_empty()));
    }

    #[test]
    fn test_run_dirs_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let first = ArtifactStore::create_run_dir(root.path()).unwrap();
        let second = ArtifactStore::create_run_dir(root.path()).unwrap();

        assert_ne!(first.dir(), second.dir());
        assert!(first.dir().is_dir());
        assert!(second.dir().is_dir());
        let name = first.dir().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("output_"));
    }

    #[test]
    fn test_save_text_and_json() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::at(root.path());

        let path = store.save_text(ArtifactName::Generation(1), "# 摘要").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# 摘要");

        let path = store
            .save_json(ArtifactName::Tally(1), &serde_json::json!({"correct_count": 1}))
            .unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("\"correct_count\": 1"));
    }

    #[test]
    fn test_save_into_missing_dir_fails() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::at(root.path().join("missing"));
        assert!(store.save_text(ArtifactName::Final, "x").is_err());
    }
}
