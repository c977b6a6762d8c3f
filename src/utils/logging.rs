/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::{AppError, AppResult};
use crate::infrastructure::ArtifactName;

/// 初始化 tracing 日志
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 debug 或 info。重复调用是安全的。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化运行日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &Path) -> AppResult<()> {
    let log_header = format!(
        "{}\n复习摘要生成日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    std::fs::write(log_file_path, log_header)
        .map_err(|e| AppError::file_write_failed(log_file_path, e))
}

/// 追加一行到运行日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
/// - `line`: 日志内容（不含换行）
pub fn append_run_log(log_file_path: &Path, line: &str) -> AppResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .map_err(|e| AppError::file_write_failed(log_file_path, e))?;

    writeln!(
        file,
        "[{}] {}",
        chrono::Local::now().format("%H:%M:%S"),
        line
    )
    .map_err(|e| AppError::file_write_failed(log_file_path, e))
}

/// 记录运行配置
pub fn log_run_start(
    output_dir: &Path,
    final_limit: usize,
    schedule: &[usize],
    val_rounds: usize,
    val_problems: usize,
    timeout_secs: u64,
) {
    info!("{}", "=".repeat(60));
    info!("🚀 开始生成考试复习摘要");
    info!("📁 输出目录: {}", output_dir.display());
    info!("{}", "=".repeat(60));
    info!("超时设置: {}秒", timeout_secs);
    info!("最终字数限制: {}字", final_limit);
    info!("生成阶段迭代轮数: {} (每轮限制: {:?})", schedule.len(), schedule);
    info!("验证阶段迭代轮数: {}", val_rounds);
    info!("题目数量: {}道选择题/验证迭代", val_problems);
}

/// 打印最终统计信息
///
/// # 参数
/// - `final_path`: 最终摘要路径
/// - `visible_chars`: 最终摘要的可见字符数
/// - `final_limit`: 目标字数
pub fn log_run_summary(final_path: &Path, visible_chars: usize, final_limit: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📊 最终结果");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("最终摘要已保存到: {}", final_path.display());
    if visible_chars > final_limit {
        info!("摘要长度: {}字 (超出限制 {}字)", visible_chars, final_limit);
    } else {
        info!("摘要长度: {}字 (限制 {}字)", visible_chars, final_limit);
    }
}

/// 打印输出文件说明
pub fn log_artifact_legend() {
    info!("\n=== 输出文件说明 ===");
    for name in ArtifactName::legend_samples() {
        info!("| {:<18} | {}", name.legend_pattern(), name.description());
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
