use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

use exam_cheatsheet::config::{parse_schedule, Config, RunParams};
use exam_cheatsheet::orchestrator::{App, CancelFlag};
use exam_cheatsheet::utils::logging;

/// 生成考试复习备忘录
#[derive(Debug, Parser)]
#[command(name = "exam-cheatsheet", version, about = "生成考试复习备忘录")]
struct Cli {
    /// 输入文件路径（PDF 或文本），例如 input.pdf
    #[arg(long)]
    filename: PathBuf,

    /// 最终可见字符限制，例如 4096
    #[arg(long, allow_negative_numbers = true)]
    maxtoken: i64,

    /// API key，例如 sk-xxxx；未提供时读取 LLM_API_KEY
    #[arg(long)]
    apikey: Option<String>,

    /// 运行目录的父目录
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// 生成阶段迭代轮数
    #[arg(long)]
    geniter: Option<usize>,

    /// 验证阶段迭代轮数
    #[arg(long)]
    valiter: Option<usize>,

    /// 每次验证生成的题目数量
    #[arg(long)]
    valproblems: Option<usize>,

    /// 每次 API 调用的最大等待时间（秒）
    #[arg(long)]
    maxwait: Option<u64>,

    /// 自定义每轮字数预算，例如 8000,3000,1000
    #[arg(long, value_parser = parse_schedule)]
    schedule: Option<::std::vec::Vec<usize>>,

    /// 先用 LLM 修复 PDF 提取的文本
    #[arg(long)]
    repair: bool,

    /// 使用流式请求
    #[arg(long)]
    stream: bool,

    /// TOML 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 显示详细日志
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    /// 配置优先级：默认值 < 配置文件 < 环境变量 < 命令行
    fn load_config(&self) -> Result<Config> {
        let base = match &self.config {
            Some(path) => Config::from_toml_file(path)?,
            None => Config::default(),
        };
        let mut config = base.with_env(|name| std::env::var(name).ok());

        if let Some(key) = &self.apikey {
            config.llm_api_key = key.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_root = dir.clone();
        }
        if let Some(n) = self.geniter {
            config.gen_rounds = n;
        }
        if let Some(n) = self.valiter {
            config.val_rounds = n;
        }
        if let Some(n) = self.valproblems {
            config.val_problems = n;
        }
        if let Some(secs) = self.maxwait {
            config.timeout_secs = secs;
            config.stream_timeout_secs = secs;
        }
        if self.stream {
            config.stream = true;
        }
        if self.verbose {
            config.verbose_logging = true;
        }
        Ok(config)
    }

    fn run_params(&self) -> RunParams {
        RunParams {
            source_path: self.filename.clone(),
            final_limit: self.maxtoken,
            schedule: self.schedule.clone(),
            repair_source: self.repair,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let config = cli.load_config()?;

    // 初始化日志
    logging::init(config.verbose_logging);

    // Ctrl-C 只在轮次边界生效
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到 Ctrl-C，将在当前轮次结束后停止");
            flag.cancel();
        }
    });

    // 初始化并运行应用
    App::new(config, cli.run_params())
        .with_cancel_flag(cancel)
        .run()
        .await?;

    Ok(())
}
