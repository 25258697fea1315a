//! 命令行入口
//!
//! 从参数或标准输入读取文本，加载数据目录资源，执行转换并输出
//! 拼音；可选写出 JSON 诊断报告、接入 OpenAI 兼容顾问服务。

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hanpin::{AdvisoryConfig, LlmAdvisory, PinyinEngine, PinyinResources, PipelineOptions};

/// 命令行参数
#[derive(Parser, Debug)]
#[clap(name = "hanpin", about = "汉字转拼音（多音字消歧 + 覆写规则 + LLM 复核）")]
struct Args {
    /// 输入文本；缺省从标准输入读取
    text: Option<String>,

    /// 数据目录（word.json / char_base.json / polyphone_disambig.json 等）
    #[clap(long, default_value = ".")]
    data_dir: PathBuf,

    /// 把 JSON 诊断报告写到该路径
    #[clap(long)]
    report: Option<PathBuf>,

    /// 不在拼音与 latin/number/url 片段之间补空格
    #[clap(long)]
    no_word_like_spacing: bool,

    /// OpenAI 兼容 API 端点；设置后启用 LLM 分词标注与复核
    #[clap(long)]
    llm_endpoint: Option<String>,

    /// LLM API Key
    #[clap(long, default_value = "")]
    llm_api_key: String,

    /// LLM 模型名称
    #[clap(long, default_value = "glm-4-flash")]
    llm_model: String,

    /// 禁用 LLM 复核步骤（仍保留分词标注）
    #[clap(long)]
    no_double_check: bool,

    /// 复核阈值：置信度低于该值的决策进入复核
    #[clap(long, default_value_t = 0.85)]
    double_check_threshold: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let text = match args.text {
        Some(t) => t,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("读取标准输入失败")?;
            buf
        }
    };

    let resources = PinyinResources::load_from_dir(&args.data_dir)
        .with_context(|| format!("加载资源目录失败: {}", args.data_dir.display()))?;

    let options = PipelineOptions {
        word_like_spacing: !args.no_word_like_spacing,
        double_check_threshold: args.double_check_threshold,
    };

    let mut engine = PinyinEngine::new(resources, options);
    if let Some(endpoint) = &args.llm_endpoint {
        let client = LlmAdvisory::new(AdvisoryConfig::new(endpoint, &args.llm_api_key, &args.llm_model));
        engine = engine.with_tagger(client.clone());
        if !args.no_double_check {
            engine = engine.with_double_checker(client);
        }
    }

    let out = engine.convert(&text).await;

    print!("{}", out.text);
    if !out.text.ends_with('\n') {
        println!();
    }

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&out.report).context("报告序列化失败")?;
        std::fs::write(path, json + "\n").with_context(|| format!("写报告失败: {}", path.display()))?;
    }

    Ok(())
}
