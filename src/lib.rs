//! # hanpin
//!
//! 汉字转拼音转换器：把混合汉字/拉丁/数字文本转成带声调拼音，
//! 多音字经分层决策消歧，支持用户覆写规则与可选的 LLM 复核。
//!
//! ## 模块结构
//!
//! - `resources` - 资源加载（词典 / 单字表 / 多音字统计 / 覆写规则）
//! - `pinyin` - 转换核心（切分、分词、解析、覆写、复核、拼接）
//! - `advisory` - LLM 顾问边界（协议、校验、OpenAI 兼容客户端）
//! - `config` - 流水线与顾问配置
//!
//! ## 基本用法
//!
//! ```no_run
//! use hanpin::{PinyinEngine, PinyinResources, PipelineOptions};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let resources = PinyinResources::load_from_dir("./data")?;
//! let engine = PinyinEngine::new(resources, PipelineOptions::default());
//! let out = engine.convert("细说银行行长").await;
//! println!("{}", out.text);
//! # Ok(())
//! # }
//! ```

pub mod advisory;
pub mod config;
pub mod pinyin;
pub mod resources;

// 重新导出常用类型
pub use advisory::LlmAdvisory;
pub use config::{AdvisoryConfig, PipelineOptions};
pub use pinyin::{PinyinEngine, PinyinOutput};
pub use resources::PinyinResources;
