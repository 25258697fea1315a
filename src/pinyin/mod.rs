//! 拼音转换核心
//!
//! 把混合汉字/拉丁/数字文本转成带声调拼音，分层解决多音字：
//! 整词词典 → 单字表 → 统计消歧 → 用户覆写 → 可选 LLM 复核。
//!
//! ## 处理流程
//! 1. 片段切分（汉字片段进流水线，其余原样保护）
//! 2. 分词（顾问标注校验通过则采纳，否则 FMM 回退）
//! 3. 逐字解析（置信门限决定是否待审）
//! 4. 覆写规则（优先级全序 + 冲突显式记录）
//! 5. 待审收集 + 复核回填
//! 6. 输出拼接 + 诊断报告

pub mod compose;
pub mod engine;
pub mod overrides;
pub mod report;
pub mod resolver;
pub mod review;
pub mod span;
pub mod tokenizer;
pub mod types;
pub mod util;

pub use engine::{PinyinEngine, PinyinOutput};
pub use types::{CharDecision, ProtectedKind, Provenance, Span, SpanType, Token};
