//! 诊断报告
//!
//! 每次转换输出一份完整的决策轨迹：片段、词元、逐字决策、覆写与
//! 冲突、顾问调用元数据、仍待审的条目。供审计与测试比对。

use serde::Serialize;

use crate::pinyin::overrides::{AppliedRule, OverrideConflict};
use crate::pinyin::review::{DoubleCheckMeta, ReviewItem};
use crate::pinyin::tokenizer::TaggingMeta;
use crate::pinyin::types::{CharDecision, Span, Token};

/// 报告模式版本
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// 词元级报告条目
#[derive(Debug, Clone, Serialize)]
pub struct TokenReport {
    pub span_id: String,
    pub index_in_span: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub upos: String,
    pub xpos: String,
    pub ner: String,
    /// 该词元最终拼音
    pub pinyin: String,
    /// 逐字决策轨迹
    pub char_decisions: Vec<CharDecision>,
}

impl TokenReport {
    pub fn new(token: &Token, pinyin: String, char_decisions: Vec<CharDecision>) -> Self {
        Self {
            span_id: token.span_id.clone(),
            index_in_span: token.index_in_span,
            start: token.start,
            end: token.end,
            text: token.text.clone(),
            upos: token.upos.clone(),
            xpos: token.xpos.clone(),
            ner: token.ner.clone(),
            pinyin,
            char_decisions,
        }
    }
}

/// 一次转换的完整诊断报告
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub schema_version: u32,
    /// 原文
    pub text: String,
    pub spans: Vec<Span>,
    pub tokens: Vec<TokenReport>,
    /// 顾问分词标注元数据
    pub llm_segment_and_tag: TaggingMeta,
    /// 顾问复核元数据
    pub llm_double_check: DoubleCheckMeta,
    /// 复核之后仍待审的条目
    pub needs_review_items: Vec<ReviewItem>,
    /// 待审条目在复核尝试后仍未解决
    pub unresolved: bool,
    pub applied_overrides: Vec<AppliedRule>,
    pub conflicts: Vec<OverrideConflict>,
    pub warnings: Vec<String>,
}
