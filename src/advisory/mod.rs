//! LLM 顾问服务边界
//!
//! 顾问服务是不可信边界：请求/响应走固定 JSON 协议，响应的每个字段
//! 在使用前都要做模式校验，其输出只作"待验证的建议"，绝不当作事实。
//! 服务缺席或失败时流水线必须能走完全确定性的回退路径。

mod client;

pub use client::LlmAdvisory;

use serde::{Deserialize, Serialize};

/// UD UPOS 词性标签封闭集合（17 值）
pub const ALLOWED_UPOS: [&str; 17] = [
    "ADJ", "ADP", "ADV", "AUX", "CCONJ", "DET", "INTJ", "NOUN", "NUM", "PART", "PRON", "PROPN",
    "PUNCT", "SCONJ", "SYM", "VERB", "X",
];

/// CoNLL 命名实体标签封闭集合（5 值）
pub const ALLOWED_NER: [&str; 5] = ["O", "PER", "LOC", "ORG", "MISC"];

/// 顾问服务调用错误
///
/// 所有变体对流水线都是可恢复的：记入元数据后走确定性回退。
#[derive(Debug, thiserror::Error)]
pub enum AdvisoryError {
    /// 调用超时
    #[error("顾问服务调用超时（{0}s）")]
    Timeout(u64),
    /// 网络传输失败
    #[error("顾问服务请求失败: {0}")]
    Transport(#[from] reqwest::Error),
    /// 服务端返回非 2xx
    #[error("顾问服务返回错误状态 {status}: {body}")]
    Api { status: u16, body: String },
    /// 响应中没有可用内容
    #[error("顾问服务响应内容为空")]
    EmptyContent,
    /// 响应不是可解析的 JSON
    #[error("顾问服务响应 JSON 解析失败: {0}")]
    InvalidJson(String),
    /// JSON 结构不符合协议模式
    #[error("顾问服务响应不符合协议: {0}")]
    Schema(String),
}

// ============================================================================
// 分词标注协议
// ============================================================================

/// 标签体系声明（随请求发送，提示服务端使用的标签集）
#[derive(Debug, Clone, Serialize)]
pub struct TagsetSpec {
    pub upos: &'static str,
    pub xpos: &'static str,
    pub ner: &'static str,
}

impl Default for TagsetSpec {
    fn default() -> Self {
        Self { upos: "UDv2", xpos: "CTB", ner: "CoNLL" }
    }
}

/// 分词标注请求中的片段引用
#[derive(Debug, Clone, Serialize)]
pub struct TaggingSpanRef {
    pub span_id: String,
    pub text: String,
}

/// 分词标注请求（一次携带全部汉字片段）
#[derive(Debug, Clone, Serialize)]
pub struct TaggingRequest {
    pub schema_version: u32,
    pub task: &'static str,
    pub tagset: TagsetSpec,
    pub spans: Vec<TaggingSpanRef>,
}

impl TaggingRequest {
    pub fn new(spans: Vec<TaggingSpanRef>) -> Self {
        Self { schema_version: 1, task: "segment_and_tag", tagset: TagsetSpec::default(), spans }
    }
}

/// 带标签的词元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedToken {
    pub text: String,
    pub upos: String,
    pub xpos: String,
    pub ner: String,
}

/// 带标签的片段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedSpan {
    pub span_id: String,
    pub tokens: Vec<TaggedToken>,
}

/// 分词标注响应
///
/// `spans` 保持原始 JSON 值：逐片段解析，单个片段畸形只使该片段
/// 回退，不拖垮整批。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaggingResponse {
    #[serde(default)]
    pub spans: Vec<serde_json::Value>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

// ============================================================================
// 复核协议
// ============================================================================

/// 复核请求中的片段上下文（片段文本 + 已标注词元）
#[derive(Debug, Clone, Serialize)]
pub struct SpanContext {
    pub span_id: String,
    pub text: String,
    pub tokens: Vec<TaggedToken>,
}

/// 复核请求中的待审条目
#[derive(Debug, Clone, Serialize)]
pub struct CheckItem {
    pub span_id: String,
    pub token_index: usize,
    pub char_offset_in_token: usize,
    #[serde(rename = "char")]
    pub ch: char,
    pub candidates: Vec<String>,
    pub current: String,
}

/// 复核请求
#[derive(Debug, Clone, Serialize)]
pub struct DoubleCheckRequest {
    pub schema_version: u32,
    pub task: &'static str,
    pub text: String,
    pub spans: Vec<SpanContext>,
    pub items: Vec<CheckItem>,
}

impl DoubleCheckRequest {
    pub fn new(text: String, spans: Vec<SpanContext>, items: Vec<CheckItem>) -> Self {
        Self { schema_version: 1, task: "double_check", text, spans, items }
    }
}

/// 复核响应中的单条结论
#[derive(Debug, Clone, Deserialize)]
pub struct CheckVerdict {
    pub span_id: String,
    pub token_index: usize,
    pub char_offset_in_token: usize,
    #[serde(default, rename = "char")]
    pub ch: Option<String>,
    #[serde(default)]
    pub recommended: Option<String>,
    #[serde(default)]
    pub needs_user: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// 复核响应
///
/// `items` 同样保持原始 JSON 值，逐条解析，畸形条目跳过。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DoubleCheckResponse {
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}
