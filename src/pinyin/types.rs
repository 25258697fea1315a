//! 核心类型定义
//!
//! 一次转换过程中产生的所有记录类型：片段（Span）、词元（Token）、
//! 逐字决策（CharDecision）。三者每次调用新建，输出报告后即丢弃。

use serde::{Deserialize, Serialize};

/// 片段大类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanType {
    /// 汉字片段（进入拼音流水线）
    Han,
    /// 受保护片段（原样输出）
    Protected,
}

/// 受保护片段的细分类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectedKind {
    /// URL（scheme:// 开头）
    Url,
    /// ASCII 字母/数字串
    Latin,
    /// 数字串（含小数点、百分号）
    Number,
    /// 空白符
    Space,
    /// 标点/符号
    Punct,
    /// 其他字符
    Other,
}

impl ProtectedKind {
    /// 是否为"词状"片段（拼音输出与其相邻时需要补空格）
    pub fn is_word_like(&self) -> bool {
        matches!(self, ProtectedKind::Url | ProtectedKind::Latin | ProtectedKind::Number)
    }
}

/// 文本片段
///
/// 不变式：所有片段连续、互不重叠，按序拼接严格等于原文。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// 片段 ID（"S0"、"S1"……）
    pub span_id: String,
    /// 片段大类
    #[serde(rename = "type")]
    pub span_type: SpanType,
    /// 细分类型（仅受保护片段）
    pub kind: Option<ProtectedKind>,
    /// 起始位置（原文字节偏移）
    pub start: usize,
    /// 结束位置（不含）
    pub end: usize,
    /// 片段文本
    pub text: String,
}

/// 词元
///
/// 不变式：同一汉字片段内所有词元按序拼接严格等于该片段文本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// 所属片段 ID
    pub span_id: String,
    /// 在片段内的序号
    pub index_in_span: usize,
    /// 起始位置（原文字节偏移）
    pub start: usize,
    /// 结束位置（不含）
    pub end: usize,
    /// 词元文本
    pub text: String,
    /// UD UPOS 词性标签（回退分词固定为 "X"）
    pub upos: String,
    /// 细粒度词性标签（回退分词固定为 "UNK"）
    pub xpos: String,
    /// 命名实体标签（回退分词固定为 "O"）
    pub ner: String,
}

/// 决策来源（封闭集合）
///
/// 新增来源属于破坏性变更，必须显式扩展此枚举。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// 词典整词命中，逐音节对位
    Word,
    /// 单字表唯一候选
    CharBase,
    /// 多音字统计消歧（上下文命中或声明的默认读音）
    PolyphoneDisambig,
    /// 用户覆写规则
    Override,
    /// LLM 复核采纳
    AdvisoryDoubleCheck,
    /// 用户人工指定
    User,
    /// 兜底取首候选
    Fallback,
    /// 字表之外，原样透传
    Unknown,
}

/// 单字决策记录
///
/// 由逐字解析创建，覆写引擎与 LLM 复核可在原地修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharDecision {
    /// 目标汉字
    #[serde(rename = "char")]
    pub ch: char,
    /// 在词元内的字符序号（0 起）
    pub offset_in_token: usize,
    /// 候选读音列表
    pub candidates: Vec<String>,
    /// 当前选定读音
    pub chosen: String,
    /// 决策来源
    pub resolved_by: Provenance,
    /// 置信度（统计消歧时为上下文概率 p；未知时缺省）
    pub confidence: Option<f64>,
    /// 命中的覆写规则 ID
    pub rule_id: Option<String>,
    /// 是否待人工/复核确认
    pub needs_review: bool,
    /// 是否存在覆写冲突
    pub conflict: bool,
    /// 附加说明
    pub notes: Vec<String>,
}

impl CharDecision {
    /// 创建一条新决策
    pub fn new(ch: char, offset_in_token: usize, candidates: Vec<String>, chosen: String, resolved_by: Provenance) -> Self {
        Self {
            ch,
            offset_in_token,
            candidates,
            chosen,
            resolved_by,
            confidence: None,
            rule_id: None,
            needs_review: false,
            conflict: false,
            notes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_like_kinds() {
        assert!(ProtectedKind::Url.is_word_like());
        assert!(ProtectedKind::Latin.is_word_like());
        assert!(ProtectedKind::Number.is_word_like());
        assert!(!ProtectedKind::Space.is_word_like());
        assert!(!ProtectedKind::Punct.is_word_like());
        assert!(!ProtectedKind::Other.is_word_like());
    }

    #[test]
    fn test_provenance_serde_names() {
        let v = serde_json::to_value(Provenance::AdvisoryDoubleCheck).unwrap();
        assert_eq!(v, serde_json::json!("advisory_double_check"));
        let v = serde_json::to_value(Provenance::CharBase).unwrap();
        assert_eq!(v, serde_json::json!("char_base"));
    }

    #[test]
    fn test_char_decision_serializes_char_field() {
        let dec = CharDecision::new('行', 0, vec!["háng".to_string()], "háng".to_string(), Provenance::CharBase);
        let v = serde_json::to_value(&dec).unwrap();
        assert_eq!(v["char"], serde_json::json!("行"));
        assert_eq!(v["resolved_by"], serde_json::json!("char_base"));
    }
}
