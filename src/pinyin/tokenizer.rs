//! 汉字片段分词
//!
//! 两条路径：
//! - 回退路径：词典正向最大匹配（FMM），确定无依赖，永远可用；
//! - 顾问路径：LLM 批量分词标注，逐片段校验，校验不过的片段
//!   单独回退到 FMM，整体绝不失败。

use aho_corasick::{AhoCorasick, Anchored, Input, MatchKind, StartKind};
use serde::Serialize;
use tracing::warn;

use crate::advisory::{TaggedSpan, TaggingResponse, ALLOWED_NER, ALLOWED_UPOS};
use crate::pinyin::types::{Span, SpanType, Token};

/// 回退分词的哨兵标签
const FALLBACK_UPOS: &str = "X";
const FALLBACK_XPOS: &str = "UNK";
const FALLBACK_NER: &str = "O";

/// 正向最大匹配分词器
///
/// 预编译词典为锚定 + 最左最长匹配的多模式自动机：在每个位置
/// 直接取"从这里开始的最长词典词"，无词可取时吐出单字。
pub struct Segmenter {
    automaton: Option<AhoCorasick>,
}

impl Segmenter {
    /// 从词典键集合构建分词器
    pub fn new<'a, I>(words: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let patterns: Vec<&str> = words.into_iter().filter(|w| !w.is_empty()).collect();
        let automaton = if patterns.is_empty() {
            None
        } else {
            match AhoCorasick::builder()
                .match_kind(MatchKind::LeftmostLongest)
                .start_kind(StartKind::Anchored)
                .build(&patterns)
            {
                Ok(ac) => Some(ac),
                Err(e) => {
                    warn!("词典自动机构建失败，降级为逐字切分: {}", e);
                    None
                }
            }
        };
        Self { automaton }
    }

    /// 切分一段文本
    ///
    /// 返回的切片按序拼接严格等于输入。
    pub fn segment<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut pieces = Vec::new();
        let mut i = 0usize;
        let n = text.len();
        while i < n {
            if let Some(ac) = &self.automaton {
                let input = Input::new(&text[i..]).anchored(Anchored::Yes);
                if let Some(m) = ac.find(input) {
                    pieces.push(&text[i..i + m.end()]);
                    i += m.end();
                    continue;
                }
            }
            let ch = text[i..].chars().next().expect("在字符边界上切分");
            pieces.push(&text[i..i + ch.len_utf8()]);
            i += ch.len_utf8();
        }
        pieces
    }
}

/// 顾问分词标注的过程元数据（随报告输出）
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaggingMeta {
    /// 是否实际调用了顾问服务
    pub used: bool,
    /// 调用级错误（超时、协议错误等）
    pub error: Option<String>,
    /// 校验失败、单独回退的片段 ID
    pub invalid_spans: Vec<String>,
    /// 顾问响应附带的警告
    pub warnings: Vec<String>,
}

/// 对单个汉字片段做 FMM 分词
fn fmm_tokens_for_span(span: &Span, seg: &Segmenter) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut cursor = span.start;
    for (idx, piece) in seg.segment(&span.text).into_iter().enumerate() {
        let start = cursor;
        let end = cursor + piece.len();
        tokens.push(Token {
            span_id: span.span_id.clone(),
            index_in_span: idx,
            start,
            end,
            text: piece.to_string(),
            upos: FALLBACK_UPOS.to_string(),
            xpos: FALLBACK_XPOS.to_string(),
            ner: FALLBACK_NER.to_string(),
        });
        cursor = end;
    }
    tokens
}

/// 对全部汉字片段做 FMM 分词（纯回退路径）
pub fn fallback_tokens(spans: &[Span], seg: &Segmenter) -> Vec<Token> {
    spans
        .iter()
        .filter(|sp| sp.span_type == SpanType::Han)
        .flat_map(|sp| fmm_tokens_for_span(sp, seg))
        .collect()
}

/// 校验单个片段的顾问分词结果
///
/// 要求：词元非空、文本非空、upos/ner 落在封闭标签集、xpos 非空、
/// 且全部词元文本拼接严格等于片段原文。
fn validate_tagged_span(span: &Span, tagged: &TaggedSpan) -> bool {
    if tagged.tokens.is_empty() {
        return false;
    }
    let mut concat = String::with_capacity(span.text.len());
    for tok in &tagged.tokens {
        if tok.text.is_empty()
            || !ALLOWED_UPOS.contains(&tok.upos.as_str())
            || tok.xpos.is_empty()
            || !ALLOWED_NER.contains(&tok.ner.as_str())
        {
            return false;
        }
        concat.push_str(&tok.text);
    }
    concat == span.text
}

/// 合并顾问分词响应，校验不过的片段逐个回退 FMM
///
/// 返回 (全部词元, 回退片段 ID 列表)。
pub fn tokens_from_tagged(
    spans: &[Span],
    response: &TaggingResponse,
    seg: &Segmenter,
) -> (Vec<Token>, Vec<String>) {
    // 逐片段宽松解析：单个片段畸形不影响其余片段
    let mut by_span_id: std::collections::HashMap<String, TaggedSpan> = std::collections::HashMap::new();
    for raw in &response.spans {
        match serde_json::from_value::<TaggedSpan>(raw.clone()) {
            Ok(ts) => {
                by_span_id.insert(ts.span_id.clone(), ts);
            }
            Err(e) => {
                warn!("顾问分词片段解析失败，跳过: {}", e);
            }
        }
    }

    let mut tokens = Vec::new();
    let mut invalid_spans = Vec::new();

    for sp in spans.iter().filter(|sp| sp.span_type == SpanType::Han) {
        let tagged = by_span_id.get(&sp.span_id);
        let valid = tagged.map(|t| validate_tagged_span(sp, t)).unwrap_or(false);
        if !valid {
            invalid_spans.push(sp.span_id.clone());
            tokens.extend(fmm_tokens_for_span(sp, seg));
            continue;
        }

        let tagged = tagged.expect("已校验存在");
        let mut cursor = sp.start;
        for (idx, tok) in tagged.tokens.iter().enumerate() {
            let start = cursor;
            let end = cursor + tok.text.len();
            tokens.push(Token {
                span_id: sp.span_id.clone(),
                index_in_span: idx,
                start,
                end,
                text: tok.text.clone(),
                upos: tok.upos.clone(),
                xpos: tok.xpos.clone(),
                ner: tok.ner.clone(),
            });
            cursor = end;
        }
    }

    (tokens, invalid_spans)
}
