//! 待审决策收集与 LLM 复核回填
//!
//! 解析与覆写之后，把待审（needs_review / conflict / 低置信）的决策
//! 收集成批，交给可选的复核服务出第二意见；回包逐条校验定位，
//! 悬空引用记警告后跳过，绝不报错。复核永远不是产出输出的前提。

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::advisory::{CheckItem, CheckVerdict, DoubleCheckRequest, DoubleCheckResponse, SpanContext, TaggedToken};
use crate::pinyin::types::{CharDecision, Provenance, Span, SpanType, Token};
use crate::pinyin::util::normalize_pinyin;

/// 待审条目
#[derive(Debug, Clone, Serialize)]
pub struct ReviewItem {
    pub span_id: String,
    pub token_index: usize,
    pub token_text: String,
    pub token_start: usize,
    pub token_end: usize,
    pub char_offset_in_token: usize,
    #[serde(rename = "char")]
    pub ch: char,
    pub candidates: Vec<String>,
    pub chosen: String,
    pub confidence: Option<f64>,
    pub needs_review: bool,
    pub conflict: bool,
}

/// 复核采纳记录
#[derive(Debug, Clone, Serialize)]
pub struct DoubleCheckApplied {
    pub span_id: String,
    pub token_index: usize,
    pub char_offset_in_token: usize,
    #[serde(rename = "char")]
    pub ch: char,
    pub recommended: String,
    pub reason: Option<String>,
}

/// 复核判定需人工处理的条目
#[derive(Debug, Clone, Serialize)]
pub struct NeedsUserItem {
    pub span_id: String,
    pub token_index: usize,
    pub char_offset_in_token: usize,
    #[serde(rename = "char")]
    pub ch: char,
    pub candidates: Vec<String>,
    pub recommended: Option<String>,
    pub reason: Option<String>,
}

/// 复核过程元数据（随报告输出）
#[derive(Debug, Clone, Default, Serialize)]
pub struct DoubleCheckMeta {
    /// 是否实际调用（无服务或无待审条目时为 false）
    pub used: bool,
    /// 调用级错误
    pub error: Option<String>,
    /// 采纳的建议
    pub applied: Vec<DoubleCheckApplied>,
    /// 转交人工的条目
    pub needs_user: Vec<NeedsUserItem>,
    /// 逐条校验产生的警告
    pub warnings: Vec<String>,
}

/// 收集待审决策
///
/// 条件：needs_review 置位，或存在冲突，或置信度已知且低于阈值。
pub fn collect_review_items(
    tokens: &[Token],
    decisions: &HashMap<(usize, usize), Vec<CharDecision>>,
    threshold: f64,
) -> Vec<ReviewItem> {
    let mut items = Vec::new();
    for tok in tokens {
        let Some(decs) = decisions.get(&(tok.start, tok.end)) else {
            continue;
        };
        for dec in decs {
            let low_conf = dec.confidence.map_or(false, |c| c < threshold);
            if dec.needs_review || dec.conflict || low_conf {
                items.push(ReviewItem {
                    span_id: tok.span_id.clone(),
                    token_index: tok.index_in_span,
                    token_text: tok.text.clone(),
                    token_start: tok.start,
                    token_end: tok.end,
                    char_offset_in_token: dec.offset_in_token,
                    ch: dec.ch,
                    candidates: dec.candidates.clone(),
                    chosen: dec.chosen.clone(),
                    confidence: dec.confidence,
                    needs_review: dec.needs_review,
                    conflict: dec.conflict,
                });
            }
        }
    }
    items
}

/// 组装复核请求：完整的分词上下文 + 待审条目
pub fn build_double_check_request(
    text: &str,
    spans: &[Span],
    tokens: &[Token],
    items: &[ReviewItem],
) -> DoubleCheckRequest {
    let mut tokens_by_span: HashMap<&str, Vec<TaggedToken>> = HashMap::new();
    for tok in tokens {
        tokens_by_span.entry(tok.span_id.as_str()).or_default().push(TaggedToken {
            text: tok.text.clone(),
            upos: tok.upos.clone(),
            xpos: tok.xpos.clone(),
            ner: tok.ner.clone(),
        });
    }

    let span_contexts: Vec<SpanContext> = spans
        .iter()
        .filter(|sp| sp.span_type == SpanType::Han)
        .map(|sp| SpanContext {
            span_id: sp.span_id.clone(),
            text: sp.text.clone(),
            tokens: tokens_by_span.remove(sp.span_id.as_str()).unwrap_or_default(),
        })
        .collect();

    let check_items: Vec<CheckItem> = items
        .iter()
        .map(|it| CheckItem {
            span_id: it.span_id.clone(),
            token_index: it.token_index,
            char_offset_in_token: it.char_offset_in_token,
            ch: it.ch,
            candidates: it.candidates.clone(),
            current: it.chosen.clone(),
        })
        .collect();

    DoubleCheckRequest::new(text.to_string(), span_contexts, check_items)
}

/// 回填复核响应
///
/// 按 (span_id, token_index, char_offset) 定位决策；未知引用、越界
/// 偏移记警告后跳过。needs_user 的条目保持待审并转交人工列表；
/// 否则采纳 recommended，盖 advisory_double_check 印记并附上理由。
pub fn apply_double_check(
    response: &DoubleCheckResponse,
    tokens: &[Token],
    decisions: &mut HashMap<(usize, usize), Vec<CharDecision>>,
) -> (Vec<DoubleCheckApplied>, Vec<NeedsUserItem>, Vec<String>) {
    let mut applied = Vec::new();
    let mut needs_user = Vec::new();
    let mut warnings = Vec::new();

    let mut token_index: HashMap<(&str, usize), &Token> = HashMap::new();
    for tok in tokens {
        token_index.insert((tok.span_id.as_str(), tok.index_in_span), tok);
    }

    for raw in &response.items {
        let verdict: CheckVerdict = match serde_json::from_value(raw.clone()) {
            Ok(v) => v,
            Err(e) => {
                debug!("复核条目解析失败，跳过: {}", e);
                continue;
            }
        };

        let Some(tok) = token_index.get(&(verdict.span_id.as_str(), verdict.token_index)).copied() else {
            warnings.push(format!(
                "double_check_item_token_not_found:{}:{}",
                verdict.span_id, verdict.token_index
            ));
            continue;
        };
        let Some(decs) = decisions.get_mut(&(tok.start, tok.end)) else {
            warnings.push(format!(
                "double_check_item_token_not_found:{}:{}",
                verdict.span_id, verdict.token_index
            ));
            continue;
        };
        let offset = verdict.char_offset_in_token;
        let Some(dec) = decs.get_mut(offset) else {
            warnings.push(format!(
                "double_check_item_char_offset_oob:{}:{}:{}",
                verdict.span_id, verdict.token_index, offset
            ));
            continue;
        };

        if let Some(claimed) = verdict.ch.as_deref().filter(|s| !s.is_empty()) {
            if claimed != dec.ch.to_string() {
                warnings.push(format!(
                    "double_check_item_char_mismatch:{}:{}:{}:expected={}:got={}",
                    verdict.span_id, verdict.token_index, offset, dec.ch, claimed
                ));
            }
        }

        if verdict.needs_user {
            dec.needs_review = true;
            dec.notes.push("llm_double_check_needs_user".to_string());
            needs_user.push(NeedsUserItem {
                span_id: verdict.span_id.clone(),
                token_index: verdict.token_index,
                char_offset_in_token: offset,
                ch: dec.ch,
                candidates: dec.candidates.clone(),
                recommended: verdict.recommended.as_deref().map(normalize_pinyin),
                reason: verdict.reason.clone(),
            });
            continue;
        }

        if let Some(recommended) = verdict.recommended.as_deref().filter(|s| !s.is_empty()) {
            let recommended = normalize_pinyin(recommended);
            dec.chosen = recommended.clone();
            dec.resolved_by = Provenance::AdvisoryDoubleCheck;
            dec.needs_review = false;
            if let Some(reason) = verdict.reason.as_deref().filter(|s| !s.is_empty()) {
                dec.notes.push(format!("llm_reason:{}", reason));
            }
            applied.push(DoubleCheckApplied {
                span_id: verdict.span_id.clone(),
                token_index: verdict.token_index,
                char_offset_in_token: offset,
                ch: dec.ch,
                recommended,
                reason: verdict.reason.clone(),
            });
        }
    }

    (applied, needs_user, warnings)
}
