//! 逐字读音解析
//!
//! 分层决策：整词命中 → 单字表唯一候选 → 多音字统计消歧（带置信
//! 门限）→ 兜底取首候选。字表之外的字符原样透传并标记待审。

use std::collections::HashMap;

use crate::pinyin::types::{CharDecision, Provenance, Token};
use crate::pinyin::util::normalize_word_pinyin;
use crate::resources::PinyinResources;

/// 单个词元的解析结果
#[derive(Debug, Clone)]
pub struct TokenResolution {
    /// 词元拼音（音节间无分隔）
    pub pinyin: String,
    /// 逐字决策
    pub decisions: Vec<CharDecision>,
    /// 解析过程警告
    pub warnings: Vec<String>,
}

/// 多音字查表结论
enum PolyphonePick {
    /// 上下文统计命中
    Stats { best: String, p: Option<f64>, confident: bool },
    /// 无上下文，取声明的默认读音
    Default(String),
    /// 无上下文也无默认，取表内首候选
    FirstCandidate(String),
    /// 多音字表没有该字
    Absent,
}

/// 查多音字表
///
/// 上下文键由词性与命名实体标签拼合。置信判定：
/// n ≥ min_support 且 p ≥ min_prob 且 (p − p2) ≥ min_margin。
fn polyphone_pick(resources: &PinyinResources, ch: char, upos: &str, ner: &str) -> PolyphonePick {
    let Some(entry) = resources.polyphone.get(&ch) else {
        return PolyphonePick::Absent;
    };

    let key = format!("pos={}|ner={}", upos, ner);
    if let Some(ctx) = entry.contexts.get(&key) {
        let t = &resources.thresholds;
        let p = ctx.p.unwrap_or(0.0);
        let confident = ctx.n >= t.min_support && p >= t.min_prob && (p - ctx.p2) >= t.min_margin;
        return PolyphonePick::Stats { best: ctx.best.clone(), p: ctx.p, confident };
    }

    if let Some(default) = &entry.default {
        return PolyphonePick::Default(default.clone());
    }
    if let Some(first) = entry.candidates.first() {
        return PolyphonePick::FirstCandidate(first.clone());
    }
    PolyphonePick::Absent
}

/// 解析单个字符
fn resolve_char(
    resources: &PinyinResources,
    ch: char,
    offset: usize,
    upos: &str,
    ner: &str,
) -> CharDecision {
    let candidates = resources.char_base.get(&ch).cloned().unwrap_or_default();

    // 字表之外：原样透传，待审
    if candidates.is_empty() {
        let mut dec = CharDecision::new(ch, offset, Vec::new(), ch.to_string(), Provenance::Unknown);
        dec.confidence = Some(0.0);
        dec.needs_review = true;
        dec.notes.push("char_not_in_char_base".to_string());
        return dec;
    }

    // 唯一候选：无歧义
    if candidates.len() == 1 {
        let chosen = candidates[0].clone();
        let mut dec = CharDecision::new(ch, offset, candidates, chosen, Provenance::CharBase);
        dec.confidence = Some(1.0);
        return dec;
    }

    // 真多音字
    let (chosen, resolved_by, confidence, confident) = match polyphone_pick(resources, ch, upos, ner) {
        PolyphonePick::Stats { best, p, confident } => (best, Provenance::PolyphoneDisambig, p, confident),
        PolyphonePick::Default(d) => (d, Provenance::PolyphoneDisambig, None, false),
        PolyphonePick::FirstCandidate(f) => (f, Provenance::Fallback, None, false),
        PolyphonePick::Absent => (candidates[0].clone(), Provenance::Fallback, None, false),
    };

    let mut dec = CharDecision::new(ch, offset, candidates, chosen, resolved_by);
    dec.confidence = confidence;
    dec.needs_review = !confident;
    if !confident {
        dec.notes.push("low_confidence_or_low_support".to_string());
    }
    dec
}

/// 解析单个词元
///
/// 先尝试整词命中：词典音节数与字符数对齐时逐位赋值；错位则记
/// 警告并落回逐字解析。
pub fn resolve_token(
    tok: &Token,
    dict: &HashMap<String, String>,
    resources: &PinyinResources,
) -> TokenResolution {
    let mut warnings = Vec::new();

    if let Some(entry) = dict.get(&tok.text) {
        let syllables: Vec<&str> = entry.split_whitespace().collect();
        let char_count = tok.text.chars().count();
        if syllables.len() == char_count {
            let decisions: Vec<CharDecision> = tok
                .text
                .chars()
                .zip(syllables.iter())
                .enumerate()
                .map(|(i, (ch, syl))| {
                    let mut dec = CharDecision::new(
                        ch,
                        i,
                        vec![syl.to_string()],
                        syl.to_string(),
                        Provenance::Word,
                    );
                    dec.confidence = Some(1.0);
                    dec
                })
                .collect();
            return TokenResolution {
                pinyin: normalize_word_pinyin(entry),
                decisions,
                warnings,
            };
        }
        warnings.push(format!(
            "word_pinyin_alignment_mismatch: token='{}' syllables={} chars={}",
            tok.text,
            syllables.len(),
            char_count
        ));
    }

    let mut decisions = Vec::new();
    let mut pinyin = String::new();
    for (i, ch) in tok.text.chars().enumerate() {
        let dec = resolve_char(resources, ch, i, &tok.upos, &tok.ner);
        pinyin.push_str(&dec.chosen);
        decisions.push(dec);
    }

    TokenResolution { pinyin, decisions, warnings }
}
