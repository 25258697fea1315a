//! 转换流水线
//!
//! 组合片段切分、分词、逐字解析、覆写、复核与输出拼接。引擎可复用
//! （词典自动机预编译）；单次转换只读共享资源，多个转换可并发进行。
//!
//! 处理流程：
//! 1. 片段切分（汉字 / 受保护）
//! 2. 分词（顾问标注或 FMM 回退）
//! 3. 逐字解析（整词 / 单字表 / 多音字消歧）
//! 4. 用户覆写规则
//! 5. 待审收集 + 可选 LLM 复核
//! 6. 输出拼接 + 诊断报告

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::advisory::{LlmAdvisory, TaggingRequest, TaggingSpanRef};
use crate::config::PipelineOptions;
use crate::pinyin::compose::compose_output;
use crate::pinyin::overrides::apply_overrides;
use crate::pinyin::report::{Report, TokenReport, REPORT_SCHEMA_VERSION};
use crate::pinyin::resolver::resolve_token;
use crate::pinyin::review::{
    apply_double_check, build_double_check_request, collect_review_items, DoubleCheckMeta, ReviewItem,
};
use crate::pinyin::span::split_spans;
use crate::pinyin::tokenizer::{fallback_tokens, tokens_from_tagged, Segmenter, TaggingMeta};
use crate::pinyin::types::{CharDecision, Span, SpanType, Token};
use crate::resources::PinyinResources;

/// 转换结果：最终文本 + 诊断报告
#[derive(Debug, Clone)]
pub struct PinyinOutput {
    pub text: String,
    pub report: Report,
}

/// 拼音转换引擎
///
/// 资源加载一次、转换期间只读；`convert` 只借用 `&self`，
/// 不同文本的转换可以并发执行。
pub struct PinyinEngine {
    resources: PinyinResources,
    combined_dict: HashMap<String, String>,
    segmenter: Segmenter,
    options: PipelineOptions,
    tagger: Option<LlmAdvisory>,
    double_checker: Option<LlmAdvisory>,
}

impl PinyinEngine {
    /// 创建引擎，预编译合并词典的分词自动机
    pub fn new(resources: PinyinResources, options: PipelineOptions) -> Self {
        let combined_dict = resources.combined_word_pinyin();
        let segmenter = Segmenter::new(combined_dict.keys().map(String::as_str));
        Self {
            resources,
            combined_dict,
            segmenter,
            options,
            tagger: None,
            double_checker: None,
        }
    }

    /// 配置分词标注顾问
    pub fn with_tagger(mut self, client: LlmAdvisory) -> Self {
        self.tagger = Some(client);
        self
    }

    /// 配置复核顾问
    pub fn with_double_checker(mut self, client: LlmAdvisory) -> Self {
        self.double_checker = Some(client);
        self
    }

    /// 转换一段文本
    ///
    /// 对良构输入永远产出结果：顾问调用失败走确定性回退，
    /// 错误只记入报告元数据。
    pub async fn convert(&self, text: &str) -> PinyinOutput {
        // 1. 片段切分
        let spans = split_spans(text);
        debug!("片段切分完成: {} 个片段", spans.len());

        // 2. 分词（顾问或回退）
        let (tokens, tagging_meta) = self.tokenize(&spans).await;
        debug!(
            "分词完成: {} 个词元, 顾问={}, 回退片段={}",
            tokens.len(),
            tagging_meta.used,
            tagging_meta.invalid_spans.len()
        );

        // 3. 逐字解析，决策记入 (start, end) 侧表
        let mut decisions: HashMap<(usize, usize), Vec<CharDecision>> = HashMap::new();
        let mut warnings: Vec<String> = Vec::new();
        for tok in &tokens {
            let resolution = resolve_token(tok, &self.combined_dict, &self.resources);
            warnings.extend(resolution.warnings);
            decisions.insert((tok.start, tok.end), resolution.decisions);
        }

        // 4. 用户覆写
        let (applied_overrides, conflicts, override_warnings) =
            apply_overrides(&tokens, &mut decisions, &self.resources.rules);
        warnings.extend(override_warnings);
        debug!(
            "覆写完成: 应用 {} 条, 冲突 {} 条",
            applied_overrides.len(),
            conflicts.len()
        );

        // 5. 待审收集 + 可选复核
        let review_before = collect_review_items(&tokens, &decisions, self.options.double_check_threshold);
        debug!("复核前待审条目: {}", review_before.len());
        let double_check_meta = self
            .run_double_check(text, &spans, &tokens, &mut decisions, &review_before)
            .await;

        // 6. 由最终决策重建词元拼音并拼接输出
        let mut token_pinyin: HashMap<(usize, usize), String> = HashMap::new();
        for tok in &tokens {
            let pinyin = decisions
                .get(&(tok.start, tok.end))
                .map(|decs| decs.iter().map(|d| d.chosen.as_str()).collect::<String>())
                .unwrap_or_default();
            token_pinyin.insert((tok.start, tok.end), pinyin);
        }
        let output_text = compose_output(&spans, &tokens, &token_pinyin, self.options.word_like_spacing);

        // 7. 报告
        let review_after = collect_review_items(&tokens, &decisions, self.options.double_check_threshold);
        let double_check_clean = double_check_meta.used && double_check_meta.error.is_none();
        let unresolved = !review_after.is_empty() && !double_check_clean;

        let report_tokens: Vec<TokenReport> = tokens
            .iter()
            .map(|tok| {
                let key = (tok.start, tok.end);
                TokenReport::new(
                    tok,
                    token_pinyin.get(&key).cloned().unwrap_or_default(),
                    decisions.get(&key).cloned().unwrap_or_default(),
                )
            })
            .collect();

        let report = Report {
            schema_version: REPORT_SCHEMA_VERSION,
            text: text.to_string(),
            spans,
            tokens: report_tokens,
            llm_segment_and_tag: tagging_meta,
            llm_double_check: double_check_meta,
            needs_review_items: review_after,
            unresolved,
            applied_overrides,
            conflicts,
            warnings,
        };

        PinyinOutput { text: output_text, report }
    }

    /// 分词：配置了顾问且存在汉字片段时先走顾问，失败整体回退
    async fn tokenize(&self, spans: &[Span]) -> (Vec<Token>, TaggingMeta) {
        let han_refs: Vec<TaggingSpanRef> = spans
            .iter()
            .filter(|sp| sp.span_type == SpanType::Han)
            .map(|sp| TaggingSpanRef { span_id: sp.span_id.clone(), text: sp.text.clone() })
            .collect();

        let Some(tagger) = &self.tagger else {
            return (fallback_tokens(spans, &self.segmenter), TaggingMeta::default());
        };
        if han_refs.is_empty() {
            return (fallback_tokens(spans, &self.segmenter), TaggingMeta::default());
        }

        let request = TaggingRequest::new(han_refs);
        let mut meta = TaggingMeta { used: true, ..Default::default() };

        match tagger.segment_and_tag(&request).await {
            Ok(response) => {
                meta.warnings = response.warnings.clone();
                let (tokens, invalid_spans) = tokens_from_tagged(spans, &response, &self.segmenter);
                meta.invalid_spans = invalid_spans;
                (tokens, meta)
            }
            Err(e) => {
                warn!("顾问分词失败，整体回退 FMM: {}", e);
                meta.error = Some(e.to_string());
                (fallback_tokens(spans, &self.segmenter), meta)
            }
        }
    }

    /// 复核：无顾问或无待审条目时整体跳过（used=false）
    async fn run_double_check(
        &self,
        text: &str,
        spans: &[Span],
        tokens: &[Token],
        decisions: &mut HashMap<(usize, usize), Vec<CharDecision>>,
        review_items: &[ReviewItem],
    ) -> DoubleCheckMeta {
        let Some(checker) = &self.double_checker else {
            return DoubleCheckMeta::default();
        };
        if review_items.is_empty() {
            return DoubleCheckMeta::default();
        }

        let request = build_double_check_request(text, spans, tokens, review_items);
        let mut meta = DoubleCheckMeta { used: true, ..Default::default() };

        // 单发不重试：失败即回退"不改动"
        match checker.double_check(&request).await {
            Ok(response) => {
                let (applied, needs_user, warnings) = apply_double_check(&response, tokens, decisions);
                debug!(
                    "复核完成: 采纳 {} 条, 转人工 {} 条, 警告 {} 条",
                    applied.len(),
                    needs_user.len(),
                    warnings.len()
                );
                meta.applied = applied;
                meta.needs_user = needs_user;
                meta.warnings = warnings;
            }
            Err(e) => {
                warn!("顾问复核失败，保持现有决策: {}", e);
                meta.error = Some(e.to_string());
            }
        }
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pinyin::overrides::{Occurrence, Rule, RuleMatch, RuleTarget};
    use crate::pinyin::types::Provenance;
    use crate::resources::{ContextStats, PolyphoneEntry};

    fn engine(resources: PinyinResources) -> PinyinEngine {
        PinyinEngine::new(resources, PipelineOptions::default())
    }

    fn base_resources() -> PinyinResources {
        let mut res = PinyinResources::default();
        res.word_pinyin.insert("细说".to_string(), "xì shuō".to_string());
        res.word_pinyin.insert("银行".to_string(), "yín háng".to_string());
        res.word_pinyin.insert("行长".to_string(), "háng zhǎng".to_string());
        res.char_base.insert('细', vec!["xì".to_string()]);
        res.char_base.insert('说', vec!["shuō".to_string(), "shuì".to_string()]);
        res.char_base.insert('银', vec!["yín".to_string()]);
        res.char_base.insert('行', vec!["háng".to_string(), "xíng".to_string()]);
        res.char_base.insert('长', vec!["cháng".to_string(), "zhǎng".to_string()]);
        res.char_base.insert('好', vec!["hǎo".to_string(), "hào".to_string()]);
        res.char_base.insert('的', vec!["de".to_string()]);
        res
    }

    #[tokio::test]
    async fn test_word_dictionary_scenario() {
        let out = engine(base_resources()).convert("细说").await;
        assert_eq!(out.text, "xìshuō");
        let decs = &out.report.tokens[0].char_decisions;
        assert!(decs.iter().all(|d| d.resolved_by == Provenance::Word));
    }

    #[tokio::test]
    async fn test_fmm_scenario_bank_manager() {
        let out = engine(base_resources()).convert("银行行长").await;
        assert_eq!(out.text, "yínháng hángzhǎng");
        assert_eq!(out.report.tokens.len(), 2);
        assert_eq!(out.report.tokens[0].pinyin, "yínháng");
        assert_eq!(out.report.tokens[1].pinyin, "hángzhǎng");
    }

    #[tokio::test]
    async fn test_non_han_identity() {
        let text = "no Chinese here, just ASCII 42!";
        let out = engine(base_resources()).convert(text).await;
        assert_eq!(out.text, text);
        assert!(out.report.tokens.is_empty());
        assert!(!out.report.unresolved);
    }

    #[tokio::test]
    async fn test_protected_spans_with_spacing() {
        let out = engine(base_resources())
            .convert("细说OpenAI的API v2.0：https://openai.com")
            .await;
        assert_eq!(out.text, "xìshuō OpenAI de API v2.0：https://openai.com");
    }

    #[tokio::test]
    async fn test_idempotence_output_and_report() {
        let mut res = base_resources();
        res.rules.push(Rule {
            id: "r1".to_string(),
            priority: 10,
            description: None,
            matcher: RuleMatch::default(),
            target: RuleTarget { ch: "行".to_string(), occurrence: Occurrence::Nth(1) },
            choose: "xíng".to_string(),
            meta: None,
        });
        let eng = engine(res);

        let first = eng.convert("细说银行行长好").await;
        let second = eng.convert("细说银行行长好").await;
        assert_eq!(first.text, second.text);
        assert_eq!(
            serde_json::to_value(&first.report).unwrap(),
            serde_json::to_value(&second.report).unwrap(),
            "两次运行的报告必须逐字段一致"
        );
    }

    #[tokio::test]
    async fn test_override_occurrence_scenario() {
        let mut res = base_resources();
        // "行行好" 单字成词元（词典无此词），规则分别点第 1、2 次出现
        res.rules.push(Rule {
            id: "occ1".to_string(),
            priority: 10,
            description: None,
            matcher: RuleMatch::default(),
            target: RuleTarget { ch: "行".to_string(), occurrence: Occurrence::Nth(1) },
            choose: "xíng".to_string(),
            meta: None,
        });
        res.rules.push(Rule {
            id: "occ2".to_string(),
            priority: 10,
            description: None,
            matcher: RuleMatch::default(),
            target: RuleTarget { ch: "行".to_string(), occurrence: Occurrence::Nth(2) },
            choose: "háng".to_string(),
            meta: None,
        });
        // 让 "行行好" 成为一个词元
        res.word_pinyin.insert("行行好".to_string(), "xíng xíng hǎo".to_string());

        let out = engine(res).convert("行行好").await;
        let decs = &out.report.tokens[0].char_decisions;
        assert_eq!(decs[0].chosen, "xíng");
        assert_eq!(decs[1].chosen, "háng");
        // 第三字保持独立解析（整词命中）
        assert_eq!(decs[2].chosen, "hǎo");
        assert_eq!(decs[2].resolved_by, Provenance::Word);
        assert_eq!(out.text, "xínghánghǎo");
    }

    #[tokio::test]
    async fn test_polyphone_confidence_gating_end_to_end() {
        let mut res = base_resources();
        let mut entry = PolyphoneEntry::default();
        entry.contexts.insert(
            "pos=X|ner=O".to_string(),
            ContextStats { best: "háng".to_string(), p: Some(1.0), p2: 0.0, n: 1000 },
        );
        res.polyphone.insert('行', entry);

        let out = engine(res).convert("行").await;
        let dec = &out.report.tokens[0].char_decisions[0];
        assert!(!dec.needs_review);
        assert!(out.report.needs_review_items.is_empty());
        assert!(!out.report.unresolved);
    }

    #[tokio::test]
    async fn test_unresolved_flag_without_double_checker() {
        let out = engine(base_resources()).convert("好").await;
        // "好" 多音无统计：兜底 + 待审；无复核服务 → unresolved
        let dec = &out.report.tokens[0].char_decisions[0];
        assert_eq!(dec.resolved_by, Provenance::Fallback);
        assert!(dec.needs_review);
        assert_eq!(out.report.needs_review_items.len(), 1);
        assert!(out.report.unresolved);
        assert!(!out.report.llm_double_check.used);
        assert!(!out.report.llm_segment_and_tag.used);
    }

    #[tokio::test]
    async fn test_unknown_char_passthrough_end_to_end() {
        let out = engine(base_resources()).convert("龘好").await;
        assert!(out.text.contains('龘'));
        let decs = &out.report.tokens[0].char_decisions;
        assert_eq!(decs[0].resolved_by, Provenance::Unknown);
    }

    #[tokio::test]
    async fn test_alignment_mismatch_warning_propagates() {
        let mut res = base_resources();
        res.word_pinyin.insert("好说".to_string(), "hǎo".to_string());
        res.char_base.insert('好', vec!["hǎo".to_string()]);

        let out = engine(res).convert("好说").await;
        assert!(out
            .report
            .warnings
            .iter()
            .any(|w| w.contains("word_pinyin_alignment_mismatch")));
        // 落回逐字后仍有输出
        assert_eq!(out.text, "hǎoshuō");
    }

    #[tokio::test]
    async fn test_lexicon_overrides_word_map() {
        let mut res = base_resources();
        res.lexicon_pinyin.insert("细说".to_string(), "xí shuō".to_string());
        let out = engine(res).convert("细说").await;
        assert_eq!(out.text, "xíshuō");
    }

    #[tokio::test]
    async fn test_report_spans_round_trip() {
        let text = "细说，好";
        let out = engine(base_resources()).convert(text).await;
        let joined: String = out.report.spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(joined, text);
        assert_eq!(out.report.schema_version, 1);
        assert_eq!(out.report.text, text);
    }
}
