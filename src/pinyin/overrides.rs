//! 用户覆写规则引擎
//!
//! 规则每轮按确定性全序处理：priority 降序，同级按 id 字典序升序，
//! 与存储顺序无关。前后词元匹配只在同一汉字片段内生效。每个字位上
//! 先到先得：后续规则意见不同记为冲突，值保持不变。

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pinyin::types::{CharDecision, Provenance, Token};
use crate::pinyin::util::normalize_pinyin;

/// 出现位置选择器：第 N 次（1 起）或字面量 "all"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Occurrence {
    /// 第 N 次出现
    Nth(usize),
    /// 关键字（仅接受 "all"）
    Keyword(String),
}

/// 单侧匹配条件
///
/// 所有字段都是可选的；给出的字段之间为"与"关系。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleCriteria {
    /// 文本全等
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// 文本属于集合
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_in: Option<Vec<String>>,
    /// 正则搜索命中
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    /// UPOS 属于集合
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upos_in: Option<Vec<String>>,
    /// 细粒度词性属于集合
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpos_in: Option<Vec<String>>,
    /// 命名实体标签属于集合
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ner_in: Option<Vec<String>>,
    /// 词元包含所有列出的字符
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<Vec<String>>,
}

/// 规则匹配条件（本词元 + 可选前后邻居）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    #[serde(default, rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_token: Option<RuleCriteria>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<RuleCriteria>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<RuleCriteria>,
}

/// 规则作用目标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTarget {
    /// 目标字符
    #[serde(rename = "char")]
    pub ch: String,
    /// 出现位置选择器
    pub occurrence: Occurrence,
}

/// 用户覆写规则（外部提供，单轮内只读）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "match")]
    pub matcher: RuleMatch,
    pub target: RuleTarget,
    pub choose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// 实际改动了某条决策的规则记录（审计 / 幂等性检查用）
#[derive(Debug, Clone, Serialize)]
pub struct AppliedRule {
    pub rule_id: String,
    pub token_start: usize,
    pub token_end: usize,
    pub token_text: String,
    pub target_char: char,
    pub occurrence: Occurrence,
    pub choose: String,
}

/// 覆写冲突记录
#[derive(Debug, Clone, Serialize)]
pub struct OverrideConflict {
    pub token: String,
    pub token_start: usize,
    pub token_end: usize,
    #[serde(rename = "char")]
    pub ch: char,
    pub offset_in_token: usize,
    pub existing_rule_id: String,
    pub existing_choose: String,
    pub new_rule_id: String,
    pub new_choose: String,
}

/// 出现位置选择器的规范化形式
#[derive(Debug, Clone, Copy, PartialEq)]
enum OccSel {
    Nth(usize),
    All,
}

/// 预处理后的规则：目标字符、归一化读音、预编译正则
struct PreparedRule<'r> {
    rule: &'r Rule,
    target_char: char,
    occurrence: OccSel,
    choose: String,
    self_regex: Option<Regex>,
    prev_regex: Option<Regex>,
    next_regex: Option<Regex>,
}

/// 编译单侧条件中的正则
///
/// 返回 Err 表示正则非法（整条规则跳过）。
fn compile_criteria_regex(criteria: &Option<RuleCriteria>) -> Result<Option<Regex>, regex::Error> {
    match criteria.as_ref().and_then(|c| c.regex.as_deref()) {
        Some(pattern) => Regex::new(pattern).map(Some),
        None => Ok(None),
    }
}

/// 预处理并排序规则
///
/// 非法规则（目标不是单字符、occurrence 无效、正则非法）跳过并
/// 记入警告。排序：priority 降序、id 升序。
fn prepare_rules<'r>(rules: &'r [Rule], warnings: &mut Vec<String>) -> Vec<PreparedRule<'r>> {
    let mut prepared = Vec::new();
    for rule in rules {
        let mut chars = rule.target.ch.chars();
        let target_char = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => {
                warnings.push(format!("override_rule_invalid_target: rule={}", rule.id));
                continue;
            }
        };

        let occurrence = match &rule.target.occurrence {
            Occurrence::Nth(n) if *n >= 1 => OccSel::Nth(*n),
            Occurrence::Keyword(kw) if kw == "all" => OccSel::All,
            _ => {
                warnings.push(format!("override_rule_invalid_occurrence: rule={}", rule.id));
                continue;
            }
        };

        let regexes = (
            compile_criteria_regex(&rule.matcher.self_token),
            compile_criteria_regex(&rule.matcher.prev),
            compile_criteria_regex(&rule.matcher.next),
        );
        let (self_regex, prev_regex, next_regex) = match regexes {
            (Ok(s), Ok(p), Ok(n)) => (s, p, n),
            _ => {
                warnings.push(format!("override_rule_invalid_regex: rule={}", rule.id));
                continue;
            }
        };

        prepared.push(PreparedRule {
            rule,
            target_char,
            occurrence,
            choose: normalize_pinyin(&rule.choose),
            self_regex,
            prev_regex,
            next_regex,
        });
    }

    // priority 降序，id 升序：与存储顺序彻底解耦
    prepared.sort_by(|a, b| {
        b.rule
            .priority
            .cmp(&a.rule.priority)
            .then_with(|| a.rule.id.cmp(&b.rule.id))
    });
    prepared
}

/// 单侧条件匹配
fn criteria_match(criteria: &RuleCriteria, regex: &Option<Regex>, tok: &Token) -> bool {
    if let Some(text) = &criteria.text {
        if *text != tok.text {
            return false;
        }
    }
    if let Some(set) = &criteria.text_in {
        if !set.contains(&tok.text) {
            return false;
        }
    }
    if criteria.regex.is_some() {
        match regex {
            Some(re) => {
                if !re.is_match(&tok.text) {
                    return false;
                }
            }
            None => return false,
        }
    }
    if let Some(set) = &criteria.upos_in {
        if !set.contains(&tok.upos) {
            return false;
        }
    }
    if let Some(set) = &criteria.xpos_in {
        if !set.contains(&tok.xpos) {
            return false;
        }
    }
    if let Some(set) = &criteria.ner_in {
        if !set.contains(&tok.ner) {
            return false;
        }
    }
    if let Some(chars) = &criteria.contains {
        for needle in chars {
            if !needle.is_empty() && !tok.text.contains(needle.as_str()) {
                return false;
            }
        }
    }
    true
}

/// 整条规则对某词元（含邻居）是否匹配
///
/// 条件引用的邻居不存在（片段边界）时整条不匹配。
fn rule_matches(prep: &PreparedRule<'_>, tok: &Token, prev: Option<&Token>, next: Option<&Token>) -> bool {
    if let Some(criteria) = &prep.rule.matcher.self_token {
        if !criteria_match(criteria, &prep.self_regex, tok) {
            return false;
        }
    }
    if let Some(criteria) = &prep.rule.matcher.prev {
        match prev {
            Some(p) => {
                if !criteria_match(criteria, &prep.prev_regex, p) {
                    return false;
                }
            }
            None => return false,
        }
    }
    if let Some(criteria) = &prep.rule.matcher.next {
        match next {
            Some(n) => {
                if !criteria_match(criteria, &prep.next_regex, n) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

/// 在单个字位上应用规则
fn apply_at(
    prep: &PreparedRule<'_>,
    tok: &Token,
    decisions: &mut [CharDecision],
    pos: usize,
    applied: &mut Vec<AppliedRule>,
    conflicts: &mut Vec<OverrideConflict>,
) {
    let Some(dec) = decisions.get_mut(pos) else {
        return;
    };
    if dec.ch != prep.target_char {
        return;
    }
    let rid = &prep.rule.id;

    // 值已一致：幂等重申。仍盖上 override 印记，阻止更低优先级的
    // 规则之后改写这个已经正确的值。
    if dec.chosen == prep.choose {
        dec.notes.push(format!("override_reaffirm:{}", rid));
        dec.resolved_by = Provenance::Override;
        dec.rule_id = Some(rid.clone());
        return;
    }

    // 已被另一条规则覆写：记冲突，先到者（更高有效优先级）保留
    if dec.resolved_by == Provenance::Override {
        if let Some(existing) = &dec.rule_id {
            if existing != rid {
                dec.conflict = true;
                conflicts.push(OverrideConflict {
                    token: tok.text.clone(),
                    token_start: tok.start,
                    token_end: tok.end,
                    ch: prep.target_char,
                    offset_in_token: pos,
                    existing_rule_id: existing.clone(),
                    existing_choose: dec.chosen.clone(),
                    new_rule_id: rid.clone(),
                    new_choose: prep.choose.clone(),
                });
                return;
            }
        }
    }

    dec.chosen = prep.choose.clone();
    dec.resolved_by = Provenance::Override;
    dec.rule_id = Some(rid.clone());
    dec.needs_review = false;
    applied.push(AppliedRule {
        rule_id: rid.clone(),
        token_start: tok.start,
        token_end: tok.end,
        token_text: tok.text.clone(),
        target_char: prep.target_char,
        occurrence: prep.rule.target.occurrence.clone(),
        choose: prep.choose.clone(),
    });
}

/// 对全部词元应用覆写规则
///
/// 决策通过 (token_start, token_end) 侧表寻址，词元本身不被修改。
pub fn apply_overrides(
    tokens: &[Token],
    decisions: &mut HashMap<(usize, usize), Vec<CharDecision>>,
    rules: &[Rule],
) -> (Vec<AppliedRule>, Vec<OverrideConflict>, Vec<String>) {
    let mut applied = Vec::new();
    let mut conflicts = Vec::new();
    let mut warnings = Vec::new();

    for prep in prepare_rules(rules, &mut warnings) {
        for (i, tok) in tokens.iter().enumerate() {
            if !tok.text.contains(prep.target_char) {
                continue;
            }
            // 邻居只认同一片段：跨片段相邻永不匹配
            let prev = if i > 0 {
                tokens.get(i - 1).filter(|t| t.span_id == tok.span_id)
            } else {
                None
            };
            let next = tokens.get(i + 1).filter(|t| t.span_id == tok.span_id);
            if !rule_matches(&prep, tok, prev, next) {
                continue;
            }

            let Some(decs) = decisions.get_mut(&(tok.start, tok.end)) else {
                continue;
            };
            let positions: Vec<usize> = decs
                .iter()
                .filter(|d| d.ch == prep.target_char)
                .map(|d| d.offset_in_token)
                .collect();
            if positions.is_empty() {
                continue;
            }

            match prep.occurrence {
                OccSel::All => {
                    for pos in positions {
                        apply_at(&prep, tok, decs, pos, &mut applied, &mut conflicts);
                    }
                }
                OccSel::Nth(n) => {
                    if n <= positions.len() {
                        apply_at(&prep, tok, decs, positions[n - 1], &mut applied, &mut conflicts);
                    } else {
                        warnings.push(format!(
                            "override_occurrence_out_of_range: rule={} token='{}' occurrence={} matches={}",
                            prep.rule.id,
                            tok.text,
                            n,
                            positions.len()
                        ));
                    }
                }
            }
        }
    }

    (applied, conflicts, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pinyin::types::CharDecision;

    fn token(span_id: &str, index: usize, start: usize, text: &str) -> Token {
        Token {
            span_id: span_id.to_string(),
            index_in_span: index,
            start,
            end: start + text.len(),
            text: text.to_string(),
            upos: "X".to_string(),
            xpos: "UNK".to_string(),
            ner: "O".to_string(),
        }
    }

    fn decisions_for(text: &str, chosen: &str) -> Vec<CharDecision> {
        text.chars()
            .enumerate()
            .map(|(i, ch)| {
                CharDecision::new(
                    ch,
                    i,
                    vec![chosen.to_string()],
                    chosen.to_string(),
                    Provenance::Fallback,
                )
            })
            .collect()
    }

    fn rule(id: &str, priority: i64, target: &str, occurrence: Occurrence, choose: &str) -> Rule {
        Rule {
            id: id.to_string(),
            priority,
            description: None,
            matcher: RuleMatch::default(),
            target: RuleTarget { ch: target.to_string(), occurrence },
            choose: choose.to_string(),
            meta: None,
        }
    }

    fn setup(text: &str) -> (Vec<Token>, HashMap<(usize, usize), Vec<CharDecision>>) {
        let tok = token("S0", 0, 0, text);
        let mut table = HashMap::new();
        table.insert((tok.start, tok.end), decisions_for(text, "x"));
        (vec![tok], table)
    }

    #[test]
    fn test_rule_deserialization() {
        let rule: Rule = serde_json::from_value(serde_json::json!({
            "id": "r1", "priority": 100,
            "match": {"self": {"text": "行长"}, "prev": {"upos_in": ["NOUN"]}},
            "target": {"char": "行", "occurrence": "all"},
            "choose": "háng"
        }))
        .unwrap();
        assert_eq!(rule.target.occurrence, Occurrence::Keyword("all".to_string()));
        assert_eq!(rule.matcher.self_token.as_ref().unwrap().text.as_deref(), Some("行长"));

        let rule: Rule = serde_json::from_value(serde_json::json!({
            "id": "r2", "target": {"char": "行", "occurrence": 2}, "choose": "xíng"
        }))
        .unwrap();
        assert_eq!(rule.priority, 0);
        assert_eq!(rule.target.occurrence, Occurrence::Nth(2));
    }

    #[test]
    fn test_higher_priority_wins_regardless_of_storage_order() {
        // 低优先级在前
        let rules = vec![
            rule("b_low", 1, "行", Occurrence::Nth(1), "xíng"),
            rule("a_high", 100, "行", Occurrence::Nth(1), "háng"),
        ];
        let (tokens, mut table) = setup("行好");
        let (applied, conflicts, _) = apply_overrides(&tokens, &mut table, &rules);

        let dec = &table[&(0, "行好".len())][0];
        assert_eq!(dec.chosen, "háng");
        assert_eq!(dec.rule_id.as_deref(), Some("a_high"));
        assert_eq!(applied.len(), 1);
        assert_eq!(conflicts.len(), 1, "低优先级异议应记为冲突");
        assert_eq!(conflicts[0].existing_rule_id, "a_high");
        assert_eq!(conflicts[0].new_rule_id, "b_low");
    }

    #[test]
    fn test_equal_priority_lexicographic_id_order() {
        let rules = vec![
            rule("r2", 10, "行", Occurrence::Nth(1), "xíng"),
            rule("r1", 10, "行", Occurrence::Nth(1), "háng"),
        ];
        let (tokens, mut table) = setup("行");
        let (_, conflicts, _) = apply_overrides(&tokens, &mut table, &rules);

        // id 升序先应用 r1，r2 异议记冲突，恰好一条
        let dec = &table[&(0, "行".len())][0];
        assert_eq!(dec.chosen, "háng");
        assert!(dec.conflict);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].existing_rule_id, "r1");
    }

    #[test]
    fn test_reaffirm_is_idempotent_not_a_conflict() {
        let rules = vec![
            rule("r1", 10, "行", Occurrence::Nth(1), "háng"),
            rule("r2", 5, "行", Occurrence::Nth(1), "háng"),
        ];
        let (tokens, mut table) = setup("行");
        let (applied, conflicts, _) = apply_overrides(&tokens, &mut table, &rules);

        assert!(conflicts.is_empty(), "同值重申不是冲突");
        assert_eq!(applied.len(), 1);
        let dec = &table[&(0, "行".len())][0];
        assert!(dec.notes.iter().any(|n| n == "override_reaffirm:r2"));
    }

    #[test]
    fn test_preexisting_equal_value_gets_restamped() {
        // 决策原值已等于规则值：重申后盖上 override 印记，
        // 更低优先级的不同意见随后只能记冲突
        let rules = vec![
            rule("keep", 10, "行", Occurrence::Nth(1), "x"),
            rule("change", 1, "行", Occurrence::Nth(1), "háng"),
        ];
        let (tokens, mut table) = setup("行");
        let (applied, conflicts, _) = apply_overrides(&tokens, &mut table, &rules);

        let dec = &table[&(0, "行".len())][0];
        assert_eq!(dec.chosen, "x");
        assert_eq!(dec.resolved_by, Provenance::Override);
        assert!(applied.is_empty(), "重申不产生 AppliedRule");
        assert_eq!(conflicts.len(), 1);
    }

    #[test]
    fn test_occurrence_selectors() {
        let rules = vec![
            rule("first", 20, "行", Occurrence::Nth(1), "xíng"),
            rule("second", 10, "行", Occurrence::Nth(2), "háng"),
        ];
        let (tokens, mut table) = setup("行行好");
        let (applied, _, _) = apply_overrides(&tokens, &mut table, &rules);

        let decs = &table[&(0, "行行好".len())];
        assert_eq!(decs[0].chosen, "xíng");
        assert_eq!(decs[1].chosen, "háng");
        assert_eq!(decs[2].chosen, "x", "第三字不受影响");
        assert_eq!(applied.len(), 2);
    }

    #[test]
    fn test_occurrence_all() {
        let rules = vec![rule("all", 1, "行", Occurrence::Keyword("all".to_string()), "háng")];
        let (tokens, mut table) = setup("行行好");
        let (applied, _, _) = apply_overrides(&tokens, &mut table, &rules);

        let decs = &table[&(0, "行行好".len())];
        assert_eq!(decs[0].chosen, "háng");
        assert_eq!(decs[1].chosen, "háng");
        assert_eq!(applied.len(), 2);
    }

    #[test]
    fn test_occurrence_out_of_range_warns() {
        let rules = vec![rule("r9", 1, "行", Occurrence::Nth(9), "háng")];
        let (tokens, mut table) = setup("行行好");
        let (applied, _, warnings) = apply_overrides(&tokens, &mut table, &rules);

        assert!(applied.is_empty());
        assert!(warnings.iter().any(|w| w.contains("override_occurrence_out_of_range")));
    }

    #[test]
    fn test_override_clears_needs_review() {
        let rules = vec![rule("r1", 1, "行", Occurrence::Nth(1), "háng")];
        let (tokens, mut table) = setup("行");
        table.get_mut(&(0, "行".len())).unwrap()[0].needs_review = true;
        let _ = apply_overrides(&tokens, &mut table, &rules);

        assert!(!table[&(0, "行".len())][0].needs_review);
    }

    #[test]
    fn test_prev_criteria_requires_same_span_neighbor() {
        let mut r = rule("r1", 1, "行", Occurrence::Nth(1), "háng");
        r.matcher.prev = Some(RuleCriteria { text: Some("银".to_string()), ..Default::default() });

        // 同片段内有前邻居："银" + "行"
        let t0 = token("S0", 0, 0, "银");
        let t1 = token("S0", 1, "银".len(), "行");
        let mut table = HashMap::new();
        table.insert((t1.start, t1.end), decisions_for("行", "x"));
        let (applied, _, _) = apply_overrides(&[t0, t1], &mut table, std::slice::from_ref(&r));
        assert_eq!(applied.len(), 1);

        // 前邻居属于另一片段：不匹配
        let t0 = token("S0", 0, 0, "银");
        let t1 = token("S1", 0, "银".len(), "行");
        let mut table = HashMap::new();
        table.insert((t1.start, t1.end), decisions_for("行", "x"));
        let (applied, _, _) = apply_overrides(&[t0, t1], &mut table, std::slice::from_ref(&r));
        assert!(applied.is_empty(), "跨片段相邻不允许匹配");
    }

    #[test]
    fn test_missing_neighbor_never_matches() {
        let mut r = rule("r1", 1, "行", Occurrence::Nth(1), "háng");
        r.matcher.next = Some(RuleCriteria { text: Some("长".to_string()), ..Default::default() });

        let (tokens, mut table) = setup("行");
        let (applied, _, _) = apply_overrides(&tokens, &mut table, &[r]);
        assert!(applied.is_empty());
    }

    #[test]
    fn test_regex_and_contains_criteria() {
        let mut r = rule("r1", 1, "行", Occurrence::Nth(1), "háng");
        r.matcher.self_token = Some(RuleCriteria {
            regex: Some("^银.".to_string()),
            contains: Some(vec!["银".to_string(), "行".to_string()]),
            ..Default::default()
        });

        let (tokens, mut table) = setup("银行");
        let (applied, _, _) = apply_overrides(&tokens, &mut table, std::slice::from_ref(&r));
        assert_eq!(applied.len(), 1);

        let (tokens, mut table) = setup("行长");
        let (applied, _, _) = apply_overrides(&tokens, &mut table, std::slice::from_ref(&r));
        assert!(applied.is_empty());
    }

    #[test]
    fn test_upos_criteria() {
        let mut r = rule("r1", 1, "行", Occurrence::Nth(1), "háng");
        r.matcher.self_token = Some(RuleCriteria {
            upos_in: Some(vec!["NOUN".to_string()]),
            ..Default::default()
        });

        let mut tok = token("S0", 0, 0, "行");
        tok.upos = "NOUN".to_string();
        let mut table = HashMap::new();
        table.insert((tok.start, tok.end), decisions_for("行", "x"));
        let (applied, _, _) = apply_overrides(&[tok], &mut table, std::slice::from_ref(&r));
        assert_eq!(applied.len(), 1);
    }

    #[test]
    fn test_invalid_regex_skips_rule_with_warning() {
        let mut r = rule("bad", 1, "行", Occurrence::Nth(1), "háng");
        r.matcher.self_token = Some(RuleCriteria { regex: Some("([".to_string()), ..Default::default() });

        let (tokens, mut table) = setup("行");
        let (applied, _, warnings) = apply_overrides(&tokens, &mut table, &[r]);
        assert!(applied.is_empty());
        assert!(warnings.iter().any(|w| w.contains("override_rule_invalid_regex")));
    }

    #[test]
    fn test_choose_value_is_normalized() {
        // "v" 记法在应用时归一化为 "ü"
        let rules = vec![rule("r1", 1, "律", Occurrence::Nth(1), "lv4")];
        let (tokens, mut table) = setup("律");
        let _ = apply_overrides(&tokens, &mut table, &rules);
        assert_eq!(table[&(0, "律".len())][0].chosen, "lü4");
    }
}
