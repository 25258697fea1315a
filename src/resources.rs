//! 资源加载
//!
//! 把磁盘上形态各异的 JSON 资源（行式伪记录、数组、带 items 的对象）
//! 通过适配函数统一为内存中的稳定结构 [`PinyinResources`]。格式怪癖
//! 止步于此，绝不泄漏进解析逻辑。
//!
//! 错误策略：单条畸形记录跳过并记 debug 日志；必需文件整体不可读或
//! 不可解析才算致命错误，在加载阶段直接返回。

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::pinyin::overrides::Rule;
use crate::pinyin::span::is_han;
use crate::pinyin::util::normalize_pinyin;

/// 多音字消歧置信门限
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// 最小支持样本数 n
    pub min_support: u64,
    /// 最小概率 p
    pub min_prob: f64,
    /// 最小边际 p - p2
    pub min_margin: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { min_support: 5, min_prob: 0.85, min_margin: 0.15 }
    }
}

/// 某个上下文键下的统计结论
#[derive(Debug, Clone, PartialEq)]
pub struct ContextStats {
    /// 该上下文下的最优读音
    pub best: String,
    /// 最优读音概率（源数据缺失时为 None）
    pub p: Option<f64>,
    /// 次优读音概率
    pub p2: f64,
    /// 支持样本数
    pub n: u64,
}

/// 多音字表条目
#[derive(Debug, Clone, Default)]
pub struct PolyphoneEntry {
    /// 声明的默认读音
    pub default: Option<String>,
    /// 候选读音列表
    pub candidates: Vec<String>,
    /// 上下文键（"pos=..|ner=.."）→ 统计结论
    pub contexts: HashMap<String, ContextStats>,
}

/// 一次加载、解析期间只读的全部资源
#[derive(Debug, Clone, Default)]
pub struct PinyinResources {
    /// 词典：词 → 空格分隔的带调音节
    pub word_pinyin: HashMap<String, String>,
    /// 用户词库（键冲突时覆盖词典）
    pub lexicon_pinyin: HashMap<String, String>,
    /// 单字表：字 → 有序候选读音
    pub char_base: HashMap<char, Vec<String>>,
    /// 多音字统计表
    pub polyphone: HashMap<char, PolyphoneEntry>,
    /// 置信门限
    pub thresholds: Thresholds,
    /// 用户覆写规则
    pub rules: Vec<Rule>,
}

impl PinyinResources {
    /// 从数据目录加载全部资源
    ///
    /// 必需文件：word.json、char_base.json、polyphone_disambig.json；
    /// 可选文件：polyphone.json、lexicon.json、overrides.json（缺失视为空）。
    pub fn load_from_dir(data_dir: impl AsRef<Path>) -> Result<Self> {
        let base = data_dir.as_ref();

        let word_pinyin = load_word_map(&base.join("word.json"))?;
        let char_base = load_char_base(&base.join("char_base.json"))?;
        let (mut polyphone, thresholds) = load_polyphone_disambig(&base.join("polyphone_disambig.json"))?;

        // 可选：候选表只用来补全多音字条目的候选列表
        for (ch, cands) in load_polyphone_candidates(&base.join("polyphone.json")) {
            let entry = polyphone.entry(ch).or_default();
            if entry.candidates.is_empty() {
                entry.candidates = cands;
            }
        }

        let lexicon_pinyin = load_lexicon(&base.join("lexicon.json"));
        let rules = load_override_rules(&base.join("overrides.json"));

        Ok(Self { word_pinyin, lexicon_pinyin, char_base, polyphone, thresholds, rules })
    }

    /// 合并词典与用户词库（词库优先）
    pub fn combined_word_pinyin(&self) -> HashMap<String, String> {
        let mut merged = self.word_pinyin.clone();
        for (k, v) in &self.lexicon_pinyin {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

/// 取出恰好一个字符的字符串，否则 None
fn single_char(s: &str) -> Option<char> {
    let mut it = s.chars();
    match (it.next(), it.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

/// 宽松数值读取：数字直取，数字字符串解析，其余畸形归 0
fn lenient_f64(v: Option<&Value>) -> Option<f64> {
    match v {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(n.as_f64().unwrap_or(0.0)),
        Some(Value::String(s)) => Some(s.trim().parse().unwrap_or(0.0)),
        Some(_) => Some(0.0),
    }
}

fn lenient_u64(v: Option<&Value>) -> u64 {
    match v {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n.as_u64().unwrap_or_else(|| n.as_f64().map(|f| f.max(0.0) as u64).unwrap_or(0)),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(_) => 0,
    }
}

/// 词典：行式伪记录文件，每行一个 {"word": .., "pinyin": ..}
///
/// 容忍包裹的 "[" / "]" 行与行尾逗号。仅收录纯汉字键。
fn load_word_map(path: &Path) -> Result<HashMap<String, String>> {
    let content = fs::read_to_string(path).with_context(|| format!("读取词典失败: {}", path.display()))?;
    let mut out = HashMap::new();
    for line in content.lines() {
        let mut s = line.trim();
        if s.is_empty() || s == "[" || s == "]" {
            continue;
        }
        s = s.strip_suffix(',').unwrap_or(s);
        let obj: Value = match serde_json::from_str(s) {
            Ok(v) => v,
            Err(e) => {
                debug!("词典行解析失败，跳过: {}", e);
                continue;
            }
        };
        let (Some(word), Some(pinyin)) = (obj.get("word").and_then(Value::as_str), obj.get("pinyin").and_then(Value::as_str)) else {
            continue;
        };
        if word.is_empty() || !word.chars().all(is_han) {
            continue;
        }
        out.insert(word.to_string(), normalize_pinyin(pinyin));
    }
    Ok(out)
}

/// 单字表：行式伪记录文件，每行一个 {"char": .., "pinyin": [..]}
fn load_char_base(path: &Path) -> Result<HashMap<char, Vec<String>>> {
    let content = fs::read_to_string(path).with_context(|| format!("读取单字表失败: {}", path.display()))?;
    let mut out = HashMap::new();
    for line in content.lines() {
        let mut s = line.trim();
        if s.is_empty() || s == "[" || s == "]" {
            continue;
        }
        s = s.strip_suffix(',').unwrap_or(s);
        let obj: Value = match serde_json::from_str(s) {
            Ok(v) => v,
            Err(e) => {
                debug!("单字表行解析失败，跳过: {}", e);
                continue;
            }
        };
        let Some(ch) = obj.get("char").and_then(Value::as_str).and_then(single_char) else {
            continue;
        };
        let Some(arr) = obj.get("pinyin").and_then(Value::as_array) else {
            continue;
        };
        let cands: Vec<String> = arr.iter().filter_map(Value::as_str).map(normalize_pinyin).collect();
        if arr.len() != cands.len() {
            debug!("单字表条目含非字符串候选，跳过: {}", ch);
            continue;
        }
        out.insert(ch, cands);
    }
    Ok(out)
}

/// 多音字候选表：整文件 JSON 数组 [{"char": .., "pinyin": [..]}, ..]（可选）
fn load_polyphone_candidates(path: &Path) -> HashMap<char, Vec<String>> {
    let Ok(content) = fs::read_to_string(path) else {
        return HashMap::new();
    };
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&content) else {
        debug!("多音字候选表不是 JSON 数组，忽略: {}", path.display());
        return HashMap::new();
    };
    let mut out = HashMap::new();
    for obj in &items {
        let Some(ch) = obj.get("char").and_then(Value::as_str).and_then(single_char) else {
            continue;
        };
        let Some(arr) = obj.get("pinyin").and_then(Value::as_array) else {
            continue;
        };
        let cands: Vec<String> = arr.iter().filter_map(Value::as_str).map(normalize_pinyin).collect();
        if !cands.is_empty() {
            out.insert(ch, cands);
        }
    }
    out
}

/// 多音字统计表：{"items": [..], "thresholds": {..}}
fn load_polyphone_disambig(path: &Path) -> Result<(HashMap<char, PolyphoneEntry>, Thresholds)> {
    let content =
        fs::read_to_string(path).with_context(|| format!("读取多音字统计表失败: {}", path.display()))?;
    let raw: Value = serde_json::from_str(&content)
        .with_context(|| format!("多音字统计表 JSON 解析失败: {}", path.display()))?;

    let mut by_char = HashMap::new();
    if let Some(items) = raw.get("items").and_then(Value::as_array) {
        for it in items {
            let Some(ch) = it.get("char").and_then(Value::as_str).and_then(single_char) else {
                continue;
            };
            by_char.insert(ch, parse_polyphone_entry(it));
        }
    }

    let thresholds = match raw.get("thresholds") {
        Some(Value::Object(obj)) => Thresholds {
            min_support: obj.get("min_support").map_or(Thresholds::default().min_support, |v| lenient_u64(Some(v))),
            min_prob: lenient_f64(obj.get("min_prob")).unwrap_or(Thresholds::default().min_prob),
            min_margin: lenient_f64(obj.get("min_margin")).unwrap_or(Thresholds::default().min_margin),
        },
        _ => Thresholds::default(),
    };

    Ok((by_char, thresholds))
}

fn parse_polyphone_entry(it: &Value) -> PolyphoneEntry {
    let default = it
        .get("default")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(normalize_pinyin);

    let candidates: Vec<String> = it
        .get("candidates")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(normalize_pinyin).collect())
        .unwrap_or_default();

    let mut contexts = HashMap::new();
    if let Some(Value::Object(ctxs)) = it.get("contexts") {
        for (key, ctx) in ctxs {
            // best 缺失或为空的上下文等价于没有上下文，直接不收录
            let Some(best) = ctx.get("best").and_then(Value::as_str).filter(|s| !s.is_empty()) else {
                continue;
            };
            contexts.insert(
                key.clone(),
                ContextStats {
                    best: normalize_pinyin(best),
                    p: lenient_f64(ctx.get("p")),
                    p2: lenient_f64(ctx.get("p2")).unwrap_or(0.0),
                    n: lenient_u64(ctx.get("n")),
                },
            );
        }
    }

    PolyphoneEntry { default, candidates, contexts }
}

/// 用户词库（可选）：{"items": [{word,pinyin}..]} 或扁平对象 {词: 拼音}
fn load_lexicon(path: &Path) -> HashMap<String, String> {
    let Ok(content) = fs::read_to_string(path) else {
        return HashMap::new();
    };
    let Ok(raw) = serde_json::from_str::<Value>(&content) else {
        debug!("用户词库 JSON 解析失败，忽略: {}", path.display());
        return HashMap::new();
    };

    let mut out = HashMap::new();
    match raw.get("items").and_then(Value::as_array) {
        Some(items) => {
            for it in items {
                let (Some(w), Some(p)) = (it.get("word").and_then(Value::as_str), it.get("pinyin").and_then(Value::as_str)) else {
                    continue;
                };
                if !w.is_empty() && w.chars().all(is_han) {
                    out.insert(w.to_string(), normalize_pinyin(p));
                }
            }
        }
        None => {
            if let Value::Object(obj) = &raw {
                for (w, v) in obj {
                    let Some(p) = v.as_str() else { continue };
                    if !w.is_empty() && w.chars().all(is_han) {
                        out.insert(w.clone(), normalize_pinyin(p));
                    }
                }
            }
        }
    }
    out
}

/// 覆写规则（可选）：{"schema_version": .., "rules": [..]}
fn load_override_rules(path: &Path) -> Vec<Rule> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let Ok(raw) = serde_json::from_str::<Value>(&content) else {
        debug!("覆写规则 JSON 解析失败，忽略: {}", path.display());
        return Vec::new();
    };
    let Some(items) = raw.get("rules").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut rules = Vec::new();
    for it in items {
        match serde_json::from_value::<Rule>(it.clone()) {
            Ok(rule) => rules.push(rule),
            Err(e) => debug!("覆写规则解析失败，跳过: {}", e),
        }
    }
    rules
}
