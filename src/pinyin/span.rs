//! 片段切分
//!
//! 对原文做单趟从左到右扫描，按优先级切出带类型的连续片段：
//! URL → 汉字 → 空白 → 拉丁词 → 数字 → 标点/符号 → 其他。
//! 每条规则取各自类别的最长匹配；输出片段无缝覆盖全文。

use lazy_static::lazy_static;
use regex::Regex;

use crate::pinyin::types::{ProtectedKind, Span, SpanType};

lazy_static! {
    /// URL：scheme:// 后接一段非空白
    static ref URL_RE: Regex = Regex::new(r"(?i)^https?://[^\s]+").unwrap();
}

/// 判断是否为汉字
///
/// 覆盖 CJK 统一表意文字及扩展区、兼容区。
pub fn is_han(ch: char) -> bool {
    let code = ch as u32;
    // CJK Unified Ideographs
    (0x4E00..=0x9FFF).contains(&code)
        // CJK Unified Ideographs Extension A
        || (0x3400..=0x4DBF).contains(&code)
        // CJK Compatibility Ideographs
        || (0xF900..=0xFAFF).contains(&code)
        // CJK Unified Ideographs Extension B-F
        || (0x20000..=0x2EBEF).contains(&code)
}

/// 判断是否为标点或符号
///
/// 覆盖 ASCII 标点、通用标点、CJK 标点、全半角形式中的标点段，
/// 以及常见符号区（箭头、数学、货币等）。范围之外归入 Other，
/// 两类下游行为一致（原样输出，不参与空格策略）。
pub fn is_punct_or_symbol(ch: char) -> bool {
    if ch.is_ascii() {
        return ch.is_ascii_punctuation();
    }
    let code = ch as u32;
    (0x00A1..=0x00BF).contains(&code)
        // General Punctuation
        || (0x2000..=0x206F).contains(&code)
        // Currency Symbols
        || (0x20A0..=0x20CF).contains(&code)
        // Letterlike / Arrows / Math / Misc Symbols
        || (0x2100..=0x2BFF).contains(&code)
        // CJK Symbols and Punctuation
        || (0x3000..=0x303F).contains(&code)
        // CJK Compatibility Forms / Small Form Variants
        || (0xFE30..=0xFE6F).contains(&code)
        // Fullwidth forms 中的标点段（跳过全角字母/数字）
        || (0xFF01..=0xFF0F).contains(&code)
        || (0xFF1A..=0xFF20).contains(&code)
        || (0xFF3B..=0xFF40).contains(&code)
        || (0xFF5B..=0xFF65).contains(&code)
}

/// 当前位置起、满足谓词的最长字符连续段的结束字节偏移
fn scan_while(text: &str, start: usize, pred: impl Fn(char) -> bool) -> usize {
    let mut end = start;
    for ch in text[start..].chars() {
        if !pred(ch) {
            break;
        }
        end += ch.len_utf8();
    }
    end
}

/// 切分全文为带类型片段
///
/// 不变式：片段连续、互不重叠，拼接严格等于原文。
pub fn split_spans(text: &str) -> Vec<Span> {
    let mut spans: Vec<Span> = Vec::new();
    let n = text.len();
    let mut i = 0usize;

    let push_span = |spans: &mut Vec<Span>, span_type: SpanType, kind: Option<ProtectedKind>, start: usize, end: usize| {
        if start >= end {
            return;
        }
        let span_id = format!("S{}", spans.len());
        spans.push(Span {
            span_id,
            span_type,
            kind,
            start,
            end,
            text: text[start..end].to_string(),
        });
    };

    while i < n {
        // 1. URL（必须从当前位置起）
        if let Some(m) = URL_RE.find(&text[i..]) {
            let end = i + m.end();
            push_span(&mut spans, SpanType::Protected, Some(ProtectedKind::Url), i, end);
            i = end;
            continue;
        }

        let ch = text[i..].chars().next().expect("在字符边界上扫描");

        // 2. 汉字连续段
        if is_han(ch) {
            let end = scan_while(text, i, is_han);
            push_span(&mut spans, SpanType::Han, None, i, end);
            i = end;
            continue;
        }

        // 3. 空白连续段
        if ch.is_whitespace() {
            let end = scan_while(text, i, |c| c.is_whitespace());
            push_span(&mut spans, SpanType::Protected, Some(ProtectedKind::Space), i, end);
            i = end;
            continue;
        }

        // 4. 拉丁词：字母开头，后续允许字母/数字/_/-
        if ch.is_ascii_alphabetic() {
            let end = scan_while(text, i, |c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            push_span(&mut spans, SpanType::Protected, Some(ProtectedKind::Latin), i, end);
            i = end;
            continue;
        }

        // 5. 数字：数字开头，后续允许数字/./%
        if ch.is_ascii_digit() {
            let end = scan_while(text, i, |c| c.is_ascii_digit() || c == '.' || c == '%');
            push_span(&mut spans, SpanType::Protected, Some(ProtectedKind::Number), i, end);
            i = end;
            continue;
        }

        // 6/7. 单个标点/符号，或单个其他字符
        let kind = if is_punct_or_symbol(ch) {
            ProtectedKind::Punct
        } else {
            ProtectedKind::Other
        };
        let end = i + ch.len_utf8();
        push_span(&mut spans, SpanType::Protected, Some(kind), i, end);
        i = end;
    }

    spans
}
