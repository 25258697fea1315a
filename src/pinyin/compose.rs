//! 输出拼接
//!
//! 按原始顺序走片段：汉字片段输出词元拼音（词元间单空格，词元内
//! 音节不分隔）；受保护片段原样输出。开启词状空格策略（默认）时，
//! 在拼音与相邻的 url/latin/number 片段之间补一个空格（边界已有
//! 空白则不补），避免拼音字母与拉丁文、数字、URL 黏连。

use std::collections::HashMap;

use crate::pinyin::types::{ProtectedKind, Span, SpanType, Token};

/// 判断已输出内容是否以空白结尾
fn ends_with_whitespace(out: &str) -> bool {
    out.chars().last().map_or(false, |c| c.is_whitespace())
}

/// 拼接最终输出
pub fn compose_output(
    spans: &[Span],
    tokens: &[Token],
    token_pinyin: &HashMap<(usize, usize), String>,
    word_like_spacing: bool,
) -> String {
    // 片段 → 词元拼音序列（词元已按片段内顺序排列）
    let mut pinyin_by_span: HashMap<&str, Vec<&str>> = HashMap::new();
    for tok in tokens {
        let piece = token_pinyin
            .get(&(tok.start, tok.end))
            .map(String::as_str)
            .unwrap_or("");
        pinyin_by_span.entry(tok.span_id.as_str()).or_default().push(piece);
    }

    let mut out = String::new();
    let mut prev_kind: Option<ProtectedKind> = None;
    let mut prev_was_han = false;

    for sp in spans {
        if sp.span_type == SpanType::Han {
            let han_out = pinyin_by_span
                .get(sp.span_id.as_str())
                .map(|pieces| pieces.join(" "))
                .unwrap_or_default();
            if word_like_spacing && !out.is_empty() {
                let prev_word_like = prev_kind.map_or(false, |k| k.is_word_like());
                if !prev_was_han && prev_word_like && !ends_with_whitespace(&out) {
                    out.push(' ');
                }
            }
            out.push_str(&han_out);
            prev_kind = None;
            prev_was_han = true;
            continue;
        }

        if word_like_spacing && !out.is_empty() {
            let this_word_like = sp.kind.map_or(false, |k| k.is_word_like());
            if prev_was_han
                && this_word_like
                && !ends_with_whitespace(&out)
                && !sp.text.chars().next().map_or(false, |c| c.is_whitespace())
            {
                out.push(' ');
            }
        }
        out.push_str(&sp.text);
        prev_kind = sp.kind;
        prev_was_han = false;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pinyin::span::split_spans;
    use crate::pinyin::tokenizer::{fallback_tokens, Segmenter};

    /// 构造词元并给每个词元一个假拼音
    fn setup(text: &str, words: &[&str], pinyin: &[(&str, &str)]) -> (Vec<Span>, Vec<Token>, HashMap<(usize, usize), String>) {
        let spans = split_spans(text);
        let seg = Segmenter::new(words.iter().copied());
        let tokens = fallback_tokens(&spans, &seg);
        let mut map = HashMap::new();
        for tok in &tokens {
            let py = pinyin
                .iter()
                .find(|(w, _)| *w == tok.text)
                .map(|(_, p)| p.to_string())
                .unwrap_or_else(|| tok.text.clone());
            map.insert((tok.start, tok.end), py);
        }
        (spans, tokens, map)
    }

    #[test]
    fn test_identity_for_non_han_text() {
        let text = "hello world 123, nothing to do!";
        let (spans, tokens, map) = setup(text, &[], &[]);
        assert_eq!(compose_output(&spans, &tokens, &map, true), text);
    }

    #[test]
    fn test_tokens_joined_with_single_space() {
        let (spans, tokens, map) = setup(
            "银行行长",
            &["银行", "行长"],
            &[("银行", "yínháng"), ("行长", "hángzhǎng")],
        );
        assert_eq!(compose_output(&spans, &tokens, &map, true), "yínháng hángzhǎng");
    }

    #[test]
    fn test_word_like_spacing_both_directions() {
        let (spans, tokens, map) = setup(
            "细说OpenAI的API",
            &["细说"],
            &[("细说", "xìshuō"), ("的", "de")],
        );
        assert_eq!(compose_output(&spans, &tokens, &map, true), "xìshuō OpenAI de API");
    }

    #[test]
    fn test_no_spacing_when_disabled() {
        let (spans, tokens, map) = setup(
            "细说OpenAI",
            &["细说"],
            &[("细说", "xìshuō")],
        );
        assert_eq!(compose_output(&spans, &tokens, &map, false), "xìshuōOpenAI");
    }

    #[test]
    fn test_no_double_space_when_whitespace_present() {
        let (spans, tokens, map) = setup(
            "细说 OpenAI",
            &["细说"],
            &[("细说", "xìshuō")],
        );
        assert_eq!(compose_output(&spans, &tokens, &map, true), "xìshuō OpenAI");
    }

    #[test]
    fn test_punct_spans_get_no_spacing() {
        let (spans, tokens, map) = setup(
            "细说：好",
            &["细说"],
            &[("细说", "xìshuō"), ("好", "hǎo")],
        );
        assert_eq!(compose_output(&spans, &tokens, &map, true), "xìshuō：hǎo");
    }

    #[test]
    fn test_number_and_url_spacing() {
        // URL 片段吞掉所有非空白字符，因此用空白终止
        let (spans, tokens, map) = setup(
            "涨3.5%看https://a.cn 再说",
            &["再说"],
            &[("涨", "zhǎng"), ("看", "kàn"), ("再说", "zàishuō")],
        );
        // 汉↔数字、汉↔URL 边界补空格；URL 后已有空白则不再补
        assert_eq!(
            compose_output(&spans, &tokens, &map, true),
            "zhǎng 3.5% kàn https://a.cn zàishuō"
        );
    }

    #[test]
    fn test_protected_spans_byte_for_byte() {
        let text = "细说OpenAI的API v2.0：https://openai.com";
        let (spans, tokens, map) = setup(
            text,
            &["细说"],
            &[("细说", "xìshuō"), ("的", "de")],
        );
        let out = compose_output(&spans, &tokens, &map, true);
        for protected in ["OpenAI", "API", "v2.0", "：", "https://openai.com"] {
            assert!(out.contains(protected), "受保护内容丢失: {}", protected);
        }
        assert_eq!(out, "xìshuō OpenAI de API v2.0：https://openai.com");
    }
}
