//! 拼音值归一化工具

use unicode_normalization::UnicodeNormalization;

/// 归一化单个拼音值
///
/// - NFC 归一化（统一声调组合字符与预组合字符）
/// - IPA 小写 "ɡ" (U+0261) 统一为 ASCII "g"（部分数据集混用）
/// - "v" 记法统一为 "ü"
pub fn normalize_pinyin(pinyin: &str) -> String {
    let nfc: String = pinyin.nfc().collect();
    nfc.chars()
        .map(|ch| match ch {
            'ɡ' => 'g',
            'v' => 'ü',
            'V' => 'Ü',
            other => other,
        })
        .collect()
}

/// 归一化词条拼音：去掉音节分隔空格，保留声调
pub fn normalize_word_pinyin(pinyin: &str) -> String {
    let joined: String = pinyin.chars().filter(|ch| *ch != ' ').collect();
    normalize_pinyin(&joined)
}
