//! OpenAI 兼容顾问客户端
//!
//! 统一的 LLM 调用接口，支持所有 OpenAI 兼容的 API 服务
//! （如 OpenAI、智谱 GLM、DeepSeek、通义千问等）。两类任务都要求
//! 模型输出严格 JSON；响应先做宽松 JSON 提取（剥代码围栏、截取
//! 最外层对象），再做协议反序列化。每次调用单发不重试，超时即败。

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tokio::time::timeout;
use tracing::debug;

use crate::advisory::{AdvisoryError, DoubleCheckRequest, DoubleCheckResponse, TaggingRequest, TaggingResponse};
use crate::config::AdvisoryConfig;

lazy_static! {
    /// ```json 围栏（开头/结尾）
    static ref CODE_FENCE_RE: Regex = Regex::new(r"(?i)^```(?:json)?\s*|\s*```$").unwrap();
}

const SEGMENT_AND_TAG_SYSTEM: &str = r#"You are a Chinese NLP tagger.
Task: segment each span text into tokens and tag each token with:
- upos: UDv2 UPOS tag (ADJ, ADP, ADV, AUX, CCONJ, DET, INTJ, NOUN, NUM, PART, PRON, PROPN, PUNCT, SCONJ, SYM, VERB, X)
- xpos: CTB tag (string, e.g., NN, VV, AD, etc.)
- ner: CoNLL NER tag (O, PER, LOC, ORG, MISC)

Output format:
{
  "spans": [
    {
      "span_id": "S0",
      "tokens": [
        {"text": "token1", "upos": "VERB", "xpos": "VV", "ner": "O"},
        {"text": "token2", "upos": "NOUN", "xpos": "NN", "ner": "O"}
      ]
    }
  ]
}

Rules:
1. You MUST output STRICT JSON only. No extra text.
2. For each span: concatenation of token.text MUST equal the original span.text exactly.
3. Each token must have text, upos, xpos, and ner fields."#;

const DOUBLE_CHECK_SYSTEM: &str = r#"You are helping to disambiguate Chinese polyphonic characters.
Given input text, spans, tokens (with POS/NER), and a list of review items,
return STRICT JSON only with recommended pinyin (tone marks) for each item.
If context is insufficient or ambiguous, set needs_user=true for that item.
No extra text."#;

/// 从 LLM 文本响应中提取 JSON 对象
///
/// 依次尝试：剥掉代码围栏后直接解析 → 截取首个 "{" 到末个 "}" 的
/// 片段解析。都失败则报 InvalidJson。
pub fn extract_json_object(text: &str) -> Result<Value, AdvisoryError> {
    let mut t = text.trim().to_string();
    if t.is_empty() {
        return Err(AdvisoryError::EmptyContent);
    }

    if t.contains("```") {
        t = CODE_FENCE_RE.replace_all(&t, "").trim().to_string();
    }

    if let Ok(v) = serde_json::from_str::<Value>(&t) {
        return Ok(v);
    }

    let (Some(start), Some(end)) = (t.find('{'), t.rfind('}')) else {
        return Err(AdvisoryError::InvalidJson("响应中没有 JSON 对象".to_string()));
    };
    if end <= start {
        return Err(AdvisoryError::InvalidJson("响应中没有 JSON 对象".to_string()));
    }
    serde_json::from_str::<Value>(&t[start..=end]).map_err(|e| AdvisoryError::InvalidJson(e.to_string()))
}

/// OpenAI 兼容顾问客户端
///
/// 分词标注与复核共用一个客户端；两个任务各自单发一次请求。
#[derive(Clone)]
pub struct LlmAdvisory {
    config: AdvisoryConfig,
    client: Client,
}

impl LlmAdvisory {
    /// 创建客户端实例
    pub fn new(config: AdvisoryConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .no_proxy()
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { config, client }
    }

    /// 单轮对话，返回模型原始文本
    async fn chat(&self, system_prompt: &str, user_message: &str) -> Result<String, AdvisoryError> {
        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_message}
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature
        });

        debug!(
            "顾问请求: endpoint={}, model={}, user_len={}",
            self.config.endpoint,
            self.config.model,
            user_message.len()
        );

        let send = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send();

        let response = timeout(Duration::from_secs(self.config.timeout_secs), send)
            .await
            .map_err(|_| AdvisoryError::Timeout(self.config.timeout_secs))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdvisoryError::Api { status: status.as_u16(), body });
        }

        let payload: Value = response.json().await?;
        let content = payload["choices"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or(AdvisoryError::EmptyContent)?;

        Ok(content.trim().to_string())
    }

    /// 以 JSON 载荷发起调用并按协议类型解析结果
    async fn complete_json<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        system_prompt: &str,
        request: &Req,
    ) -> Result<Resp, AdvisoryError> {
        let user_message = serde_json::to_string_pretty(request)
            .map_err(|e| AdvisoryError::Schema(format!("请求序列化失败: {}", e)))?;
        let content = self.chat(system_prompt, &user_message).await?;
        let value = extract_json_object(&content)?;
        serde_json::from_value(value).map_err(|e| AdvisoryError::Schema(e.to_string()))
    }

    /// 分词标注：一次携带全部汉字片段
    pub async fn segment_and_tag(&self, request: &TaggingRequest) -> Result<TaggingResponse, AdvisoryError> {
        self.complete_json(SEGMENT_AND_TAG_SYSTEM, request).await
    }

    /// 复核：一次携带全部待审条目
    pub async fn double_check(&self, request: &DoubleCheckRequest) -> Result<DoubleCheckResponse, AdvisoryError> {
        self.complete_json(DOUBLE_CHECK_SYSTEM, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain_json() {
        let v = extract_json_object(r#"{"spans": []}"#).unwrap();
        assert!(v["spans"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_extract_fenced_json() {
        let text = "```json\n{\"items\": [1, 2]}\n```";
        let v = extract_json_object(text).unwrap();
        assert_eq!(v["items"][1], 2);
    }

    #[test]
    fn test_extract_embedded_json() {
        let text = "好的，结果如下：{\"spans\": [{\"span_id\": \"S0\", \"tokens\": []}]} 以上。";
        let v = extract_json_object(text).unwrap();
        assert_eq!(v["spans"][0]["span_id"], "S0");
    }

    #[test]
    fn test_extract_empty_is_error() {
        assert!(matches!(extract_json_object("   "), Err(AdvisoryError::EmptyContent)));
    }

    #[test]
    fn test_extract_no_json_is_error() {
        assert!(matches!(
            extract_json_object("这里没有任何对象"),
            Err(AdvisoryError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_extract_broken_snippet_is_error() {
        assert!(matches!(
            extract_json_object("前缀 {\"a\": } 后缀"),
            Err(AdvisoryError::InvalidJson(_))
        ));
    }
}
