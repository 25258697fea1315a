//! 流水线与顾问服务配置

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_threshold() -> f64 {
    0.85
}

/// 流水线选项
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// 拼音与相邻 url/latin/number 片段之间补空格
    #[serde(default = "default_true")]
    pub word_like_spacing: bool,
    /// 置信度低于该阈值的决策进入复核
    #[serde(default = "default_threshold")]
    pub double_check_threshold: f64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { word_like_spacing: true, double_check_threshold: 0.85 }
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f64 {
    0.1
}

/// OpenAI 兼容顾问服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryConfig {
    /// API 端点（如 https://api.openai.com/v1/chat/completions）
    pub endpoint: String,
    /// API Key
    pub api_key: String,
    /// 模型名称
    pub model: String,
    /// 单次调用超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 最大生成 token 数
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// 温度参数（低温度保证输出稳定）
    /// 使用 f64 避免浮点精度问题（f32 的 0.3 会变成 0.30000001192092896）
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl AdvisoryConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}
