pub mod chat;

pub const DEFAULT_BASE_URL: &str = "https://api.siliconflow.cn/v1";

/// Sampling settings sent with every completion request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
            top_p: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub sampling: SamplingConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            sampling: SamplingConfig::default(),
        }
    }
}
