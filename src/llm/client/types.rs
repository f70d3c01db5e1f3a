use serde::{Deserialize, Serialize};

/// Token使用情况
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// 一次完成调用的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    pub token_usage: TokenUsage,
    pub model_id: String,
    /// Unix时间戳（秒）
    pub created: i64,
}

impl CompletionResponse {
    pub fn new(text: String, token_usage: TokenUsage, model_id: &str) -> Self {
        Self {
            text,
            token_usage,
            model_id: model_id.to_string(),
            created: chrono::Utc::now().timestamp(),
        }
    }
}
