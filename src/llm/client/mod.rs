//! LLM客户端 - 提供统一的LLM服务接口

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LLMConfig;

mod providers;
pub mod stream;
pub mod types;
pub mod utils;

use providers::ProviderClient;
use stream::StreamRequest;
pub use types::{CompletionResponse, TokenUsage};
use utils::estimate_token_usage;

/// 流式输出的文本片段
pub type TextStream = BoxStream<'static, Result<String>>;

/// 补全网关：流水线访问语言模型的唯一入口
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// 单次补全，`structured`要求模型输出JSON对象
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        structured: bool,
    ) -> Result<CompletionResponse>;

    /// 流式补全，打开失败返回错误，中途失败作为流的最后一项
    async fn complete_stream(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<TextStream>;
}

/// LLM客户端 - 基于rig的补全与基于SSE的流式输出
#[derive(Clone)]
pub struct LLMClient {
    config: LLMConfig,
    client: ProviderClient,
    http: reqwest::Client,
}

impl LLMClient {
    /// 创建新的LLM客户端
    pub fn new(config: &LLMConfig) -> Result<Self> {
        let client = ProviderClient::new(config)?;
        let http = stream::http_client(Duration::from_secs(config.timeout_seconds))?;
        Ok(Self {
            config: config.clone(),
            client,
            http,
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    /// 通用重试逻辑，用于处理异步操作的重试机制
    async fn retry_with_backoff<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        let max_retries = self.config.retry_attempts.max(1);
        let retry_delay_ms = self.config.retry_delay_ms;
        let mut retries = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    retries += 1;
                    warn!(
                        attempt = retries,
                        max_attempts = max_retries,
                        error = %err,
                        "❌ 调用模型服务出错"
                    );
                    if retries >= max_retries {
                        return Err(err);
                    }
                    tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
                }
            }
        }
    }
}

#[async_trait]
impl CompletionGateway for LLMClient {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        structured: bool,
    ) -> Result<CompletionResponse> {
        let agent = self
            .client
            .create_agent(model, system_prompt, &self.config, structured)?;
        let timeout = self.timeout();

        let text = self
            .retry_with_backoff(|| async {
                tokio::time::timeout(timeout, agent.prompt(user_prompt))
                    .await
                    .map_err(|_| {
                        anyhow!("LLM request timed out after {}s", timeout.as_secs())
                    })?
            })
            .await?;

        let input = format!("{}\n{}", system_prompt, user_prompt);
        let token_usage = estimate_token_usage(&input, &text);
        debug!(
            model,
            input_tokens = token_usage.input_tokens,
            output_tokens = token_usage.output_tokens,
            "模型调用完成"
        );
        Ok(CompletionResponse::new(text, token_usage, model))
    }

    async fn complete_stream(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<TextStream> {
        let timeout = self.timeout();
        let request = StreamRequest::build(&self.config, model, system_prompt, user_prompt);
        debug!(model, url = %request.url, "打开流式补全");

        tokio::time::timeout(timeout, stream::open_stream(&self.http, request))
            .await
            .map_err(|_| {
                anyhow!(
                    "Opening completion stream timed out after {}s",
                    timeout.as_secs()
                )
            })?
    }
}
