//! 流式补全 - 直接对接provider的SSE接口

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use futures::StreamExt;
use serde_json::{Value, json};

use crate::config::{DEFAULT_API_BASE_URL, LLMConfig, LLMProvider};
use crate::llm::client::TextStream;
use crate::llm::client::utils::truncate_for_log;

const GEMINI_OPENAI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
const OLLAMA_OPENAI_BASE_URL: &str = "http://localhost:11434/v1";
const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// SSE事件的载荷格式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SseDialect {
    /// OpenAI兼容的`chat/completions`增量
    ChatCompletions,
    /// Anthropic `messages`事件
    AnthropicMessages,
}

/// 单个`data:`载荷的解析结果
#[derive(Debug, PartialEq)]
pub enum SseEvent {
    Text(String),
    Done,
    Skip,
}

impl SseDialect {
    pub fn parse_event(&self, data: &str) -> Result<SseEvent> {
        let data = data.trim();
        if data.is_empty() {
            return Ok(SseEvent::Skip);
        }
        if *self == SseDialect::ChatCompletions && data == "[DONE]" {
            return Ok(SseEvent::Done);
        }

        let value: Value = serde_json::from_str(data)
            .with_context(|| format!("Malformed stream event: {}", truncate_for_log(data, 200)))?;

        match self {
            SseDialect::ChatCompletions => {
                if let Some(error) = value.get("error") {
                    bail!("{}", error_message(error));
                }
                match value.pointer("/choices/0/delta/content").and_then(Value::as_str) {
                    Some(text) => Ok(SseEvent::Text(text.to_string())),
                    None => Ok(SseEvent::Skip),
                }
            }
            SseDialect::AnthropicMessages => match value.get("type").and_then(Value::as_str) {
                Some("content_block_delta") => {
                    match value.pointer("/delta/text").and_then(Value::as_str) {
                        Some(text) => Ok(SseEvent::Text(text.to_string())),
                        None => Ok(SseEvent::Skip),
                    }
                }
                Some("message_stop") => Ok(SseEvent::Done),
                Some("error") => {
                    let error = value.get("error").unwrap_or(&Value::Null);
                    bail!("{}", error_message(error))
                }
                _ => Ok(SseEvent::Skip),
            },
        }
    }
}

fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

/// 按行切分SSE字节流，返回完整的`data:`载荷
///
/// 以字节缓冲，多字节字符被拆在两个chunk之间时不会损坏。
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// 流结束时处理没有换行结尾的最后一行
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    line.strip_prefix("data:")
        .map(|data| data.strip_prefix(' ').unwrap_or(data).to_string())
}

/// 一次流式请求
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub dialect: SseDialect,
}

impl StreamRequest {
    pub fn build(config: &LLMConfig, model: &str, system_prompt: &str, user_prompt: &str) -> Self {
        match config.provider {
            LLMProvider::Anthropic => Self {
                url: ANTHROPIC_MESSAGES_URL.to_string(),
                headers: vec![
                    ("x-api-key".to_string(), config.api_key.clone()),
                    ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
                ],
                body: json!({
                    "model": model,
                    "system": system_prompt,
                    "messages": [{"role": "user", "content": user_prompt}],
                    "max_tokens": config.max_tokens,
                    "temperature": config.temperature,
                    "stream": true,
                }),
                dialect: SseDialect::AnthropicMessages,
            },
            _ => {
                let mut headers = Vec::new();
                if !config.api_key.is_empty() {
                    headers.push((
                        "Authorization".to_string(),
                        format!("Bearer {}", config.api_key),
                    ));
                }
                Self {
                    url: format!("{}/chat/completions", chat_base_url(config)),
                    headers,
                    body: json!({
                        "model": model,
                        "messages": [
                            {"role": "system", "content": system_prompt},
                            {"role": "user", "content": user_prompt},
                        ],
                        "max_tokens": config.max_tokens,
                        "temperature": config.temperature,
                        "stream": true,
                    }),
                    dialect: SseDialect::ChatCompletions,
                }
            }
        }
    }
}

fn chat_base_url(config: &LLMConfig) -> String {
    let base = match config.provider {
        LLMProvider::Gemini => GEMINI_OPENAI_BASE_URL,
        LLMProvider::Ollama if config.api_base_url == DEFAULT_API_BASE_URL => {
            OLLAMA_OPENAI_BASE_URL
        }
        _ => config.api_base_url.as_str(),
    };
    base.trim_end_matches('/').to_string()
}

/// 流式请求使用的HTTP客户端，两次读取之间超过`read_timeout`即中断
pub fn http_client(read_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .read_timeout(read_timeout)
        .build()
        .context("Failed to build streaming HTTP client")
}

/// 发起请求并把SSE响应转换为文本片段流
///
/// 非2xx状态在打开阶段即失败；之后的传输或事件错误作为流中的最后一项返回。
pub async fn open_stream(http: &reqwest::Client, request: StreamRequest) -> Result<TextStream> {
    let mut builder = http.post(&request.url).json(&request.body);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    let response = builder
        .send()
        .await
        .context("Failed to open completion stream")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!(
            "Completion stream rejected with status {}: {}",
            status,
            truncate_for_log(&body, 500)
        );
    }

    let dialect = request.dialect;
    let bytes = Box::pin(response.bytes_stream());
    let initial = (bytes, SseLineDecoder::default(), VecDeque::new(), false);

    let stream = futures::stream::unfold(
        initial,
        move |(mut bytes, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (bytes, decoder, pending, done)));
                }
                if done {
                    return None;
                }
                let payloads = match bytes.next().await {
                    Some(Ok(chunk)) => decoder.push(&chunk),
                    Some(Err(e)) => {
                        pending.push_back(Err(anyhow!(e).context("Completion stream interrupted")));
                        done = true;
                        continue;
                    }
                    None => {
                        done = true;
                        decoder.finish().into_iter().collect()
                    }
                };
                for data in payloads {
                    match dialect.parse_event(&data) {
                        Ok(SseEvent::Text(text)) => pending.push_back(Ok(text)),
                        Ok(SseEvent::Skip) => {}
                        Ok(SseEvent::Done) => {
                            done = true;
                            break;
                        }
                        Err(e) => {
                            pending.push_back(Err(e));
                            done = true;
                            break;
                        }
                    }
                }
            }
        },
    );

    Ok(stream.boxed())
}
