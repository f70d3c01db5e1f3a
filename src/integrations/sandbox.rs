//! 代码沙箱 - E2B风格的远程执行环境

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::config::SandboxConfig;
use crate::llm::client::utils::truncate_for_log;

const ENVD_PORT: u16 = 49983;
const INTERPRETER_PORT: u16 = 49999;

/// 一个已创建的沙箱
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSession {
    pub sandbox_id: String,
    pub access_token: Option<String>,
}

/// 执行产生的一个结果产物
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutionOutput {
    /// 表达式值的文本表示
    #[serde(default)]
    pub text: Option<String>,
    /// base64编码的PNG
    #[serde(default)]
    pub png: Option<String>,
    #[serde(default)]
    pub is_main_result: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionError {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub traceback: String,
}

/// 一次代码执行的完整结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    pub outputs: Vec<ExecutionOutput>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub error: Option<ExecutionError>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ExecutionEvent {
    Result(ExecutionOutput),
    Stdout { text: String },
    Stderr { text: String },
    Error(ExecutionError),
    #[serde(other)]
    Other,
}

impl Execution {
    /// 解析执行接口返回的NDJSON事件流
    pub fn from_ndjson(body: &str) -> Result<Self> {
        let mut execution = Execution::default();
        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let event: ExecutionEvent = serde_json::from_str(line)
                .with_context(|| format!("Malformed execution event: {}", truncate_for_log(line, 200)))?;
            match event {
                ExecutionEvent::Result(output) => execution.outputs.push(output),
                ExecutionEvent::Stdout { text } => execution.stdout.push(text),
                ExecutionEvent::Stderr { text } => execution.stderr.push(text),
                ExecutionEvent::Error(error) => execution.error = Some(error),
                ExecutionEvent::Other => {}
            }
        }
        Ok(execution)
    }

    /// 解码第一个图片产物：优先`png`字段，其次是去掉引号的文本表示
    pub fn first_image(&self) -> Option<Vec<u8>> {
        self.outputs.iter().find_map(|output| {
            if let Some(png) = &output.png {
                return decode_base64(png);
            }
            output.text.as_deref().and_then(decode_base64)
        })
    }
}

fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    let cleaned = encoded.trim().trim_matches(|c| c == '\'' || c == '"');
    if cleaned.is_empty() {
        return None;
    }
    STANDARD.decode(cleaned).ok()
}

/// 代码沙箱接口
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn create_sandbox(&self) -> Result<SandboxSession>;

    /// 把本地文件上传到沙箱内的`remote_path`
    async fn upload(
        &self,
        session: &SandboxSession,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()>;

    async fn run_code(&self, session: &SandboxSession, code: &str) -> Result<Execution>;

    async fn close(&self, session: &SandboxSession) -> Result<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSandboxResponse {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(default)]
    envd_access_token: Option<String>,
}

/// E2B沙箱客户端
pub struct E2bSandbox {
    client: Client,
    config: SandboxConfig,
}

impl E2bSandbox {
    pub fn new(config: &SandboxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build sandbox HTTP client")?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn sandbox_url(&self, port: u16, session: &SandboxSession, path: &str) -> String {
        format!(
            "https://{}-{}.{}{}",
            port, session.sandbox_id, self.config.domain, path
        )
    }

    fn with_access_token(
        builder: reqwest::RequestBuilder,
        session: &SandboxSession,
    ) -> reqwest::RequestBuilder {
        match &session.access_token {
            Some(token) => builder.header("X-Access-Token", token),
            None => builder,
        }
    }
}

async fn ensure_success(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!(
        "Sandbox {} failed with status {}: {}",
        action,
        status,
        truncate_for_log(&body, 500)
    )
}

#[async_trait]
impl SandboxExecutor for E2bSandbox {
    #[instrument(level = "debug", skip(self))]
    async fn create_sandbox(&self) -> Result<SandboxSession> {
        if self.config.api_key.is_empty() {
            bail!("Sandbox API key is not configured");
        }
        let url = format!("{}/sandboxes", self.config.api_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.config.api_key)
            .json(&json!({
                "templateID": self.config.template,
                "timeout": self.config.timeout_seconds,
            }))
            .send()
            .await
            .context("Failed to create sandbox")?;
        let created: CreateSandboxResponse = ensure_success(response, "creation")
            .await?
            .json()
            .await
            .context("Malformed sandbox creation response")?;

        info!(sandbox_id = %created.sandbox_id, "🧪 沙箱已创建");
        Ok(SandboxSession {
            sandbox_id: created.sandbox_id,
            access_token: created.envd_access_token,
        })
    }

    #[instrument(level = "debug", skip(self, session), fields(sandbox_id = %session.sandbox_id))]
    async fn upload(
        &self,
        session: &SandboxSession,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        let bytes = tokio::fs::read(local_path)
            .await
            .context(format!("Failed to read upload source: {:?}", local_path))?;
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| String::from("data.csv"));
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));

        let url = self.sandbox_url(ENVD_PORT, session, "/files");
        let builder = self
            .client
            .post(&url)
            .query(&[("path", remote_path), ("username", "user")])
            .multipart(form);
        let response = Self::with_access_token(builder, session)
            .send()
            .await
            .context("Failed to upload file to sandbox")?;
        ensure_success(response, "upload").await?;
        debug!(remote_path, "文件已上传");
        Ok(())
    }

    #[instrument(level = "debug", skip(self, session, code), fields(sandbox_id = %session.sandbox_id))]
    async fn run_code(&self, session: &SandboxSession, code: &str) -> Result<Execution> {
        let url = self.sandbox_url(INTERPRETER_PORT, session, "/execute");
        let builder = self.client.post(&url).json(&json!({ "code": code }));
        let response = Self::with_access_token(builder, session)
            .send()
            .await
            .context("Failed to execute code in sandbox")?;
        let body = ensure_success(response, "execution")
            .await?
            .text()
            .await
            .context("Failed to read execution output")?;

        let execution = Execution::from_ndjson(&body)?;
        if let Some(error) = &execution.error {
            return Err(anyhow!("{}: {}", error.name, error.value));
        }
        Ok(execution)
    }

    #[instrument(level = "debug", skip(self, session), fields(sandbox_id = %session.sandbox_id))]
    async fn close(&self, session: &SandboxSession) -> Result<()> {
        let url = format!(
            "{}/sandboxes/{}",
            self.config.api_url.trim_end_matches('/'),
            session.sandbox_id
        );
        let response = self
            .client
            .delete(&url)
            .header("X-API-KEY", &self.config.api_key)
            .send()
            .await
            .context("Failed to kill sandbox")?;
        ensure_success(response, "kill").await?;
        Ok(())
    }
}
