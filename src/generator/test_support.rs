//! 单元测试使用的协作方替身

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::StreamExt;

use crate::config::Config;
use crate::generator::context::GeneratorContext;
use crate::integrations::{
    ArtifactStore, Execution, ExecutionOutput, MaterializedTable, SandboxExecutor,
    SandboxSession, WarehouseQueryRunner,
};
use crate::llm::client::{CompletionGateway, CompletionResponse, TextStream, TokenUsage};

type ReplyFn = dyn Fn(&str, &str) -> Result<String> + Send + Sync;

/// 按回调应答的模型
pub struct FakeLlm {
    reply: Box<ReplyFn>,
    fragments: Vec<String>,
    stream_error: Option<String>,
    calls: AtomicUsize,
    models: Mutex<Vec<(String, bool)>>,
}

impl FakeLlm {
    pub fn replying(reply: impl Fn(&str, &str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            fragments: Vec::new(),
            stream_error: None,
            calls: AtomicUsize::new(0),
            models: Mutex::new(Vec::new()),
        }
    }

    pub fn text(text: &str) -> Self {
        let text = text.to_string();
        Self::replying(move |_, _| Ok(text.clone()))
    }

    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::replying(move |_, _| Err(anyhow!(message.clone())))
    }

    pub fn with_stream(mut self, fragments: &[&str], error: Option<&str>) -> Self {
        self.fragments = fragments.iter().map(|f| f.to_string()).collect();
        self.stream_error = error.map(str::to_string);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用使用的模型以及是否要求结构化输出
    pub fn models(&self) -> Vec<(String, bool)> {
        self.models.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionGateway for FakeLlm {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        structured: bool,
    ) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.models
            .lock()
            .unwrap()
            .push((model.to_string(), structured));
        let text = (self.reply)(system_prompt, user_prompt)?;
        Ok(CompletionResponse::new(text, TokenUsage::default(), model))
    }

    async fn complete_stream(
        &self,
        _model: &str,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<TextStream> {
        let mut items: Vec<Result<String>> = self.fragments.iter().cloned().map(Ok).collect();
        if let Some(error) = &self.stream_error {
            items.push(Err(anyhow!(error.clone())));
        }
        Ok(futures::stream::iter(items).boxed())
    }
}

/// 写入固定数据的仓库；SQL中包含`FAIL`时报错
pub struct FakeWarehouse {
    dir: PathBuf,
    queries: Mutex<Vec<String>>,
}

impl FakeWarehouse {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WarehouseQueryRunner for FakeWarehouse {
    async fn run_query(&self, sql: &str) -> Result<MaterializedTable> {
        self.queries.lock().unwrap().push(sql.to_string());
        if sql.contains("FAIL") {
            bail!("SQL compilation error: object 'FAIL' does not exist");
        }
        MaterializedTable::write_csv(
            &self.dir,
            vec!["DATA_DATE".to_string(), "VALUE".to_string()],
            vec![
                vec!["2024-01-02".to_string(), "4742.83".to_string()],
                vec!["2024-01-03".to_string(), "4704.81".to_string()],
            ],
        )
    }
}

/// 总是返回一张PNG的沙箱
#[derive(Default)]
pub struct FakeSandbox {
    pub fail_execution: bool,
    execution_delay: Duration,
    created: AtomicUsize,
    closed: AtomicUsize,
}

impl FakeSandbox {
    pub fn failing() -> Self {
        Self {
            fail_execution: true,
            ..Default::default()
        }
    }

    /// 执行代码前等待指定时长
    pub fn slow(delay: Duration) -> Self {
        Self {
            execution_delay: delay,
            ..Default::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxExecutor for FakeSandbox {
    async fn create_sandbox(&self) -> Result<SandboxSession> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(SandboxSession {
            sandbox_id: format!("sbx-{}", n),
            access_token: None,
        })
    }

    async fn upload(&self, _: &SandboxSession, local_path: &Path, _: &str) -> Result<()> {
        if !local_path.exists() {
            bail!("upload source missing");
        }
        Ok(())
    }

    async fn run_code(&self, _: &SandboxSession, _: &str) -> Result<Execution> {
        if !self.execution_delay.is_zero() {
            tokio::time::sleep(self.execution_delay).await;
        }
        if self.fail_execution {
            bail!("NameError: name 'fig' is not defined");
        }
        Ok(Execution {
            outputs: vec![ExecutionOutput {
                text: Some(format!("'{}'", STANDARD.encode(b"png-bytes"))),
                png: None,
                is_main_result: true,
            }],
            ..Default::default()
        })
    }

    async fn close(&self, _: &SandboxSession) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 组装注入替身的上下文
pub fn context_with(
    config: Config,
    llm: Arc<FakeLlm>,
    warehouse: Arc<FakeWarehouse>,
    sandbox: Arc<FakeSandbox>,
    store: Arc<ArtifactStore>,
) -> GeneratorContext {
    GeneratorContext::with_gateways(config, llm, warehouse, sandbox, store)
}

/// 能生成公开地址的内存存储
pub fn public_store() -> Arc<ArtifactStore> {
    Arc::new(ArtifactStore::in_memory(Some(
        "https://bucket.s3.us-east-1.amazonaws.com".to_string(),
    )))
}
