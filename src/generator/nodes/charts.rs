use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::generator::context::GeneratorContext;
use crate::generator::graph::PipelineNode;
use crate::generator::nodes::{NodeNames, parse_structured_payload};
use crate::generator::state::{PipelineState, StateUpdate};
use crate::integrations::{
    MaterializedTable, ObjectStoreGateway, SandboxExecutor, SandboxSession, WarehouseQueryRunner,
};
use crate::llm::client::CompletionGateway;
use crate::types::chart::{ChartResult, ChartSpec};

/// 提示模型时附带的数据行数
const PREVIEW_ROWS: usize = 5;
/// 图表在对象存储中的目录
const CHART_CATEGORY: &str = "charts";

/// 图表生成节点：查询 -> 生成绘图代码 -> 沙箱执行 -> 上传
///
/// 单个图表失败只会让该图表缺席，不影响其它图表和整个流水线。
pub struct ChartGenerationNode {
    llm: Arc<dyn CompletionGateway>,
    warehouse: Arc<dyn WarehouseQueryRunner>,
    sandbox: Arc<dyn SandboxExecutor>,
    store: Arc<dyn ObjectStoreGateway>,
    model: String,
    code_prompt: String,
    remote_data_path: String,
    max_parallels: usize,
    specs: Vec<ChartSpec>,
}

impl ChartGenerationNode {
    pub fn new(context: &GeneratorContext, specs: Vec<ChartSpec>) -> Self {
        let config = &context.config;
        Self {
            llm: Arc::clone(&context.llm),
            warehouse: Arc::clone(&context.warehouse),
            sandbox: Arc::clone(&context.sandbox),
            store: Arc::clone(&context.store),
            model: config.llm.model_efficient.clone(),
            code_prompt: config.prompts.chart_code_system.clone(),
            remote_data_path: config.sandbox.remote_data_path.clone(),
            max_parallels: config.llm.max_parallels.max(1),
            specs,
        }
    }

    /// 生成全部图表，结果保持目录顺序
    pub async fn generate_all(&self) -> Vec<ChartResult> {
        if self.specs.is_empty() {
            return Vec::new();
        }
        if !self.store.can_resolve_urls() {
            warn!("⚠️ 对象存储无法生成公开地址，跳过图表生成");
            return Vec::new();
        }

        let charts: Vec<ChartResult> = futures::stream::iter(self.specs.iter().cloned())
            .map(|spec| async move { self.generate_one(&spec).await })
            .buffered(self.max_parallels)
            .filter_map(futures::future::ready)
            .collect()
            .await;

        info!(
            generated = charts.len(),
            requested = self.specs.len(),
            "📊 图表生成完成"
        );
        charts
    }

    async fn generate_one(&self, spec: &ChartSpec) -> Option<ChartResult> {
        match self.try_generate(spec).await {
            Ok(chart) => Some(chart),
            Err(e) => {
                warn!(title = %spec.title, error = %format!("{:#}", e), "⚠️ 图表生成失败，已跳过");
                None
            }
        }
    }

    async fn try_generate(&self, spec: &ChartSpec) -> Result<ChartResult> {
        let table = self
            .warehouse
            .run_query(spec.statement())
            .await
            .context("warehouse query failed")?;
        self.render(spec, &table).await
    }

    async fn render(&self, spec: &ChartSpec, table: &MaterializedTable) -> Result<ChartResult> {
        let user_prompt = format!("Title: {}\n\n{}", spec.title, table.preview(PREVIEW_ROWS));
        let response = self
            .llm
            .complete(&self.model, &self.code_prompt, &user_prompt, true)
            .await
            .context("chart code generation failed")?;
        let code = parse_structured_payload(&response.text)
            .and_then(|payload| {
                payload
                    .get("code_to_run")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .ok_or_else(|| anyhow!("model response has no code_to_run"))?;

        let image = self.execute(table, &code).await?;
        let chart_url = self
            .store
            .upload_binary(CHART_CATEGORY, image)
            .await
            .ok_or_else(|| anyhow!("chart upload failed"))?;

        Ok(ChartResult {
            title: spec.title.clone(),
            description: spec.description.clone(),
            chart_url,
        })
    }

    /// 沙箱总会被关闭，无论执行成功、失败还是被取消
    async fn execute(&self, table: &MaterializedTable, code: &str) -> Result<Vec<u8>> {
        let session = self.sandbox.create_sandbox().await?;
        let guard = SandboxGuard::new(Arc::clone(&self.sandbox), session);

        let outcome = async {
            self.sandbox
                .upload(&guard.session, &table.path, &self.remote_data_path)
                .await?;
            let execution = self.sandbox.run_code(&guard.session, code).await?;
            execution
                .first_image()
                .ok_or_else(|| anyhow!("execution produced no image"))
        }
        .await;

        guard.close().await;
        outcome
    }
}

/// 沙箱会话守卫：未关闭就被释放时（例如任务被取消）在后台关闭沙箱
struct SandboxGuard {
    sandbox: Arc<dyn SandboxExecutor>,
    session: SandboxSession,
    closed: bool,
}

impl SandboxGuard {
    fn new(sandbox: Arc<dyn SandboxExecutor>, session: SandboxSession) -> Self {
        Self {
            sandbox,
            session,
            closed: false,
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.sandbox.close(&self.session).await {
            warn!(sandbox_id = %self.session.sandbox_id, error = %e, "关闭沙箱失败");
        }
        self.closed = true;
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let sandbox = Arc::clone(&self.sandbox);
        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sandbox.close(&session).await {
                        warn!(sandbox_id = %session.sandbox_id, error = %e, "关闭沙箱失败");
                    }
                });
            }
            Err(_) => {
                warn!(sandbox_id = %self.session.sandbox_id, "运行时已关闭，沙箱未能关闭");
            }
        }
    }
}

#[async_trait]
impl PipelineNode for ChartGenerationNode {
    fn name(&self) -> &'static str {
        NodeNames::GENERATE_CHARTS
    }

    #[instrument(name = "generate_charts", skip_all)]
    async fn run(&self, _state: &PipelineState) -> StateUpdate {
        StateUpdate::charts(self.generate_all().await)
    }
}
