use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use futures::StreamExt;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::generator::context::GeneratorContext;
use crate::generator::graph::{Graph, GraphError, PipelineNode};
use crate::generator::nodes::{AggregationNode, ChartGenerationNode, ExtractionNode};
use crate::generator::report::{ReportFragment, ReportGenerator};
use crate::generator::state::PipelineState;
use crate::types::chart::{ChartCatalog, ChartSpec};

/// 流水线状态快照文件名
pub const STATE_SNAPSHOT_FILE: &str = "llm_ready_data.json";

/// 市场报告编排图
///
/// `extract_data`和`generate_charts`并行执行，全部完成后进入`aggregate`。
pub struct ReportWorkflow {
    graph: Graph,
}

impl ReportWorkflow {
    /// 按配置构建；`skip_charts`时不包含图表分支
    pub fn new(context: &GeneratorContext, charts: Vec<ChartSpec>) -> Result<Self, GraphError> {
        let extraction: Arc<dyn PipelineNode> = Arc::new(ExtractionNode::new(context));
        let aggregation: Arc<dyn PipelineNode> = Arc::new(AggregationNode::new(context));
        let chart_node: Option<Arc<dyn PipelineNode>> = if context.config.skip_charts {
            None
        } else {
            Some(Arc::new(ChartGenerationNode::new(context, charts)))
        };
        Self::from_nodes(extraction, chart_node, aggregation)
    }

    /// 使用给定节点构建固定拓扑
    pub fn from_nodes(
        extraction: Arc<dyn PipelineNode>,
        charts: Option<Arc<dyn PipelineNode>>,
        aggregation: Arc<dyn PipelineNode>,
    ) -> Result<Self, GraphError> {
        let extraction_name = extraction.name();
        let aggregation_name = aggregation.name();

        let mut builder = Graph::builder()
            .node(extraction)
            .node(aggregation)
            .edge(extraction_name, aggregation_name);
        if let Some(charts) = charts {
            let charts_name = charts.name();
            builder = builder.node(charts).edge(charts_name, aggregation_name);
        }

        Ok(Self {
            graph: builder.build()?,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// 执行编排图；调用方先检查`error`，再读取`report_context`
    pub async fn run(&self, input_data: Value) -> PipelineState {
        self.graph.run(PipelineState::new(input_data)).await
    }
}

/// 编排图与报告生成器的组合，供CLI和HTTP服务共用
pub struct ReportPipeline {
    context: GeneratorContext,
    workflow: ReportWorkflow,
    generator: ReportGenerator,
}

impl ReportPipeline {
    pub fn new(context: GeneratorContext) -> Result<Self> {
        let charts = ChartCatalog::load(context.config.charts_path.as_deref())?;
        info!(charts = charts.len(), "📋 图表目录已加载");
        let workflow = ReportWorkflow::new(&context, charts)?;
        let generator = ReportGenerator::new(&context);
        Ok(Self {
            context,
            workflow,
            generator,
        })
    }

    pub fn context(&self) -> &GeneratorContext {
        &self.context
    }

    pub fn generator(&self) -> &ReportGenerator {
        &self.generator
    }

    /// 读取配置中的搜索结果文件
    pub fn load_input(&self) -> Result<Value> {
        load_input(&self.context.config.input_path)
    }

    /// 执行编排图并保存状态快照
    pub async fn prepare(&self, input_data: Value) -> PipelineState {
        let started = Instant::now();
        let state = self.workflow.run(input_data).await;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            failed = state.is_failed(),
            "编排图执行结束"
        );
        save_snapshot(&self.context.config.work_dir, &state);
        state
    }

    /// 执行编排图并一次性生成报告
    pub async fn generate_report(&self, input_data: Value) -> Result<PipelineState> {
        let mut state = self.prepare(input_data).await;
        let report_context = report_context_of(&state)?;
        let report = self.generator.generate(&report_context).await?;
        state.report_content = Some(report);
        Ok(state)
    }
}

/// 失败的状态转换为错误，否则返回报告上下文
pub fn report_context_of(state: &PipelineState) -> Result<String> {
    if let Some(error) = state.error.as_deref().filter(|e| !e.trim().is_empty()) {
        bail!("{}", error);
    }
    state
        .report_context
        .clone()
        .ok_or_else(|| anyhow!("Pipeline finished without a report context"))
}

pub fn load_input(path: &Path) -> Result<Value> {
    let content =
        std::fs::read_to_string(path).context(format!("Failed to read input file: {:?}", path))?;
    serde_json::from_str(&content).context(format!("Failed to parse input file: {:?}", path))
}

fn save_snapshot(work_dir: &Path, state: &PipelineState) {
    let path = work_dir.join(STATE_SNAPSHOT_FILE);
    let result = std::fs::create_dir_all(work_dir)
        .map_err(anyhow::Error::from)
        .and_then(|_| Ok(serde_json::to_string_pretty(state)?))
        .and_then(|json| Ok(std::fs::write(&path, json)?));
    if let Err(e) = result {
        warn!(path = ?path, error = %e, "保存状态快照失败");
    }
}

/// 生成报告的CLI入口
pub async fn launch(config: &Config, stream: bool, publish: bool) -> Result<()> {
    let context = GeneratorContext::new(config.clone()).await?;
    let pipeline = ReportPipeline::new(context)?;

    let input_data = pipeline.load_input()?;
    let mut state = pipeline.prepare(input_data).await;
    let report_context = report_context_of(&state).context("Report pipeline failed")?;

    let report = if stream {
        stream_to_stdout(pipeline.generator(), report_context).await?
    } else {
        let report = pipeline.generator().generate(&report_context).await?;
        if config.output_path.is_none() {
            println!("{}", report);
        }
        report
    };
    state.report_content = Some(report);
    let report = state.report_content.as_deref().unwrap_or_default();

    if let Some(output_path) = &config.output_path {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output_path, report)
            .context(format!("Failed to write report: {:?}", output_path))?;
        info!(path = ?output_path, "💾 报告已保存");
    }

    if publish {
        let key = &config.storage.static_report_key;
        pipeline.context().store.write_text(key, report).await?;
        info!(key = %key, "☁️ 报告已发布");
    }

    Ok(())
}

/// 边生成边输出，返回完整正文
async fn stream_to_stdout(generator: &ReportGenerator, report_context: String) -> Result<String> {
    let mut fragments = generator.stream(report_context);
    let mut report = String::new();
    let mut stdout = std::io::stdout();

    while let Some(fragment) = fragments.next().await {
        match fragment {
            ReportFragment::Fragment(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
                report.push_str(&text);
            }
            ReportFragment::StreamError(message) => {
                writeln!(stdout)?;
                error!(error = %message, "❌ 报告流式生成失败");
                bail!("Error generating report: {}", message);
            }
        }
    }
    writeln!(stdout)?;
    Ok(report)
}
