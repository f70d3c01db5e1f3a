use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::generator::context::GeneratorContext;
use crate::generator::graph::PipelineNode;
use crate::generator::nodes::{NodeNames, parse_structured_payload};
use crate::generator::prompts::PromptTemplates;
use crate::generator::state::{PipelineState, StateUpdate};
use crate::llm::client::CompletionGateway;
use crate::types::search::SearchResults;

pub const INVALID_INPUT_REASON: &str = "Invalid input data format";
pub const UNPARSEABLE_REASON: &str = "Could not extract market movements";

/// 解析失败时使用的默认结果
pub fn fallback_payload(reason: &str) -> Value {
    json!({
        "extracted_data": {
            "date": chrono::Local::now().format("%B %d, %Y").to_string(),
            "market_movements": {"Error": reason},
        },
        "market_analysis": {"sentiment": "unknown"},
    })
}

/// 数据抽取节点：搜索结果 -> 结构化的市场数据与初步分析
pub struct ExtractionNode {
    llm: Arc<dyn CompletionGateway>,
    model: String,
    prompts: PromptTemplates,
}

impl ExtractionNode {
    pub fn new(context: &GeneratorContext) -> Self {
        Self {
            llm: Arc::clone(&context.llm),
            model: context.config.llm.model_efficient.clone(),
            prompts: context.config.prompts.clone(),
        }
    }

    /// 只有模型调用失败时返回错误，解析失败使用默认结果
    pub async fn extract(&self, input: &Value) -> Result<Value> {
        if !SearchResults::has_results_array(input) {
            warn!("⚠️ 输入缺少results数组");
            return Ok(fallback_payload(INVALID_INPUT_REASON));
        }

        let documents = SearchResults::documents(input);
        info!(documents = documents.len(), "📰 整理搜索结果");
        let consolidated = SearchResults::consolidate(&documents);

        let system_prompt = self.prompts.render_extraction(&consolidated);
        let response = self
            .llm
            .complete(
                &self.model,
                &system_prompt,
                &self.prompts.extraction_user,
                true,
            )
            .await?;

        match parse_structured_payload(&response.text) {
            Some(payload) => Ok(payload),
            None => {
                warn!("⚠️ 模型输出无法解析为JSON对象，使用默认结果");
                Ok(fallback_payload(UNPARSEABLE_REASON))
            }
        }
    }
}

#[async_trait]
impl PipelineNode for ExtractionNode {
    fn name(&self) -> &'static str {
        NodeNames::EXTRACT_DATA
    }

    #[instrument(name = "extract_data", skip_all)]
    async fn run(&self, state: &PipelineState) -> StateUpdate {
        match self.extract(&state.input_data).await {
            Ok(payload) => StateUpdate::extracted(payload),
            Err(e) => StateUpdate::error(format!("Error extracting data: {:#}", e)),
        }
    }
}
