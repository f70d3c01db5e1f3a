use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::generator::context::GeneratorContext;
use crate::generator::graph::PipelineNode;
use crate::generator::nodes::NodeNames;
use crate::generator::prompts::PromptTemplates;
use crate::generator::state::{PipelineState, StateUpdate};
use crate::types::chart::ChartResult;

pub const NO_DATA_ERROR: &str = "No extracted data or chart data available for report generation";

/// 聚合节点：把抽取结果和图表填入报告模板
pub struct AggregationNode {
    prompts: PromptTemplates,
    sections: Vec<String>,
}

impl AggregationNode {
    pub fn new(context: &GeneratorContext) -> Self {
        Self {
            prompts: context.config.prompts.clone(),
            sections: context.config.sections.clone(),
        }
    }

    /// 两路输入都缺失时返回`None`
    pub fn prepare_report_context(
        &self,
        extracted: Option<&Value>,
        charts: Option<&[ChartResult]>,
    ) -> Option<String> {
        if extracted.is_none() && charts.is_none() {
            return None;
        }

        let section = |key: &str| {
            let value = extracted
                .and_then(|data| data.get(key))
                .cloned()
                .unwrap_or_else(|| json!({}));
            pretty(&value)
        };
        let chart_json = serde_json::to_value(charts.unwrap_or_default())
            .map(|value| pretty(&value))
            .unwrap_or_else(|_| String::from("[]"));

        Some(self.prompts.render_report(
            &section("extracted_data"),
            &section("market_analysis"),
            &chart_json,
            &self.sections,
        ))
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[async_trait]
impl PipelineNode for AggregationNode {
    fn name(&self) -> &'static str {
        NodeNames::AGGREGATE
    }

    #[instrument(name = "aggregate", skip_all)]
    async fn run(&self, state: &PipelineState) -> StateUpdate {
        match self.prepare_report_context(state.extracted_data.as_ref(), state.chart_data.as_deref())
        {
            Some(context) => {
                info!(chars = context.len(), "🧩 报告上下文已组装");
                StateUpdate::report_context(context)
            }
            None => StateUpdate::error(NO_DATA_ERROR),
        }
    }
}
