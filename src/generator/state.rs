use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::chart::ChartResult;

/// 贯穿编排图的流水线状态，只由编排器持有和修改
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineState {
    /// 原始搜索结果，启动时设置一次
    pub input_data: Value,
    /// 数据抽取节点的结构化输出
    pub extracted_data: Option<Value>,
    /// 图表节点的输出
    pub chart_data: Option<Vec<ChartResult>>,
    /// 聚合节点组装的报告上下文
    pub report_context: Option<String>,
    /// 最终报告正文
    pub report_content: Option<String>,
    /// 存在即代表流水线失败
    pub error: Option<String>,
}

/// 节点返回的局部状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub extracted_data: Option<Value>,
    pub chart_data: Option<Vec<ChartResult>>,
    pub report_context: Option<String>,
    pub report_content: Option<String>,
    pub error: Option<String>,
}

impl StateUpdate {
    pub fn extracted(data: Value) -> Self {
        Self {
            extracted_data: Some(data),
            ..Default::default()
        }
    }

    pub fn charts(charts: Vec<ChartResult>) -> Self {
        Self {
            chart_data: Some(charts),
            ..Default::default()
        }
    }

    pub fn report_context(context: String) -> Self {
        Self {
            report_context: Some(context),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// 是否携带非空错误
    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.trim().is_empty())
    }
}

impl PipelineState {
    pub fn new(input_data: Value) -> Self {
        Self {
            input_data,
            ..Default::default()
        }
    }

    /// 合并节点返回的局部状态，已有字段只会被新值覆盖，不会被清空
    pub fn merge(&mut self, update: StateUpdate) {
        let failed = update.has_error();
        if update.extracted_data.is_some() {
            self.extracted_data = update.extracted_data;
        }
        if update.chart_data.is_some() {
            self.chart_data = update.chart_data;
        }
        if update.report_context.is_some() {
            self.report_context = update.report_context;
        }
        if update.report_content.is_some() {
            self.report_content = update.report_content;
        }
        if failed {
            self.error = update.error;
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.trim().is_empty())
    }
}
