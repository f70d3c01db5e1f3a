//! 编排图中的业务节点

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

pub mod aggregation;
pub mod charts;
pub mod extraction;

pub use aggregation::AggregationNode;
pub use charts::ChartGenerationNode;
pub use extraction::ExtractionNode;

/// 节点名称
pub struct NodeNames;

impl NodeNames {
    pub const EXTRACT_DATA: &'static str = "extract_data";
    pub const GENERATE_CHARTS: &'static str = "generate_charts";
    pub const AGGREGATE: &'static str = "aggregate";
}

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("fenced json pattern is valid")
});

/// 从模型输出中解析JSON对象
///
/// 依次尝试：```json代码块、第一个完整的顶层花括号对象、第一个`{`到最后一个`}`之间的文本。
/// 只接受JSON对象。
pub fn parse_structured_payload(text: &str) -> Option<Value> {
    let as_object = |candidate: &str| {
        serde_json::from_str::<Value>(candidate)
            .ok()
            .filter(Value::is_object)
    };

    if let Some(captures) = FENCED_JSON.captures(text)
        && let Some(payload) = captures.get(1).and_then(|m| as_object(m.as_str()))
    {
        return Some(payload);
    }

    if let Some(candidate) = first_balanced_object(text)
        && let Some(payload) = as_object(candidate)
    {
        return Some(payload);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    as_object(&text[start..=end])
}

/// 第一个`{`开始、括号配平的片段，忽略字符串中的括号
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
