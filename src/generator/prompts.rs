//! Prompt模板 - 作为不可变配置传入各个节点

use serde::{Deserialize, Serialize};

/// 占位符
pub struct Placeholders;

impl Placeholders {
    pub const CONSOLIDATED_TEXT: &'static str = "{consolidated_text}";
    pub const EXTRACTED_DATA: &'static str = "{extracted_data}";
    pub const MARKET_ANALYSIS: &'static str = "{market_analysis}";
    pub const CHART_DATA: &'static str = "{chart_data}";
    pub const SECTIONS: &'static str = "{sections}";
}

/// 全部Prompt模板
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PromptTemplates {
    /// 数据抽取与分析的系统提示词，包含`{consolidated_text}`
    pub extraction_system: String,
    pub extraction_user: String,
    /// 图表代码生成的系统提示词
    pub chart_code_system: String,
    /// 报告上下文模板，包含`{extracted_data}` `{market_analysis}` `{chart_data}` `{sections}`
    pub report_system: String,
    pub report_user: String,
}

impl PromptTemplates {
    /// 按顺序替换占位符
    pub fn render(template: &str, values: &[(&str, &str)]) -> String {
        values
            .iter()
            .fold(template.to_string(), |acc, (placeholder, value)| {
                acc.replace(placeholder, value)
            })
    }

    pub fn render_extraction(&self, consolidated_text: &str) -> String {
        Self::render(
            &self.extraction_system,
            &[(Placeholders::CONSOLIDATED_TEXT, consolidated_text)],
        )
    }

    pub fn render_report(
        &self,
        extracted_data: &str,
        market_analysis: &str,
        chart_data: &str,
        sections: &[String],
    ) -> String {
        // 章节列表先替换，避免数据中的花括号文本被当作占位符
        let with_sections = Self::render(
            &self.report_system,
            &[(Placeholders::SECTIONS, &sections.join(", "))],
        );
        let mut rendered = String::with_capacity(
            with_sections.len() + extracted_data.len() + market_analysis.len() + chart_data.len(),
        );
        let mut rest = with_sections.as_str();
        let placeholders = [
            (Placeholders::EXTRACTED_DATA, extracted_data),
            (Placeholders::MARKET_ANALYSIS, market_analysis),
            (Placeholders::CHART_DATA, chart_data),
        ];
        // 单遍扫描替换，已替换的内容不会再次参与匹配
        loop {
            let next = placeholders
                .iter()
                .filter_map(|(placeholder, value)| {
                    rest.find(placeholder).map(|pos| (pos, *placeholder, *value))
                })
                .min_by_key(|(pos, _, _)| *pos);
            match next {
                Some((pos, placeholder, value)) => {
                    rendered.push_str(&rest[..pos]);
                    rendered.push_str(value);
                    rest = &rest[pos + placeholder.len()..];
                }
                None => {
                    rendered.push_str(rest);
                    break;
                }
            }
        }
        rendered
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            extraction_system: String::from(
                r#"You are a senior financial data analyst. Extract key market data from the sources below and perform a preliminary analysis that will feed a comprehensive market report.

PART 1: DATA EXTRACTION
- Index movements (S&P 500, Dow, Nasdaq) with percentages
- Top gaining and losing stocks with percentages
- Key market events and economic data
- Sector performance and technical indicators
- Date of the information (most recent date mentioned)

PART 2: MARKET ANALYSIS
- Overall sentiment (bullish, bearish or neutral) with justification
- Key drivers, sector trends, support/resistance levels
- Short and medium-term outlook

Sources:
{consolidated_text}

Respond with a JSON object with two sections, "extracted_data" and "market_analysis", wrapped in a ```json code block."#,
            ),
            extraction_user: String::from("Extract and analyze for the above context"),
            chart_code_system: String::from(
                r#"You generate Python code that renders one Plotly chart as a PNG.

- Read the data from '/home/user/sandbox/data.csv' with pandas, parsing date columns.
- Use px.line for time series and px.bar for categorical or quarterly data.
- If YEAR and QUARTER columns exist, combine them into a YEAR_QUARTER x-axis.
- Plot multiple numeric columns together when present.
- Use the given title as the chart title.
- The last lines must be exactly:
img_bytes = io.BytesIO()
fig.write_image(img_bytes, format="png")
img_base64 = base64.b64encode(img_bytes.getvalue()).decode("utf-8")
img_base64

The user message holds the chart title and the first rows of the data.
Respond with a JSON object: {"code_to_run": "<python code>"}"#,
            ),
            report_system: String::from(
                r#"You are a senior financial analyst writing a comprehensive research report on the market.

Extracted Data:
{extracted_data}

Market Analysis:
{market_analysis}

Charts (embed each one with Markdown image syntax where relevant):
{chart_data}

Write the following sections: {sections}

Use Markdown with `##` section headers and `###` subsections. Be specific with numbers, levels and context."#,
            ),
            report_user: String::from("Generate the report as per the provided instructions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_extraction_embeds_text() {
        let templates = PromptTemplates::default();
        let rendered = templates.render_extraction("Source 1 - Title:\nBody\n\n");
        assert!(rendered.contains("Source 1 - Title:\nBody"));
        assert!(!rendered.contains(Placeholders::CONSOLIDATED_TEXT));
    }

    #[test]
    fn test_render_report_does_not_rescan_substituted_values() {
        let templates = PromptTemplates {
            report_system: "{extracted_data}|{market_analysis}|{chart_data}|{sections}".to_string(),
            ..Default::default()
        };
        let rendered = templates.render_report(
            "{market_analysis}",
            "analysis",
            "[]",
            &["A".to_string(), "B".to_string()],
        );
        assert_eq!(rendered, "{market_analysis}|analysis|[]|A, B");
    }
}
