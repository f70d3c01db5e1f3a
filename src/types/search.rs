use serde::Serialize;
use serde_json::{Map, Value};

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const NO_CONTENT: &str = "No content available";

/// 单条网页搜索结果
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SourceDocument {
    /// 在原始results数组中的位置（从1开始）
    #[serde(skip)]
    pub position: usize,
    pub title: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
}

const TITLE_KEYS: &[&str] = &["WEBPAGE_TITLE", "title"];
const CONTENT_KEYS: &[&str] = &["WEBPAGE_CONTENT", "content"];
const URL_KEYS: &[&str] = &["WEBPAGE_URL", "URL", "url"];

/// 取第一个非null的字段；非字符串值按其JSON文本呈现
fn field_text(entry: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| entry.get(*key))
        .find(|value| !value.is_null())
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
}

impl SourceDocument {
    pub fn from_entry(position: usize, entry: &Map<String, Value>) -> Self {
        Self {
            position,
            title: field_text(entry, TITLE_KEYS),
            content: field_text(entry, CONTENT_KEYS),
            url: field_text(entry, URL_KEYS),
        }
    }

    fn is_blank(&self) -> bool {
        let empty = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        empty(&self.title) && empty(&self.content)
    }

    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => UNKNOWN_TITLE,
        }
    }

    pub fn display_content(&self) -> &str {
        match self.content.as_deref() {
            Some(content) if !content.trim().is_empty() => content,
            _ => NO_CONTENT,
        }
    }
}

/// 搜索结果集合的只读视图
///
/// 输入保持原始JSON形态，逐条解析；空值、非对象以及缺少标题和正文的条目被跳过。
pub struct SearchResults;

impl SearchResults {
    /// 输入中是否包含`results`数组
    pub fn has_results_array(input: &Value) -> bool {
        input.get("results").is_some_and(Value::is_array)
    }

    /// 解析出所有可用的文档，保留原始位置编号
    pub fn documents(input: &Value) -> Vec<SourceDocument> {
        let Some(entries) = input.get("results").and_then(Value::as_array) else {
            return Vec::new();
        };

        entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let document = SourceDocument::from_entry(index + 1, entry.as_object()?);
                (!document.is_blank()).then_some(document)
            })
            .collect()
    }

    /// 合并为一段带来源标注的文本
    pub fn consolidate(documents: &[SourceDocument]) -> String {
        let mut text = String::new();
        for document in documents {
            text.push_str(&format!(
                "Source {} - {}:\n{}\n\n",
                document.position,
                document.display_title(),
                document.display_content()
            ));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_documents_skip_malformed_entries() {
        let input = json!({
            "results": [
                {"WEBPAGE_TITLE": "S&P 500 rallies", "WEBPAGE_CONTENT": "Stocks rose 1.2%."},
                null,
                {},
                "not an object",
                {"WEBPAGE_TITLE": "", "WEBPAGE_CONTENT": "   "},
                {"title": "Fed holds rates", "content": "Rates unchanged.", "url": "https://example.com/fed"}
            ]
        });

        let documents = SearchResults::documents(&input);
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].position, 1);
        assert_eq!(documents[1].position, 6);
        assert_eq!(documents[1].url.as_deref(), Some("https://example.com/fed"));
    }

    #[test]
    fn test_documents_with_partial_fields_use_placeholders() {
        let input = json!({"results": [{"WEBPAGE_CONTENT": "Only content here"}]});
        let documents = SearchResults::documents(&input);
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].display_title(), UNKNOWN_TITLE);

        let text = SearchResults::consolidate(&documents);
        assert_eq!(text, "Source 1 - Unknown Title:\nOnly content here\n\n");
    }

    #[test]
    fn test_missing_results_array() {
        assert!(!SearchResults::has_results_array(&json!({"items": []})));
        assert!(!SearchResults::has_results_array(&json!({"results": {}})));
        assert!(SearchResults::has_results_array(&json!({"results": []})));
        assert!(SearchResults::documents(&json!({"items": []})).is_empty());
    }

    #[test]
    fn test_documents_accept_both_key_styles_in_one_entry() {
        let input = json!({"results": [{
            "title": "Lowercase title",
            "WEBPAGE_TITLE": "Fed holds rates",
            "content": "Rates unchanged.",
            "URL": "https://example.com/fed"
        }]});

        let documents = SearchResults::documents(&input);
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].display_title(), "Fed holds rates");
        assert_eq!(documents[0].display_content(), "Rates unchanged.");
        assert_eq!(documents[0].url.as_deref(), Some("https://example.com/fed"));
    }

    #[test]
    fn test_documents_render_non_string_fields() {
        let input = json!({"results": [
            {"WEBPAGE_TITLE": 42},
            {"WEBPAGE_TITLE": null, "title": "Fallback title", "WEBPAGE_CONTENT": true}
        ]});

        let documents = SearchResults::documents(&input);
        assert_eq!(documents.len(), 2);
        assert_eq!(
            SearchResults::consolidate(&documents),
            "Source 1 - 42:\nNo content available\n\nSource 2 - Fallback title:\ntrue\n\n"
        );
    }
}
