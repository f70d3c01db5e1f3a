use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 内置的默认图表目录
const BUILTIN_CATALOG: &str = include_str!("../../config/charts.toml");

/// 一个待生成图表的请求
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChartSpec {
    #[serde(alias = "Title")]
    pub title: String,
    /// 在数据仓库中执行的查询
    #[serde(alias = "SQL")]
    pub sql: String,
    #[serde(alias = "Description", default)]
    pub description: String,
}

impl ChartSpec {
    /// 去掉结尾分号后的查询语句
    pub fn statement(&self) -> &str {
        self.sql.trim().trim_end_matches(';').trim_end()
    }
}

/// 生成成功的图表
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChartResult {
    pub title: String,
    pub description: String,
    pub chart_url: String,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    charts: Vec<ChartSpec>,
}

/// 图表目录加载器
pub struct ChartCatalog;

impl ChartCatalog {
    /// 从文件加载图表目录，未指定时使用内置目录
    ///
    /// `.json`文件既可以是数组，也可以是带`charts`字段的对象；其余按TOML解析。
    pub fn load(path: Option<&Path>) -> Result<Vec<ChartSpec>> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .context(format!("Failed to read chart catalog: {:?}", path))?;
                let is_json = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
                if is_json {
                    Self::parse_json(&content)
                } else {
                    Self::parse_toml(&content)
                }
            }
            None => Self::builtin(),
        }
    }

    pub fn builtin() -> Result<Vec<ChartSpec>> {
        Self::parse_toml(BUILTIN_CATALOG)
    }

    pub fn parse_toml(content: &str) -> Result<Vec<ChartSpec>> {
        let file: CatalogFile =
            toml::from_str(content).context("Failed to parse chart catalog")?;
        Ok(file.charts)
    }

    pub fn parse_json(content: &str) -> Result<Vec<ChartSpec>> {
        if let Ok(specs) = serde_json::from_str::<Vec<ChartSpec>>(content) {
            return Ok(specs);
        }
        let file: CatalogFile =
            serde_json::from_str(content).context("Failed to parse chart catalog")?;
        Ok(file.charts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_catalog_is_not_empty() {
        let specs = ChartCatalog::builtin().unwrap();
        assert!(!specs.is_empty());
        assert!(specs.iter().all(|s| !s.title.is_empty() && !s.sql.is_empty()));
    }

    #[test]
    fn test_parse_json_with_original_keys() {
        let content = r#"[
            {"Title": "Yearly Performance", "SQL": "SELECT * FROM STOCK_DATA;", "Description": "YoY"}
        ]"#;
        let specs = ChartCatalog::parse_json(content).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].title, "Yearly Performance");
        assert_eq!(specs[0].statement(), "SELECT * FROM STOCK_DATA");
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("charts.toml");
        std::fs::write(
            &path,
            r#"
[[charts]]
title = "Volatility"
sql = "SELECT 1"
"#,
        )
        .unwrap();

        let specs = ChartCatalog::load(Some(&path)).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].description, "");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = ChartCatalog::load(Some(Path::new("/nonexistent/charts.toml")));
        assert!(result.is_err());
    }
}
