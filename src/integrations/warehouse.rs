//! 数据仓库查询 - Snowflake SQL API v2，结果物化为本地CSV

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::config::WarehouseConfig;

/// 物化到本地CSV的查询结果，释放时删除文件
#[derive(Debug, PartialEq)]
pub struct MaterializedTable {
    pub path: PathBuf,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl MaterializedTable {
    /// 写入`dir`下一个唯一命名的CSV文件
    pub fn write_csv(dir: &Path, columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .context(format!("Failed to create work directory: {:?}", dir))?;
        let path = dir.join(format!("{}.csv", uuid::Uuid::new_v4()));

        let mut writer = csv::Writer::from_path(&path)
            .context(format!("Failed to create CSV file: {:?}", path))?;
        writer.write_record(&columns)?;
        for row in &rows {
            writer.write_record(row)?;
        }
        writer.flush()?;

        Ok(Self {
            path,
            columns,
            rows,
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// 前`n`行的对齐文本表格，用于提示模型数据的形状
    pub fn preview(&self, n: usize) -> String {
        if self.columns.is_empty() {
            return String::from("(empty table)");
        }

        let head: Vec<&Vec<String>> = self.rows.iter().take(n).collect();
        let index_width = head.len().saturating_sub(1).to_string().len();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                head.iter()
                    .filter_map(|row| row.get(i))
                    .map(|cell| cell.chars().count())
                    .chain(std::iter::once(column.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut lines = Vec::with_capacity(head.len() + 1);
        let header = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(column, width)| format!("{:>width$}", column, width = width))
            .collect::<Vec<_>>()
            .join("  ");
        lines.push(format!("{:index_width$}  {}", "", header, index_width = index_width));

        for (index, row) in head.iter().enumerate() {
            let cells = widths
                .iter()
                .enumerate()
                .map(|(i, width)| {
                    let cell = row.get(i).map(String::as_str).unwrap_or("");
                    format!("{:>width$}", cell, width = width)
                })
                .collect::<Vec<_>>()
                .join("  ");
            lines.push(format!("{:>index_width$}  {}", index, cells, index_width = index_width));
        }
        lines.join("\n")
    }

}

impl Drop for MaterializedTable {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?self.path, error = %e, "删除临时CSV失败"),
        }
    }
}

/// 数据仓库查询接口
#[async_trait]
pub trait WarehouseQueryRunner: Send + Sync {
    /// 执行查询并把结果物化为本地表
    async fn run_query(&self, sql: &str) -> Result<MaterializedTable>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<ColumnType>,
    #[serde(default)]
    partition_info: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ColumnType {
    name: String,
}

/// Snowflake SQL API客户端
pub struct SnowflakeRunner {
    client: Client,
    config: WarehouseConfig,
    work_dir: PathBuf,
}

impl SnowflakeRunner {
    pub fn new(config: &WarehouseConfig, work_dir: &Path) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build warehouse HTTP client")?;
        Ok(Self {
            client,
            config: config.clone(),
            work_dir: work_dir.to_path_buf(),
        })
    }

    fn base_url(&self) -> String {
        match &self.config.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.snowflakecomputing.com", self.config.account),
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.config.token)
            .header("X-Snowflake-Authorization-Token-Type", &self.config.token_type)
            .header("Accept", "application/json")
    }

    fn statement_body(&self, sql: &str) -> Value {
        let mut body = json!({
            "statement": sql,
            "timeout": self.config.timeout_seconds,
        });
        let optional = [
            ("warehouse", &self.config.warehouse),
            ("database", &self.config.database),
            ("schema", &self.config.schema),
            ("role", &self.config.role),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                body[key] = json!(value);
            }
        }
        body
    }

    async fn read_response(response: reqwest::Response) -> Result<(StatusCode, StatementResponse)> {
        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read warehouse response")?;
        if !status.is_success() {
            let message = serde_json::from_str::<StatementResponse>(&text)
                .ok()
                .and_then(|r| r.message)
                .unwrap_or(text);
            bail!("Warehouse query failed with status {}: {}", status, message);
        }
        let parsed = serde_json::from_str(&text).context("Malformed warehouse response")?;
        Ok((status, parsed))
    }

    /// 202表示语句仍在执行，轮询直到完成或超时
    async fn wait_for_completion(&self, handle: &str) -> Result<StatementResponse> {
        let url = format!("{}/api/v2/statements/{}", self.base_url(), handle);
        let deadline = Instant::now() + Duration::from_secs(self.config.timeout_seconds);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if Instant::now() >= deadline {
                bail!(
                    "Warehouse statement {} did not finish within {}s",
                    handle,
                    self.config.timeout_seconds
                );
            }
            tokio::time::sleep(poll_interval).await;

            let response = self
                .request(reqwest::Method::GET, &url)
                .send()
                .await
                .context("Failed to poll warehouse statement")?;
            let (status, body) = Self::read_response(response).await?;
            if status != StatusCode::ACCEPTED {
                return Ok(body);
            }
            debug!(handle, "语句仍在执行");
        }
    }

    async fn fetch_partition(&self, handle: &str, partition: usize) -> Result<Vec<Vec<Value>>> {
        let url = format!("{}/api/v2/statements/{}", self.base_url(), handle);
        let response = self
            .request(reqwest::Method::GET, &url)
            .query(&[("partition", partition.to_string())])
            .send()
            .await
            .context(format!("Failed to fetch result partition {}", partition))?;
        let (_, body) = Self::read_response(response).await?;
        Ok(body.data)
    }
}

#[async_trait]
impl WarehouseQueryRunner for SnowflakeRunner {
    #[instrument(level = "info", skip(self, sql))]
    async fn run_query(&self, sql: &str) -> Result<MaterializedTable> {
        if self.config.account.is_empty() || self.config.token.is_empty() {
            bail!("Warehouse credentials are not configured");
        }

        let url = format!("{}/api/v2/statements", self.base_url());
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&self.statement_body(sql))
            .send()
            .await
            .context("Failed to submit warehouse statement")?;
        let (status, mut body) = Self::read_response(response).await?;

        if status == StatusCode::ACCEPTED {
            let handle = body
                .statement_handle
                .clone()
                .ok_or_else(|| anyhow!("Warehouse accepted the statement without a handle"))?;
            body = self.wait_for_completion(&handle).await?;
        }

        let meta = body
            .result_set_meta_data
            .ok_or_else(|| anyhow!("Warehouse response has no result metadata"))?;
        let columns: Vec<String> = meta.row_type.into_iter().map(|c| c.name).collect();

        let mut data = body.data;
        if meta.partition_info.len() > 1 {
            let handle = body
                .statement_handle
                .ok_or_else(|| anyhow!("Partitioned result without statement handle"))?;
            for partition in 1..meta.partition_info.len() {
                data.extend(self.fetch_partition(&handle, partition).await?);
            }
        }

        let rows = data
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect();
        let table = MaterializedTable::write_csv(&self.work_dir, columns, rows)?;
        info!(rows = table.row_count(), path = ?table.path, "📦 查询结果已物化");
        Ok(table)
    }
}

/// Snowflake以字符串返回所有值，NULL为JSON null
fn cell_to_string(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}
