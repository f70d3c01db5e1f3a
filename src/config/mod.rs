use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::generator::prompts::PromptTemplates;

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "market-report.toml";

/// 默认LLM API基地址
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

/// LLM Provider类型
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub enum LLMProvider {
    #[serde(rename = "openai")]
    #[default]
    OpenAI,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "ollama")]
    Ollama,
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::Anthropic => write!(f, "anthropic"),
            LLMProvider::Gemini => write!(f, "gemini"),
            LLMProvider::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for LLMProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "anthropic" => Ok(LLMProvider::Anthropic),
            "gemini" => Ok(LLMProvider::Gemini),
            "ollama" => Ok(LLMProvider::Ollama),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// 对象存储后端
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub enum StorageBackend {
    #[serde(rename = "s3")]
    #[default]
    S3,
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "memory")]
    Memory,
}

/// 应用程序配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    /// 搜索结果JSON文件
    pub input_path: PathBuf,

    /// 报告输出路径，未指定时输出到stdout
    pub output_path: Option<PathBuf>,

    /// 图表目录文件，未指定时使用内置目录
    pub charts_path: Option<PathBuf>,

    /// 本地工作目录，存放仓库查询的物化结果
    pub work_dir: PathBuf,

    /// 报告章节
    pub sections: Vec<String>,

    /// 跳过图表分支
    pub skip_charts: bool,

    /// 是否启用详细日志
    pub verbose: bool,

    /// LLM模型配置
    pub llm: LLMConfig,

    /// 数据仓库配置
    pub warehouse: WarehouseConfig,

    /// 代码沙箱配置
    pub sandbox: SandboxConfig,

    /// 对象存储配置
    pub storage: StorageConfig,

    /// HTTP服务配置
    pub server: ServerConfig,

    /// Prompt模板
    pub prompts: PromptTemplates,
}

/// LLM模型配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LLMConfig {
    /// LLM Provider类型
    pub provider: LLMProvider,

    /// LLM API KEY
    pub api_key: String,

    /// LLM API基地址
    pub api_base_url: String,

    /// 高能效模型，用于数据抽取和图表代码生成
    pub model_efficient: String,

    /// 高质量模型，用于最终报告生成
    pub model_powerful: String,

    /// 最大tokens
    pub max_tokens: u32,

    /// 温度
    pub temperature: f64,

    /// 重试次数
    pub retry_attempts: u32,

    /// 重试间隔（毫秒）
    pub retry_delay_ms: u64,

    /// 超时时间（秒）
    pub timeout_seconds: u64,

    /// 图表并行生成数量
    pub max_parallels: usize,
}

/// 数据仓库（Snowflake SQL API）配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WarehouseConfig {
    pub account: String,
    pub user: String,
    /// OAuth或者KEYPAIR_JWT令牌
    pub token: String,
    pub token_type: String,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub role: Option<String>,
    /// 覆盖默认的 https://{account}.snowflakecomputing.com
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
    pub poll_interval_ms: u64,
}

/// 代码沙箱（E2B）配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub api_key: String,
    pub api_url: String,
    /// 沙箱访问域名，实际地址为 https://{port}-{sandbox_id}.{domain}
    pub domain: String,
    pub template: String,
    /// 上传数据文件在沙箱中的路径
    pub remote_data_path: String,
    pub timeout_seconds: u64,
}

/// 对象存储配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: Option<String>,
    pub region: Option<String>,
    /// S3兼容服务的endpoint
    pub endpoint: Option<String>,
    /// local后端的根目录
    pub local_root: PathBuf,
    /// 公开访问前缀，设置后优先于S3虚拟主机地址
    pub public_base_url: Option<String>,
    /// static模式读取的报告
    pub static_report_key: String,
}

/// HTTP服务配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let mut file =
            File::open(path).context(format!("Failed to open config file: {:?}", path))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// 尝试加载工作目录下的默认配置文件，不存在时使用默认值
    pub fn discover() -> Result<Self> {
        let default_config_path = std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(DEFAULT_CONFIG_FILE);

        if default_config_path.exists() {
            Self::from_file(&default_config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// 监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn env_or_default(key: &str) -> String {
    std::env::var(key).unwrap_or_default()
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("links.json"),
            output_path: None,
            charts_path: None,
            work_dir: PathBuf::from("local"),
            sections: [
                "EXECUTIVE SUMMARY",
                "MARKET OVERVIEW",
                "ECONOMIC CONTEXT",
                "GEOPOLITICAL FACTORS",
                "SECTOR PERFORMANCE",
                "TOP PERFORMERS & LAGGARDS",
                "TECHNICAL ANALYSIS",
                "MARKET THEMES & CATALYSTS",
                "CORPORATE DEVELOPMENTS",
                "MARKET OUTLOOK",
                "EXPERT PERSPECTIVES",
                "APPENDIX: DATA TABLES & CHARTS",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            skip_charts: false,
            verbose: false,
            llm: LLMConfig::default(),
            warehouse: WarehouseConfig::default(),
            sandbox: SandboxConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            prompts: PromptTemplates::default(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::default(),
            api_key: env_or_default("MARKET_REPORT_LLM_API_KEY"),
            api_base_url: String::from(DEFAULT_API_BASE_URL),
            model_efficient: String::from("gpt-4o-mini"),
            model_powerful: String::from("gpt-4o"),
            max_tokens: 16384,
            temperature: 0.7,
            retry_attempts: 3,
            retry_delay_ms: 2000,
            timeout_seconds: 300,
            max_parallels: 3,
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            account: env_or_default("SF_ACCOUNT"),
            user: env_or_default("SF_USER"),
            token: env_or_default("SF_TOKEN"),
            token_type: env_optional("SF_TOKEN_TYPE").unwrap_or_else(|| "OAUTH".to_string()),
            warehouse: env_optional("SF_WAREHOUSE"),
            database: env_optional("SF_DATABASE"),
            schema: env_optional("SF_SCHEMA"),
            role: env_optional("SF_ROLE"),
            base_url: None,
            timeout_seconds: 120,
            poll_interval_ms: 1000,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            api_key: env_or_default("E2B_API_KEY"),
            api_url: String::from("https://api.e2b.dev"),
            domain: String::from("e2b.app"),
            template: String::from("code-interpreter-v1"),
            remote_data_path: String::from("/home/user/sandbox/data.csv"),
            timeout_seconds: 300,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: env_optional("BUCKET_NAME"),
            region: env_optional("AWS_REGION"),
            endpoint: None,
            local_root: PathBuf::from("local/storage"),
            public_base_url: None,
            static_report_key: String::from("reports/market_report.md"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 8000,
        }
    }
}

// Include tests
#[cfg(test)]
mod tests;
