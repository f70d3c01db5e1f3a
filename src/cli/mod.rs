use crate::config::{Config, LLMProvider};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// market-report-rs - 由Rust与AI驱动的市场研究报告生成引擎
#[derive(Parser, Debug)]
#[command(name = "market-report")]
#[command(
    about = "LLM-driven market research report engine. It extracts market data from web search results, renders warehouse-backed charts in a code sandbox and writes a long-form Markdown report."
)]
#[command(version)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 是否启用详细日志
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 图表目录文件（TOML或JSON）
    #[arg(long, global = true)]
    pub charts: Option<PathBuf>,

    /// 高能效模型，用于数据抽取和图表代码生成
    #[arg(long, global = true)]
    pub model_efficient: Option<String>,

    /// 高质量模型，用于最终报告生成
    #[arg(long, global = true)]
    pub model_powerful: Option<String>,

    /// LLM API基地址
    #[arg(long, global = true)]
    pub llm_api_base_url: Option<String>,

    /// LLM API KEY
    #[arg(long, global = true)]
    pub llm_api_key: Option<String>,

    /// 最大tokens数
    #[arg(long, global = true)]
    pub max_tokens: Option<u32>,

    /// 温度参数
    #[arg(long, global = true)]
    pub temperature: Option<f64>,

    /// 图表并行生成数量
    #[arg(long, global = true)]
    pub max_parallels: Option<usize>,

    /// LLM Provider (openai, anthropic, gemini, ollama)
    #[arg(long, global = true)]
    pub llm_provider: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// 运行流水线并生成报告
    Generate {
        /// 搜索结果JSON文件
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// 报告输出路径，未指定时输出到stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 流式输出报告
        #[arg(long)]
        stream: bool,

        /// 跳过图表生成
        #[arg(long)]
        skip_charts: bool,

        /// 生成后写入对象存储，供static模式读取
        #[arg(long)]
        publish: bool,
    },

    /// 启动HTTP服务
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
}

impl Args {
    /// 将CLI参数转换为配置，命令行参数优先于配置文件
    pub fn to_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            // 显式指定的配置文件必须可读
            Some(config_path) => Config::from_file(config_path)?,
            None => Config::discover()?,
        };

        if let Some(charts) = &self.charts {
            config.charts_path = Some(charts.clone());
        }

        // 覆盖LLM配置
        if let Some(provider_str) = &self.llm_provider {
            if let Ok(provider) = provider_str.parse::<LLMProvider>() {
                config.llm.provider = provider;
            } else {
                eprintln!(
                    "⚠️ 警告: 未知的provider: {}，使用默认provider",
                    provider_str
                );
            }
        }
        if let Some(llm_api_base_url) = &self.llm_api_base_url {
            config.llm.api_base_url = llm_api_base_url.clone();
        }
        if let Some(llm_api_key) = &self.llm_api_key {
            config.llm.api_key = llm_api_key.clone();
        }
        if let Some(model_efficient) = &self.model_efficient {
            config.llm.model_efficient = model_efficient.clone();
        }
        if let Some(model_powerful) = &self.model_powerful {
            config.llm.model_powerful = model_powerful.clone();
        }
        if let Some(max_tokens) = self.max_tokens {
            config.llm.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            config.llm.temperature = temperature;
        }
        if let Some(max_parallels) = self.max_parallels {
            config.llm.max_parallels = max_parallels;
        }

        match &self.command {
            Command::Generate {
                input,
                output,
                skip_charts,
                ..
            } => {
                if let Some(input) = input {
                    config.input_path = input.clone();
                }
                if let Some(output) = output {
                    config.output_path = Some(output.clone());
                }
                config.skip_charts = config.skip_charts || *skip_charts;
            }
            Command::Serve { host, port } => {
                if let Some(host) = host {
                    config.server.host = host.clone();
                }
                if let Some(port) = port {
                    config.server.port = *port;
                }
            }
        }

        config.verbose = config.verbose || self.verbose;

        Ok(config)
    }
}
