use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::integrations::{
    ArtifactStore, E2bSandbox, ObjectStoreGateway, SandboxExecutor, SnowflakeRunner,
    WarehouseQueryRunner,
};
use crate::llm::client::{CompletionGateway, LLMClient};

/// 生成器上下文：配置与所有外部协作方
#[derive(Clone)]
pub struct GeneratorContext {
    /// 配置
    pub config: Config,
    /// 语言模型
    pub llm: Arc<dyn CompletionGateway>,
    /// 数据仓库
    pub warehouse: Arc<dyn WarehouseQueryRunner>,
    /// 代码沙箱
    pub sandbox: Arc<dyn SandboxExecutor>,
    /// 对象存储
    pub store: Arc<dyn ObjectStoreGateway>,
}

impl GeneratorContext {
    /// 按配置创建生产环境的客户端
    pub async fn new(config: Config) -> Result<Self> {
        let llm = Arc::new(LLMClient::new(&config.llm)?);
        let warehouse = Arc::new(SnowflakeRunner::new(&config.warehouse, &config.work_dir)?);
        let sandbox = Arc::new(E2bSandbox::new(&config.sandbox)?);
        let store = Arc::new(ArtifactStore::new(&config.storage).await?);

        Ok(Self {
            config,
            llm,
            warehouse,
            sandbox,
            store,
        })
    }

    /// 使用外部注入的协作方
    pub fn with_gateways(
        config: Config,
        llm: Arc<dyn CompletionGateway>,
        warehouse: Arc<dyn WarehouseQueryRunner>,
        sandbox: Arc<dyn SandboxExecutor>,
        store: Arc<dyn ObjectStoreGateway>,
    ) -> Self {
        Self {
            config,
            llm,
            warehouse,
            sandbox,
            store,
        }
    }
}
