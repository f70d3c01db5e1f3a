//! 外部协作方：数据仓库、代码沙箱、对象存储

pub mod sandbox;
pub mod storage;
pub mod warehouse;

pub use sandbox::{E2bSandbox, Execution, ExecutionOutput, SandboxExecutor, SandboxSession};
pub use storage::{ArtifactStore, ObjectStoreGateway};
pub use warehouse::{MaterializedTable, SnowflakeRunner, WarehouseQueryRunner};
