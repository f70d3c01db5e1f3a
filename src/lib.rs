pub mod cli;
pub mod config;
pub mod generator;
pub mod integrations;
pub mod llm;
pub mod server;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use generator::context::GeneratorContext;
pub use generator::workflow::{ReportPipeline, ReportWorkflow, launch};
