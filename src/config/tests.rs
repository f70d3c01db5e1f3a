#[cfg(test)]
mod tests {
    use crate::config::{
        Config, DEFAULT_API_BASE_URL, LLMConfig, LLMProvider, ServerConfig, StorageBackend,
    };
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.input_path, PathBuf::from("links.json"));
        assert!(config.output_path.is_none());
        assert!(config.charts_path.is_none());
        assert_eq!(config.work_dir, PathBuf::from("local"));
        assert_eq!(config.sections.len(), 12);
        assert_eq!(config.sections[0], "EXECUTIVE SUMMARY");
        assert!(!config.skip_charts);
        assert!(!config.verbose);
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.static_report_key, "reports/market_report.md");
    }

    #[test]
    fn test_llm_provider_default() {
        let provider = LLMProvider::default();
        assert_eq!(provider, LLMProvider::OpenAI);
    }

    #[test]
    fn test_llm_provider_from_str() {
        assert_eq!("openai".parse::<LLMProvider>().unwrap(), LLMProvider::OpenAI);
        assert_eq!(
            "Anthropic".parse::<LLMProvider>().unwrap(),
            LLMProvider::Anthropic
        );
        assert_eq!("GEMINI".parse::<LLMProvider>().unwrap(), LLMProvider::Gemini);
        assert_eq!("ollama".parse::<LLMProvider>().unwrap(), LLMProvider::Ollama);
        assert!("mistral".parse::<LLMProvider>().is_err());
    }

    #[test]
    fn test_llm_provider_display() {
        assert_eq!(LLMProvider::OpenAI.to_string(), "openai");
        assert_eq!(LLMProvider::Anthropic.to_string(), "anthropic");
        assert_eq!(LLMProvider::Gemini.to_string(), "gemini");
        assert_eq!(LLMProvider::Ollama.to_string(), "ollama");
    }

    #[test]
    fn test_llm_config_default() {
        let llm_config = LLMConfig::default();

        assert_eq!(llm_config.provider, LLMProvider::OpenAI);
        assert_eq!(llm_config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(llm_config.model_efficient, "gpt-4o-mini");
        assert_eq!(llm_config.model_powerful, "gpt-4o");
        assert_eq!(llm_config.retry_attempts, 3);
        assert_eq!(llm_config.max_parallels, 3);
    }

    #[test]
    fn test_server_bind_address() {
        let config = Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            ..Default::default()
        };
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_config_from_file_partial_sections() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("market-report.toml");
        std::fs::write(
            &config_path,
            r#"
input_path = "data/links.json"
sections = ["EXECUTIVE SUMMARY", "MARKET OUTLOOK"]

[llm]
provider = "ollama"
model_efficient = "llama3.1"

[storage]
backend = "local"
local_root = "/tmp/market-report"

[prompts]
report_user = "Write it."
"#,
        )
        .unwrap();

        let config = Config::from_file(&config_path).unwrap();

        assert_eq!(config.input_path, PathBuf::from("data/links.json"));
        assert_eq!(config.sections, vec!["EXECUTIVE SUMMARY", "MARKET OUTLOOK"]);
        assert_eq!(config.llm.provider, LLMProvider::Ollama);
        assert_eq!(config.llm.model_efficient, "llama3.1");
        // 未出现的字段保留默认值
        assert_eq!(config.llm.model_powerful, "gpt-4o");
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.storage.local_root, PathBuf::from("/tmp/market-report"));
        assert_eq!(config.prompts.report_user, "Write it.");
        assert!(config.prompts.extraction_system.contains("{consolidated_text}"));
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_config_from_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("market-report.toml");
        std::fs::write(&config_path, "[llm\nprovider = ").unwrap();

        assert!(Config::from_file(&config_path).is_err());
        assert!(Config::from_file(&temp_dir.path().join("missing.toml")).is_err());
    }
}
