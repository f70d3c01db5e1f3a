//! 最终报告生成 - 一次性或流式

use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{info, warn};

use crate::generator::context::GeneratorContext;
use crate::llm::client::{CompletionGateway, TextStream};

/// 流式输出中的一项
#[derive(Debug, Clone, PartialEq)]
pub enum ReportFragment {
    /// 模型返回的原始片段，可能为空
    Fragment(String),
    /// 终止性错误，之后不会再有任何片段
    StreamError(String),
}

impl ReportFragment {
    pub fn is_error(&self) -> bool {
        matches!(self, ReportFragment::StreamError(_))
    }

    /// 纯文本形式，错误渲染为`Error generating report: ..`
    pub fn into_text(self) -> String {
        match self {
            ReportFragment::Fragment(text) => text,
            ReportFragment::StreamError(message) => {
                format!("Error generating report: {}\n\n", message)
            }
        }
    }
}

/// 报告生成器
#[derive(Clone)]
pub struct ReportGenerator {
    llm: Arc<dyn CompletionGateway>,
    model: String,
    user_prompt: String,
}

impl ReportGenerator {
    pub fn new(context: &GeneratorContext) -> Self {
        Self {
            llm: Arc::clone(&context.llm),
            model: context.config.llm.model_powerful.clone(),
            user_prompt: context.config.prompts.report_user.clone(),
        }
    }

    /// 一次性生成完整报告
    pub async fn generate(&self, report_context: &str) -> Result<String> {
        let response = self
            .llm
            .complete(&self.model, report_context, &self.user_prompt, false)
            .await?;
        info!(
            chars = response.text.len(),
            output_tokens = response.token_usage.output_tokens,
            "📝 报告生成完成"
        );
        Ok(response.text)
    }

    /// 惰性的有限片段流；打开失败或中途失败时以一个`StreamError`结束
    pub fn stream(&self, report_context: String) -> BoxStream<'static, ReportFragment> {
        let generator = self.clone();
        let opened = async move {
            generator
                .llm
                .complete_stream(&generator.model, &report_context, &generator.user_prompt)
                .await
        };

        stream::once(opened)
            .flat_map(|opened| match opened {
                Ok(fragments) => relay(fragments),
                Err(e) => {
                    warn!(error = %e, "打开报告流失败");
                    stream::iter([ReportFragment::StreamError(format!("{:#}", e))]).boxed()
                }
            })
            .boxed()
    }
}

/// 转发片段，遇到第一个错误后结束
fn relay(fragments: TextStream) -> BoxStream<'static, ReportFragment> {
    stream::unfold(Some(fragments), |state| async move {
        let Some(mut fragments) = state else {
            return None;
        };
        match fragments.next().await {
            Some(Ok(text)) => Some((ReportFragment::Fragment(text), Some(fragments))),
            Some(Err(e)) => {
                warn!(error = %e, "报告流中断");
                Some((ReportFragment::StreamError(format!("{:#}", e)), None))
            }
            None => None,
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::generator::test_support::{
        FakeLlm, FakeSandbox, FakeWarehouse, context_with, public_store,
    };
    use tempfile::TempDir;

    fn generator_with(llm: FakeLlm, dir: &TempDir) -> (ReportGenerator, Arc<FakeLlm>) {
        let llm = Arc::new(llm);
        let context = context_with(
            Config::default(),
            llm.clone(),
            Arc::new(FakeWarehouse::new(dir.path())),
            Arc::new(FakeSandbox::default()),
            public_store(),
        );
        (ReportGenerator::new(&context), llm)
    }

    #[tokio::test]
    async fn test_stream_ends_after_error() {
        let dir = TempDir::new().unwrap();
        let llm = FakeLlm::text("")
            .with_stream(&["Intro ", "body text", ""], Some("connection reset"));
        let (generator, _) = generator_with(llm, &dir);

        let fragments: Vec<ReportFragment> =
            generator.stream("context".to_string()).collect().await;

        assert_eq!(
            fragments,
            vec![
                ReportFragment::Fragment("Intro ".to_string()),
                ReportFragment::Fragment("body text".to_string()),
                ReportFragment::Fragment(String::new()),
                ReportFragment::StreamError("connection reset".to_string()),
            ]
        );
        assert_eq!(
            fragments[3].clone().into_text(),
            "Error generating report: connection reset\n\n"
        );
    }

    #[tokio::test]
    async fn test_stream_without_error_is_finite() {
        let dir = TempDir::new().unwrap();
        let llm = FakeLlm::text("").with_stream(&["# Report", "\n"], None);
        let (generator, _) = generator_with(llm, &dir);

        let text: String = generator
            .stream("context".to_string())
            .map(ReportFragment::into_text)
            .collect()
            .await;
        assert_eq!(text, "# Report\n");
    }

    #[tokio::test]
    async fn test_generate_uses_powerful_model() {
        let dir = TempDir::new().unwrap();
        let llm = FakeLlm::replying(|system, user| {
            assert_eq!(system, "assembled context");
            assert_eq!(user, "Generate the report as per the provided instructions");
            Ok("# Market Report".to_string())
        });
        let (generator, llm) = generator_with(llm, &dir);

        let report = generator.generate("assembled context").await.unwrap();
        assert_eq!(report, "# Market Report");
        assert_eq!(llm.models(), vec![("gpt-4o".to_string(), false)]);
    }
}
