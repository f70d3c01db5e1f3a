use anyhow::Result;
use clap::Parser;
use market_report_rs::cli::{self, Command};
use market_report_rs::generator::workflow::launch;
use market_report_rs::server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let config = args.to_config()?;

    let default_filter = if config.verbose {
        "market_report_rs=debug,tower_http=debug"
    } else {
        "market_report_rs=info"
    };
    // 报告正文占用stdout，日志写到stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match args.command {
        Command::Generate {
            stream, publish, ..
        } => launch(&config, stream, publish).await,
        Command::Serve { .. } => server::serve(&config).await,
    }
}
