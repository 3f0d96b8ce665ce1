//! A.R.E.S Research CLI Entry Point
//!
//! - `ares-research run <topic>` - Research a topic and print or save the report
//! - `ares-research serve` - Expose the HTTP + SSE API
//! - `ares-research config` - Show the effective configuration

use anyhow::Context;
use ares_research::{
    api::routes::build_app,
    cli::{output::Output, Cli, Commands},
    types::RunRequest,
    utils::logging::init_tracing,
    AppState, AresConfig, LLMClient, Provider, ResearchPipeline, ToolRegistry,
};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    let config = AresConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    init_tracing(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Run {
            topic,
            mode,
            max_iterations,
            concurrency,
            output: report_path,
        } => {
            let request = RunRequest {
                topic,
                max_iterations,
                mode,
                max_concurrency: concurrency,
                ..Default::default()
            };
            research(&output, config, request, report_path).await
        }
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            serve(&output, config, &host, port).await
        }
        Commands::Config { full } => show_config(&output, &cli.config, &config, full),
    }
}

async fn build_pipeline(config: &AresConfig) -> anyhow::Result<ResearchPipeline> {
    let provider = Provider::from_config(&config.llm)?;
    let llm: Arc<dyn LLMClient> = Arc::from(
        provider
            .create_client()
            .await
            .with_context(|| format!("Failed to create {} client", provider.name()))?,
    );

    #[cfg(feature = "web-tools")]
    let tools = ToolRegistry::with_default_tools();
    #[cfg(not(feature = "web-tools"))]
    let tools = ToolRegistry::new();
    if tools.is_empty() {
        tracing::warn!("No research tools registered; every tool call will fail");
    }

    tracing::info!(
        provider = provider.name(),
        model = provider.model(),
        tools = ?tools.tool_names(),
        "Pipeline ready"
    );
    Ok(ResearchPipeline::new(llm, Arc::new(tools), config.clone()))
}

async fn research(
    output: &Output,
    config: AresConfig,
    request: RunRequest,
    report_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let pipeline = build_pipeline(&config).await?;
    pipeline.validate(&request)?;
    output.banner();

    let run = pipeline.start_run();
    let mut events = run.events.subscribe();

    let task = tokio::spawn({
        let pipeline = pipeline.clone();
        let run = run.clone();
        async move { pipeline.execute(&run, request).await }
    });

    let cancel = run.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    while let Some(event) = events.recv().await {
        output.event(&event);
    }

    let report = task.await.context("Research task aborted")??;
    match report_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &report.text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            output.complete(&format!("Report written to {}", path.display()));
        }
        None => {
            println!("\n{}", report.text);
            output.complete("Research completed");
        }
    }
    Ok(())
}

async fn serve(output: &Output, config: AresConfig, host: &str, port: u16) -> anyhow::Result<()> {
    let pipeline = build_pipeline(&config).await?;
    let app = build_app(AppState::new(pipeline));

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    output.banner();
    output.success(&format!("Listening on http://{}", addr));
    tracing::info!(%addr, "Server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

fn show_config(output: &Output, path: &Path, config: &AresConfig, full: bool) -> anyhow::Result<()> {
    output.header("Configuration");
    let source = if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (not found, defaults)", path.display())
    };
    output.kv("file", &source);
    output.kv("server", &format!("{}:{}", config.server.host, config.server.port));
    output.kv(
        "llm",
        &format!("{} {} ({})", config.llm.provider, config.llm.model, config.llm.base_url),
    );
    output.kv("mode", &config.research.mode.to_string());
    output.kv("max_iterations", &config.research.max_iterations.to_string());
    output.kv("max_concurrency", &config.research.max_concurrency.to_string());

    if full {
        output.header("research.toml");
        println!("{}", toml::to_string_pretty(config)?);
    }

    output.success("Configuration is valid");
    Ok(())
}
