use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use ai_client::OpenAi;
use skytrend_bot::{
    default_references, BlueskyClient, BotRunner, Responder, SemanticCache, SemanticRouter,
    Summarizer, TrendingAnalyzer,
};
use skytrend_common::file_config::{load_config_or_default, DEFAULT_CONFIG_PATH};
use skytrend_common::AppConfig;
use skytrend_pipeline::runtime::shutdown_on_ctrl_c;
use skytrend_pipeline::{init_tracing, shutdown_channel, OpenAiEmbedder, TextEmbedder, TopicExtractor};
use skytrend_store::Backend;

#[derive(Parser)]
#[command(name = "skytrend-bot", about = "Answers Bluesky mentions about trending topics")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Answer mentions every interval until Ctrl-C (default)
    Run,
    /// Run a single tick and exit
    Once,
    /// Answer a query locally without touching the social API
    Ask { query: String },
}

fn openai(config: &AppConfig, model: &str) -> Result<OpenAi> {
    let mut client = OpenAi::new(config.api_key(), model).with_timeout(Duration::from_secs(60))?;
    if let Some(url) = &config.llm_base_url {
        client = client.with_base_url(url);
    }
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let file_config = load_config_or_default(&cli.config)?;
    let config = AppConfig::from_env()?;
    let backend = Backend::from_url(config.database_url.as_deref(), 8).await?;

    let models = &file_config.models;
    let embedder: Arc<dyn TextEmbedder> = Arc::new(OpenAiEmbedder::new(
        &openai(&config, &models.chat)?,
        &models.query_embedding,
        models.query_dimensions,
    ));

    let router = SemanticRouter::new(backend.routing.clone(), embedder.clone());
    router.prepare(&default_references()).await?;

    let extractor = TopicExtractor::new(
        Arc::new(openai(&config, &models.topics)?),
        backend.sketches.clone(),
        file_config.prompts.topic_domain,
    );
    let responder = Responder::new(
        router,
        TrendingAnalyzer::new(backend.sketches.clone()),
        Summarizer::new(extractor, backend.documents.clone()),
        Arc::new(openai(&config, &models.chat)?),
    );

    if let Some(Command::Ask { query }) = &cli.command {
        let answer = responder.answer(query).await?;
        let routes: Vec<&str> = answer.routes.iter().map(|r| r.as_str()).collect();
        println!("routes: [{}]", routes.join(", "));
        println!("{}", answer.text);
        return Ok(());
    }

    let (identifier, password) = config.require_bluesky()?;
    let social = Arc::new(BlueskyClient::new(&config.bluesky_host, identifier, password)?);
    let cache = SemanticCache::new(
        backend.cache.clone(),
        embedder,
        file_config.bot.cache_max_distance,
    );
    let runner = BotRunner::new(
        social,
        backend.sketches.clone(),
        cache,
        responder,
        file_config.bot.clone(),
    );
    runner.prepare(&file_config.sketches).await?;

    match cli.command {
        Some(Command::Once) => {
            let report = runner.tick().await?;
            info!(?report, "Tick finished");
        }
        _ => {
            let (trigger, shutdown) = shutdown_channel();
            shutdown_on_ctrl_c(trigger);
            runner.run(shutdown).await;
        }
    }

    info!("skytrend-bot stopped");
    Ok(())
}
