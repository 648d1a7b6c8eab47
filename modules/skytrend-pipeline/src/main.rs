use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use ai_client::OpenAi;
use skytrend_common::file_config::{load_config_or_default, DEFAULT_CONFIG_PATH};
use skytrend_common::AppConfig;
use skytrend_pipeline::runtime::shutdown_on_ctrl_c;
use skytrend_pipeline::{
    init_tracing, shutdown_channel, ChatModel, HttpNliModel, OpenAiEmbedder, Pipeline,
    TextClassifier, TextEmbedder, ZeroShotClassifier,
};
use skytrend_store::Backend;

#[derive(Parser)]
#[command(name = "skytrend-pipeline", about = "Bluesky firehose topic pipeline")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Firehose → raw
    Ingest,
    /// raw → classifier → filtered + documents
    Filter,
    /// filtered → document embeddings
    Embed,
    /// filtered → topics and hourly frequencies
    Topics,
    /// Every stage in one process
    All,
    /// Print stream lengths and pending counts
    Status,
}

/// Connections reserved per worker on top of a small base.
fn max_connections(workers: usize) -> u32 {
    (workers as u32 + 4).max(8)
}

fn openai(config: &AppConfig, model: &str) -> Result<OpenAi> {
    let mut client = OpenAi::new(config.api_key(), model).with_timeout(Duration::from_secs(60))?;
    if let Some(url) = &config.llm_base_url {
        client = client.with_base_url(url);
    }
    Ok(client)
}

async fn print_status(pipeline: &Pipeline) -> Result<()> {
    for s in pipeline.status().await? {
        println!("{:<12} len={}", s.stream, s.len);
        for (group, pending) in s.pending {
            println!("  {group:<26} pending={pending}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let file_config = load_config_or_default(&cli.config)?;
    let config = AppConfig::from_env()?;

    let p = &file_config.pools;
    let backend = Backend::from_url(
        config.database_url.as_deref(),
        max_connections(p.filter + p.embed + p.topics),
    )
    .await?;
    let pipeline = Pipeline::new(backend, file_config);

    if !matches!(cli.command, Command::Status) {
        pipeline.prepare().await?;
    }

    let (trigger, shutdown) = shutdown_channel();
    shutdown_on_ctrl_c(trigger);

    let models = &pipeline.config.models;
    let classifier = || -> Result<Arc<dyn TextClassifier>> {
        let nli = Arc::new(HttpNliModel::new(config.require_nli_url()?)?);
        Ok(Arc::new(ZeroShotClassifier::new(
            nli,
            &pipeline.config.filter.hypothesis_template,
            pipeline.config.filter.inference_concurrency,
        )))
    };
    let embedder = || -> Result<Arc<dyn TextEmbedder>> {
        let client = openai(&config, &models.chat)?;
        Ok(Arc::new(OpenAiEmbedder::new(
            &client,
            &models.document_embedding,
            models.document_dimensions,
        )))
    };
    let chat = || -> Result<Arc<dyn ChatModel>> { Ok(Arc::new(openai(&config, &models.topics)?)) };

    match cli.command {
        Command::Ingest => pipeline.ingest_worker().run(shutdown).await?,
        Command::Filter => pipeline.filter_pool(classifier()?).run(shutdown).await?,
        Command::Embed => pipeline.embed_pool(embedder()?).run(shutdown).await?,
        Command::Topics => pipeline.topic_pool(chat()?).run(shutdown).await?,
        Command::All => {
            let ingest = pipeline.ingest_worker();
            let filter = pipeline.filter_pool(classifier()?);
            let embed = pipeline.embed_pool(embedder()?);
            let topics = pipeline.topic_pool(chat()?);
            let (a, b, c, d) = tokio::join!(
                ingest.run(shutdown.clone()),
                filter.run(shutdown.clone()),
                embed.run(shutdown.clone()),
                topics.run(shutdown),
            );
            a?;
            b?;
            c?;
            d?;
        }
        Command::Status => print_status(&pipeline).await?,
    }

    info!("skytrend-pipeline stopped");
    Ok(())
}
