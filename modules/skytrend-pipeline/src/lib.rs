pub mod app;
pub mod classifier;
pub mod runtime;
pub mod stages;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod topics;
pub mod traits;

pub use app::{Pipeline, StreamStatus};
pub use classifier::{ContentFilter, TextClassifier, ZeroShotClassifier};
pub use runtime::{shutdown_channel, Shutdown, ShutdownTrigger, StageError, WorkerPool};
pub use stages::topics::Clock;
pub use topics::{TopicExtractor, TOPIC_UNIVERSE};
pub use traits::{ChatModel, HttpNliModel, NliModel, OpenAiEmbedder, TextEmbedder};

/// Initialise tracing for a binary: `RUST_LOG` filter (default `info`),
/// JSON output when `LOG_FORMAT=json`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}
