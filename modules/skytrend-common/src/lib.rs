pub mod config;
pub mod error;
pub mod file_config;
pub mod prompts;
pub mod text;
pub mod types;

pub use config::AppConfig;
pub use error::SkytrendError;
pub use file_config::{Aggregator, FileConfig};
pub use prompts::TopicDomain;
pub use types::*;
