pub mod cache;
pub mod responder;
pub mod router;
pub mod runner;
pub mod social;
pub mod summarizer;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod trending;

pub use cache::{CacheLookup, SemanticCache};
pub use responder::{Answer, Responder};
pub use router::{default_references, ReferenceSeed, SemanticRouter};
pub use runner::{BotRunner, MentionOutcome, TickReport, PROCESSED_BLOOM};
pub use social::{BlueskyClient, Mention, PostRef, ReplyRef, Session, SocialApi, SocialError};
pub use summarizer::{RelatedPosts, Summarizer};
pub use trending::TrendingAnalyzer;
