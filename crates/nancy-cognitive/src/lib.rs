//! Nancy cognitive layer
//!
//! Intent analysis (C6), the query router/orchestrator (C7), and response
//! synthesis (C8): the three LLM-driven components that sit above the
//! brain contracts in `nancy-core` and the adapters in `nancy-infra`.

pub mod intent;
pub mod router;
pub mod story;
pub mod synthesis;

pub use intent::IntentAnalyzer;
pub use router::{QueryCancellation, QueryOrchestrator, QueryResponse, RouterConfig};
pub use story::StoryExtractor;
pub use synthesis::ResponseSynthesizer;
