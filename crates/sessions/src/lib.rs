//! Session & state persistence for SerialAgent.
//!
//! Owns the durable side of the Session aggregate defined in `sa_domain`:
//! the multi-session map (`SessionManager`), best-effort profile/knowledge
//! extraction from each exchange (`StateExtractor`), the service that folds
//! extractions into a session's sub-aggregates (`StateUpdateService`),
//! incremental conversation summarization (`SummarizationService`), a
//! transcript search index, and the concrete file/in-memory
//! `StateProvider` implementations.

pub mod extractor;
pub mod manager;
pub mod search;
pub mod state_provider;
pub mod state_update;
pub mod summarizer;
pub mod transcript;

pub use extractor::{Extraction, StateExtractor};
pub use manager::SessionManager;
pub use search::{SearchHit, TranscriptIndex};
pub use state_provider::{FileStateProvider, InMemoryStateProvider};
pub use state_update::StateUpdateService;
pub use summarizer::{SummarizationService, SummaryOutcome};
pub use transcript::{TranscriptLine, TranscriptWriter};
