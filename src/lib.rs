//! storechat - a retrieval-augmented assistant for a small store.
//!
//! Products, categories, recent sales and customers are rendered into short
//! text blurbs, embedded with a ColBERT model and kept in a local
//! [redb](https://github.com/cberner/redb) store. Questions are answered by
//! ranking those embeddings against the query, restricted to what the
//! caller's [`AudienceTier`] may see, and handing the best matches plus the
//! conversation so far to an LLM.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use storechat::{
//!     AudienceTier, ChatDb, Chatbot, EmbeddingDb, ModelManager, DataDir,
//!     completion::{CompletionConfig, build_provider},
//! };
//!
//! # async fn run() -> storechat::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let chatbot = Chatbot::builder()
//!     .embedder(Arc::new(ModelManager::new()))
//!     .embeddings(EmbeddingDb::open(&data_dir.embeddings_db())?)
//!     .conversations(Arc::new(ChatDb::open(&data_dir.chat_db())?))
//!     .completion(build_provider(CompletionConfig::from_env())?)
//!     .build()?;
//!
//! let reply = chatbot
//!     .ask("¿Cuánto cuesta la yerba?", None, AudienceTier::Customer)
//!     .await?;
//! println!("{} (session {})", reply.answer, reply.session_id);
//! # Ok(())
//! # }
//! ```

pub mod answer;
pub mod blurb;
pub mod chat_db;
pub mod chatbot;
pub mod cli;
pub mod completion;
pub mod config_db;
pub mod data_dir;
pub mod embedding;
pub mod embedding_db;
pub mod error;
pub mod indexer;
pub mod mcp;
pub mod model_manager;
pub mod records;
pub mod search;
pub mod source;
pub mod text_util;

#[cfg(test)]
pub(crate) mod testing;

pub use chat_db::{ChatDb, ChatMessage, ChatSession, Conversation, Role};
pub use chatbot::{AskResponse, Chatbot};
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use embedding_db::{EmbeddingDb, EmbeddingRecord};
pub use error::{Error, Result};
pub use indexer::{Indexer, ReindexReport};
pub use model_manager::ModelManager;
pub use search::{SimilarityResult, SimilaritySearch};
pub use source::{AudienceTier, SourceType};

/// Run a synchronous storage or inference call off the async workers.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
