use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    answer::{AnswerGenerator, DEFAULT_MAX_HISTORY},
    chat_db::{ChatSession, Conversation, ConversationStore, Role},
    completion::CompletionProvider,
    embedding::Embedder,
    embedding_db::EmbeddingDb,
    error::{Error, Result},
    search::{DEFAULT_SEARCH_LIMIT, SimilarityResult, SimilaritySearch},
    source::AudienceTier,
};

pub const MIN_QUERY_CHARS: usize = 2;
pub const MAX_QUERY_CHARS: usize = 2000;

/// Trim `query` and check its length.
pub fn validate_query(query: &str) -> Result<&str> {
    let trimmed = query.trim();
    let len = trimmed.chars().count();
    if len < MIN_QUERY_CHARS {
        return Err(Error::InvalidQuery(format!(
            "query must have at least {MIN_QUERY_CHARS} characters"
        )));
    }
    if len > MAX_QUERY_CHARS {
        return Err(Error::InvalidQuery(format!(
            "query must have at most {MAX_QUERY_CHARS} characters"
        )));
    }
    Ok(trimmed)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub answer: String,
    pub session_id: String,
}

/// Public entry point: answers questions inside a conversation.
#[derive(Clone)]
pub struct Chatbot {
    search: SimilaritySearch,
    generator: AnswerGenerator,
    conversations: Arc<dyn ConversationStore>,
    search_limit: usize,
}

impl Chatbot {
    pub fn new(
        search: SimilaritySearch,
        generator: AnswerGenerator,
        conversations: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            search,
            generator,
            conversations,
            search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    pub fn builder() -> ChatbotBuilder {
        ChatbotBuilder::default()
    }

    /// Answer `query` in the session `session_id`, or in a new one.
    ///
    /// A missing or unknown session id starts a fresh session; the returned
    /// [`AskResponse::session_id`] is the one actually used. The user turn is
    /// stored before searching and the assistant turn after generating.
    /// Invalid input fails with [`Error::InvalidQuery`] before any I/O;
    /// every other failure is reported as [`Error::QueryFailed`].
    pub async fn ask(
        &self,
        query: &str,
        session_id: Option<&str>,
        tier: AudienceTier,
    ) -> Result<AskResponse> {
        let query = validate_query(query)?;
        self.converse(query, session_id, tier)
            .await
            .map_err(|e| {
                warn!("query failed: {e}");
                e.query_failed()
            })
    }

    async fn converse(
        &self,
        query: &str,
        session_id: Option<&str>,
        tier: AudienceTier,
    ) -> Result<AskResponse> {
        let conversation = self.resolve_session(session_id, tier).await?;
        let session_id = conversation.session.id;
        let history = conversation.messages;

        self.conversations
            .append_message(&session_id, Role::User, query)
            .await?;

        let context: Vec<String> = self
            .search
            .search(query, tier, self.search_limit)
            .await?
            .into_iter()
            .map(|r| r.text)
            .collect();
        debug!(session = %session_id, context = context.len(), "retrieved context");

        let answer = self
            .generator
            .generate(query, &context, &history, tier)
            .await;

        self.conversations
            .append_message(&session_id, Role::Assistant, &answer)
            .await?;

        Ok(AskResponse { answer, session_id })
    }

    async fn resolve_session(
        &self,
        session_id: Option<&str>,
        tier: AudienceTier,
    ) -> Result<Conversation> {
        let Some(id) = session_id else {
            let created = self.conversations.create_session(tier).await?;
            info!(session = %created.session.id, %tier, "started session");
            return Ok(created);
        };

        match self.conversations.get_session(id).await? {
            Some(existing) => {
                if existing.session.tier != tier {
                    debug!(
                        session = id,
                        stored = %existing.session.tier,
                        requested = %tier,
                        "session tier differs from request, searching as requested"
                    );
                }
                Ok(existing)
            }
            None => {
                let created = self.conversations.create_session(tier).await?;
                info!(
                    stale = id,
                    session = %created.session.id,
                    "unknown session id, started a new session"
                );
                Ok(created)
            }
        }
    }

    /// Rank stored records against `query` for `tier`.
    pub async fn search(
        &self,
        query: &str,
        tier: AudienceTier,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>> {
        let query = validate_query(query)?;
        self.search.search(query, tier, limit).await
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Conversation>> {
        self.conversations.get_session(id).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<ChatSession>> {
        self.conversations.list_sessions().await
    }
}

/// Assembles a [`Chatbot`] from its collaborators.
#[derive(Default)]
pub struct ChatbotBuilder {
    embedder: Option<Arc<dyn Embedder>>,
    embeddings: Option<EmbeddingDb>,
    conversations: Option<Arc<dyn ConversationStore>>,
    completion: Option<Arc<dyn CompletionProvider>>,
    search_limit: Option<usize>,
    max_history: Option<usize>,
}

impl ChatbotBuilder {
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn embeddings(mut self, db: EmbeddingDb) -> Self {
        self.embeddings = Some(db);
        self
    }

    pub fn conversations(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(store);
        self
    }

    pub fn completion(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.completion = Some(provider);
        self
    }

    pub fn search_limit(mut self, limit: usize) -> Self {
        self.search_limit = Some(limit);
        self
    }

    pub fn max_history(mut self, max: usize) -> Self {
        self.max_history = Some(max);
        self
    }

    pub fn build(self) -> Result<Chatbot> {
        fn missing(part: &str) -> Error {
            Error::Config(format!("chatbot is missing its {part}"))
        }

        let embedder = self.embedder.ok_or_else(|| missing("embedder"))?;
        let embeddings = self.embeddings.ok_or_else(|| missing("embeddings"))?;
        let conversations =
            self.conversations.ok_or_else(|| missing("conversation store"))?;
        let completion =
            self.completion.ok_or_else(|| missing("completion provider"))?;

        let generator = AnswerGenerator::new(completion)
            .with_max_history(self.max_history.unwrap_or(DEFAULT_MAX_HISTORY));
        let mut chatbot = Chatbot::new(
            SimilaritySearch::new(embedder, embeddings),
            generator,
            conversations,
        );
        chatbot.search_limit = self.search_limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        Ok(chatbot)
    }
}
