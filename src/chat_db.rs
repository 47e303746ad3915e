use std::{fmt, path::Path, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    run_blocking,
    source::AudienceTier,
};

const SESSIONS: TableDefinition<&str, &str> = TableDefinition::new("sessions");
const MESSAGES: TableDefinition<(&str, u64), &str> =
    TableDefinition::new("messages");

const CUSTOMER_WELCOME: &str = "¡Hola! Soy el asistente de la tienda. \
     Preguntame por productos, precios o categorías y te ayudo.";
const OWNER_WELCOME: &str = "Hola, soy tu asistente de gestión. \
     Puedo ayudarte a revisar ventas, clientes, stock y productos.";

/// The assistant message every new session starts with.
pub fn welcome_message(tier: AudienceTier) -> &'static str {
    match tier {
        AudienceTier::Customer => CUSTOMER_WELCOME,
        AudienceTier::Owner => OWNER_WELCOME,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub tier: AudienceTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One turn of a conversation. Never modified after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A session together with its messages, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(flatten)]
    pub session: ChatSession,
    pub messages: Vec<ChatMessage>,
}

/// Session-scoped message history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Start a session for `tier`, seeded with its welcome message.
    async fn create_session(&self, tier: AudienceTier) -> Result<Conversation>;

    async fn get_session(&self, id: &str) -> Result<Option<Conversation>>;

    /// Append a turn and bump the session's `updated_at`.
    ///
    /// Fails with [`Error::NotFound`] if the session does not exist.
    async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage>;

    /// Every session, most recently updated first.
    async fn list_sessions(&self) -> Result<Vec<ChatSession>>;
}

/// redb-backed [`ConversationStore`].
///
/// Messages are keyed by `(session_id, sequence)`, so a range scan over one
/// session yields its messages in append order. Timestamps are clamped to
/// never go backwards within a session, which keeps timestamp order and
/// append order identical even if the wall clock steps back.
#[derive(Clone)]
pub struct ChatDb {
    db: Arc<Database>,
}

impl ChatDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(SESSIONS)?;
        txn.open_table(MESSAGES)?;
        txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn insert_session(&self, tier: AudienceTier) -> Result<Conversation> {
        let now = Utc::now();
        let session = ChatSession {
            id: Uuid::new_v4().to_string(),
            tier,
            created_at: now,
            updated_at: now,
        };
        let welcome = ChatMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            role: Role::Assistant,
            content: welcome_message(tier).to_string(),
            timestamp: now,
            metadata: None,
        };

        let txn = self.db.begin_write()?;
        {
            let mut sessions = txn.open_table(SESSIONS)?;
            let mut messages = txn.open_table(MESSAGES)?;
            let body = serde_json::to_string(&session)?;
            sessions.insert(session.id.as_str(), body.as_str())?;
            let body = serde_json::to_string(&welcome)?;
            messages.insert((session.id.as_str(), 1u64), body.as_str())?;
        }
        txn.commit()?;

        debug!(session = %session.id, %tier, "created chat session");
        Ok(Conversation {
            session,
            messages: vec![welcome],
        })
    }

    pub fn load_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let txn = self.db.begin_read()?;
        let sessions = txn.open_table(SESSIONS)?;
        let Some(body) = sessions.get(id)? else {
            return Ok(None);
        };
        let session: ChatSession = serde_json::from_str(body.value())?;

        let table = txn.open_table(MESSAGES)?;
        let mut messages = Vec::new();
        for entry in table.range((id, 0u64)..=(id, u64::MAX))? {
            let (_, value) = entry?;
            messages.push(serde_json::from_str(value.value())?);
        }

        Ok(Some(Conversation { session, messages }))
    }

    pub fn push_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage> {
        let txn = self.db.begin_write()?;
        let message = {
            let mut sessions = txn.open_table(SESSIONS)?;
            let mut messages = txn.open_table(MESSAGES)?;

            let mut session: ChatSession = match sessions.get(session_id)? {
                Some(body) => serde_json::from_str(body.value())?,
                None => {
                    return Err(Error::NotFound {
                        kind: "session",
                        name: session_id.to_string(),
                    });
                }
            };

            let last = messages
                .range((session_id, 0u64)..=(session_id, u64::MAX))?
                .next_back()
                .transpose()?
                .map(|(key, value)| {
                    let previous: ChatMessage =
                        serde_json::from_str(value.value())?;
                    Ok::<_, Error>((key.value().1, previous.timestamp))
                })
                .transpose()?;

            let (seq, timestamp) = match last {
                Some((seq, previous)) => (seq + 1, Utc::now().max(previous)),
                None => (1, Utc::now().max(session.updated_at)),
            };

            let message = ChatMessage {
                id: Uuid::new_v4().to_string(),
                session_id: session_id.to_string(),
                role,
                content: content.to_string(),
                timestamp,
                metadata: None,
            };
            let body = serde_json::to_string(&message)?;
            messages.insert((session_id, seq), body.as_str())?;

            session.updated_at = timestamp;
            let body = serde_json::to_string(&session)?;
            sessions.insert(session_id, body.as_str())?;

            message
        };
        txn.commit()?;

        debug!(session = session_id, %role, "appended message");
        Ok(message)
    }

    pub fn all_sessions(&self) -> Result<Vec<ChatSession>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SESSIONS)?;

        let mut sessions = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            sessions.push(serde_json::from_str::<ChatSession>(value.value())?);
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    pub fn session_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SESSIONS)?;
        Ok(table.len()?)
    }
}

#[async_trait]
impl ConversationStore for ChatDb {
    async fn create_session(&self, tier: AudienceTier) -> Result<Conversation> {
        let db = self.clone();
        run_blocking(move || db.insert_session(tier)).await
    }

    async fn get_session(&self, id: &str) -> Result<Option<Conversation>> {
        let db = self.clone();
        let id = id.to_string();
        run_blocking(move || db.load_conversation(&id)).await
    }

    async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage> {
        let db = self.clone();
        let session_id = session_id.to_string();
        let content = content.to_string();
        run_blocking(move || db.push_message(&session_id, role, &content)).await
    }

    async fn list_sessions(&self) -> Result<Vec<ChatSession>> {
        let db = self.clone();
        run_blocking(move || db.all_sessions()).await
    }
}
