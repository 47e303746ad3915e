use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    chat_db::{ChatMessage, Role},
    completion::CompletionProvider,
    source::AudienceTier,
};

/// Prior messages included in a prompt by default.
pub const DEFAULT_MAX_HISTORY: usize = 20;

/// Returned without calling the LLM when search found nothing.
pub const NO_CONTEXT_ANSWER: &str = "No encontré información relevante para \
     responder tu consulta. ¿Podrías reformularla o darme más detalles?";

/// Returned when the completion provider fails.
pub const APOLOGY_ANSWER: &str = "Lo siento, ocurrió un problema al generar \
     la respuesta. Por favor intentá de nuevo en unos minutos.";

const OWNER_FRAMING: &str = "Sos el asistente de gestión de una tienda. \
     Respondé al dueño con un tono analítico y preciso: citá cifras, \
     fechas y nombres tal como aparecen en el contexto y señalá tendencias \
     cuando las haya. Si el contexto no alcanza, decilo.";

const CUSTOMER_FRAMING: &str = "Sos el asistente de atención al cliente de \
     una tienda. Respondé con un tono cordial y breve, usando solamente la \
     información del contexto sobre productos, precios y categorías. Nunca \
     inventes precios ni stock.";

fn framing(tier: AudienceTier) -> &'static str {
    match tier {
        AudienceTier::Owner => OWNER_FRAMING,
        AudienceTier::Customer => CUSTOMER_FRAMING,
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "Usuario",
        Role::Assistant => "Asistente",
        Role::System => "Sistema",
    }
}

/// Build the single prompt sent to the completion provider.
///
/// Sections, in order: tier framing, the last `max_history` messages oldest
/// first, the numbered context blocks, and the query verbatim.
pub fn build_prompt(
    query: &str,
    context: &[String],
    history: &[ChatMessage],
    tier: AudienceTier,
    max_history: usize,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(framing(tier));
    prompt.push_str("\n\n");

    let recent = &history[history.len().saturating_sub(max_history)..];
    if !recent.is_empty() {
        prompt.push_str("Conversación previa:\n");
        for message in recent {
            prompt.push_str(role_label(message.role));
            prompt.push_str(": ");
            prompt.push_str(&message.content);
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    prompt.push_str("Contexto:\n");
    for (i, block) in context.iter().enumerate() {
        prompt.push_str(&format!("[{}] {block}\n", i + 1));
    }

    prompt.push_str("\nPregunta: ");
    prompt.push_str(query);
    prompt
}

/// Turns retrieved context and conversation history into an answer.
#[derive(Clone)]
pub struct AnswerGenerator {
    completion: Arc<dyn CompletionProvider>,
    max_history: usize,
}

impl AnswerGenerator {
    pub fn new(completion: Arc<dyn CompletionProvider>) -> Self {
        Self {
            completion,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// Generate an answer. Never fails.
    ///
    /// Empty `context` returns [`NO_CONTEXT_ANSWER`] without calling the
    /// provider. Otherwise the provider is called exactly once and its text
    /// is returned unchanged; a provider error becomes [`APOLOGY_ANSWER`].
    pub async fn generate(
        &self,
        query: &str,
        context: &[String],
        history: &[ChatMessage],
        tier: AudienceTier,
    ) -> String {
        if context.is_empty() {
            debug!("no context, skipping completion");
            return NO_CONTEXT_ANSWER.to_string();
        }

        let prompt =
            build_prompt(query, context, history, tier, self.max_history);
        match self.completion.complete(&prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("completion failed, answering with apology: {e}");
                APOLOGY_ANSWER.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::testing::ScriptedCompletion;

    fn message(role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            id: content.to_string(),
            session_id: "s".to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    fn context() -> Vec<String> {
        vec!["Producto: Yerba. Precio: $1200.00.".to_string()]
    }

    #[tokio::test]
    async fn empty_context_skips_completion() {
        let completion = Arc::new(ScriptedCompletion::replying("no"));
        let generator = AnswerGenerator::new(completion.clone());

        let answer = generator
            .generate("¿precio?", &[], &[], AudienceTier::Customer)
            .await;
        assert_eq!(answer, NO_CONTEXT_ANSWER);
        assert_eq!(completion.calls(), 0);
    }

    #[tokio::test]
    async fn completion_output_is_returned_verbatim() {
        let raw = "  La yerba cuesta $1200.\n\n";
        let completion = Arc::new(ScriptedCompletion::replying(raw));
        let generator = AnswerGenerator::new(completion.clone());

        let answer = generator
            .generate("¿precio?", &context(), &[], AudienceTier::Customer)
            .await;
        assert_eq!(answer, raw);
        assert_eq!(completion.calls(), 1);
    }

    #[tokio::test]
    async fn completion_error_becomes_apology() {
        let completion = Arc::new(ScriptedCompletion::failing("timeout"));
        let generator = AnswerGenerator::new(completion.clone());

        let answer = generator
            .generate("¿precio?", &context(), &[], AudienceTier::Owner)
            .await;
        assert_eq!(answer, APOLOGY_ANSWER);
        assert_eq!(completion.calls(), 1);
    }

    #[test]
    fn prompt_sections_in_order() {
        let history = vec![
            message(Role::Assistant, "bienvenida"),
            message(Role::User, "primera"),
            message(Role::Assistant, "respuesta"),
        ];
        let prompt = build_prompt(
            "¿y el queso?",
            &["bloque uno".to_string(), "bloque dos".to_string()],
            &history,
            AudienceTier::Customer,
            DEFAULT_MAX_HISTORY,
        );

        let framing_at = prompt.find(CUSTOMER_FRAMING).unwrap();
        let first = prompt.find("Asistente: bienvenida").unwrap();
        let second = prompt.find("Usuario: primera").unwrap();
        let context_at = prompt.find("[1] bloque uno").unwrap();
        let block_two = prompt.find("[2] bloque dos").unwrap();
        let query_at = prompt.find("Pregunta: ¿y el queso?").unwrap();

        assert!(framing_at < first);
        assert!(first < second);
        assert!(second < context_at);
        assert!(context_at < block_two);
        assert!(block_two < query_at);
        assert!(prompt.ends_with("¿y el queso?"));
    }

    #[test]
    fn prompt_framing_depends_on_tier() {
        let owner =
            build_prompt("q", &context(), &[], AudienceTier::Owner, 20);
        let customer =
            build_prompt("q", &context(), &[], AudienceTier::Customer, 20);
        assert!(owner.starts_with(OWNER_FRAMING));
        assert!(customer.starts_with(CUSTOMER_FRAMING));
        assert!(!owner.contains("Conversación previa"));
    }

    #[test]
    fn history_is_windowed_to_most_recent() {
        let history: Vec<_> = (0..5)
            .map(|i| message(Role::User, &format!("turno{i}")))
            .collect();
        let prompt =
            build_prompt("q", &context(), &history, AudienceTier::Owner, 2);
        assert!(!prompt.contains("turno2"));
        assert!(prompt.contains("turno3"));
        assert!(prompt.contains("turno4"));
    }

    #[tokio::test]
    async fn prompt_reaches_provider() {
        let completion = Arc::new(ScriptedCompletion::replying("ok"));
        let generator = AnswerGenerator::new(completion.clone());
        generator
            .generate("¿hay queso?", &context(), &[], AudienceTier::Customer)
            .await;

        let prompt = completion.last_prompt().unwrap();
        assert!(prompt.contains("Producto: Yerba"));
        assert!(prompt.ends_with("¿hay queso?"));
    }
}
