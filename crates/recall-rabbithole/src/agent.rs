//! Rabbithole agent (spec §4.3, component C4). One instance per open
//! tangent; owns its own conversation history and its own [`LlmClient`]
//! binding. That binding is never the tutor's — callers get one only
//! through [`RabbitholeClientFactory::build`], which always returns a
//! fresh instance, so the "never share the tutor's client" invariant
//! holds by construction rather than by caller discipline.

use chrono::{DateTime, Utc};
use recall_core::{ChatConfig, ChatMessage, LlmClient, LlmError, MessageRole};

/// One turn inside a rabbithole's private conversation.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Builds a dedicated [`LlmClient`] carrying the given system prompt.
/// Implemented by whatever wires up real provider credentials; the agent
/// itself never constructs a client directly.
pub trait RabbitholeClientFactory: Send + Sync {
    fn build(&self, system_prompt: String) -> Box<dyn LlmClient>;
}

fn exploratory_persona(topic: &str, recall_set_name: &str, recall_set_description: &str) -> String {
    format!(
        "You are a curious, exploratory guide helping a student follow a tangent \
        about \"{topic}\" that came up while they were studying \"{recall_set_name}\" \
        ({recall_set_description}). Unlike a Socratic tutor, you answer directly and \
        enthusiastically, favoring depth and interesting connections over quizzing. \
        Keep the student's curiosity moving; don't steer them back to the main topic \
        unless they ask."
    )
}

pub struct RabbitholeAgent {
    client: Box<dyn LlmClient>,
    pub topic: String,
    pub depth: u32,
    history: Vec<ChatTurn>,
    model: String,
}

impl RabbitholeAgent {
    pub fn new(
        factory: &dyn RabbitholeClientFactory,
        topic: impl Into<String>,
        recall_set_name: &str,
        recall_set_description: &str,
        depth: u32,
        model: impl Into<String>,
    ) -> Self {
        let topic = topic.into();
        let system_prompt = exploratory_persona(&topic, recall_set_name, recall_set_description);
        Self {
            client: factory.build(system_prompt),
            topic,
            depth,
            history: Vec::new(),
            model: model.into(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        self.client.system_prompt()
    }

    /// Synthesize the opening exchange. Providers require the first
    /// message to carry role `user`, so the opening is recorded as a
    /// synthetic user turn followed by the model's real response.
    pub async fn open(&mut self, now: DateTime<Utc>) -> Result<String, LlmError> {
        let opening_prompt = format!("Tell me more about {}.", self.topic);
        self.push_turn(MessageRole::User, opening_prompt, now);
        self.complete_and_append(now).await
    }

    pub async fn respond(&mut self, user_text: &str, now: DateTime<Utc>) -> Result<String, LlmError> {
        self.push_turn(MessageRole::User, user_text.to_string(), now);
        self.complete_and_append(now).await
    }

    /// Defensive copy — callers can't mutate the agent's canonical history.
    pub fn history(&self) -> Vec<ChatTurn> {
        self.history.clone()
    }

    fn push_turn(&mut self, role: MessageRole, content: String, timestamp: DateTime<Utc>) {
        self.history.push(ChatTurn { role, content, timestamp });
    }

    async fn complete_and_append(&mut self, now: DateTime<Utc>) -> Result<String, LlmError> {
        let messages: Vec<ChatMessage> = self
            .history
            .iter()
            .map(|t| ChatMessage {
                role: to_llm_role(t.role),
                content: t.content.clone(),
            })
            .collect();
        let cfg = ChatConfig::new(self.model.clone(), 1024, 0.8);
        let response = self.client.complete(&messages, &cfg).await?;
        self.push_turn(MessageRole::Assistant, response.text.clone(), now);
        Ok(response.text)
    }
}

fn to_llm_role(role: MessageRole) -> recall_core::Role {
    match role {
        MessageRole::User => recall_core::Role::User,
        MessageRole::Assistant => recall_core::Role::Assistant,
        MessageRole::System => recall_core::Role::System,
    }
}
