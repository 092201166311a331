use serde::{Deserialize, Serialize};

/// A single message in a completion request, containing a role and text content.
///
/// Messages are the wire-level unit handed to completion providers: the
/// assembled prompt (system instructions, retrieved context, user query) is a
/// sequence of these, and conversation history is replayed through them.
///
/// # Examples
///
/// ```
/// use ragweave::message::Message;
///
/// let user_msg = Message::user("What does the onboarding doc say about VPN?");
/// let system_msg = Message::system("You are a helpful assistant.");
///
/// assert!(user_msg.has_role(Message::USER));
/// assert!(!user_msg.has_role(Message::ASSISTANT));
/// ```
///
/// # Serialization
///
/// The serde shape matches the OpenAI-style chat payload, so a `Vec<Message>`
/// serializes directly into a request body's `messages` array:
/// ```
/// use ragweave::message::Message;
///
/// let msg = Message::user("test");
/// let json = serde_json::to_string(&msg).unwrap();
/// assert_eq!(json, r#"{"role":"user","content":"test"}"#);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    ///
    /// Use the constants on [`Message`] for standardized values.
    pub role: String,
    /// The text content of the message.
    pub content: String,
}

impl Message {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// AI assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction message role.
    pub const SYSTEM: &'static str = "system";

    /// Creates a new message with the specified role and content.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    /// Creates a user message with the specified content.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message with the specified content.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message with the specified content.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}
