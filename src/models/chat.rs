use serde::{ Serialize, Deserialize };

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// Ordered conversation history for one probe run. Append-only: the user
/// message goes in before the request, the assistant reply after it.
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: &str) {
        self.messages.push(ChatMessage::new("user", content));
    }

    pub fn push_assistant(&mut self, content: &str) {
        self.messages.push(ChatMessage::new("assistant", content));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_accumulates_in_order() {
        let mut conversation = Conversation::new();
        conversation.push_user("Hello, how are you?");
        conversation.push_assistant("hi");

        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.messages()[0].role, "user");
        assert_eq!(conversation.messages()[0].content, "Hello, how are you?");
        assert_eq!(conversation.messages()[1].role, "assistant");
        assert_eq!(conversation.messages()[1].content, "hi");
    }

    #[test]
    fn test_message_wire_shape() {
        let msg = ChatMessage::new("user", "ping");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, serde_json::json!({"role": "user", "content": "ping"}));
    }
}
