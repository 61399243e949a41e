//! Provider context from stored messages

use crate::db::{Message, Sender};
use crate::llm::ChatMessage;

/// Rebuild provider history for a thread.
///
/// Human messages become `user` entries and model replies become `assistant`
/// entries. Error notices and reply placeholders that never received content
/// are not part of the conversation and are left out.
pub fn build_history(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter_map(|message| match message.sender {
            Sender::Human => Some(ChatMessage::user(message.content.clone())),
            Sender::Model if !message.content.is_empty() => {
                Some(ChatMessage::assistant(message.content.clone()))
            }
            Sender::Model | Sender::System => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::timestamp_now;
    use crate::llm::ChatRole;

    fn message(sequence_id: i64, sender: Sender, content: &str) -> Message {
        Message {
            message_id: format!("m{sequence_id}"),
            thread_id: "t1".to_string(),
            sequence_id,
            sender,
            content: content.to_string(),
            model: String::new(),
            useful: false,
            created_at: timestamp_now(),
        }
    }

    #[test]
    fn test_roles_follow_senders_in_order() {
        let history = build_history(&[
            message(1, Sender::Human, "Hello"),
            message(2, Sender::Model, "Hi there"),
            message(3, Sender::Human, "How are you?"),
            message(4, Sender::Model, ""),
        ]);
        let roles: Vec<_> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Assistant, ChatRole::User]);
        assert_eq!(history[2].content, "How are you?");
    }

    #[test]
    fn test_error_notices_are_excluded() {
        let history = build_history(&[
            message(1, Sender::Human, "Hello"),
            message(2, Sender::Model, ""),
            message(3, Sender::System, "Encountered an error: boom"),
            message(4, Sender::Human, "Retry"),
        ]);
        assert_eq!(
            history,
            vec![ChatMessage::user("Hello"), ChatMessage::user("Retry")]
        );
    }
}
