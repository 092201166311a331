use ragweave::message::Message;
use ragweave::models::{ChatMessage, MessagePage};
use uuid::Uuid;

#[allow(dead_code)]
pub fn assert_oldest_first(page: &MessagePage) {
    let ordered = page
        .messages
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at);
    assert!(
        ordered,
        "expected page oldest first, got: {:?}",
        page.messages
            .iter()
            .map(|m| (&m.role, m.created_at))
            .collect::<Vec<_>>()
    );
}

#[allow(dead_code)]
pub fn assert_assistant_metadata(message: &ChatMessage) {
    assert_eq!(message.role, Message::ASSISTANT, "role: {}", message.role);
    assert!(message.model.is_some(), "assistant message missing model");
    assert!(
        message.latency_ms.is_some(),
        "assistant message missing latency"
    );
    assert!(
        message.token_count.is_some_and(|count| count >= 1),
        "token count must be at least 1, got {:?}",
        message.token_count
    );
}

#[allow(dead_code)]
pub fn assert_cites_document(message: &ChatMessage, document_id: Uuid) {
    let cited = message
        .sources
        .iter()
        .any(|source| source.document_id == document_id);
    assert!(
        cited,
        "expected a source for document {document_id}, got: {:?}",
        message
            .sources
            .iter()
            .map(|s| s.document_id)
            .collect::<Vec<_>>()
    );
}
