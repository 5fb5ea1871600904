use tokio::sync::mpsc;

use opslink_types::events::MessageCreated;
use opslink_types::models::ChatMessage;

/// Fire-and-forget bridge to the platform's notification/email pipeline.
///
/// The send path emits and moves on: it never awaits the consumer, and a
/// missing consumer just drops the event. Delivery of notifications is the
/// external pipeline's problem, not the messaging core's.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<MessageCreated>,
}

impl Notifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MessageCreated>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn message_created(&self, message: &ChatMessage) {
        let _ = self.tx.send(MessageCreated {
            message_id: message.id,
            sender_id: message.sender.id,
            receiver_id: message.receiver.id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opslink_types::models::UserSummary;
    use uuid::Uuid;

    fn message() -> ChatMessage {
        let sender = UserSummary {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@ops.local".to_string(),
        };
        let receiver = UserSummary {
            id: Uuid::new_v4(),
            username: "bob".to_string(),
            email: "bob@ops.local".to_string(),
        };
        ChatMessage {
            id: Uuid::new_v4(),
            sender,
            receiver,
            text: "hi".to_string(),
            timestamp: chrono::Utc::now(),
            is_read: false,
        }
    }

    #[tokio::test]
    async fn emits_message_created_events() {
        let (notifier, mut rx) = Notifier::new();
        let msg = message();

        notifier.message_created(&msg);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.message_id, msg.id);
        assert_eq!(event.sender_id, msg.sender.id);
        assert_eq!(event.receiver_id, msg.receiver.id);
    }

    #[tokio::test]
    async fn dropped_consumer_never_fails_the_sender() {
        let (notifier, rx) = Notifier::new();
        drop(rx);
        notifier.message_created(&message());
    }
}
