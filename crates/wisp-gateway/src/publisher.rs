use chrono::Utc;

use wisp_types::events::{Event, EventPayload};
use wisp_types::models::Reaction;

use crate::hub::Hub;

/// Emits author-targeted notifications after successful domain writes.
/// Self-notifications are dropped: authors never hear about their own
/// views or reactions.
#[derive(Clone)]
pub struct Publisher {
    hub: Hub,
}

impl Publisher {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }

    pub fn story_viewed(&self, story_id: &str, viewer_id: &str, author_id: &str) {
        if viewer_id == author_id {
            return;
        }
        let now = Utc::now();
        let event = Event {
            payload: EventPayload::StoryViewed {
                story_id: story_id.to_string(),
                viewer_id: viewer_id.to_string(),
                viewed_at: now,
            },
            timestamp: now,
        };
        self.hub.notify(author_id, &event);
    }

    pub fn story_reacted(&self, story_id: &str, user_id: &str, author_id: &str, emoji: Reaction) {
        if user_id == author_id {
            return;
        }
        let now = Utc::now();
        let event = Event {
            payload: EventPayload::StoryReacted {
                story_id: story_id.to_string(),
                user_id: user_id.to_string(),
                emoji,
                reacted_at: now,
            },
            timestamp: now,
        };
        self.hub.notify(author_id, &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn self_actions_are_suppressed() {
        let hub = Hub::new();
        let publisher = Publisher::new(hub.clone());
        let mut reg = hub.register("author");

        // Author viewing their own story: nothing should arrive.
        publisher.story_viewed("s1", "author", "author");
        // A real viewer: this one should.
        publisher.story_viewed("s1", "viewer", "author");

        let raw = reg.events.recv().await.unwrap();
        assert!(raw.contains("\"viewer\""));
    }

    #[tokio::test]
    async fn reaction_events_reach_the_author_in_order() {
        let hub = Hub::new();
        let publisher = Publisher::new(hub.clone());
        let mut reg = hub.register("author");

        publisher.story_reacted("s1", "fan", "author", Reaction::ThumbsUp);
        publisher.story_reacted("s1", "fan", "author", Reaction::Heart);

        let first = reg.events.recv().await.unwrap();
        let second = reg.events.recv().await.unwrap();
        assert!(first.contains("👍"));
        assert!(second.contains("❤️"));
    }
}
