//! Progress Hub (C10): in-process publish/subscribe over download status and
//! progress events, fanned out to connected subscribers.
//!
//! Grounded in the teacher's `src/backend/download.rs` `MangaPageEvents`
//! channel-based progress plumbing, realized here with
//! `tokio::sync::broadcast` instead of `mpsc` because spec.md requires
//! fan-out to multiple subscribers rather than a single in-process consumer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressEventType {
    Connected,
    Started,
    Progress,
    Completed,
    Failed,
    Error,
    Retry,
    Pong,
}

/// spec.md §4.10 event schema.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_chapter: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chapters: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_chapters: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_downloaded: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(event_type: ProgressEventType) -> Self {
        Self {
            event_type,
            download_id: None,
            title: None,
            source_url: None,
            status: None,
            current_chapter: None,
            total_chapters: None,
            completed_chapters: None,
            files_downloaded: None,
            percentage: None,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_download(mut self, download_id: impl Into<String>) -> Self {
        self.download_id = Some(download_id.into());
        self
    }

    pub fn with_percentage(mut self, percentage: u32) -> Self {
        self.percentage = Some(percentage);
        self
    }

    pub fn with_current_chapter(mut self, current_chapter: u32) -> Self {
        self.current_chapter = Some(current_chapter);
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Per-subscriber command sent over the duplex channel (spec.md §4.10).
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum SubscriberCommand {
    Subscribe { #[serde(rename = "downloadId")] download_id: String },
    Ping,
}

/// Fan-out publisher. Cloning is cheap (wraps an `Arc`-backed sender).
#[derive(Clone)]
pub struct ProgressHub {
    sender: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an event to every connected subscriber. Best-effort: a
    /// subscriber that lagged or disconnected is simply not delivered to
    /// (the `tokio::sync::broadcast` receiver surfaces this as a `Lagged`
    /// error the caller's receive loop treats as "drop this subscriber").
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

/// Per-connection state: an optional "only this download id" filter. The
/// connection-established event is always delivered regardless of filter.
#[derive(Debug, Default)]
pub struct SubscriptionFilter {
    download_id: Option<String>,
}

impl SubscriptionFilter {
    pub fn set(&mut self, download_id: String) {
        self.download_id = Some(download_id);
    }

    pub fn allows(&self, event: &ProgressEvent) -> bool {
        match (&self.download_id, &event.download_id) {
            (Some(filter), Some(id)) => filter == id,
            (Some(_), None) => true,
            (None, _) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn it_delivers_events_in_publication_order_to_one_subscriber() {
        let hub = ProgressHub::new();
        let mut receiver = hub.subscribe();

        hub.publish(ProgressEvent::new(ProgressEventType::Started).for_download("d1"));
        hub.publish(ProgressEvent::new(ProgressEventType::Progress).for_download("d1").with_percentage(50));
        hub.publish(ProgressEvent::new(ProgressEventType::Completed).for_download("d1"));

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        let third = receiver.recv().await.unwrap();

        assert_eq!(first.event_type, ProgressEventType::Started);
        assert_eq!(second.event_type, ProgressEventType::Progress);
        assert_eq!(third.event_type, ProgressEventType::Completed);
    }

    #[tokio::test]
    async fn it_fans_out_to_multiple_subscribers_independently() {
        let hub = ProgressHub::new();
        let mut first_subscriber = hub.subscribe();
        let mut second_subscriber = hub.subscribe();

        hub.publish(ProgressEvent::new(ProgressEventType::Started).for_download("d1"));

        assert_eq!(first_subscriber.recv().await.unwrap().download_id.as_deref(), Some("d1"));
        assert_eq!(second_subscriber.recv().await.unwrap().download_id.as_deref(), Some("d1"));
    }

    #[test]
    fn filter_suppresses_events_for_other_download_ids_but_always_allows_connected() {
        let mut filter = SubscriptionFilter::default();
        filter.set("target".to_string());

        let matching = ProgressEvent::new(ProgressEventType::Progress).for_download("target");
        let other = ProgressEvent::new(ProgressEventType::Progress).for_download("other");
        let connected = ProgressEvent::new(ProgressEventType::Connected);

        assert!(filter.allows(&matching));
        assert!(!filter.allows(&other));
        assert!(filter.allows(&connected));
    }
}
