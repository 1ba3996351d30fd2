// src/engine/notify.rs

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};

/// A room whose mattress rotation falls due within the notice window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationNotice {
    pub room_id: i64,
    pub room_number: String,
    pub due_at: DateTime<Utc>,
    pub days_remaining: i64,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_upcoming_rotations(&self, notices: &[RotationNotice]) -> EngineResult<()>;
}

/// Writes the batch to the log only; used when no notification service is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_upcoming_rotations(&self, notices: &[RotationNotice]) -> EngineResult<()> {
        let room_ids: Vec<i64> = notices.iter().map(|n| n.room_id).collect();
        info!(?room_ids, "mattress rotation coming up");
        Ok(())
    }
}

#[derive(Serialize)]
struct NotificationBatch<'a> {
    kind: &'static str,
    room_ids: Vec<i64>,
    notices: &'a [RotationNotice],
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_upcoming_rotations(&self, notices: &[RotationNotice]) -> EngineResult<()> {
        let batch = NotificationBatch {
            kind: "mattress_rotation_notice",
            room_ids: notices.iter().map(|n| n.room_id).collect(),
            notices,
        };
        self.client
            .post(&self.url)
            .json(&batch)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| {
                warn!(url = %self.url, error = %e, "notification service rejected batch");
                EngineError::Downstream(format!("notification dispatch failed: {e}"))
            })?;
        info!(rooms = batch.room_ids.len(), "rotation notices dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_payload_lists_room_ids_and_notices() {
        let notices = vec![RotationNotice {
            room_id: 12,
            room_number: "12".into(),
            due_at: DateTime::<Utc>::UNIX_EPOCH,
            days_remaining: 3,
        }];
        let batch = NotificationBatch {
            kind: "mattress_rotation_notice",
            room_ids: vec![12],
            notices: &notices,
        };
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["room_ids"], serde_json::json!([12]));
        assert_eq!(json["notices"][0]["days_remaining"], 3);
    }

    #[tokio::test]
    async fn unreachable_service_is_a_downstream_failure() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/notify").unwrap();
        let err = notifier.notify_upcoming_rotations(&[]).await.unwrap_err();
        assert!(matches!(err, EngineError::Downstream(_)));
    }
}
