//! Audit event outbox.
//!
//! Audit emission must never affect ingestion outcome, so events are not
//! sent anywhere during the pipeline: they are queued as rows inside the
//! same outer transaction as the work they describe, and a dispatch pass
//! picks up committed rows afterwards and hands them to an [`AuditSink`].
//! A failed dispatch leaves the row queued for the next pass.

use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// A queued audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Row id assigned on persist
    pub id: i64,
    /// Event type (e.g. `module_version_indexed`)
    pub event_type: String,
    /// The `namespace/module/provider version` the event concerns
    pub subject: String,
    /// Structured event payload
    pub payload: serde_json::Value,
}

/// Destination for dispatched audit events.
///
/// Implementations deliver events to wherever the deployment keeps its
/// audit trail. Delivery failures keep the event queued; they can never
/// fail the ingestion that produced it.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Sink name, for logs.
    fn name(&self) -> &'static str;

    /// Deliver one event.
    ///
    /// # Errors
    ///
    /// Returns an error when delivery fails; the event stays queued.
    async fn emit(&self, event: &AuditEvent) -> Result<()>;
}

/// The default sink: a structured log record per event.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AuditSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn emit(&self, event: &AuditEvent) -> Result<()> {
        tracing::info!(
            target: "terravault::audit",
            event_type = %event.event_type,
            subject = %event.subject,
            payload = %event.payload,
            "audit event"
        );
        Ok(())
    }
}

/// Queue an audit event inside the caller's transaction scope.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub fn queue_event(
    conn: &Connection,
    event_type: &str,
    subject: &str,
    payload: &serde_json::Value,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO audit_events (event_type, subject, payload, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            event_type,
            subject,
            payload.to_string(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Dispatch every committed, undispatched event to the default log sink.
///
/// # Errors
///
/// Returns a storage error on database failure.
pub async fn dispatch_pending(db: &crate::store::Database) -> Result<usize> {
    dispatch_pending_to(db, &LogSink).await
}

/// Dispatch every committed, undispatched event to `sink`, marking each
/// row dispatched only after the sink accepted it. Returns the number
/// dispatched.
///
/// # Errors
///
/// Returns a storage error on database failure. Sink failures stop the
/// pass and leave the remaining events queued.
pub async fn dispatch_pending_to(db: &crate::store::Database, sink: &dyn AuditSink) -> Result<usize> {
    let pending: Vec<AuditEvent> = db
        .read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, event_type, subject, payload FROM audit_events
                 WHERE dispatched_at IS NULL ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                let payload_text: String = row.get(3)?;
                Ok(AuditEvent {
                    id: row.get(0)?,
                    event_type: row.get(1)?,
                    subject: row.get(2)?,
                    payload: serde_json::from_str(&payload_text)
                        .unwrap_or(serde_json::Value::Null),
                })
            })?;
            rows.collect()
        })
        .await?;

    let mut dispatched = 0usize;
    for event in pending {
        if let Err(e) = sink.emit(&event).await {
            tracing::warn!(
                sink = sink.name(),
                event_id = event.id,
                error = %e,
                "Audit sink rejected event, leaving it queued"
            );
            break;
        }

        db.read(|conn| {
            conn.execute(
                "UPDATE audit_events SET dispatched_at = ?2 WHERE id = ?1",
                params![event.id, Utc::now().to_rfc3339()],
            )
            .map(|_| ())
        })
        .await?;
        dispatched += 1;
    }

    if dispatched > 0 {
        tracing::debug!(count = dispatched, "Dispatched audit events");
    }
    Ok(dispatched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_queued_events_roll_back_with_transaction() {
        let db = Database::open_in_memory().unwrap();
        {
            let tx = db.begin().await.unwrap();
            queue_event(
                tx.conn(),
                "module_version_indexed",
                "alice/net/aws 1.0.0",
                &serde_json::json!({"published": true}),
            )
            .unwrap();
            // Dropped without commit — event must vanish with the work
        }

        assert_eq!(dispatch_pending(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_marks_rows() {
        let db = Database::open_in_memory().unwrap();
        let tx = db.begin().await.unwrap();
        queue_event(
            tx.conn(),
            "module_version_indexed",
            "alice/net/aws 1.0.0",
            &serde_json::json!({"published": true}),
        )
        .unwrap();
        tx.commit().unwrap();

        assert_eq!(dispatch_pending(&db).await.unwrap(), 1);
        // Second pass has nothing left
        assert_eq!(dispatch_pending(&db).await.unwrap(), 0);
    }

    struct FailingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl AuditSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn emit(&self, _event: &AuditEvent) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(crate::err!(Internal {
                message: "sink offline".to_string(),
            }))
        }
    }

    #[tokio::test]
    async fn test_failed_sink_leaves_events_queued() {
        let db = Database::open_in_memory().unwrap();
        let tx = db.begin().await.unwrap();
        queue_event(tx.conn(), "e", "s", &serde_json::json!({})).unwrap();
        tx.commit().unwrap();

        let sink = FailingSink {
            attempts: AtomicUsize::new(0),
        };
        assert_eq!(dispatch_pending_to(&db, &sink).await.unwrap(), 0);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);

        // The event is still queued for a healthy sink
        assert_eq!(dispatch_pending(&db).await.unwrap(), 1);
    }
}
