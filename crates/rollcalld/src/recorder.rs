//! The recorder task — the single writer over the attendance store.
//!
//! Consumes pipeline events, applies the dedup gates, and persists what gets
//! through. Inference never touches the database directly.

use crate::attendance::AttendanceGates;
use crate::engine::PipelineEvent;
use rollcall_store::Store;
use std::time::Instant;
use tokio::sync::mpsc;

/// Spawn the recorder. Exits when the event channel closes.
pub fn spawn_recorder(
    store: Store,
    mut gates: AttendanceGates,
    mut events: mpsc::Receiver<PipelineEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("recorder task started");
        while let Some(event) = events.recv().await {
            handle_event(&store, &mut gates, event, Instant::now()).await;
        }
        tracing::info!("recorder task exiting");
    })
}

async fn handle_event(
    store: &Store,
    gates: &mut AttendanceGates,
    event: PipelineEvent,
    now: Instant,
) {
    match event {
        PipelineEvent::Recognized {
            person_id,
            name,
            similarity,
            ..
        } => {
            if gates.raw_log_due(&person_id, now) {
                if let Err(e) = store.log_detection(&person_id, &name).await {
                    tracing::error!(error = %e, person_id = %person_id, "failed to log detection");
                }
            }

            if gates.sync_due(&person_id, now) {
                match store.sync_attendance(&person_id).await {
                    Ok(outcome) => {
                        tracing::info!(
                            person_id = %person_id,
                            similarity,
                            "{}",
                            outcome.describe(&name)
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, person_id = %person_id, "attendance sync failed");
                    }
                }
            }
        }
        PipelineEvent::Unknown {
            track_id,
            snapshot_path,
            embedding,
        } => {
            // Every unknown track is persisted (the engine already emits one
            // event per track); the cooldown only rate-limits the alert line.
            if let Err(e) = store
                .log_unknown(snapshot_path.as_deref().unwrap_or(""), &embedding)
                .await
            {
                tracing::error!(error = %e, "failed to log unknown face");
            }

            if gates.unknown_alert_due(now) {
                tracing::warn!(
                    track_id,
                    snapshot = snapshot_path.as_deref().unwrap_or("none"),
                    "unknown face observed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Embedding;
    use rollcall_store::{EmbeddingCipher, NewPerson};
    use std::time::Duration;

    fn gates() -> AttendanceGates {
        AttendanceGates::new(
            Duration::from_secs(90),
            Duration::from_secs(20),
            Duration::from_secs(15),
        )
    }

    fn recognized(person_id: &str, name: &str) -> PipelineEvent {
        PipelineEvent::Recognized {
            track_id: 1,
            person_id: person_id.into(),
            name: name.into(),
            similarity: 0.82,
        }
    }

    fn unknown(track_id: u64) -> PipelineEvent {
        PipelineEvent::Unknown {
            track_id,
            snapshot_path: None,
            embedding: Embedding {
                values: vec![0.1, 0.2],
                model_version: None,
            },
        }
    }

    async fn store_with_person(id: &str, name: &str) -> Store {
        let store = Store::open_in_memory(EmbeddingCipher::from_key_bytes(&[1u8; 32]))
            .await
            .unwrap();
        store
            .add_person(
                NewPerson {
                    person_id: id.into(),
                    name: name.into(),
                    email: None,
                    department: None,
                    shift_start: "09:00".into(),
                    shift_end: "18:00".into(),
                },
                &Embedding {
                    values: vec![1.0, 0.0],
                    model_version: None,
                },
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_repeated_sightings_record_once() {
        let store = store_with_person("e-1", "Priya").await;
        let mut g = gates();
        let t0 = Instant::now();

        // A burst of per-frame sightings inside both windows.
        for millis in [0u64, 100, 200, 300] {
            handle_event(
                &store,
                &mut g,
                recognized("e-1", "Priya"),
                t0 + Duration::from_millis(millis),
            )
            .await;
        }

        assert_eq!(store.recent_logs(100).await.unwrap().len(), 1);
        assert_eq!(store.counts().await.unwrap().present_today, 1);
    }

    #[tokio::test]
    async fn test_sighting_after_window_logs_again() {
        let store = store_with_person("e-1", "Priya").await;
        let mut g = gates();
        let t0 = Instant::now();

        handle_event(&store, &mut g, recognized("e-1", "Priya"), t0).await;
        handle_event(
            &store,
            &mut g,
            recognized("e-1", "Priya"),
            t0 + Duration::from_secs(91),
        )
        .await;

        assert_eq!(store.recent_logs(100).await.unwrap().len(), 2);
        // Still a single attendance row for the day.
        assert_eq!(store.counts().await.unwrap().present_today, 1);
    }

    #[tokio::test]
    async fn test_unrecognized_person_id_does_not_panic() {
        let store = store_with_person("e-1", "Priya").await;
        let mut g = gates();

        // Stale gallery entry referencing a deleted person: errors are logged,
        // the recorder keeps running.
        handle_event(&store, &mut g, recognized("ghost", "Ghost"), Instant::now()).await;
        assert_eq!(store.counts().await.unwrap().present_today, 0);
    }

    #[tokio::test]
    async fn test_every_unknown_track_is_persisted() {
        let store = store_with_person("e-1", "Priya").await;
        let mut g = gates();
        let t0 = Instant::now();

        // Two strangers 5 s apart: the second falls inside the alert
        // cooldown but its sighting must still reach the database.
        handle_event(&store, &mut g, unknown(7), t0).await;
        handle_event(&store, &mut g, unknown(8), t0 + Duration::from_secs(5)).await;
        handle_event(&store, &mut g, unknown(9), t0 + Duration::from_secs(16)).await;

        assert_eq!(store.unknown_count().await.unwrap(), 3);
    }
}
