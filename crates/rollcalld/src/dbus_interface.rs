use crate::engine::EngineHandle;
use rollcall_store::{NewPerson, Store};
use std::time::Instant;
use zbus::interface;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
pub struct RollcallService {
    pub engine: EngineHandle,
    pub store: Store,
    pub frames_per_enroll: usize,
    pub camera_device: String,
    pub key_fingerprint: String,
    pub started: Instant,
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn opt(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Enroll a new person from the live camera. Empty shift strings take the
    /// default 09:00–18:00 shift.
    async fn enroll(
        &self,
        person_id: &str,
        name: &str,
        email: &str,
        department: &str,
        shift_start: &str,
        shift_end: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(person_id, name, "enroll requested");

        let result = self
            .engine
            .enroll(self.frames_per_enroll)
            .await
            .map_err(failed)?;

        let person = NewPerson {
            person_id: person_id.to_string(),
            name: name.to_string(),
            email: opt(email),
            department: opt(department),
            shift_start: if shift_start.is_empty() { "09:00" } else { shift_start }.to_string(),
            shift_end: if shift_end.is_empty() { "18:00" } else { shift_end }.to_string(),
        };

        self.store
            .add_person(person, &result.embedding)
            .await
            .map_err(failed)?;

        let gallery = self.store.load_gallery().await.map_err(failed)?;
        self.engine.reload_gallery(gallery).await.map_err(failed)?;

        tracing::info!(person_id, name, quality = result.quality_score, "person enrolled");

        Ok(serde_json::json!({
            "person_id": person_id,
            "name": name,
            "quality": result.quality_score,
        })
        .to_string())
    }

    /// Remove an enrolled person. Returns false if the id was not enrolled.
    async fn remove_person(&self, person_id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(person_id, "remove_person requested");

        let removed = self.store.delete_person(person_id).await.map_err(failed)?;
        if removed {
            let gallery = self.store.load_gallery().await.map_err(failed)?;
            self.engine.reload_gallery(gallery).await.map_err(failed)?;
        }
        Ok(removed)
    }

    /// Update a person's details (not their embedding). Returns false if the
    /// id is not enrolled.
    async fn update_person(
        &self,
        person_id: &str,
        name: &str,
        email: &str,
        department: &str,
        shift_start: &str,
        shift_end: &str,
    ) -> zbus::fdo::Result<bool> {
        tracing::info!(person_id, "update_person requested");

        match self
            .store
            .update_person(
                person_id,
                name,
                opt(email),
                opt(department),
                if shift_start.is_empty() { "09:00" } else { shift_start },
                if shift_end.is_empty() { "18:00" } else { shift_end },
            )
            .await
        {
            Ok(()) => Ok(true),
            Err(rollcall_store::StoreError::PersonNotFound(_)) => Ok(false),
            Err(e) => Err(failed(e)),
        }
    }

    /// List enrolled persons as JSON.
    async fn list_persons(&self) -> zbus::fdo::Result<String> {
        let persons = self.store.list_persons().await.map_err(failed)?;
        serde_json::to_string(&persons).map_err(failed)
    }

    /// Today's attendance as JSON.
    async fn today(&self) -> zbus::fdo::Result<String> {
        let rows = self.store.today_attendance().await.map_err(failed)?;
        serde_json::to_string(&rows).map_err(failed)
    }

    /// Recent raw detection logs as JSON, newest first.
    async fn recent_logs(&self, limit: u32) -> zbus::fdo::Result<String> {
        let limit = if limit == 0 { 100 } else { limit as usize };
        let rows = self.store.recent_logs(limit).await.map_err(failed)?;
        serde_json::to_string(&rows).map_err(failed)
    }

    /// Attendance report for a date range as JSON. Empty person_id means
    /// everyone.
    async fn report(
        &self,
        start_date: &str,
        end_date: &str,
        person_id: &str,
    ) -> zbus::fdo::Result<String> {
        let rows = self
            .store
            .attendance_report(start_date, end_date, opt(person_id))
            .await
            .map_err(failed)?;
        serde_json::to_string(&rows).map_err(failed)
    }

    /// Punctuality statistics for one person as JSON.
    async fn person_stats(&self, person_id: &str) -> zbus::fdo::Result<String> {
        let stats = self.store.person_stats(person_id).await.map_err(failed)?;
        serde_json::to_string(&stats).map_err(failed)
    }

    /// Export today's attendance to a CSV file on the daemon host.
    async fn export_csv(&self, path: &str) -> zbus::fdo::Result<String> {
        let rows = self
            .store
            .export_csv(std::path::Path::new(path))
            .await
            .map_err(failed)?;
        Ok(format!("exported {rows} rows to {path}"))
    }

    /// Daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let counts = self.store.counts().await.map_err(failed)?;
        let unknown = self.store.unknown_count().await.map_err(failed)?;

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": self.camera_device,
            "enrolled_persons": counts.total_persons,
            "present_today": counts.present_today,
            "unknown_sightings": unknown,
            "key_fingerprint": self.key_fingerprint,
            "uptime_secs": self.started.elapsed().as_secs(),
        })
        .to_string())
    }
}
