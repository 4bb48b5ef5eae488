use crate::auth::AuthContext;
use crate::domains::core::clock::Clock;
use crate::domains::core::photo_store::{content_digest, PhotoStore};
use crate::domains::core::repository::SyncableRepository;
use crate::domains::core::syncable::{EntityPayload, SyncRecord};
use crate::domains::records::types::{
    ClockEvent, LocationPoint, Photo, Report, ReportSeverity, TimeRecord,
};
use crate::domains::sync::queue::SyncQueueRepository;
use crate::errors::{ServiceResult, ValidationError};
use crate::validation::Validate;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Raw capture handed over by the camera layer
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub location_id: String,
    pub checkpoint_id: Option<String>,
    pub mime_type: String,
    pub caption: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub location_id: String,
    pub title: String,
    pub body: String,
    pub severity: ReportSeverity,
}

/// Creates field records offline. Every record is stored unsynced and
/// queued at the priority of its type in the same call.
pub struct FieldRecordService {
    time_records: Arc<dyn SyncableRepository<TimeRecord>>,
    locations: Arc<dyn SyncableRepository<LocationPoint>>,
    photos: Arc<dyn SyncableRepository<Photo>>,
    reports: Arc<dyn SyncableRepository<Report>>,
    photo_store: Arc<dyn PhotoStore>,
    queue: Arc<dyn SyncQueueRepository>,
    clock: Arc<dyn Clock>,
}

impl FieldRecordService {
    pub fn new(
        time_records: Arc<dyn SyncableRepository<TimeRecord>>,
        locations: Arc<dyn SyncableRepository<LocationPoint>>,
        photos: Arc<dyn SyncableRepository<Photo>>,
        reports: Arc<dyn SyncableRepository<Report>>,
        photo_store: Arc<dyn PhotoStore>,
        queue: Arc<dyn SyncQueueRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            time_records,
            locations,
            photos,
            reports,
            photo_store,
            queue,
            clock,
        }
    }

    pub async fn clock_in(
        &self,
        auth: &AuthContext,
        location_id: &str,
        position: Option<(f64, f64)>,
    ) -> ServiceResult<SyncRecord<TimeRecord>> {
        self.punch(auth, location_id, ClockEvent::ClockIn, position).await
    }

    pub async fn clock_out(
        &self,
        auth: &AuthContext,
        location_id: &str,
        position: Option<(f64, f64)>,
    ) -> ServiceResult<SyncRecord<TimeRecord>> {
        self.punch(auth, location_id, ClockEvent::ClockOut, position).await
    }

    async fn punch(
        &self,
        auth: &AuthContext,
        location_id: &str,
        event: ClockEvent,
        position: Option<(f64, f64)>,
    ) -> ServiceResult<SyncRecord<TimeRecord>> {
        let record = TimeRecord {
            user_id: auth.require_user()?.to_string(),
            location_id: location_id.to_string(),
            event,
            latitude: position.map(|(lat, _)| lat),
            longitude: position.map(|(_, lon)| lon),
        };
        let saved = self.persist(self.time_records.as_ref(), record).await?;
        log::info!("{:?} recorded at {} ({})", event, location_id, saved.local_id);
        Ok(saved)
    }

    pub async fn record_location(
        &self,
        auth: &AuthContext,
        latitude: f64,
        longitude: f64,
        accuracy: Option<f64>,
        recorded_at: DateTime<Utc>,
    ) -> ServiceResult<SyncRecord<LocationPoint>> {
        let point = LocationPoint {
            user_id: auth.require_user()?.to_string(),
            latitude,
            longitude,
            accuracy,
            recorded_at,
        };
        self.persist(self.locations.as_ref(), point).await
    }

    /// Store the bytes, then the metadata row. If the row cannot be saved
    /// the bytes are removed again.
    pub async fn capture_photo(&self, auth: &AuthContext, capture: NewPhoto) -> ServiceResult<SyncRecord<Photo>> {
        let mime: mime::Mime = capture
            .mime_type
            .parse()
            .map_err(|_| ValidationError::format("mime_type", "not a valid media type"))?;
        let extension = mime.subtype().as_str().to_string();

        let photo = Photo {
            user_id: auth.require_user()?.to_string(),
            location_id: capture.location_id,
            checkpoint_id: capture.checkpoint_id,
            storage_key: format!("{}.{}", Uuid::new_v4(), extension),
            mime_type: mime.essence_str().to_string(),
            byte_len: capture.bytes.len() as u64,
            sha256: content_digest(&capture.bytes),
            caption: capture.caption,
        };
        photo.validate()?;

        self.photo_store.write(&photo.storage_key, &capture.bytes).await?;
        let key = photo.storage_key.clone();
        match self.persist(self.photos.as_ref(), photo).await {
            Ok(saved) => {
                log::info!("Captured photo {} ({} bytes)", saved.local_id, saved.payload.byte_len);
                Ok(saved)
            }
            Err(e) => {
                if let Err(cleanup) = self.photo_store.delete(&key).await {
                    log::warn!("Failed to remove orphaned photo bytes {}: {}", key, cleanup);
                }
                Err(e)
            }
        }
    }

    pub async fn submit_report(&self, auth: &AuthContext, report: NewReport) -> ServiceResult<SyncRecord<Report>> {
        let report = Report {
            user_id: auth.require_user()?.to_string(),
            location_id: report.location_id,
            title: report.title.trim().to_string(),
            body: report.body,
            severity: report.severity,
        };
        let saved = self.persist(self.reports.as_ref(), report).await?;
        log::info!("Report {} submitted", saved.local_id);
        Ok(saved)
    }

    async fn persist<P: EntityPayload>(
        &self,
        repo: &dyn SyncableRepository<P>,
        payload: P,
    ) -> ServiceResult<SyncRecord<P>> {
        payload.validate()?;
        let saved = repo.save(&SyncRecord::new(payload, self.clock.now())).await?;
        self.queue
            .enqueue(P::ENTITY_TYPE, &saved.local_id.to_string(), P::ENTITY_TYPE.priority())
            .await?;
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::core::clock::SystemClock;
    use crate::domains::core::photo_store::mock::MemoryPhotoStore;
    use crate::domains::core::repository::SqliteSyncableRepository;
    use crate::domains::sync::types::{EntityType, SyncPriority};
    use crate::domains::sync::queue::SqliteSyncQueueRepository;
    use crate::errors::ServiceError;
    use crate::test_support::memory_pool;

    struct Harness {
        service: FieldRecordService,
        photos: Arc<SqliteSyncableRepository<Photo>>,
        store: Arc<MemoryPhotoStore>,
        queue: Arc<SqliteSyncQueueRepository>,
    }

    async fn harness() -> Harness {
        let pool = memory_pool().await;
        let clock = Arc::new(SystemClock);
        let photos = Arc::new(SqliteSyncableRepository::<Photo>::new(pool.clone()));
        let store = Arc::new(MemoryPhotoStore::default());
        let queue = Arc::new(SqliteSyncQueueRepository::new(pool.clone(), clock.clone()));
        let service = FieldRecordService::new(
            Arc::new(SqliteSyncableRepository::<TimeRecord>::new(pool.clone())),
            Arc::new(SqliteSyncableRepository::<LocationPoint>::new(pool.clone())),
            photos.clone(),
            Arc::new(SqliteSyncableRepository::<Report>::new(pool)),
            store.clone(),
            queue.clone(),
            clock,
        );
        Harness { service, photos, store, queue }
    }

    fn officer() -> AuthContext {
        AuthContext::new("officer-1", "ipad-1")
    }

    #[tokio::test]
    async fn test_clock_in_is_saved_and_queued_critical() {
        let h = harness().await;
        let record = h.service.clock_in(&officer(), "site-1", Some((40.0, -74.0))).await.unwrap();
        assert!(!record.is_synced);
        assert_eq!(record.payload.event, ClockEvent::ClockIn);

        let item = h
            .queue
            .find_outstanding(EntityType::TimeRecord, &record.local_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.priority, SyncPriority::Critical.as_i64());

        h.service.clock_out(&officer(), "site-1", None).await.unwrap();
        assert_eq!(h.queue.outstanding_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_invalid_input_is_neither_saved_nor_queued() {
        let h = harness().await;
        let err = h
            .service
            .record_location(&officer(), 95.0, 0.0, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(_)));

        let report = NewReport {
            location_id: "site-1".into(),
            title: "   ".into(),
            body: String::new(),
            severity: ReportSeverity::Info,
        };
        assert!(h.service.submit_report(&officer(), report).await.is_err());
        assert_eq!(h.queue.outstanding_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_capture_photo_stores_bytes_with_digest() {
        let h = harness().await;
        let capture = NewPhoto {
            location_id: "site-1".into(),
            checkpoint_id: Some("gate".into()),
            mime_type: "image/jpeg".into(),
            caption: Some("Broken fence".into()),
            bytes: b"\xff\xd8\xff\xe0jpeg".to_vec(),
        };
        let saved = h.service.capture_photo(&officer(), capture.clone()).await.unwrap();

        assert!(saved.payload.storage_key.ends_with(".jpeg"));
        assert_eq!(saved.payload.byte_len, capture.bytes.len() as u64);
        assert_eq!(saved.payload.sha256, content_digest(&capture.bytes));
        assert_eq!(h.store.read(&saved.payload.storage_key).await.unwrap(), capture.bytes);
        assert_eq!(h.photos.count_pending().await.unwrap(), 1);
        let item = h
            .queue
            .find_outstanding(EntityType::Photo, &saved.local_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.priority, SyncPriority::Low.as_i64());
    }

    #[tokio::test]
    async fn test_capture_rejects_non_images_before_writing() {
        let h = harness().await;
        let capture = NewPhoto {
            location_id: "site-1".into(),
            checkpoint_id: None,
            mime_type: "application/pdf".into(),
            caption: None,
            bytes: b"%PDF".to_vec(),
        };
        assert!(h.service.capture_photo(&officer(), capture).await.is_err());
        assert!(h.store.files.lock().unwrap().is_empty());

        let empty = NewPhoto {
            location_id: "site-1".into(),
            checkpoint_id: None,
            mime_type: "image/png".into(),
            caption: None,
            bytes: Vec::new(),
        };
        assert!(h.service.capture_photo(&officer(), empty).await.is_err());
        assert_eq!(h.photos.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_signed_out_user_is_rejected() {
        let h = harness().await;
        let anonymous = AuthContext::new("", "ipad-1");
        assert!(matches!(
            h.service.clock_in(&anonymous, "site-1", None).await,
            Err(ServiceError::Authentication(_))
        ));
    }
}
