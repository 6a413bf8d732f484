use std::sync::Arc;

use bytes::Bytes;
use denuncia_auth::Identity;
use denuncia_store::{
    Direction, Document, FieldTransform, Precondition, Query, SnapshotStream, StoreError,
};
use denuncia_types::{field, Note, ProtocolId, Report};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::NoteAppendMode;
use crate::error::{SdkError, SdkResult};
use crate::subscription::{DeliveryGate, SubscriptionHandle, SubscriptionMode};
use crate::upload::ResumableUpload;

/// The report access layer.
///
/// Direct request/response operations surface store failures unchanged in
/// the [`SdkError`] taxonomy: no retries, no caching. The live subscription
/// is the exception and downgrades failures to an empty snapshot plus a
/// diagnostic, because it has no caller to return them to.
#[derive(Clone, Debug)]
pub struct ReportAccess {
    client: Arc<Client>,
}

impl ReportAccess {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn collection(&self) -> &str {
        &self.client.settings.sdk.collection
    }

    // ---- Session ----

    /// The current identity, signing in anonymously on first use.
    pub async fn ensure_session(&self) -> SdkResult<Identity> {
        Ok(self.client.sessions.ensure_session().await?)
    }

    /// End the current session; the next `ensure_session` issues a new one.
    pub async fn sign_out(&self) -> SdkResult<()> {
        Ok(self.client.sessions.sign_out().await?)
    }

    // ---- Attachments ----

    /// Upload `data` to `path` (usually from [`attachment_path`](crate::attachment_path))
    /// and return its download URL.
    pub async fn upload_attachment(&self, path: &str, data: Bytes) -> SdkResult<String> {
        self.upload_attachment_with_type(path, data, None).await
    }

    pub async fn upload_attachment_with_type(
        &self,
        path: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> SdkResult<String> {
        let sdk = &self.client.settings.sdk;
        let upload = ResumableUpload {
            store: self.client.blobs.as_ref(),
            chunk_size: sdk.upload_chunk_size,
            max_resume_attempts: sdk.max_resume_attempts,
        };
        let metadata = upload
            .run(path, data, content_type)
            .await
            .map_err(SdkError::Upload)?;
        let url = self
            .client
            .blobs
            .download_url(&metadata.path)
            .await
            .map_err(SdkError::Upload)?;
        info!(path = %metadata.path, size = metadata.size, "attachment uploaded");
        Ok(url)
    }

    // ---- Reports ----

    /// Create the report or merge `data` into it.
    ///
    /// `createdAt` is stamped only when the report does not carry one yet, so
    /// replaying a submission never moves the creation time. `notes` cannot be
    /// written here, since a merge would replace the stored list; use
    /// [`add_admin_note`](Self::add_admin_note).
    pub async fn create_or_replace_report(
        &self,
        protocol: &ProtocolId,
        data: Map<String, Value>,
    ) -> SdkResult<Report> {
        reject_reserved(&data)?;
        reject_notes(&data)?;
        let transforms = [FieldTransform::ServerTimestampIfAbsent(field::CREATED_AT.into())];
        let doc = self
            .client
            .documents
            .set_merge(self.collection(), protocol.as_str(), data, &transforms)
            .await
            .map_err(SdkError::Write)?;
        debug!(protocol = %protocol, version = doc.version, "report written");
        decode(protocol.clone(), &doc)
    }

    /// Fetch one report; `Ok(None)` when it does not exist.
    pub async fn get_report_by_protocol(&self, protocol: &ProtocolId) -> SdkResult<Option<Report>> {
        let doc = self
            .client
            .documents
            .get(self.collection(), protocol.as_str())
            .await
            .map_err(SdkError::Read)?;
        doc.map(|doc| decode(protocol.clone(), &doc)).transpose()
    }

    /// Apply `patch` to an existing report and stamp `updatedAt`.
    ///
    /// `notes` cannot be patched; use [`add_admin_note`](Self::add_admin_note).
    pub async fn update_report(
        &self,
        id: &ProtocolId,
        patch: Map<String, Value>,
    ) -> SdkResult<Report> {
        reject_reserved(&patch)?;
        reject_notes(&patch)?;
        let doc = self
            .client
            .documents
            .update(
                self.collection(),
                id.as_str(),
                patch,
                &updated_stamp(),
                Precondition::Exists,
            )
            .await
            .map_err(SdkError::Write)?;
        debug!(protocol = %id, version = doc.version, "report updated");
        decode(id.clone(), &doc)
    }

    /// Append `note` to the end of the report's notes and stamp `updatedAt`.
    ///
    /// Behaviour under concurrency depends on the configured
    /// [`NoteAppendMode`]. In `ReadModifyWrite` mode two overlapping calls for
    /// the same report can lose one note; serialize calls per report id.
    pub async fn add_admin_note(&self, id: &ProtocolId, note: Note) -> SdkResult<Report> {
        let mode = self.client.settings.sdk.note_append_mode;
        let doc = match mode {
            NoteAppendMode::Atomic => self
                .client
                .documents
                .append_to_array(
                    self.collection(),
                    id.as_str(),
                    field::NOTES,
                    note.into_value(),
                    &updated_stamp(),
                )
                .await
                .map_err(SdkError::Write)?,
            NoteAppendMode::Optimistic | NoteAppendMode::ReadModifyWrite => {
                self.append_via_snapshot(id, note, mode).await?
            }
        };
        debug!(protocol = %id, ?mode, version = doc.version, "admin note appended");
        decode(id.clone(), &doc)
    }

    async fn append_via_snapshot(
        &self,
        id: &ProtocolId,
        note: Note,
        mode: NoteAppendMode,
    ) -> SdkResult<Document> {
        let collection = self.collection();
        let current = self
            .client
            .documents
            .get(collection, id.as_str())
            .await
            .map_err(SdkError::Read)?
            .ok_or_else(|| {
                SdkError::Write(StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })
            })?;

        let mut notes = match current.fields.get(field::NOTES) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(SdkError::Decode {
                    id: id.to_string(),
                    source: denuncia_types::TypeError::InvalidField {
                        field: field::NOTES.into(),
                        reason: "expected an array".into(),
                    },
                })
            }
        };
        notes.push(note.into_value());

        let precondition = match mode {
            NoteAppendMode::Optimistic => Precondition::Version(current.version),
            _ => Precondition::Exists,
        };
        let mut patch = Map::new();
        patch.insert(field::NOTES.to_string(), Value::Array(notes));

        self.client
            .documents
            .update(collection, id.as_str(), patch, &updated_stamp(), precondition)
            .await
            .map_err(|e| match e {
                StoreError::Conflict {
                    id,
                    expected,
                    actual,
                } => SdkError::Conflict {
                    id,
                    expected,
                    actual,
                },
                other => SdkError::Write(other),
            })
    }

    // ---- Subscription ----

    /// Subscribe to every report, newest first when the store can order by
    /// creation time, in store order otherwise.
    ///
    /// `callback` receives the full current sequence on subscribe and after
    /// every change. Store failures are logged and delivered as an empty
    /// sequence; this never fails.
    pub async fn subscribe_reports<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(Vec<Report>) + Send + Sync + 'static,
    {
        let gate = DeliveryGate::new();
        let (mode, opened) = self.open_report_stream().await;

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "report subscription could not be established");
                gate.deliver(|| callback(Vec::new()));
                return SubscriptionHandle::new(mode, gate, None);
            }
        };

        info!(?mode, "report subscription established");
        let task_gate = Arc::clone(&gate);
        let task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let reports = match item {
                    Ok(docs) => decode_snapshot(docs),
                    Err(e) => {
                        warn!(error = %e, "report subscription failed");
                        Vec::new()
                    }
                };
                if !task_gate.deliver(|| callback(reports)) {
                    break;
                }
            }
            debug!("report subscription stream ended");
        });
        SubscriptionHandle::new(mode, gate, Some(task))
    }

    /// Probe for server-side ordering and open the matching stream, falling
    /// back to an unordered one when ordering is unavailable.
    async fn open_report_stream(&self) -> (SubscriptionMode, Result<SnapshotStream, StoreError>) {
        let documents = &self.client.documents;
        let collection = self.collection();

        let ordering = match documents.ordering_available(collection, field::CREATED_AT).await {
            Ok(available) => available,
            Err(e) => {
                warn!(error = %e, "ordering probe failed");
                false
            }
        };

        if ordering {
            let ordered = Query::collection(collection)
                .order_by(field::CREATED_AT, Direction::Descending);
            match documents.subscribe(ordered).await {
                Ok(stream) => return (SubscriptionMode::Ordered, Ok(stream)),
                Err(e) => warn!(error = %e, "ordered subscription failed, falling back"),
            }
        } else {
            warn!(collection, "creation-time ordering unavailable, subscribing unordered");
        }

        let unordered = documents.subscribe(Query::collection(collection)).await;
        (SubscriptionMode::Unordered, unordered)
    }
}

fn updated_stamp() -> [FieldTransform; 1] {
    [FieldTransform::ServerTimestamp(field::UPDATED_AT.into())]
}

fn reject_reserved(data: &Map<String, Value>) -> SdkResult<()> {
    match data.keys().find(|k| field::is_reserved(k)) {
        Some(key) => Err(SdkError::InvalidInput(format!(
            "field {key} is managed by the store"
        ))),
        None => Ok(()),
    }
}

fn reject_notes(data: &Map<String, Value>) -> SdkResult<()> {
    if data.contains_key(field::NOTES) {
        return Err(SdkError::InvalidInput(
            "notes are append-only; use add_admin_note".into(),
        ));
    }
    Ok(())
}

fn decode(id: ProtocolId, doc: &Document) -> SdkResult<Report> {
    Report::from_fields(id.clone(), &doc.fields).map_err(|source| SdkError::Decode {
        id: id.into_inner(),
        source,
    })
}

fn decode_snapshot(docs: Vec<Document>) -> Vec<Report> {
    docs.into_iter()
        .filter_map(|doc| {
            let decoded = ProtocolId::new(doc.id.clone())
                .map_err(|source| SdkError::Decode {
                    id: doc.id.clone(),
                    source,
                })
                .and_then(|id| decode(id, &doc));
            match decoded {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(id = %doc.id, error = %e, "skipping undecodable report");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use denuncia_store::{AccessRules, BlobStore, DocumentStore, StoreResult};
    use serde_json::json;
    use tokio::sync::{mpsc, Barrier};

    use crate::client::InMemoryBackends;
    use crate::config::Settings;

    fn setup_with(mode: NoteAppendMode) -> (InMemoryBackends, ReportAccess) {
        let mut settings = Settings::fallback();
        settings.sdk.note_append_mode = mode;
        settings.sdk.upload_chunk_size = 1024;
        let backends = InMemoryBackends::new(&settings);
        let access = ReportAccess::new(Arc::new(backends.client(settings)));
        (backends, access)
    }

    fn setup() -> (InMemoryBackends, ReportAccess) {
        setup_with(NoteAppendMode::Atomic)
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn pid(code: &str) -> ProtocolId {
        ProtocolId::new(code).unwrap()
    }

    async fn next_snapshot(rx: &mut mpsc::UnboundedReceiver<Vec<Report>>) -> Vec<Report> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("snapshot should arrive")
            .expect("channel open")
    }

    fn ids(reports: &[Report]) -> Vec<&str> {
        reports.iter().map(|r| r.id.as_str()).collect()
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn ensure_session_issues_once() {
        let (backends, access) = setup();
        let a = access.ensure_session().await.unwrap();
        let b = access.ensure_session().await.unwrap();
        assert_eq!(a.uid, b.uid);
        assert_eq!(backends.identity.sign_in_requests(), 1);

        access.sign_out().await.unwrap();
        let c = access.ensure_session().await.unwrap();
        assert_ne!(a.uid, c.uid);
    }

    #[tokio::test]
    async fn disabled_anonymous_auth_is_auth_error() {
        let (backends, access) = setup();
        backends.identity.set_anonymous_enabled(false);
        assert!(matches!(access.ensure_session().await, Err(SdkError::Auth(_))));
    }

    // -----------------------------------------------------------------------
    // Create / read / update
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn create_twice_keeps_one_report() {
        let (backends, access) = setup();
        let p = pid("2024-0007");
        access.create_or_replace_report(&p, data(json!({"status": "new", "a": 1}))).await.unwrap();
        access.create_or_replace_report(&p, data(json!({"status": "open"}))).await.unwrap();

        assert_eq!(backends.documents.len("reports"), 1);
        let report = access.get_report_by_protocol(&p).await.unwrap().unwrap();
        assert_eq!(report.status(), Some("open"));
        assert_eq!(report.get("a"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn replay_does_not_reset_created_at() {
        let (_, access) = setup();
        let p = pid("2024-0008");
        let first = access.create_or_replace_report(&p, Map::new()).await.unwrap();
        let second = access.create_or_replace_report(&p, Map::new()).await.unwrap();
        assert!(first.created_at.is_some());
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn missing_report_is_none() {
        let (_, access) = setup();
        assert!(access.get_report_by_protocol(&pid("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_denied_is_read_error() {
        let (backends, access) = setup();
        backends.documents.set_rules(AccessRules::locked());
        let err = access.get_report_by_protocol(&pid("x")).await.unwrap_err();
        assert!(matches!(err, SdkError::Read(StoreError::PermissionDenied(_))));
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn write_denied_is_write_error() {
        let (backends, access) = setup();
        backends.documents.set_rules(AccessRules::read_only());
        let err = access.create_or_replace_report(&pid("x"), Map::new()).await.unwrap_err();
        assert!(matches!(err, SdkError::Write(StoreError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn reserved_fields_are_rejected() {
        let (_, access) = setup();
        for key in ["id", "createdAt", "updatedAt"] {
            let mut payload = Map::new();
            payload.insert(key.into(), json!("x"));
            let err = access.create_or_replace_report(&pid("r"), payload).await.unwrap_err();
            assert!(matches!(err, SdkError::InvalidInput(_)), "{key} should be rejected");
        }
        let err = access
            .create_or_replace_report(&pid("r"), data(json!({"notes": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn update_missing_report_is_write_error() {
        let (backends, access) = setup();
        let err = access
            .update_report(&pid("ghost"), data(json!({"status": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Write(StoreError::NotFound { .. })));
        assert!(err.is_not_found());
        assert!(backends.documents.is_empty("reports"));
    }

    #[tokio::test]
    async fn update_cannot_touch_notes() {
        let (_, access) = setup();
        let p = pid("r1");
        access.create_or_replace_report(&p, Map::new()).await.unwrap();
        let err = access.update_report(&p, data(json!({"notes": []}))).await.unwrap_err();
        assert!(matches!(err, SdkError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn end_to_end_submission_and_review() {
        let (_, access) = setup();
        let p = pid("2024-0001");
        access
            .create_or_replace_report(&p, data(json!({"status": "new"})))
            .await
            .unwrap();

        let report = access.get_report_by_protocol(&p).await.unwrap().unwrap();
        assert_eq!(report.id.as_str(), "2024-0001");
        assert_eq!(report.status(), Some("new"));
        let created = report.created_at.expect("createdAt stamped");
        assert!(report.updated_at.is_none());

        access
            .update_report(&p, data(json!({"status": "reviewing"})))
            .await
            .unwrap();
        let report = access.get_report_by_protocol(&p).await.unwrap().unwrap();
        assert_eq!(report.status(), Some("reviewing"));
        assert_eq!(report.created_at, Some(created));
        assert!(report.updated_at.unwrap().is_after(&created));
    }

    // -----------------------------------------------------------------------
    // Notes
    // -----------------------------------------------------------------------

    async fn sequential_notes_in_order(mode: NoteAppendMode) {
        let (_, access) = setup_with(mode);
        let p = pid("2024-0100");
        access.create_or_replace_report(&p, Map::new()).await.unwrap();
        let notes = vec![
            Note::from("received"),
            Note::from(json!({"by": "admin", "text": "escalated"})),
            Note::from("closed"),
        ];
        for note in &notes {
            access.add_admin_note(&p, note.clone()).await.unwrap();
        }
        let report = access.get_report_by_protocol(&p).await.unwrap().unwrap();
        assert_eq!(report.notes, notes, "mode {mode:?}");
        assert!(report.updated_at.is_some());
    }

    #[tokio::test]
    async fn sequential_notes_keep_call_order() {
        for mode in [
            NoteAppendMode::Atomic,
            NoteAppendMode::Optimistic,
            NoteAppendMode::ReadModifyWrite,
        ] {
            sequential_notes_in_order(mode).await;
        }
    }

    #[tokio::test]
    async fn note_on_missing_report_is_write_error() {
        for mode in [
            NoteAppendMode::Atomic,
            NoteAppendMode::Optimistic,
            NoteAppendMode::ReadModifyWrite,
        ] {
            let (_, access) = setup_with(mode);
            let err = access.add_admin_note(&pid("ghost"), Note::from("n")).await.unwrap_err();
            assert!(err.is_not_found(), "mode {mode:?}: {err}");
        }
    }

    #[tokio::test]
    async fn notes_survive_report_replay() {
        let (_, access) = setup();
        let p = pid("r1");
        access.create_or_replace_report(&p, data(json!({"status": "new"}))).await.unwrap();
        access.add_admin_note(&p, Note::from("first")).await.unwrap();
        access.create_or_replace_report(&p, data(json!({"status": "new"}))).await.unwrap();
        let report = access.get_report_by_protocol(&p).await.unwrap().unwrap();
        assert_eq!(report.notes, vec![Note::from("first")]);
    }

    #[tokio::test]
    async fn replay_cannot_overwrite_notes() {
        let (_, access) = setup();
        let p = pid("2024-0300");
        access.create_or_replace_report(&p, data(json!({"status": "new"}))).await.unwrap();
        access.add_admin_note(&p, Note::from("a")).await.unwrap();
        access.add_admin_note(&p, Note::from("b")).await.unwrap();

        for notes in [json!([]), json!(["forged"])] {
            let mut payload = data(json!({"status": "new"}));
            payload.insert("notes".into(), notes);
            let err = access.create_or_replace_report(&p, payload).await.unwrap_err();
            assert!(matches!(err, SdkError::InvalidInput(_)));
        }

        let report = access.get_report_by_protocol(&p).await.unwrap().unwrap();
        assert_eq!(report.notes, vec![Note::from("a"), Note::from("b")]);
    }

    #[tokio::test]
    async fn first_submission_cannot_seed_notes() {
        let (backends, access) = setup();
        let err = access
            .create_or_replace_report(&pid("2024-0301"), data(json!({"notes": ["x"]})))
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::InvalidInput(_)));
        assert!(backends.documents.is_empty("reports"));
    }

    /// Wraps a store so that every `get` waits until `parties` reads are in
    /// flight, forcing concurrent read-modify-write cycles to overlap.
    struct LockstepReads {
        inner: Arc<dyn DocumentStore>,
        barrier: Barrier,
    }

    #[async_trait]
    impl DocumentStore for LockstepReads {
        async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
            let doc = self.inner.get(collection, id).await;
            self.barrier.wait().await;
            doc
        }

        async fn set_merge(
            &self,
            collection: &str,
            id: &str,
            fields: Map<String, Value>,
            transforms: &[FieldTransform],
        ) -> StoreResult<Document> {
            self.inner.set_merge(collection, id, fields, transforms).await
        }

        async fn update(
            &self,
            collection: &str,
            id: &str,
            fields: Map<String, Value>,
            transforms: &[FieldTransform],
            precondition: Precondition,
        ) -> StoreResult<Document> {
            self.inner.update(collection, id, fields, transforms, precondition).await
        }

        async fn append_to_array(
            &self,
            collection: &str,
            id: &str,
            field: &str,
            value: Value,
            transforms: &[FieldTransform],
        ) -> StoreResult<Document> {
            self.inner.append_to_array(collection, id, field, value, transforms).await
        }

        async fn ordering_available(&self, collection: &str, field: &str) -> StoreResult<bool> {
            self.inner.ordering_available(collection, field).await
        }

        async fn subscribe(&self, query: Query) -> StoreResult<SnapshotStream> {
            self.inner.subscribe(query).await
        }
    }

    async fn concurrent_pair(mode: NoteAppendMode) -> (SdkResult<Report>, SdkResult<Report>, Vec<Note>) {
        let mut settings = Settings::fallback();
        settings.sdk.note_append_mode = mode;
        let backends = InMemoryBackends::new(&settings);
        let store = Arc::new(LockstepReads {
            inner: backends.documents.clone(),
            barrier: Barrier::new(2),
        });
        let client = Client::new(settings, store, backends.blobs.clone(), backends.identity.clone());
        let access = ReportAccess::new(Arc::new(client));

        let p = pid("2024-0200");
        access.create_or_replace_report(&p, Map::new()).await.unwrap();

        let (a, b) = tokio::join!(
            access.add_admin_note(&p, Note::from("n1")),
            access.add_admin_note(&p, Note::from("n2")),
        );
        let stored = backends.documents.documents("reports");
        let notes = Report::from_fields(p.clone(), &stored[0].fields).unwrap().notes;
        (a, b, notes)
    }

    #[tokio::test]
    async fn read_modify_write_race_loses_a_note() {
        let (a, b, notes) = concurrent_pair(NoteAppendMode::ReadModifyWrite).await;
        // Both calls report success...
        assert!(a.is_ok() && b.is_ok());
        // ...but each wrote back its own snapshot, so only one note survives.
        assert_eq!(notes.len(), 1);
        assert!(notes[0] == Note::from("n1") || notes[0] == Note::from("n2"));
    }

    #[tokio::test]
    async fn optimistic_mode_reports_conflict() {
        let (a, b, notes) = concurrent_pair(NoteAppendMode::Optimistic).await;
        let conflicts = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(SdkError::Conflict { .. })))
            .count();
        assert_eq!(conflicts, 1);
        assert_eq!(notes.len(), 1);
    }

    #[tokio::test]
    async fn atomic_mode_keeps_both_notes() {
        let mut settings = Settings::fallback();
        settings.sdk.note_append_mode = NoteAppendMode::Atomic;
        let backends = InMemoryBackends::new(&settings);
        let access = ReportAccess::new(Arc::new(backends.client(settings)));
        let p = pid("2024-0201");
        access.create_or_replace_report(&p, Map::new()).await.unwrap();

        let (a, b) = tokio::join!(
            access.add_admin_note(&p, Note::from("n1")),
            access.add_admin_note(&p, Note::from("n2")),
        );
        a.unwrap();
        b.unwrap();
        let report = access.get_report_by_protocol(&p).await.unwrap().unwrap();
        assert_eq!(report.notes.len(), 2);
    }

    // -----------------------------------------------------------------------
    // Attachments
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn uploaded_url_resolves_to_same_bytes() {
        let (backends, access) = setup();
        let path = crate::attachment_path(&pid("2024-0001"), "evidence.bin").unwrap();
        let bytes = Bytes::from(vec![7u8; 5000]);
        let url = access.upload_attachment(&path, bytes.clone()).await.unwrap();
        assert_eq!(backends.blobs.fetch(&url).await.unwrap(), bytes);
    }

    #[tokio::test]
    async fn upload_survives_transient_interruption() {
        let (backends, access) = setup();
        backends.blobs.interrupt_next_chunks(1);
        let bytes = Bytes::from(vec![1u8; 3000]);
        let url = access.upload_attachment("reports/r/a", bytes.clone()).await.unwrap();
        assert_eq!(backends.blobs.fetch(&url).await.unwrap(), bytes);
    }

    #[tokio::test]
    async fn rejected_upload_is_upload_error() {
        let (backends, access) = setup();
        backends.blobs.set_writable(false);
        let err = access
            .upload_attachment_with_type("reports/r/a", Bytes::from_static(b"x"), Some("text/plain"))
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Upload(StoreError::PermissionDenied(_))));
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    async fn seed_three(access: &ReportAccess) {
        for code in ["t3", "t2", "t1"] {
            access.create_or_replace_report(&pid(code), Map::new()).await.unwrap();
        }
    }

    fn channel_callback() -> (impl Fn(Vec<Report>) + Send + Sync + 'static, mpsc::UnboundedReceiver<Vec<Report>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (move |reports| {
            let _ = tx.send(reports);
        }, rx)
    }

    #[tokio::test]
    async fn ordered_subscription_is_newest_first() {
        let (_, access) = setup();
        // Created in order t3, t2, t1, so t1 is the newest.
        seed_three(&access).await;

        let (callback, mut rx) = channel_callback();
        let handle = access.subscribe_reports(callback).await;
        assert_eq!(handle.mode(), SubscriptionMode::Ordered);
        assert_eq!(ids(&next_snapshot(&mut rx).await), ["t1", "t2", "t3"]);

        access.create_or_replace_report(&pid("t0"), Map::new()).await.unwrap();
        assert_eq!(ids(&next_snapshot(&mut rx).await), ["t0", "t1", "t2", "t3"]);
        handle.cancel();
    }

    #[tokio::test]
    async fn falls_back_when_ordering_unavailable() {
        let (backends, access) = setup();
        backends.documents.drop_index("reports", "createdAt");
        seed_three(&access).await;

        let (callback, mut rx) = channel_callback();
        let handle = access.subscribe_reports(callback).await;
        assert_eq!(handle.mode(), SubscriptionMode::Unordered);

        let mut got = ids(&next_snapshot(&mut rx).await)
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        got.sort();
        assert_eq!(got, ["t1", "t2", "t3"]);
        handle.cancel();
    }

    #[tokio::test]
    async fn no_callbacks_after_cancel() {
        let (backends, access) = setup();
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        let handle = access
            .subscribe_reports(move |_| *counter.lock().unwrap() += 1)
            .await;

        // Wait for the initial snapshot.
        for _ in 0..100 {
            if *calls.lock().unwrap() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*calls.lock().unwrap(), 1);

        handle.cancel();
        assert!(!handle.is_active());
        let after_cancel = *calls.lock().unwrap();

        for i in 0..5 {
            access
                .create_or_replace_report(&pid(&format!("later-{i}")), Map::new())
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*calls.lock().unwrap(), after_cancel);
        assert_eq!(backends.documents.len("reports"), 5);
    }

    #[tokio::test]
    async fn cancel_from_inside_callback() {
        let (_, access) = setup();
        let slot: Arc<Mutex<Option<Arc<SubscriptionHandle>>>> = Arc::new(Mutex::new(None));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&slot);
        let handle = Arc::new(
            access
                .subscribe_reports(move |reports| {
                    let _ = tx.send(reports.len());
                    if let Some(handle) = inner.lock().unwrap().as_ref() {
                        handle.cancel();
                    }
                })
                .await,
        );
        *slot.lock().unwrap() = Some(Arc::clone(&handle));

        // The initial snapshot may have raced the slot assignment; trigger one
        // more delivery which is guaranteed to see the handle.
        access.create_or_replace_report(&pid("x"), Map::new()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.is_active() {
                rx.recv().await;
            }
        })
        .await
        .expect("callback should cancel its own subscription");

        let delivered = {
            let mut n = 0;
            while rx.try_recv().is_ok() {
                n += 1;
            }
            n
        };
        access.create_or_replace_report(&pid("y"), Map::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "no delivery after self-cancel ({delivered} drained)");
    }

    #[tokio::test]
    async fn subscription_error_delivers_empty_sequence() {
        let (backends, access) = setup();
        seed_three(&access).await;
        let (callback, mut rx) = channel_callback();
        let _handle = access.subscribe_reports(callback).await;
        assert_eq!(next_snapshot(&mut rx).await.len(), 3);

        backends.documents.fail_watchers("connection reset");
        assert!(next_snapshot(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn unestablishable_subscription_delivers_empty_sequence() {
        let (backends, access) = setup();
        backends.documents.set_rules(AccessRules::locked());
        let (callback, mut rx) = channel_callback();
        let handle = access.subscribe_reports(callback).await;
        assert_eq!(handle.mode(), SubscriptionMode::Unordered);
        assert!(next_snapshot(&mut rx).await.is_empty());
    }
}
