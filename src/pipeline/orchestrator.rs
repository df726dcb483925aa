// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Orchestrator
//!
//! Processes one participant's pending files, one page at a time.
//!
//! ## Per page
//!
//! 1. Download, decrypt and bin every file on the worker pool. Files that
//!    fail fatally are held back; files with no usable rows are retired.
//! 2. Group bins by chunk path and resolve each chunk (create or merge) on
//!    the pool. A failing chunk holds back every file that fed it.
//! 3. Commit all upload tasks on the pool. The first failure aborts the
//!    page before any pending file is deleted.
//! 4. Delete the pending files whose data is now stored.
//!
//! The list of pending ids is snapshotted when the run starts; uploads that
//! arrive during the run are left for the next one.
//!
//! Unchunkable uploads are replaced in place by their decrypted payload. A
//! page that aborts after such a write leaves a pending file whose object is
//! already stored; the next run finds it registered with a matching hash and
//! retires it.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use super::binner::{classify_and_bin, BinSet, BinnedFile, Classified};
use super::merger::{content_hash, ChunkMerger, UploadKind, UploadTask};
use super::pool::{run_blocking, WorkerPool};
use super::stats::{daily_usage, record_upload};
use super::upload::Uploader;
use super::{MergeError, UploadError};
use crate::codec::compress::{compress, decompress};
use crate::codec::time::{TimestampPolicy, CHUNK_TIMESLICE_QUANTUM};
use crate::crypto::{decrypt, decrypt_with_key, DecryptError, DecryptedFile, IosKeyCache, ParticipantKey};
use crate::error::ProcessingError;
use crate::models::{ChunkRegistryEntry, OsType, Participant, PendingFile, ProcessingSummary};
use crate::state::ProcessingContext;
use crate::storage::paths::{survey_id_from_path, upload_file_name, upload_timestamp};
use crate::storage::{AuditEvent, AuditEventType, AuditLog, ChunkRegistryStore, ObjectStore};
use crate::streams::DataStream;

/// Drives processing runs over a [`ProcessingContext`].
pub struct Orchestrator {
    ctx: ProcessingContext,
    pool: WorkerPool,
}

impl Orchestrator {
    pub fn new(ctx: ProcessingContext) -> Self {
        let pool = WorkerPool::new(ctx.config.concurrency);
        Self { ctx, pool }
    }

    pub fn context(&self) -> &ProcessingContext {
        &self.ctx
    }

    /// Process every file pending for `participant` at the time of the call.
    pub async fn run(&self, participant: &Participant) -> Result<ProcessingSummary, ProcessingError> {
        let policy = self.ctx.config.timestamp_policy(Utc::now());

        let keys = self.ctx.private_keys.clone();
        let who = participant.clone();
        let private_key = run_blocking(move || keys.private_key(&who)).await??;

        let pending = self.ctx.pending.clone();
        let patient_id = participant.patient_id.clone();
        let pending_ids = run_blocking(move || pending.pending_ids_for_participant(&patient_id)).await??;

        info!(
            participant = %participant.patient_id,
            study = %participant.study_id,
            pending = pending_ids.len(),
            "Processing run starting"
        );

        let mut summary = ProcessingSummary::default();
        for page in pending_ids.chunks(self.ctx.config.page_size.max(1)) {
            summary.pages += 1;
            debug!(participant = %participant.patient_id, page = summary.pages, files = page.len(), "Processing page");
            self.process_page(participant, &private_key, policy, page, &mut summary)
                .await?;
        }

        if let (Some(first), Some(last)) = (summary.earliest_hour, summary.latest_hour) {
            let registry = self.ctx.registry.clone();
            let patient_id = participant.patient_id.clone();
            let entries = run_blocking(move || registry.chunks_for_participant(&patient_id)).await??;
            summary.daily_usage = daily_usage(&entries, first, last);
        }

        info!(
            participant = %participant.patient_id,
            files_seen = summary.files_seen,
            files_retired = summary.files_retired,
            files_failed = summary.files_failed,
            chunks_created = summary.chunks_created,
            chunks_updated = summary.chunks_updated,
            bytes_written = summary.bytes_written,
            "Processing run finished"
        );
        Ok(summary)
    }

    async fn process_page(
        &self,
        participant: &Participant,
        private_key: &ParticipantKey,
        policy: TimestampPolicy,
        page: &[u64],
        summary: &mut ProcessingSummary,
    ) -> Result<(), ProcessingError> {
        let pending = self.ctx.pending.clone();
        let ids = page.to_vec();
        let files = run_blocking(move || pending.get_pending(&ids)).await??;
        summary.files_seen += files.len();

        // Phase 1: download, decrypt, bin
        let worker = FileWorker {
            objects: self.ctx.objects.clone(),
            registry: self.ctx.registry.clone(),
            ios_keys: self.ctx.ios_keys.clone(),
            audit: self.ctx.audit.clone(),
            private_key: private_key.clone(),
            policy,
            store_line_errors: self.ctx.config.store_line_errors,
        };
        let first_pass = worker.clone();
        let results = self
            .pool
            .map(files, move |file| first_pass.process(file, false))
            .await?;

        // iOS parts without a key line wait for another part of the page to
        // cache the key, then get one more attempt.
        let (waiting, mut results): (Vec<_>, Vec<_>) = results
            .into_iter()
            .partition(|result| matches!(result.outcome, FileOutcome::AwaitingKey));
        if !waiting.is_empty() {
            let files = waiting.into_iter().map(|result| result.file).collect();
            let retried = self.pool.map(files, move |file| worker.process(file, true)).await?;
            results.extend(retried);
        }

        let mut bins = BinSet::new();
        let mut retire: BTreeSet<u64> = BTreeSet::new();
        let mut held: BTreeSet<u64> = BTreeSet::new();
        let mut tasks: Vec<(BTreeSet<u64>, UploadTask)> = Vec::new();

        for result in results {
            summary.line_errors += result.line_errors;
            let id = result.file.id;
            match result.outcome {
                FileOutcome::Binned(binned) => bins.absorb(&result.file, binned),
                FileOutcome::Unchunked(task) => tasks.push((BTreeSet::from([id]), task)),
                FileOutcome::Empty => {
                    summary.files_empty += 1;
                    retire.insert(id);
                }
                FileOutcome::Rejected | FileOutcome::AlreadyStored => {
                    retire.insert(id);
                }
                FileOutcome::Failed | FileOutcome::AwaitingKey => {
                    held.insert(id);
                }
            }
        }

        // Phase 2: resolve chunks
        let merger = ChunkMerger::new(self.ctx.objects.clone(), self.ctx.registry.clone());
        let audit = self.ctx.audit.clone();
        let os = participant.os_type;
        let resolved = self
            .pool
            .map(bins.into_chunks(), move |batch| {
                let result = merger.resolve(&batch, os);
                if let Err(e) = &result {
                    report_merge_failure(&audit, &batch.participant_id, e);
                }
                (batch.file_ids(), result)
            })
            .await?;

        for (file_ids, result) in resolved {
            match result {
                Ok(task) => tasks.push((file_ids, task)),
                Err(_) => held.extend(file_ids),
            }
        }

        // Phase 3: commit
        let (contributors, upload_tasks): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let uploader = Uploader::new(self.ctx.objects.clone(), self.ctx.registry.clone());
        let audit = self.ctx.audit.clone();
        let patient_id = participant.patient_id.clone();
        let committed = self
            .pool
            .try_map(upload_tasks, move |task| match uploader.execute(&task) {
                Ok(kind) => Ok((kind, task)),
                Err(e) => {
                    if let UploadError::ConcurrentCreate(path) = &e {
                        audit.record(
                            AuditEvent::new(AuditEventType::ConcurrentCreate)
                                .with_participant(patient_id.as_str())
                                .with_resource(path.as_str())
                                .failed(e.to_string()),
                        );
                    }
                    Err(e)
                }
            })
            .await
            .inspect_err(|e| {
                warn!(participant = %participant.patient_id, error = %e, "Upload failed, page aborted");
            })?;

        for (kind, task) in &committed {
            match (task.kind, kind) {
                (UploadKind::Upsert, _) => summary.unchunked_registered += 1,
                (_, UploadKind::Update) => summary.chunks_updated += 1,
                _ => summary.chunks_created += 1,
            }
            record_upload(summary, task);
        }

        // Phase 4: retire
        retire.extend(contributors.into_iter().flatten());
        let retire: Vec<u64> = retire.difference(&held).copied().collect();
        let pending = self.ctx.pending.clone();
        summary.files_retired += run_blocking(move || pending.delete_pending(&retire)).await??;
        summary.files_failed += held.len();
        Ok(())
    }
}

fn report_merge_failure(audit: &AuditLog, participant_id: &str, error: &MergeError) {
    let (event_type, resource) = match error {
        MergeError::HeaderMismatch { path, .. } => (AuditEventType::HeaderMismatch, Some(path.as_str())),
        MergeError::ChunkVanished(path) => (AuditEventType::ChunkVanished, Some(path.as_str())),
        _ => (AuditEventType::MergeFailed, None),
    };
    warn!(participant = %participant_id, error = %error, "Chunk merge failed, files held back");

    let mut event = AuditEvent::new(event_type)
        .with_participant(participant_id)
        .failed(error.to_string());
    if let Some(resource) = resource {
        event = event.with_resource(resource);
    }
    audit.record(event);
}

// =============================================================================
// Per-file work
// =============================================================================

struct FileResult {
    file: PendingFile,
    line_errors: usize,
    outcome: FileOutcome,
}

enum FileOutcome {
    /// Rows ready for merging.
    Binned(BinnedFile),
    /// Stored whole, not binned.
    Unchunked(UploadTask),
    /// Nothing usable after line filtering; retire.
    Empty,
    /// Unusable for good (bad file-name timestamp); retire without storing.
    Rejected,
    /// Unchunkable payload stored and registered by an earlier, aborted page.
    AlreadyStored,
    /// iOS part whose key is not cached yet.
    AwaitingKey,
    /// Hold back for a later run.
    Failed,
}

/// Everything a pool job needs to turn one pending file into a [`FileOutcome`].
#[derive(Clone)]
struct FileWorker {
    objects: Arc<dyn ObjectStore>,
    registry: Arc<dyn ChunkRegistryStore>,
    ios_keys: Arc<IosKeyCache>,
    audit: Arc<AuditLog>,
    private_key: ParticipantKey,
    policy: TimestampPolicy,
    store_line_errors: bool,
}

impl FileWorker {
    fn process(&self, file: PendingFile, final_attempt: bool) -> FileResult {
        let (line_errors, outcome) = self.outcome(&file, final_attempt);
        FileResult {
            file,
            line_errors,
            outcome,
        }
    }

    fn outcome(&self, file: &PendingFile, final_attempt: bool) -> (usize, FileOutcome) {
        let path = file.storage_path.as_str();

        let ciphertext = match self.objects.get(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path, error = %e, "Cannot download pending file");
                return (0, FileOutcome::Failed);
            }
        };

        if self.already_stored(path, &ciphertext) {
            debug!(path = %path, "Unchunkable upload already stored");
            return (0, FileOutcome::AlreadyStored);
        }

        let decrypted = match self.decrypt(file, &ciphertext) {
            Ok(decrypted) => decrypted,
            Err(DecryptError::KeyCacheMiss(_)) if !final_attempt => {
                return (0, FileOutcome::AwaitingKey);
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Cannot decrypt pending file");
                self.audit.record(
                    AuditEvent::new(AuditEventType::DecryptionFailed)
                        .with_participant(file.participant_id.as_str())
                        .with_resource(path)
                        .failed(e.to_string()),
                );
                return (0, FileOutcome::Failed);
            }
        };

        let line_errors = decrypted.line_errors.len();
        if line_errors > 0 {
            self.audit_line_errors(file, &decrypted);
        }
        if decrypted.is_empty() {
            return (line_errors, FileOutcome::Empty);
        }

        let outcome = match classify_and_bin(file, &decrypted.plaintext, &self.policy) {
            Ok(Classified::Chunkable(binned)) if binned.is_empty() => FileOutcome::Empty,
            Ok(Classified::Chunkable(binned)) => FileOutcome::Binned(binned),
            Ok(Classified::Unchunkable(stream)) => self.unchunked(file, stream, &decrypted.plaintext),
            Err(e) => {
                warn!(path = %path, error = %e, "Cannot bin pending file");
                self.audit.record(
                    AuditEvent::new(AuditEventType::FileRejected)
                        .with_participant(file.participant_id.as_str())
                        .with_resource(path)
                        .failed(e.to_string()),
                );
                FileOutcome::Failed
            }
        };
        (line_errors, outcome)
    }

    /// True when the object at an unchunkable upload's path is the registered
    /// payload rather than device ciphertext.
    fn already_stored(&self, path: &str, object: &[u8]) -> bool {
        if DataStream::from_upload_path(path).is_none_or(DataStream::is_chunkable) {
            return false;
        }
        let Ok(Some(entry)) = self.registry.get_chunk(path) else {
            return false;
        };
        !entry.is_chunkable
            && decompress(object).is_ok_and(|plain| content_hash(&plain) == entry.content_hash)
    }

    /// Decrypt with the file's own key line, falling back to the cached key
    /// for iOS uploads whose key line is missing or unusable.
    fn decrypt(&self, file: &PendingFile, ciphertext: &[u8]) -> Result<DecryptedFile, DecryptError> {
        let path = file.storage_path.as_str();
        let name = upload_file_name(path);

        match decrypt(name, ciphertext, &self.private_key) {
            Ok(decrypted) => {
                if file.os_type == OsType::Ios {
                    self.ios_keys.remember(path, &decrypted.aes_key)?;
                }
                Ok(decrypted)
            }
            Err(e) if e.is_key_error() && file.os_type == OsType::Ios => match self.ios_keys.get(path) {
                Ok(key) => {
                    debug!(path = %path, "Decrypting with cached iOS key");
                    decrypt_with_key(name, ciphertext, &key)
                }
                Err(miss @ DecryptError::KeyCacheMiss(_)) => {
                    debug!(path = %path, error = %e, "No key line and no cached key");
                    Err(miss)
                }
                Err(other) => Err(other),
            },
            Err(e) => Err(e),
        }
    }

    fn audit_line_errors(&self, file: &PendingFile, decrypted: &DecryptedFile) {
        let errors: Vec<_> = decrypted
            .line_errors
            .iter()
            .map(|line| {
                let mut value = json!({ "line_index": line.line_index, "kind": line.kind });
                if self.store_line_errors {
                    value["raw_line"] = json!(String::from_utf8_lossy(&line.raw_line));
                }
                value
            })
            .collect();

        self.audit.record(
            AuditEvent::new(AuditEventType::DecryptionLineErrors)
                .with_participant(file.participant_id.as_str())
                .with_resource(file.storage_path.as_str())
                .with_details(json!({
                    "file_name": upload_file_name(&file.storage_path),
                    "total_lines": decrypted.total_lines,
                    "error_count": decrypted.line_errors.len(),
                    "tail_truncated": decrypted.tail_truncated,
                    "errors": errors,
                })),
        );
    }

    /// Build the upsert for a file stored whole at its upload path.
    ///
    /// The timestamp and survey id come from the normalized name, but the
    /// object and registry entry keep the exact upload path so duplicate
    /// uploads of one name stay separate.
    fn unchunked(&self, file: &PendingFile, stream: DataStream, plaintext: &[u8]) -> FileOutcome {
        let path = file.storage_path.as_str();
        let seconds = match self.policy.clean_timecode(upload_timestamp(path).as_bytes()) {
            Ok(seconds) => seconds,
            Err(e) => {
                warn!(path = %path, error = %e, "Unchunkable file has an invalid timestamp, dropping");
                self.audit.record(
                    AuditEvent::new(AuditEventType::FileRejected)
                        .with_participant(file.participant_id.as_str())
                        .with_resource(path)
                        .failed(e.to_string()),
                );
                return FileOutcome::Rejected;
            }
        };

        let payload = match compress(plaintext) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(path = %path, error = %e, "Cannot compress unchunkable file");
                return FileOutcome::Failed;
            }
        };

        let survey_id = if stream.is_survey() {
            survey_id_from_path(path).map(str::to_string)
        } else {
            None
        };

        FileOutcome::Unchunked(UploadTask {
            kind: UploadKind::Upsert,
            entry: ChunkRegistryEntry {
                storage_path: path.to_string(),
                study_id: file.study_id.clone(),
                participant_id: file.participant_id.clone(),
                data_stream: stream,
                hour_index: seconds / CHUNK_TIMESLICE_QUANTUM,
                content_hash: content_hash(plaintext),
                byte_size: plaintext.len() as u64,
                survey_id,
                is_chunkable: false,
                last_updated: Utc::now(),
            },
            payload,
            rows: 0,
        })
    }
}
