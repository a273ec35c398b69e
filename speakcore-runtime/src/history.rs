use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use speakcore_core::types::AppIdentity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts_unix_ms: i64,
    pub app_process_name: Option<String>,
    pub app_exe_path: Option<String>,
    pub app_window_title: Option<String>,
    pub text: String,
    pub stage: String,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    max_entries: usize,
}

impl HistoryStore {
    pub fn at_path(path: PathBuf) -> Self {
        Self { path, max_entries: 200 }
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self
    }

    pub fn load(&self) -> anyhow::Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read history: {}", self.path.display()))?;
        let entries: Vec<HistoryEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse history: {}", self.path.display()))?;
        Ok(entries)
    }

    pub fn append(&self, entry: HistoryEntry) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create dir: {}", parent.display()))?;
        }

        let mut entries = self.load()?;
        entries.push(entry);
        if entries.len() > self.max_entries {
            let start = entries.len() - self.max_entries;
            entries = entries.split_off(start);
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&entries)?)
            .with_context(|| format!("failed to write history temp: {}", tmp.display()))?;
        crate::models::replace_file(&tmp, &self.path)
            .with_context(|| format!("failed to replace history: {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove history: {}", self.path.display()))?;
        }
        Ok(())
    }

    /// Removes the first entry matching both `ts_unix_ms` and `text`. Returns
    /// `true` if an entry was removed.
    pub fn delete_entry(&self, ts_unix_ms: i64, text: &str) -> anyhow::Result<bool> {
        let mut entries = self.load()?;
        let before = entries.len();
        let mut removed = false;
        entries.retain(|e| {
            if !removed && e.ts_unix_ms == ts_unix_ms && e.text == text {
                removed = true;
                false
            } else {
                true
            }
        });
        if entries.len() == before {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create dir: {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&entries)?)
            .with_context(|| format!("failed to write history temp: {}", tmp.display()))?;
        crate::models::replace_file(&tmp, &self.path)
            .with_context(|| format!("failed to replace history: {}", self.path.display()))?;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Outcome of the transcription stage for a single recorded session.
/// Immutable after the record is first saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionOutcome {
    pub text: String,
    pub provider: String,
    pub status: RecordStatus,
    pub error: Option<String>,
}

/// Outcome of the optional AI-enhancement stage. Distinct from
/// [`TranscriptionOutcome`] because a record can be updated with a later
/// enhancement result without touching the original transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiOutcome {
    pub text: Option<String>,
    pub provider: Option<String>,
    pub status: RecordStatus,
    pub error: Option<String>,
}

impl AiOutcome {
    pub fn skipped() -> Self {
        Self {
            text: None,
            provider: None,
            status: RecordStatus::Skipped,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Success,
    Failed,
    Skipped,
    Pending,
}

/// A single recorded dictation session, replacing the flat `HistoryEntry`
/// shape for callers that want full transcription/enhancement provenance,
/// search, and batch reprocessing. `HistoryEntry`/`HistoryStore` above are
/// kept untouched for existing callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub timestamp_unix_ms: i64,
    pub audio_path: Option<PathBuf>,
    pub duration_s: f32,
    pub transcription: TranscriptionOutcome,
    pub ai: AiOutcome,
    pub final_text: String,
    pub app: AppIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    TimestampAsc,
    TimestampDesc,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub text: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub transcription_status: Option<RecordStatus>,
    pub ai_status: Option<RecordStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub count: usize,
    pub total_duration_s_millis: i64,
    pub success_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ReprocessReport {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    pub first_errors: Vec<String>,
}

const REPROCESS_MAX_ERRORS: usize = 20;

/// Cooperative cancellation for long-running batch operations. Checked
/// between records, never mid-record.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history record not found: {0}")]
    NotFound(Uuid),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl HistoryError {
    pub fn kind(&self) -> speakcore_core::types::ErrorKind {
        use speakcore_core::types::ErrorKind;
        match self {
            HistoryError::NotFound(_) => ErrorKind::ValidationFailure,
            HistoryError::Io(_) => ErrorKind::Unknown,
        }
    }
}

struct RecordIndex {
    records: std::collections::HashMap<Uuid, HistoryRecord>,
    by_timestamp: BTreeMap<i64, Vec<Uuid>>,
}

impl RecordIndex {
    fn empty() -> Self {
        Self {
            records: std::collections::HashMap::new(),
            by_timestamp: BTreeMap::new(),
        }
    }

    fn from_records(records: Vec<HistoryRecord>) -> Self {
        let mut index = Self::empty();
        for record in records {
            index.insert(record);
        }
        index
    }

    fn insert(&mut self, record: HistoryRecord) {
        self.by_timestamp
            .entry(record.timestamp_unix_ms)
            .or_default()
            .push(record.id);
        self.records.insert(record.id, record);
    }

    fn remove(&mut self, id: Uuid) -> Option<HistoryRecord> {
        let record = self.records.remove(&id)?;
        if let Some(bucket) = self.by_timestamp.get_mut(&record.timestamp_unix_ms) {
            bucket.retain(|existing| *existing != id);
            if bucket.is_empty() {
                self.by_timestamp.remove(&record.timestamp_unix_ms);
            }
        }
        Some(record)
    }

    fn all_ordered(&self, order: OrderBy) -> Vec<&HistoryRecord> {
        let mut ids: Vec<Uuid> = self.by_timestamp.values().flatten().copied().collect();
        if matches!(order, OrderBy::TimestampDesc) {
            ids.reverse();
        }
        ids.into_iter().filter_map(|id| self.records.get(&id)).collect()
    }
}

fn matches_filter(record: &HistoryRecord, filter: &SearchFilter) -> bool {
    if let Some(start) = filter.start {
        if record.timestamp_unix_ms < start {
            return false;
        }
    }
    if let Some(end) = filter.end {
        if record.timestamp_unix_ms > end {
            return false;
        }
    }
    if let Some(status) = filter.transcription_status {
        if record.transcription.status != status {
            return false;
        }
    }
    if let Some(status) = filter.ai_status {
        if record.ai.status != status {
            return false;
        }
    }
    if let Some(query) = filter.text.as_ref() {
        let query = query.to_lowercase();
        let haystack = format!(
            "{} {}",
            record.transcription.text.to_lowercase(),
            record.ai.text.as_deref().unwrap_or("").to_lowercase()
        );
        if !haystack.contains(&query) {
            return false;
        }
    }
    true
}

/// Indexed store for [`HistoryRecord`]s, additive to [`HistoryStore`].
///
/// Persists as a single JSON journal file, same "write temp then atomic
/// rename" idiom as the rest of this module. The in-memory index
/// (`RwLock`-guarded) is rebuilt from the journal on `open`; writes take a
/// single mutex so journal appends are serialized, while reads clone out of
/// the `RwLock` snapshot and can proceed concurrently with each other.
pub struct HistoryRecordStore {
    path: PathBuf,
    index: RwLock<RecordIndex>,
    write_lock: std::sync::Mutex<()>,
}

impl HistoryRecordStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read history records: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse history records: {}", path.display()))?
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            index: RwLock::new(RecordIndex::from_records(records)),
            write_lock: std::sync::Mutex::new(()),
        })
    }

    fn persist(&self, index: &RecordIndex) -> anyhow::Result<()> {
        let ordered = index.all_ordered(OrderBy::TimestampAsc);
        let json = serde_json::to_string_pretty(&ordered).context("encode history records")?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create dir: {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write temp: {}", tmp.display()))?;
        crate::models::replace_file(&tmp, &self.path)
            .with_context(|| format!("replace history records: {}", self.path.display()))
    }

    pub fn save(&self, record: HistoryRecord) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().expect("history write lock poisoned");
        let mut index = self.index.write().expect("history index poisoned");
        index.insert(record);
        self.persist(&index)
    }

    /// Updates only the AI-enhancement fields of an existing record. The
    /// transcription is immutable after first save: this method simply has
    /// no way to touch it.
    pub fn update(&self, id: Uuid, ai: AiOutcome) -> Result<(), HistoryError> {
        let _guard = self.write_lock.lock().expect("history write lock poisoned");
        let mut index = self.index.write().expect("history index poisoned");
        let record = index.records.get_mut(&id).ok_or(HistoryError::NotFound(id))?;
        record.ai = ai;
        self.persist(&index).map_err(HistoryError::Io)
    }

    pub fn get(&self, id: Uuid) -> Option<HistoryRecord> {
        self.index.read().expect("history index poisoned").records.get(&id).cloned()
    }

    pub fn list(&self, limit: usize, offset: usize, order_by: OrderBy) -> Vec<HistoryRecord> {
        let index = self.index.read().expect("history index poisoned");
        index
            .all_ordered(order_by)
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Linear scan over the in-memory snapshot. Simple substring matching
    /// rather than a real secondary text index; acceptable at the history
    /// sizes this store targets (thousands, not millions, of records).
    pub fn search(&self, filter: &SearchFilter) -> Vec<HistoryRecord> {
        let index = self.index.read().expect("history index poisoned");
        index
            .all_ordered(OrderBy::TimestampDesc)
            .into_iter()
            .filter(|record| matches_filter(record, filter))
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn count(&self, filter: &SearchFilter) -> usize {
        let index = self.index.read().expect("history index poisoned");
        index
            .all_ordered(OrderBy::TimestampDesc)
            .into_iter()
            .filter(|record| matches_filter(record, filter))
            .count()
    }

    pub fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock().expect("history write lock poisoned");
        let mut index = self.index.write().expect("history index poisoned");
        let removed = index.remove(id).is_some();
        if removed {
            self.persist(&index)?;
        }
        Ok(removed)
    }

    pub fn delete_many(&self, ids: &[Uuid]) -> anyhow::Result<usize> {
        let _guard = self.write_lock.lock().expect("history write lock poisoned");
        let mut index = self.index.write().expect("history index poisoned");
        let mut removed = 0;
        for id in ids {
            if index.remove(*id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.persist(&index)?;
        }
        Ok(removed)
    }

    /// Deletes records whose `audio_path` no longer exists on disk.
    pub fn sweep_orphans(&self) -> anyhow::Result<usize> {
        let orphans: Vec<Uuid> = {
            let index = self.index.read().expect("history index poisoned");
            index
                .records
                .values()
                .filter(|r| matches!(&r.audio_path, Some(p) if !p.exists()))
                .map(|r| r.id)
                .collect()
        };
        self.delete_many(&orphans)
    }

    pub fn aggregate_stats(&self, filter: &SearchFilter) -> AggregateStats {
        let index = self.index.read().expect("history index poisoned");
        let matching: Vec<&HistoryRecord> = index
            .all_ordered(OrderBy::TimestampDesc)
            .into_iter()
            .filter(|record| matches_filter(record, filter))
            .collect();

        let total_duration_s_millis: i64 = matching
            .iter()
            .map(|r| (r.duration_s as f64 * 1000.0).round() as i64)
            .sum();
        let success_count = matching
            .iter()
            .filter(|r| r.transcription.status == RecordStatus::Success)
            .count();

        AggregateStats {
            count: matching.len(),
            total_duration_s_millis,
            success_count,
        }
    }

    /// Applies `op` to every record matching `predicate`, in timestamp-ascending
    /// pages of `page_size`, sleeping `cooldown` between pages and checking
    /// `cancel` between individual records (never mid-record).
    pub async fn reprocess_batch<P, Op, Fut>(
        &self,
        page_size: usize,
        cooldown: std::time::Duration,
        predicate: P,
        mut op: Op,
        cancel: CancellationToken,
    ) -> ReprocessReport
    where
        P: Fn(&HistoryRecord) -> bool,
        Op: FnMut(&HistoryRecord) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<()>>,
    {
        let mut report = ReprocessReport::default();
        let matching_ids: Vec<Uuid> = {
            let index = self.index.read().expect("history index poisoned");
            index
                .all_ordered(OrderBy::TimestampAsc)
                .into_iter()
                .filter(|r| predicate(r))
                .map(|r| r.id)
                .collect()
        };

        for page in matching_ids.chunks(page_size.max(1)) {
            for id in page {
                if cancel.is_cancelled() {
                    return report;
                }
                let Some(record) = self.get(*id) else {
                    report.skipped += 1;
                    continue;
                };
                report.total += 1;
                match op(&record).await {
                    Ok(()) => report.success += 1,
                    Err(e) => {
                        report.failed += 1;
                        if report.first_errors.len() < REPROCESS_MAX_ERRORS {
                            report.first_errors.push(e.to_string());
                        }
                    }
                }
            }
            if !cooldown.is_zero() {
                tokio::time::sleep(cooldown).await;
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_and_limits_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::at_path(dir.path().join("history.json")).with_max_entries(2);

        store
            .append(HistoryEntry {
                ts_unix_ms: 1,
                app_process_name: None,
                app_exe_path: None,
                app_window_title: None,
                text: "a".into(),
                stage: "done".into(),
            })
            .unwrap();
        store
            .append(HistoryEntry {
                ts_unix_ms: 2,
                app_process_name: None,
                app_exe_path: None,
                app_window_title: None,
                text: "b".into(),
                stage: "done".into(),
            })
            .unwrap();
        store
            .append(HistoryEntry {
                ts_unix_ms: 3,
                app_process_name: None,
                app_exe_path: None,
                app_window_title: None,
                text: "c".into(),
                stage: "done".into(),
            })
            .unwrap();

        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "b");
        assert_eq!(entries[1].text, "c");
    }

    #[test]
    fn delete_entry_removes_matching_record_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::at_path(dir.path().join("history.json")).with_max_entries(10);

        store
            .append(HistoryEntry {
                ts_unix_ms: 1,
                app_process_name: None,
                app_exe_path: None,
                app_window_title: None,
                text: "a".into(),
                stage: "done".into(),
            })
            .unwrap();
        store
            .append(HistoryEntry {
                ts_unix_ms: 2,
                app_process_name: None,
                app_exe_path: None,
                app_window_title: None,
                text: "b".into(),
                stage: "done".into(),
            })
            .unwrap();

        let removed = store.delete_entry(1, "a").unwrap();
        assert!(removed);
        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "b");

        let removed_again = store.delete_entry(1, "a").unwrap();
        assert!(!removed_again);
    }

    fn sample_record(ts: i64, text: &str) -> HistoryRecord {
        HistoryRecord {
            id: Uuid::new_v4(),
            timestamp_unix_ms: ts,
            audio_path: None,
            duration_s: 1.5,
            transcription: TranscriptionOutcome {
                text: text.into(),
                provider: "local".into(),
                status: RecordStatus::Success,
                error: None,
            },
            ai: AiOutcome::skipped(),
            final_text: text.into(),
            app: AppIdentity::new(),
        }
    }

    #[test]
    fn record_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        let store = HistoryRecordStore::open(&path).unwrap();

        let record = sample_record(1, "hello world");
        let id = record.id;
        store.save(record).unwrap();

        let reopened = HistoryRecordStore::open(&path).unwrap();
        let loaded = reopened.get(id).unwrap();
        assert_eq!(loaded.transcription.text, "hello world");
    }

    #[test]
    fn update_only_touches_ai_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryRecordStore::open(dir.path().join("records.json")).unwrap();
        let record = sample_record(1, "original transcript");
        let id = record.id;
        store.save(record).unwrap();

        store
            .update(
                id,
                AiOutcome {
                    text: Some("enhanced".into()),
                    provider: Some("openai".into()),
                    status: RecordStatus::Success,
                    error: None,
                },
            )
            .unwrap();

        let updated = store.get(id).unwrap();
        assert_eq!(updated.transcription.text, "original transcript");
        assert_eq!(updated.ai.text.as_deref(), Some("enhanced"));
    }

    #[test]
    fn update_missing_record_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryRecordStore::open(dir.path().join("records.json")).unwrap();
        let err = store.update(Uuid::new_v4(), AiOutcome::skipped()).unwrap_err();
        assert!(matches!(err, HistoryError::NotFound(_)));
    }

    #[test]
    fn list_orders_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryRecordStore::open(dir.path().join("records.json")).unwrap();
        store.save(sample_record(3, "three")).unwrap();
        store.save(sample_record(1, "one")).unwrap();
        store.save(sample_record(2, "two")).unwrap();

        let asc = store.list(10, 0, OrderBy::TimestampAsc);
        assert_eq!(
            asc.iter().map(|r| r.transcription.text.clone()).collect::<Vec<_>>(),
            vec!["one", "two", "three"]
        );

        let desc = store.list(10, 0, OrderBy::TimestampDesc);
        assert_eq!(
            desc.iter().map(|r| r.transcription.text.clone()).collect::<Vec<_>>(),
            vec!["three", "two", "one"]
        );
    }

    #[test]
    fn search_filters_by_substring_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryRecordStore::open(dir.path().join("records.json")).unwrap();
        store.save(sample_record(1, "buy milk")).unwrap();
        store.save(sample_record(2, "write report")).unwrap();

        let results = store.search(&SearchFilter {
            text: Some("MILK".into()),
            ..Default::default()
        });
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].transcription.text, "buy milk");

        let ranged = store.search(&SearchFilter {
            start: Some(2),
            ..Default::default()
        });
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0].transcription.text, "write report");
    }

    #[test]
    fn delete_many_removes_requested_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryRecordStore::open(dir.path().join("records.json")).unwrap();
        let a = sample_record(1, "a");
        let b = sample_record(2, "b");
        let (id_a, id_b) = (a.id, b.id);
        store.save(a).unwrap();
        store.save(b).unwrap();

        let removed = store.delete_many(&[id_a, id_b]).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count(&SearchFilter::default()), 0);
    }

    #[test]
    fn sweep_orphans_removes_only_records_whose_audio_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryRecordStore::open(dir.path().join("records.json")).unwrap();

        let surviving_audio = dir.path().join("kept.wav");
        std::fs::write(&surviving_audio, b"fake wav").unwrap();

        let mut kept = sample_record(1, "kept");
        kept.audio_path = Some(surviving_audio);
        let mut orphaned = sample_record(2, "orphaned");
        orphaned.audio_path = Some(dir.path().join("deleted.wav"));
        let no_audio = sample_record(3, "no audio ever recorded");

        let kept_id = kept.id;
        store.save(kept).unwrap();
        store.save(orphaned).unwrap();
        store.save(no_audio).unwrap();

        let removed = store.sweep_orphans().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count(&SearchFilter::default()), 2);
        assert!(store.get(kept_id).is_some());
    }

    #[test]
    fn aggregate_stats_sums_duration_and_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryRecordStore::open(dir.path().join("records.json")).unwrap();
        let mut failed = sample_record(1, "oops");
        failed.transcription.status = RecordStatus::Failed;
        store.save(failed).unwrap();
        store.save(sample_record(2, "ok")).unwrap();

        let stats = store.aggregate_stats(&SearchFilter::default());
        assert_eq!(stats.count, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.total_duration_s_millis, 3000);
    }

    #[tokio::test]
    async fn reprocess_batch_respects_cancellation_between_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryRecordStore::open(dir.path().join("records.json")).unwrap();
        store.save(sample_record(1, "one")).unwrap();
        store.save(sample_record(2, "two")).unwrap();
        store.save(sample_record(3, "three")).unwrap();

        let cancel = CancellationToken::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let cancel_clone = cancel.clone();

        let report = store
            .reprocess_batch(
                10,
                std::time::Duration::ZERO,
                |_| true,
                move |record| {
                    seen_clone.lock().unwrap().push(record.transcription.text.clone());
                    if seen_clone.lock().unwrap().len() == 1 {
                        cancel_clone.cancel();
                    }
                    std::future::ready(Ok(()))
                },
                cancel,
            )
            .await;

        assert_eq!(report.total, 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn errors_classify_into_expected_kinds() {
        use speakcore_core::types::ErrorKind;
        assert_eq!(HistoryError::NotFound(Uuid::nil()).kind(), ErrorKind::ValidationFailure);
        assert_eq!(HistoryError::Io(anyhow::anyhow!("disk full")).kind(), ErrorKind::Unknown);
    }
}
