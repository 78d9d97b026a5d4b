//! Mock implementations for the collaborator traits
//!
//! 所有 mock 都基于 `Arc<Mutex<..>>` 共享状态，克隆后的实例指向同一份数据，
//! 便于在被测对象持有一份的同时由测试代码检查另一份。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use migration_core::models::{
    CreateMappingResult, CreateOutcome, DuplicateMapping, HistoryFilter, IdPage,
    MigrationMapping, MigrationMessage, MigrationRun, MigrationStatus, MigrationType,
};
use migration_core::traits::{
    MappingClient, MigrationHistoryRepository, MigrationQueue, QueueDelivery, QueueDepth,
    SourceAdapter, TargetAdapter, TelemetryProperties, TelemetrySink,
};
use migration_core::{Clock, MigrationError, MigrationResult};
use serde_json::Value;

/// 发送到 mock 队列的一条消息
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub migration_type: MigrationType,
    pub message: MigrationMessage,
    pub delay: Duration,
}

/// 记录所有发送的消息，不模拟延迟与重投递
///
/// 队列深度默认由待处理与未确认的消息计算，也可由测试显式设定。
#[derive(Debug, Clone, Default)]
pub struct MockMigrationQueue {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    pending: Arc<Mutex<HashMap<MigrationType, VecDeque<MigrationMessage>>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    depth_override: Arc<Mutex<Option<QueueDepth>>>,
    dead_letters: Arc<Mutex<Vec<QueueDelivery>>>,
    acked: Arc<Mutex<Vec<String>>>,
    nacked: Arc<Mutex<Vec<String>>>,
    purge_calls: Arc<AtomicUsize>,
    fail_sends: Arc<AtomicBool>,
}

impl MockMigrationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_depth(&self, depth: QueueDepth) {
        *self.depth_override.lock().unwrap() = Some(depth);
    }

    pub fn clear_depth(&self) {
        *self.depth_override.lock().unwrap() = None;
    }

    /// 模拟仍有消息排队
    pub fn set_busy(&self, busy: bool) {
        let visible = if busy { 5 } else { 0 };
        self.set_depth(QueueDepth {
            visible,
            in_flight: 1,
            delayed: 0,
        });
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn add_dead_letter(&self, delivery: QueueDelivery) {
        self.dead_letters.lock().unwrap().push(delivery);
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// 按消息类型 (`MIGRATE_ENTITY` 等) 过滤已发送的消息
    pub fn sent_of_kind(&self, kind: &str) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.message.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn pending_count(&self, migration_type: MigrationType) -> usize {
        self.pending
            .lock()
            .unwrap()
            .get(&migration_type)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    pub fn purge_calls(&self) -> usize {
        self.purge_calls.load(Ordering::SeqCst)
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn nacked(&self) -> Vec<String> {
        self.nacked.lock().unwrap().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl MigrationQueue for MockMigrationQueue {
    async fn send(
        &self,
        migration_type: MigrationType,
        message: &MigrationMessage,
        delay: Duration,
    ) -> MigrationResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(MigrationError::queue_error("mock send failure"));
        }
        self.sent.lock().unwrap().push(SentMessage {
            migration_type,
            message: message.clone(),
            delay,
        });
        self.pending
            .lock()
            .unwrap()
            .entry(migration_type)
            .or_default()
            .push_back(message.clone());
        Ok(())
    }

    async fn receive(
        &self,
        migration_type: MigrationType,
        max_messages: usize,
    ) -> MigrationResult<Vec<QueueDelivery>> {
        let mut pending = self.pending.lock().unwrap();
        let queue = pending.entry(migration_type).or_default();
        let mut deliveries = Vec::new();
        while deliveries.len() < max_messages {
            let Some(message) = queue.pop_front() else {
                break;
            };
            self.in_flight.lock().unwrap().insert(message.id.clone());
            deliveries.push(QueueDelivery {
                receipt: message.id.clone(),
                message_id: message.id.clone(),
                receive_count: 1,
                body: message.encode()?,
            });
        }
        Ok(deliveries)
    }

    async fn ack(&self, _migration_type: MigrationType, receipt: &str) -> MigrationResult<()> {
        self.in_flight.lock().unwrap().remove(receipt);
        self.acked.lock().unwrap().push(receipt.to_string());
        Ok(())
    }

    async fn nack(&self, _migration_type: MigrationType, receipt: &str) -> MigrationResult<()> {
        self.in_flight.lock().unwrap().remove(receipt);
        self.nacked.lock().unwrap().push(receipt.to_string());
        Ok(())
    }

    async fn approximate_depth(
        &self,
        migration_type: MigrationType,
    ) -> MigrationResult<QueueDepth> {
        if let Some(depth) = *self.depth_override.lock().unwrap() {
            return Ok(depth);
        }
        Ok(QueueDepth {
            visible: self.pending_count(migration_type) as u64,
            in_flight: self.in_flight.lock().unwrap().len() as u64,
            delayed: 0,
        })
    }

    async fn purge_all(&self, migration_type: MigrationType) -> MigrationResult<u64> {
        self.purge_calls.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.pending.lock().unwrap();
        let purged = pending
            .get_mut(&migration_type)
            .map(|q| {
                let n = q.len() as u64;
                q.clear();
                n
            })
            .unwrap_or(0);
        Ok(purged)
    }

    async fn dead_letter_depth(&self, _migration_type: MigrationType) -> MigrationResult<u64> {
        Ok(self.dead_letters.lock().unwrap().len() as u64)
    }

    async fn peek_dead_letters(
        &self,
        _migration_type: MigrationType,
        max_messages: usize,
    ) -> MigrationResult<Vec<QueueDelivery>> {
        Ok(self
            .dead_letters
            .lock()
            .unwrap()
            .iter()
            .take(max_messages)
            .cloned()
            .collect())
    }

    async fn purge_dead_letters(&self, _migration_type: MigrationType) -> MigrationResult<u64> {
        let mut dead_letters = self.dead_letters.lock().unwrap();
        let purged = dead_letters.len() as u64;
        dead_letters.clear();
        Ok(purged)
    }
}

/// Mock implementation of MigrationHistoryRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockHistoryRepository {
    runs: Arc<Mutex<HashMap<String, MigrationRun>>>,
    /// 下一次 update 之前由"另一个写入方"改写的状态
    concurrent_write: Arc<Mutex<Option<MigrationStatus>>>,
}

impl MockHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runs(runs: Vec<MigrationRun>) -> Self {
        let repository = Self::new();
        {
            let mut map = repository.runs.lock().unwrap();
            for run in runs {
                map.insert(run.run_id.clone(), run);
            }
        }
        repository
    }

    pub fn get(&self, run_id: &str) -> Option<MigrationRun> {
        self.runs.lock().unwrap().get(run_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    /// 模拟并发写入: 下一次 update 比较状态之前，存储中的状态先被改为 `status`
    pub fn interleave_status_write(&self, status: MigrationStatus) {
        *self.concurrent_write.lock().unwrap() = Some(status);
    }
}

#[async_trait]
impl MigrationHistoryRepository for MockHistoryRepository {
    async fn save(&self, run: &MigrationRun) -> MigrationResult<()> {
        let mut runs = self.runs.lock().unwrap();
        if runs.contains_key(&run.run_id) {
            return Err(MigrationError::database_error(format!(
                "duplicate run id {}",
                run.run_id
            )));
        }
        runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn update(&self, run: &MigrationRun, expected: MigrationStatus) -> MigrationResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let existing = runs
            .get_mut(&run.run_id)
            .ok_or_else(|| MigrationError::run_not_found(&run.run_id))?;
        if let Some(status) = self.concurrent_write.lock().unwrap().take() {
            existing.status = status;
        }
        if existing.status != expected {
            return Err(MigrationError::InvalidStateTransition {
                from: existing.status,
                to: run.status,
            });
        }
        *existing = run.clone();
        Ok(())
    }

    async fn find_by_id(&self, run_id: &str) -> MigrationResult<Option<MigrationRun>> {
        Ok(self.runs.lock().unwrap().get(run_id).cloned())
    }

    async fn find_latest(
        &self,
        migration_type: MigrationType,
    ) -> MigrationResult<Option<MigrationRun>> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.migration_type == migration_type)
            .max_by(|a, b| {
                a.when_started
                    .cmp(&b.when_started)
                    .then_with(|| a.run_id.cmp(&b.run_id))
            })
            .cloned())
    }

    async fn find_all(&self, filter: &HistoryFilter) -> MigrationResult<Vec<MigrationRun>> {
        let mut runs: Vec<MigrationRun> = self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.when_started.cmp(&a.when_started));
        Ok(runs)
    }
}

/// 内存源系统，过滤条件中的 `ids` 数组用于显式划分
#[derive(Debug, Clone, Default)]
pub struct MockSourceAdapter {
    records: Arc<Mutex<Vec<(String, Value)>>>,
    failing_fetch: Arc<Mutex<HashSet<String>>>,
    panicking_fetch: Arc<Mutex<HashSet<String>>>,
    fetch_calls: Arc<Mutex<Vec<String>>>,
    list_calls: Arc<AtomicUsize>,
}

impl MockSourceAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<(String, Value)>) -> Self {
        let adapter = Self::new();
        *adapter.records.lock().unwrap() = records;
        adapter
    }

    /// 该 ID 的 fetch 始终失败
    pub fn fail_fetch(&self, source_id: &str) {
        self.failing_fetch
            .lock()
            .unwrap()
            .insert(source_id.to_string());
    }

    /// 该 ID 的 fetch 直接 panic
    pub fn panic_on_fetch(&self, source_id: &str) {
        self.panicking_fetch
            .lock()
            .unwrap()
            .insert(source_id.to_string());
    }

    pub fn fetch_calls(&self) -> Vec<String> {
        self.fetch_calls.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for MockSourceAdapter {
    fn validate_filter(&self, filter: &Value) -> MigrationResult<()> {
        if filter.is_object() {
            Ok(())
        } else {
            Err(MigrationError::validation_error("filter must be a JSON object"))
        }
    }

    async fn list_ids(
        &self,
        _filter: &Value,
        page_number: i64,
        page_size: i64,
    ) -> MigrationResult<IdPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().unwrap();
        let start = (page_number * page_size).max(0) as usize;
        let ids = records
            .iter()
            .skip(start)
            .take(page_size.max(0) as usize)
            .map(|(id, _)| id.clone())
            .collect();
        Ok(IdPage {
            ids,
            total: records.len() as i64,
        })
    }

    fn ids_from_filter(&self, filter: &Value) -> MigrationResult<Option<Vec<String>>> {
        Ok(filter.get("ids").and_then(Value::as_array).map(|ids| {
            ids.iter()
                .map(|id| match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        }))
    }

    async fn fetch(&self, source_id: &str) -> MigrationResult<Value> {
        self.fetch_calls
            .lock()
            .unwrap()
            .push(source_id.to_string());
        let panics = self.panicking_fetch.lock().unwrap().contains(source_id);
        if panics {
            panic!("fetch of {source_id} panicked");
        }
        if self.failing_fetch.lock().unwrap().contains(source_id) {
            return Err(MigrationError::Upstream {
                status: 500,
                message: format!("fetch of {source_id} failed"),
            });
        }
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == source_id)
            .map(|(_, record)| record.clone())
            .ok_or_else(|| MigrationError::Upstream {
                status: 404,
                message: format!("record {source_id} not found"),
            })
    }
}

/// 内存目标系统，创建的 target_id 为 `<prefix><请求中的 id>`
#[derive(Debug, Clone)]
pub struct MockTargetAdapter {
    target_prefix: Arc<Mutex<String>>,
    ignored: Arc<Mutex<HashSet<String>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    created: Arc<Mutex<Vec<Value>>>,
    create_calls: Arc<AtomicUsize>,
}

impl MockTargetAdapter {
    pub fn new() -> Self {
        Self {
            target_prefix: Arc::new(Mutex::new("T".to_string())),
            ignored: Arc::new(Mutex::new(HashSet::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            created: Arc::new(Mutex::new(Vec::new())),
            create_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_target_prefix(&self, prefix: &str) {
        *self.target_prefix.lock().unwrap() = prefix.to_string();
    }

    pub fn ignore(&self, source_id: &str) {
        self.ignored.lock().unwrap().insert(source_id.to_string());
    }

    pub fn fail_create(&self, source_id: &str) {
        self.failing.lock().unwrap().insert(source_id.to_string());
    }

    pub fn created(&self) -> Vec<Value> {
        self.created.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTargetAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetAdapter for MockTargetAdapter {
    async fn create(&self, request: &Value) -> MigrationResult<CreateOutcome> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let id = match request.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err(MigrationError::validation_error("request has no id")),
        };
        if self.failing.lock().unwrap().contains(&id) {
            return Err(MigrationError::Upstream {
                status: 503,
                message: "target unavailable".to_string(),
            });
        }
        if self.ignored.lock().unwrap().contains(&id) {
            return Ok(CreateOutcome::Ignored {
                reason: format!("{id} already exists in target"),
            });
        }
        self.created.lock().unwrap().push(request.clone());
        let prefix = self.target_prefix.lock().unwrap().clone();
        Ok(CreateOutcome::Created {
            target_id: format!("{prefix}{id}"),
        })
    }
}

/// 内存映射服务，`source_id` 唯一
#[derive(Debug, Clone, Default)]
pub struct MockMappingClient {
    mappings: Arc<Mutex<HashMap<String, MigrationMapping>>>,
    fail_next_creates: Arc<AtomicUsize>,
    create_attempts: Arc<AtomicUsize>,
    stale_lookups: Arc<AtomicBool>,
}

impl MockMappingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, mapping: MigrationMapping) {
        self.mappings
            .lock()
            .unwrap()
            .insert(mapping.source_id.clone(), mapping);
    }

    /// 接下来 `n` 次 create 返回网络错误
    pub fn fail_next_creates(&self, n: usize) {
        self.fail_next_creates.store(n, Ordering::SeqCst);
    }

    /// 查询总是返回未找到，模拟并发处理时已通过幂等检查的情况
    pub fn set_stale_lookups(&self, stale: bool) {
        self.stale_lookups.store(stale, Ordering::SeqCst);
    }

    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    pub fn get(&self, source_id: &str) -> Option<MigrationMapping> {
        self.mappings.lock().unwrap().get(source_id).cloned()
    }

    pub fn all(&self) -> Vec<MigrationMapping> {
        self.mappings.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl MappingClient for MockMappingClient {
    async fn find_by_source_id(
        &self,
        source_id: &str,
    ) -> MigrationResult<Option<MigrationMapping>> {
        if self.stale_lookups.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.get(source_id))
    }

    async fn create(&self, mapping: &MigrationMapping) -> MigrationResult<CreateMappingResult> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .fail_next_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(MigrationError::Network("mapping service unavailable".to_string()));
        }

        let mut mappings = self.mappings.lock().unwrap();
        if let Some(existing) = mappings.get(&mapping.source_id) {
            return Ok(CreateMappingResult::Duplicate(DuplicateMapping {
                existing: existing.clone(),
                duplicate: mapping.clone(),
            }));
        }
        mappings.insert(mapping.source_id.clone(), mapping.clone());
        Ok(CreateMappingResult::Created)
    }

    async fn count_by_label(&self, label: &str) -> MigrationResult<i64> {
        Ok(self
            .mappings
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.label.as_deref() == Some(label))
            .count() as i64)
    }
}

/// 记录所有遥测事件
#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    events: Arc<Mutex<Vec<(String, TelemetryProperties)>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn events_named(&self, name: &str) -> Vec<TelemetryProperties> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, props)| props.clone())
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events_named(name).len()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn event(&self, name: &str, properties: TelemetryProperties) {
        self.events
            .lock()
            .unwrap()
            .push((name.to_string(), properties));
    }
}

/// 固定时间，可手动推进
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn at(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        let now = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, min, sec))
            .unwrap();
        Self::new(now)
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += duration;
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::at(2020, 3, 24, 12, 0, 0)
    }
}

impl Clock for FixedClock {
    fn now_local(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.now.lock().unwrap().and_utc()
    }
}
