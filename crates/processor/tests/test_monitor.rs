use async_trait::async_trait;
use conversations::{
    ConversationRecord, ConversationStatus, ConversationStore, InMemoryConversationStore,
    MessageEntry, RecordUpdate, StoreError, StoreResult,
};
use llm::MockGenerationClient;
use processor::{ConversationProcessor, MonitorExit, MonitorLoop, MonitorSettings};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Хранилище, у которого успех/сбой каждой выборки задан сценарием
struct ScriptedStore {
    inner: InMemoryConversationStore,
    script: Mutex<VecDeque<bool>>,
    fetches: Mutex<u32>,
}

impl ScriptedStore {
    fn new(script: &[bool]) -> Self {
        Self {
            inner: InMemoryConversationStore::new(),
            script: Mutex::new(script.iter().copied().collect()),
            fetches: Mutex::new(0),
        }
    }

    fn fetches(&self) -> u32 {
        *self.fetches.lock().unwrap()
    }
}

#[async_trait]
impl ConversationStore for ScriptedStore {
    async fn fetch_pending(&self) -> StoreResult<Vec<ConversationRecord>> {
        *self.fetches.lock().unwrap() += 1;
        let ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if ok {
            self.inner.fetch_pending().await
        } else {
            Err(StoreError::Unavailable("database is locked".to_string()))
        }
    }

    async fn fetch_by_id(&self, id: &str) -> StoreResult<Option<ConversationRecord>> {
        self.inner.fetch_by_id(id).await
    }

    async fn update_status(
        &self,
        id: &str,
        status: ConversationStatus,
        update: RecordUpdate,
    ) -> StoreResult<bool> {
        self.inner.update_status(id, status, update).await
    }

    async fn claim(&self, id: &str) -> StoreResult<bool> {
        self.inner.claim(id).await
    }

    async fn requeue(&self, id: &str) -> StoreResult<bool> {
        self.inner.requeue(id).await
    }

    async fn insert(&self, record: ConversationRecord) -> StoreResult<()> {
        self.inner.insert(record).await
    }
}

fn settings() -> MonitorSettings {
    MonitorSettings {
        check_interval: Duration::from_secs(30),
        record_pause: Duration::from_secs(2),
        max_backoff: Duration::from_secs(60),
        max_consecutive_errors: 5,
    }
}

fn available_generator() -> MockGenerationClient {
    let mut mock = MockGenerationClient::new();
    mock.expect_check_availability().returning(|| true);
    mock
}

fn record(id: &str) -> ConversationRecord {
    ConversationRecord::new_pending(id, vec![MessageEntry::new("user", "need some advice")])
}

fn monitor(store: Arc<dyn ConversationStore>, generator: MockGenerationClient) -> MonitorLoop {
    MonitorLoop::new(
        ConversationProcessor::new(store, Arc::new(generator)),
        settings(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_generation_never_starts() {
    let store = Arc::new(ScriptedStore::new(&[]));

    let mut generator = MockGenerationClient::new();
    generator.expect_check_availability().times(1).returning(|| false);

    let (exit, stats) = monitor(store.clone(), generator)
        .run(CancellationToken::new())
        .await;

    assert_eq!(exit, MonitorExit::GenerationUnavailable);
    assert_eq!(stats.cycles, 0);
    assert_eq!(store.fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_halts_after_five_consecutive_errors() {
    let store = Arc::new(ScriptedStore::new(&[false; 8]));
    let started = Instant::now();

    let (exit, stats) = monitor(store.clone(), available_generator())
        .run(CancellationToken::new())
        .await;

    assert_eq!(exit, MonitorExit::TooManyErrors { errors: 5 });
    assert_eq!(store.fetches(), 5, "no cycle runs after the halt");
    assert_eq!(stats.cycle_errors, 5);

    // backoff: 30 + 60 + 60 + 60, после пятой ошибки сна нет
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(210), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(211), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_successful_cycle_resets_error_counter() {
    let script = [
        false, false, false, false, true, false, false, false, false, false,
    ];
    let store = Arc::new(ScriptedStore::new(&script));

    let (exit, stats) = monitor(store.clone(), available_generator())
        .run(CancellationToken::new())
        .await;

    assert_eq!(exit, MonitorExit::TooManyErrors { errors: 5 });
    assert_eq!(store.fetches(), 10);
    assert_eq!(stats.cycles, 10);
    assert_eq!(stats.cycle_errors, 9);
}

#[tokio::test(start_paused = true)]
async fn test_processes_pending_records_until_cancelled() {
    let store = Arc::new(InMemoryConversationStore::with_records(vec![
        record("a"),
        record("b"),
    ]));

    let mut generator = available_generator();
    generator
        .expect_summarize()
        .times(2)
        .returning(|_| Ok("Person asking for advice".to_string()));
    generator
        .expect_extract_keywords()
        .returning(|_| Ok(Vec::new()));
    generator
        .expect_generate_phrases()
        .returning(|_| Ok(Vec::new()));
    generator
        .expect_model_identity()
        .returning(|| "test-model".to_string());

    let token = CancellationToken::new();
    let monitor = monitor(store.clone(), generator);
    let run_token = token.clone();
    let handle = tokio::spawn(async move { monitor.run(run_token).await });

    // два цикла по 30 секунд с запасом
    tokio::time::sleep(Duration::from_secs(75)).await;
    token.cancel();

    let (exit, stats) = handle.await.unwrap();
    assert_eq!(exit, MonitorExit::Cancelled);
    assert_eq!(stats.records_processed, 2);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.cycle_errors, 0);
    assert!(stats.cycles >= 2);

    for id in ["a", "b"] {
        assert_eq!(store.get(id).unwrap().status, ConversationStatus::Completed);
    }
}

#[tokio::test(start_paused = true)]
async fn test_record_failures_do_not_count_as_cycle_errors() {
    let store = Arc::new(InMemoryConversationStore::with_records(vec![record("bad")]));

    let mut generator = available_generator();
    generator
        .expect_summarize()
        .times(1)
        .returning(|_| Ok(String::new()));

    let token = CancellationToken::new();
    let monitor = monitor(store.clone(), generator);
    let run_token = token.clone();
    let handle = tokio::spawn(async move { monitor.run(run_token).await });

    tokio::time::sleep(Duration::from_secs(100)).await;
    token.cancel();

    let (exit, stats) = handle.await.unwrap();
    assert_eq!(exit, MonitorExit::Cancelled);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.cycle_errors, 0);
    assert_eq!(store.get("bad").unwrap().status, ConversationStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_backoff() {
    let store = Arc::new(ScriptedStore::new(&[false; 5]));
    let token = CancellationToken::new();

    let monitor = monitor(store.clone(), available_generator());
    let run_token = token.clone();
    let handle = tokio::spawn(async move { monitor.run(run_token).await });

    // первая ошибка, затем 30 секунд backoff; отменяем посреди сна
    tokio::time::sleep(Duration::from_secs(10)).await;
    token.cancel();

    let (exit, stats) = handle.await.unwrap();
    assert_eq!(exit, MonitorExit::Cancelled);
    assert_eq!(stats.cycle_errors, 1);
    assert_eq!(store.fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_runs_no_cycle() {
    let store = Arc::new(ScriptedStore::new(&[]));
    let token = CancellationToken::new();
    token.cancel();

    let (exit, stats) = monitor(store.clone(), available_generator())
        .run(token)
        .await;

    assert_eq!(exit, MonitorExit::Cancelled);
    assert_eq!(stats.cycles, 0);
    assert_eq!(store.fetches(), 0);
}
