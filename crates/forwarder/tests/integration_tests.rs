//! 통합 테스트 -- tail부터 발행까지의 전체 흐름 검증
//!
//! 실제 브로커 대신 발행 내용을 기록하는 [`MockPublisher`]를 사용합니다.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use linehaul_core::config::DeliveryPolicy;
use linehaul_core::pipeline::{HealthStatus, Pipeline};
use linehaul_forwarder::dedup::STORE_FILE_NAME;
use linehaul_forwarder::{
    ForwardLoop, ForwarderConfig, ForwarderConfigBuilder, ForwarderError, Fingerprint,
    LogForwarderBuilder, PublishError, PublishMetadata, Publisher, ResetKind, fingerprint,
};
use tokio_util::sync::CancellationToken;

// =============================================================================
// 테스트 헬퍼
// =============================================================================

#[derive(Default)]
struct MockState {
    published: Mutex<Vec<(String, Fingerprint)>>,
    attempts: Mutex<usize>,
    down: AtomicBool,
    delay_ms: AtomicU64,
}

/// 발행 내용을 기록하고, 필요 시 브로커 장애를 흉내 내는 발행자
#[derive(Clone, Default)]
struct MockPublisher {
    state: Arc<MockState>,
}

impl MockPublisher {
    fn set_down(&self, down: bool) {
        self.state.down.store(down, Ordering::SeqCst);
    }

    /// 발행마다 응답 전에 대기 (전달 확인이 느린 브로커)
    fn set_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn lines(&self) -> Vec<String> {
        self.state
            .published
            .lock()
            .unwrap()
            .iter()
            .map(|(line, _)| line.clone())
            .collect()
    }

    fn attempts(&self) -> usize {
        *self.state.attempts.lock().unwrap()
    }
}

impl Publisher for MockPublisher {
    async fn publish(&self, content: &str, metadata: &PublishMetadata) -> Result<(), PublishError> {
        *self.state.attempts.lock().unwrap() += 1;
        let delay = self.state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.state.down.load(Ordering::SeqCst) {
            return Err(PublishError::Timeout {
                topic: "log-topic".to_owned(),
                timeout_ms: 5000,
            });
        }
        self.state
            .published
            .lock()
            .unwrap()
            .push((content.to_owned(), metadata.fingerprint.clone()));
        Ok(())
    }

    async fn flush(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    log_path: PathBuf,
    checkpoint: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let log_path = dir.path().join("app.log");
        let checkpoint = dir.path().join("checkpoint");
        Self {
            _dir: dir,
            log_path,
            checkpoint,
        }
    }

    fn config(&self) -> ForwarderConfigBuilder {
        ForwarderConfigBuilder::new()
            .file_path(self.log_path.display().to_string())
            .checkpoint_dir(self.checkpoint.display().to_string())
            .poll_interval_ms(10)
            .initial_delay_ms(0)
            .sync_on_record(false)
    }

    fn default_config(&self) -> ForwarderConfig {
        self.config().build().expect("valid config")
    }

    fn append(&self, data: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .expect("open log");
        file.write_all(data.as_bytes()).expect("append");
    }

    fn store_records(&self) -> Vec<String> {
        read_records(&self.checkpoint)
    }
}

fn read_records(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join(STORE_FILE_NAME))
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

async fn open_loop(config: ForwarderConfig, publisher: &MockPublisher) -> ForwardLoop<MockPublisher> {
    ForwardLoop::open(config, publisher.clone())
        .await
        .expect("forward loop should open")
}

// =============================================================================
// 기본 흐름
// =============================================================================

/// "a\nb\nb\n" -> a, b 발행, 저장소 2개
#[tokio::test]
async fn duplicate_line_in_same_batch_is_suppressed() {
    let fx = Fixture::new();
    fx.append("a\nb\nb\n");
    let publisher = MockPublisher::default();
    let mut forward_loop = open_loop(fx.default_config(), &publisher).await;

    let report = forward_loop.tick().await.unwrap();

    assert_eq!(publisher.lines(), vec!["a", "b"]);
    assert_eq!(report.published, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(forward_loop.store().len(), 2);
    assert_eq!(fx.store_records().len(), 2);
}

#[tokio::test]
async fn lines_published_in_file_order_with_fingerprint_header() {
    let fx = Fixture::new();
    let lines: Vec<String> = (0..50).map(|i| format!("event-{i:03}")).collect();
    fx.append(&(lines.join("\n") + "\n"));
    let publisher = MockPublisher::default();
    let mut forward_loop = open_loop(fx.default_config(), &publisher).await;

    forward_loop.tick().await.unwrap();

    assert_eq!(publisher.lines(), lines);
    for (line, fp) in publisher.state.published.lock().unwrap().iter() {
        assert_eq!(*fp, fingerprint(line));
    }
}

#[tokio::test]
async fn empty_and_whitespace_lines_never_published() {
    let fx = Fixture::new();
    fx.append("\n   \n\t\r\nreal\r\n\r\n");
    let publisher = MockPublisher::default();
    let mut forward_loop = open_loop(fx.default_config(), &publisher).await;

    let report = forward_loop.tick().await.unwrap();

    assert_eq!(publisher.lines(), vec!["real"]);
    assert_eq!(report.skipped, 4);
    assert_eq!(fx.store_records().len(), 1);
}

#[tokio::test]
async fn partial_line_waits_for_terminator() {
    let fx = Fixture::new();
    fx.append("complete\nhalf");
    let publisher = MockPublisher::default();
    let mut forward_loop = open_loop(fx.default_config(), &publisher).await;

    forward_loop.tick().await.unwrap();
    assert_eq!(publisher.lines(), vec!["complete"]);

    fx.append("-done\n");
    forward_loop.tick().await.unwrap();
    assert_eq!(publisher.lines(), vec!["complete", "half-done"]);
}

#[tokio::test]
async fn missing_file_is_picked_up_when_created() {
    let fx = Fixture::new();
    let publisher = MockPublisher::default();
    let mut forward_loop = open_loop(fx.default_config(), &publisher).await;

    let report = forward_loop.tick().await.unwrap();
    assert_eq!(report.read, 0);

    fx.append("late\n");
    forward_loop.tick().await.unwrap();
    assert_eq!(publisher.lines(), vec!["late"]);
}

// =============================================================================
// 멱등성 / 재시작 내구성
// =============================================================================

#[tokio::test]
async fn repeated_polls_publish_each_line_once() {
    let fx = Fixture::new();
    fx.append("one\ntwo\n");
    let publisher = MockPublisher::default();
    let mut forward_loop = open_loop(fx.default_config(), &publisher).await;

    forward_loop.tick().await.unwrap();
    forward_loop.tick().await.unwrap();
    // 같은 내용이 다시 추가되어도 중복
    fx.append("two\n");
    let report = forward_loop.tick().await.unwrap();

    assert_eq!(publisher.lines(), vec!["one", "two"]);
    assert_eq!(report.duplicates, 1);
}

#[tokio::test]
async fn restart_does_not_republish_forwarded_lines() {
    let fx = Fixture::new();
    fx.append("alpha\nbeta\n");

    let first = MockPublisher::default();
    let mut forward_loop = open_loop(fx.default_config(), &first).await;
    forward_loop.tick().await.unwrap();
    forward_loop.close().await.unwrap();
    assert_eq!(first.lines(), vec!["alpha", "beta"]);

    // 재시작: 커서는 0부터, 지문 저장소가 중복을 억제
    fx.append("gamma\n");
    let second = MockPublisher::default();
    let mut forward_loop = open_loop(fx.default_config(), &second).await;
    let report = forward_loop.tick().await.unwrap();

    assert_eq!(second.lines(), vec!["gamma"]);
    assert_eq!(report.duplicates, 2);
    assert_eq!(fx.store_records().len(), 3);
}

#[tokio::test]
async fn evicted_fingerprint_is_republished() {
    let fx = Fixture::new();
    fx.append("x\ny\nz\n");
    let publisher = MockPublisher::default();
    let config = fx.config().cache_size(2).build().unwrap();
    let mut forward_loop = open_loop(config, &publisher).await;

    forward_loop.tick().await.unwrap();
    assert_eq!(forward_loop.store().len(), 2);
    assert_eq!(forward_loop.store().evicted_count(), 1);

    // x는 메모리에서 축출됨 -> 재발행 (약한 보장)
    fx.append("x\nz\n");
    forward_loop.tick().await.unwrap();
    assert_eq!(publisher.lines(), vec!["x", "y", "z", "x"]);
}

#[tokio::test]
async fn restart_loads_only_most_recent_fingerprints() {
    let fx = Fixture::new();
    fx.append("p\nq\nr\n");

    let first = MockPublisher::default();
    let config = fx.config().cache_size(2).build().unwrap();
    let mut forward_loop = open_loop(config.clone(), &first).await;
    forward_loop.tick().await.unwrap();
    forward_loop.close().await.unwrap();
    assert_eq!(fx.store_records().len(), 3);

    // 재시작 시 최근 2개(q, r)만 메모리로 로드
    let second = MockPublisher::default();
    let forward_loop = open_loop(config, &second).await;
    let store = forward_loop.store();
    assert_eq!(store.len(), 2);
    assert!(!store.contains(&fingerprint("p")));
    assert!(store.contains(&fingerprint("q")));
    assert!(store.contains(&fingerprint("r")));
}

// =============================================================================
// truncation / rotation
// =============================================================================

#[tokio::test]
async fn truncation_rescans_and_suppresses_known_lines() {
    let fx = Fixture::new();
    fx.append("keep\nold\n");
    let publisher = MockPublisher::default();
    let mut forward_loop = open_loop(fx.default_config(), &publisher).await;
    forward_loop.tick().await.unwrap();

    std::fs::write(&fx.log_path, "keep\n").unwrap();
    let report = forward_loop.tick().await.unwrap();
    assert!(report.reset.is_some());
    assert_eq!(report.duplicates, 1);

    fx.append("fresh\n");
    forward_loop.tick().await.unwrap();
    assert_eq!(publisher.lines(), vec!["keep", "old", "fresh"]);
    assert_eq!(forward_loop.stats().tail_resets, 1);
}

#[tokio::test]
async fn truncation_regrown_past_offset_forwards_whole_lines() {
    let fx = Fixture::new();
    fx.append("aaaa\n");
    let publisher = MockPublisher::default();
    let mut forward_loop = open_loop(fx.default_config(), &publisher).await;
    forward_loop.tick().await.unwrap();

    // copytruncate 후 다음 폴링 전에 이전 오프셋보다 길게 다시 쓰임
    std::fs::OpenOptions::new()
        .write(true)
        .open(&fx.log_path)
        .unwrap()
        .set_len(0)
        .unwrap();
    fx.append("new-content-line\n");

    let report = forward_loop.tick().await.unwrap();
    assert_eq!(report.reset, Some(ResetKind::Truncated));
    assert_eq!(publisher.lines(), vec!["aaaa", "new-content-line"]);
    assert_eq!(forward_loop.cursor().offset(), 17);
}

#[cfg(unix)]
#[tokio::test]
async fn rotation_forwards_tail_of_old_file_and_new_file() {
    let fx = Fixture::new();
    fx.append("r1\n");
    let publisher = MockPublisher::default();
    let mut forward_loop = open_loop(fx.default_config(), &publisher).await;
    forward_loop.tick().await.unwrap();

    fx.append("r2\n");
    std::fs::rename(&fx.log_path, fx.log_path.with_extension("log.1")).unwrap();
    fx.append("n1\nr1\n");

    let report = forward_loop.tick().await.unwrap();
    assert!(report.reset.is_some());
    // r1은 새 파일에 다시 나타나지만 중복
    assert_eq!(publisher.lines(), vec!["r1", "r2", "n1"]);
    assert_eq!(report.duplicates, 1);
}

// =============================================================================
// 브로커 장애 / 전달 정책
// =============================================================================

#[tokio::test]
async fn at_most_once_failure_is_recorded_and_not_retried() {
    let fx = Fixture::new();
    fx.append("lost\n");

    let publisher = MockPublisher::default();
    publisher.set_down(true);
    let mut forward_loop = open_loop(fx.default_config(), &publisher).await;
    let report = forward_loop.tick().await.unwrap();

    assert_eq!(report.publish_failures, 1);
    assert!(publisher.lines().is_empty());
    assert_eq!(fx.store_records(), vec![fingerprint("lost").to_string()]);
    forward_loop.close().await.unwrap();

    // 브로커 복구 + 재시작: 이미 기록된 지문이므로 재전송하지 않음
    let recovered = MockPublisher::default();
    let mut forward_loop = open_loop(fx.default_config(), &recovered).await;
    forward_loop.tick().await.unwrap();
    assert!(recovered.lines().is_empty());
    assert_eq!(recovered.attempts(), 0);
}

#[tokio::test]
async fn at_least_once_failure_is_retried_after_restart() {
    let fx = Fixture::new();
    fx.append("important\n");
    let config = fx
        .config()
        .delivery(DeliveryPolicy::AtLeastOnce)
        .build()
        .unwrap();

    let publisher = MockPublisher::default();
    publisher.set_down(true);
    let mut forward_loop = open_loop(config.clone(), &publisher).await;
    let report = forward_loop.tick().await.unwrap();

    assert_eq!(report.publish_failures, 1);
    assert!(fx.store_records().is_empty());
    forward_loop.close().await.unwrap();

    let recovered = MockPublisher::default();
    let mut forward_loop = open_loop(config, &recovered).await;
    forward_loop.tick().await.unwrap();
    assert_eq!(recovered.lines(), vec!["important"]);
    assert_eq!(fx.store_records(), vec![fingerprint("important").to_string()]);

    // 이후 같은 라인은 중복
    fx.append("important\n");
    let report = forward_loop.tick().await.unwrap();
    assert_eq!(report.duplicates, 1);
    assert_eq!(recovered.lines().len(), 1);
}

#[tokio::test]
async fn at_least_once_duplicates_in_one_batch_publish_once() {
    let fx = Fixture::new();
    fx.append("same\nsame\n");
    let config = fx
        .config()
        .delivery(DeliveryPolicy::AtLeastOnce)
        .build()
        .unwrap();
    let publisher = MockPublisher::default();
    let mut forward_loop = open_loop(config, &publisher).await;

    forward_loop.tick().await.unwrap();
    assert_eq!(publisher.lines(), vec!["same"]);
}

// =============================================================================
// 생명주기
// =============================================================================

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn forwarder_tails_until_stopped() {
    let fx = Fixture::new();
    fx.append("boot\n");
    let publisher = MockPublisher::default();
    let mut forwarder = LogForwarderBuilder::new()
        .config(fx.default_config())
        .publisher(publisher.clone())
        .build()
        .await
        .unwrap();

    forwarder.start().await.unwrap();
    wait_for(|| publisher.lines().len() == 1).await;

    fx.append("live-1\nlive-2\n");
    wait_for(|| publisher.lines().len() == 3).await;
    assert_eq!(forwarder.health_check().await, HealthStatus::Healthy);

    forwarder.stop().await.unwrap();
    assert_eq!(publisher.lines(), vec!["boot", "live-1", "live-2"]);
    assert_eq!(forwarder.stats().published, 3);
    assert_eq!(fx.store_records().len(), 3);
}

#[tokio::test]
async fn cancellation_during_initial_delay_stops_cleanly() {
    let fx = Fixture::new();
    fx.append("never\n");
    let publisher = MockPublisher::default();
    let config = fx.config().initial_delay_ms(60_000).build().unwrap();
    let mut forwarder = LogForwarderBuilder::new()
        .config(config)
        .publisher(publisher.clone())
        .build()
        .await
        .unwrap();

    forwarder.start().await.unwrap();
    forwarder.cancellation_token().cancel();
    let stats = forwarder.wait().await.unwrap();

    assert_eq!(stats.lines_read, 0);
    assert!(publisher.lines().is_empty());
}

#[tokio::test]
async fn cancelled_tick_leaves_rest_of_batch_unrecorded() {
    let fx = Fixture::new();
    fx.append("x1\nx2\nx3\n");
    let publisher = MockPublisher::default();
    let config = fx.config().delivery(DeliveryPolicy::AtLeastOnce).build().unwrap();
    let mut forward_loop = open_loop(config, &publisher).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = forward_loop.tick_until(&cancel).await.unwrap();

    assert_eq!(report.read, 3);
    assert_eq!(report.abandoned, 3);
    assert_eq!(publisher.attempts(), 0);
    assert!(fx.store_records().is_empty());
}

#[tokio::test]
async fn stop_during_slow_batch_returns_promptly() {
    let fx = Fixture::new();
    let batch: String = (0..25).map(|i| format!("slow-{i}\n")).collect();
    fx.append(&batch);
    let publisher = MockPublisher::default();
    publisher.set_delay(Duration::from_millis(200));
    publisher.set_down(true);
    let mut forwarder = LogForwarderBuilder::new()
        .config(fx.default_config())
        .publisher(publisher.clone())
        .build()
        .await
        .unwrap();

    forwarder.start().await.unwrap();
    wait_for(|| publisher.attempts() >= 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    forwarder.stop().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(1), "stop took {elapsed:?}");
    assert!(publisher.attempts() < 25);
    assert!(forwarder.stats().publish_failures < 25);
}

#[tokio::test]
async fn persistent_source_error_terminates_forwarder() {
    let fx = Fixture::new();
    // 디렉토리를 로그 파일로 지정하면 읽기가 계속 실패
    std::fs::create_dir_all(&fx.log_path).unwrap();
    let config = fx.config().max_consecutive_errors(3).build().unwrap();
    let mut forwarder = LogForwarderBuilder::new()
        .config(config)
        .publisher(MockPublisher::default())
        .build()
        .await
        .unwrap();

    forwarder.start().await.unwrap();
    let err = tokio::time::timeout(Duration::from_secs(5), forwarder.wait())
        .await
        .expect("forwarder should terminate")
        .unwrap_err();

    assert!(matches!(err, ForwarderError::Source { .. }));
    assert_eq!(
        forwarder.health_check().await,
        HealthStatus::Unhealthy("terminated after irrecoverable error".to_owned())
    );
}
