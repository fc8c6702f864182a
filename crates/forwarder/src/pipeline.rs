//! 포워더 오케스트레이션 -- tail / 정규화 / 지문 / 중복 제거 / 발행의 전체 흐름을 관리합니다.
//!
//! [`LogForwarder`]는 core의 [`Pipeline`](linehaul_core::pipeline::Pipeline) trait을 구현하여
//! `linehaul-daemon`에서 start/stop/health_check 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! FileTail::poll -> normalize -> fingerprint -> DedupStore -> Publisher
//!        ^                                                        |
//!        +------------------ sleep(poll_interval) <---------------+
//! ```
//!
//! # 상태 전이
//! `Idle -> Polling -> Normalizing -> Deduping -> Publishing -> Polling ...`, 종료 시 `Shutdown`.
//!
//! # 전달 정책
//! - `AtMostOnce`: 지문 기록 후 발행. 발행 실패한 라인은 재시도하지 않습니다.
//! - `AtLeastOnce`: 발행 성공 후 지문 기록. 실패한 라인은 다시 보이면 재전송됩니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use linehaul_core::config::DeliveryPolicy;
use linehaul_core::error::{LinehaulError, PipelineError};
use linehaul_core::metrics as m;
use linehaul_core::pipeline::{HealthStatus, Pipeline};

use crate::collector::{FileTail, LineEvent, ResetKind, TailCursor};
use crate::config::ForwarderConfig;
use crate::dedup::DedupStore;
use crate::error::ForwarderError;
use crate::fingerprint::{Fingerprint, fingerprint};
use crate::normalize::normalize;
use crate::publisher::{PublishMetadata, Publisher};

/// 포워더 처리 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ForwarderState {
    /// 첫 폴링 전
    Idle = 0,
    /// 파일 폴링 중 또는 다음 폴링 대기 중
    Polling = 1,
    /// 라인 정규화 중
    Normalizing = 2,
    /// 지문 확인/기록 중
    Deduping = 3,
    /// 브로커 발행 중
    Publishing = 4,
    /// 종료됨
    Shutdown = 5,
}

impl ForwarderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Polling,
            2 => Self::Normalizing,
            3 => Self::Deduping,
            4 => Self::Publishing,
            _ => Self::Shutdown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Normalizing => "normalizing",
            Self::Deduping => "deduping",
            Self::Publishing => "publishing",
            Self::Shutdown => "shutdown",
        }
    }
}

/// 누적 처리 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    /// 파일에서 읽은 라인 수
    pub lines_read: u64,
    /// 빈 라인 등으로 건너뛴 수
    pub lines_skipped: u64,
    /// 중복으로 억제된 수
    pub duplicates: u64,
    /// 발행 성공 수
    pub published: u64,
    /// 발행 실패 수
    pub publish_failures: u64,
    /// truncation/rotation 리셋 수
    pub tail_resets: u64,
}

/// 한 번의 폴링 처리 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub read: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub published: usize,
    pub publish_failures: usize,
    /// 종료 요청으로 처리하지 않은 라인 수 (발행 대기 중 중단된 라인 포함)
    pub abandoned: usize,
    /// 이번 폴링에서 발생한 커서 리셋
    pub reset: Option<ResetKind>,
}

/// 라인 하나의 발행 결과
enum Delivery {
    Sent,
    Failed,
    /// 종료 요청으로 전달 확인을 기다리지 않음
    Abandoned,
}

/// 루프 태스크와 핸들이 공유하는 상태
#[derive(Debug, Default)]
struct SharedStatus {
    state: AtomicU8,
    fatal: AtomicBool,
    lines_read: AtomicU64,
    lines_skipped: AtomicU64,
    duplicates: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    tail_resets: AtomicU64,
    last_tick_publish_failures: AtomicU64,
    consecutive_source_errors: AtomicU32,
}

impl SharedStatus {
    fn state(&self) -> ForwarderState {
        ForwarderState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn snapshot(&self) -> ForwarderStats {
        ForwarderStats {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            lines_skipped: self.lines_skipped.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            tail_resets: self.tail_resets.load(Ordering::Relaxed),
        }
    }
}

/// 단일 파일 포워딩 루프
///
/// tail 소스, 커서, 지문 저장소, 발행자를 독점 소유합니다.
/// [`tick`](Self::tick)은 폴링 한 번을 처리하고, [`run`](Self::run)은
/// 취소될 때까지 주기적으로 `tick`을 호출합니다.
pub struct ForwardLoop<P> {
    config: ForwarderConfig,
    tail: FileTail,
    cursor: TailCursor,
    store: DedupStore,
    publisher: P,
    status: Arc<SharedStatus>,
    consecutive_source_errors: u32,
}

impl<P: Publisher> ForwardLoop<P> {
    /// 설정을 검증하고 지문 저장소를 연 뒤 루프를 생성합니다.
    pub async fn open(config: ForwarderConfig, publisher: P) -> Result<Self, ForwarderError> {
        config.validate()?;
        let store =
            DedupStore::open(&config.checkpoint_dir, config.cache_size, config.sync_on_record)
                .await?;
        let tail = FileTail::open(&config.file_path, config.tail_config());
        let cursor = tail.initial_cursor();

        Ok(Self {
            config,
            tail,
            cursor,
            store,
            publisher,
            status: Arc::new(SharedStatus::default()),
            consecutive_source_errors: 0,
        })
    }

    pub fn state(&self) -> ForwarderState {
        self.status.state()
    }

    pub fn stats(&self) -> ForwarderStats {
        self.status.snapshot()
    }

    /// 현재 tail 커서
    pub fn cursor(&self) -> &TailCursor {
        &self.cursor
    }

    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    fn set_state(&self, state: ForwarderState) {
        self.status.state.store(state as u8, Ordering::Release);
    }

    /// 폴링 한 번을 처리합니다.
    ///
    /// 배치의 라인은 파일 순서대로 처리됩니다. 소스 에러는 연속
    /// `max_consecutive_errors`회에 도달할 때까지 빈 결과로 흡수되며,
    /// 에러가 반환되면 루프를 계속할 수 없습니다.
    pub async fn tick(&mut self) -> Result<TickReport, ForwarderError> {
        self.tick_until(&CancellationToken::new()).await
    }

    /// [`tick`](Self::tick)과 같지만 `cancel`이 취소되면 배치의 남은 라인을
    /// 처리하지 않고 반환합니다. 발행 대기도 취소와 경합합니다.
    ///
    /// 커서는 이미 배치 끝으로 이동했으므로 버려진 라인은 이 루프에서 다시 읽히지
    /// 않습니다. 취소 후에는 루프를 종료해야 하며, 재시작 시 오프셋 0부터의
    /// 재스캔과 지문 저장소가 남은 라인을 처리합니다.
    pub async fn tick_until(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<TickReport, ForwarderError> {
        self.set_state(ForwarderState::Polling);

        let batch = match self.tail.poll(&self.cursor).await {
            Ok(batch) => {
                self.consecutive_source_errors = 0;
                self.status
                    .consecutive_source_errors
                    .store(0, Ordering::Relaxed);
                batch
            }
            Err(e) => {
                self.consecutive_source_errors += 1;
                self.status
                    .consecutive_source_errors
                    .store(self.consecutive_source_errors, Ordering::Relaxed);
                metrics::counter!(m::SOURCE_ERRORS_TOTAL).increment(1);

                if self.consecutive_source_errors >= self.config.max_consecutive_errors {
                    error!(
                        error = %e,
                        attempts = self.consecutive_source_errors,
                        "source error limit reached"
                    );
                    return Err(e);
                }
                warn!(
                    error = %e,
                    attempts = self.consecutive_source_errors,
                    limit = self.config.max_consecutive_errors,
                    "source error, retrying next poll"
                );
                return Ok(TickReport::default());
            }
        };

        let mut report = TickReport {
            read: batch.events.len(),
            reset: batch.reset,
            ..TickReport::default()
        };
        self.cursor = batch.cursor;
        if batch.reset.is_some() {
            self.status.tail_resets.fetch_add(1, Ordering::Relaxed);
        }
        self.status
            .lines_read
            .fetch_add(report.read as u64, Ordering::Relaxed);
        metrics::counter!(m::LINES_READ_TOTAL).increment(report.read as u64);

        for (index, event) in batch.events.iter().enumerate() {
            if cancel.is_cancelled() {
                report.abandoned += batch.events.len() - index;
                break;
            }
            self.process_line(event, &mut report, cancel).await?;
        }
        if report.abandoned > 0 {
            info!(
                abandoned = report.abandoned,
                "stop requested, leaving rest of batch"
            );
        }

        if report.read > 0 {
            // 새 라인이 있었던 마지막 폴링의 실패 수 (빈 폴링은 상태를 바꾸지 않음)
            self.status
                .last_tick_publish_failures
                .store(report.publish_failures as u64, Ordering::Relaxed);
            info!(
                read = report.read,
                published = report.published,
                duplicates = report.duplicates,
                skipped = report.skipped,
                failed = report.publish_failures,
                offset = self.cursor.offset(),
                "poll processed"
            );
        }
        Ok(report)
    }

    async fn process_line(
        &mut self,
        event: &LineEvent,
        report: &mut TickReport,
        cancel: &CancellationToken,
    ) -> Result<(), ForwarderError> {
        self.set_state(ForwarderState::Normalizing);
        let Some(line) = normalize(event) else {
            report.skipped += 1;
            self.status.lines_skipped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::LINES_SKIPPED_TOTAL, m::LABEL_REASON => "empty").increment(1);
            return Ok(());
        };

        let fp = fingerprint(&line);
        debug!(fingerprint = %fp, offset = event.source_offset, "processing new line");

        self.set_state(ForwarderState::Deduping);
        match self.config.delivery {
            DeliveryPolicy::AtMostOnce => {
                if self.store.seen_or_record(&fp).await? {
                    self.count_duplicate(&fp, report);
                    return Ok(());
                }
                self.set_state(ForwarderState::Publishing);
                match self.publish(&line, &fp, cancel).await {
                    Delivery::Sent => self.count_published(report),
                    // 지문은 이미 기록됨 -> 재시도하지 않음
                    Delivery::Failed => self.count_failure(report),
                    Delivery::Abandoned => report.abandoned += 1,
                }
            }
            DeliveryPolicy::AtLeastOnce => {
                if self.store.contains(&fp) {
                    self.count_duplicate(&fp, report);
                    return Ok(());
                }
                self.set_state(ForwarderState::Publishing);
                match self.publish(&line, &fp, cancel).await {
                    Delivery::Sent => {
                        self.set_state(ForwarderState::Deduping);
                        self.store.record(&fp).await?;
                        self.count_published(report);
                    }
                    // 기록하지 않음 -> 다시 보이면 재전송
                    Delivery::Failed => self.count_failure(report),
                    Delivery::Abandoned => report.abandoned += 1,
                }
            }
        }
        Ok(())
    }

    async fn publish(&self, line: &str, fp: &Fingerprint, cancel: &CancellationToken) -> Delivery {
        let metadata = PublishMetadata {
            fingerprint: fp.clone(),
        };
        let result = tokio::select! {
            result = self.publisher.publish(line, &metadata) => result,
            _ = cancel.cancelled() => {
                warn!(
                    fingerprint = %fp,
                    delivery = self.config.delivery.as_str(),
                    "stop requested while awaiting delivery"
                );
                return Delivery::Abandoned;
            }
        };
        match result {
            Ok(()) => {
                debug!(fingerprint = %fp, "line published");
                Delivery::Sent
            }
            Err(e) => {
                error!(
                    fingerprint = %fp,
                    error = %e,
                    delivery = self.config.delivery.as_str(),
                    "failed to publish line"
                );
                Delivery::Failed
            }
        }
    }

    fn count_duplicate(&self, fp: &Fingerprint, report: &mut TickReport) {
        debug!(fingerprint = %fp, "duplicate line suppressed");
        report.duplicates += 1;
        self.status.duplicates.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::LINES_DUPLICATE_TOTAL).increment(1);
    }

    fn count_published(&self, report: &mut TickReport) {
        report.published += 1;
        self.status.published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::LINES_PUBLISHED_TOTAL).increment(1);
    }

    fn count_failure(&self, report: &mut TickReport) {
        report.publish_failures += 1;
        self.status.publish_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::PUBLISH_FAILURES_TOTAL).increment(1);
    }

    /// 취소되거나 복구 불가능한 에러가 발생할 때까지 폴링합니다.
    ///
    /// 취소는 폴링 사이 대기, 배치의 라인 사이, 발행 대기 중에 관측됩니다.
    /// 종료 시 지문 저장소와 발행자를 flush합니다.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ForwarderStats, ForwarderError> {
        info!(
            path = %self.config.file_path,
            checkpoint = %self.store.path().display(),
            delivery = self.config.delivery.as_str(),
            "forwarder loop started"
        );

        let mut outcome = Ok(());
        let cancelled_during_delay = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.config.initial_delay()) => false,
        };

        if !cancelled_during_delay {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = self.tick_until(&cancel).await {
                    error!(error = %e, "irrecoverable error, shutting down forwarder");
                    self.status.fatal.store(true, Ordering::Release);
                    outcome = Err(e);
                    break;
                }
                self.set_state(ForwarderState::Polling);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }
        }

        self.shutdown(outcome).await
    }

    /// 루프를 실행하지 않고 종료 처리(flush)만 수행합니다.
    pub async fn close(self) -> Result<ForwarderStats, ForwarderError> {
        self.shutdown(Ok(())).await
    }

    async fn shutdown(
        mut self,
        outcome: Result<(), ForwarderError>,
    ) -> Result<ForwarderStats, ForwarderError> {
        self.set_state(ForwarderState::Shutdown);
        let mut outcome = outcome;

        if let Err(e) = self.store.flush().await {
            error!(error = %e, "failed to flush dedup store");
            if outcome.is_ok() {
                self.status.fatal.store(true, Ordering::Release);
                outcome = Err(e);
            }
        }
        if let Err(e) = self.publisher.flush().await {
            warn!(error = %e, "failed to flush publisher");
        }

        let stats = self.stats();
        info!(
            read = stats.lines_read,
            published = stats.published,
            duplicates = stats.duplicates,
            failed = stats.publish_failures,
            "forwarder loop stopped"
        );
        outcome.map(|()| stats)
    }
}

/// 로그 포워더 -- [`ForwardLoop`]를 tokio 태스크로 실행하고 생명주기를 관리합니다.
///
/// # 사용 예시
/// ```ignore
/// use linehaul_forwarder::{LogForwarderBuilder, KafkaPublisher};
///
/// let mut forwarder = LogForwarderBuilder::new()
///     .config(config)
///     .publisher(publisher)
///     .build()
///     .await?;
///
/// forwarder.start().await?;
/// ```
pub struct LogForwarder<P: Publisher> {
    pending: Option<ForwardLoop<P>>,
    task: Option<JoinHandle<Result<ForwarderStats, ForwarderError>>>,
    cancel: CancellationToken,
    status: Arc<SharedStatus>,
}

impl<P: Publisher> LogForwarder<P> {
    /// 준비된 루프로 포워더를 생성합니다.
    pub fn new(forward_loop: ForwardLoop<P>) -> Self {
        let status = Arc::clone(&forward_loop.status);
        Self {
            pending: Some(forward_loop),
            task: None,
            cancel: CancellationToken::new(),
            status,
        }
    }

    /// 루프 중단 토큰. 취소하면 진행 중인 배치를 마친 뒤 종료합니다.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> ForwarderState {
        self.status.state()
    }

    pub fn stats(&self) -> ForwarderStats {
        self.status.snapshot()
    }

    /// 루프 태스크가 실행 중인지 여부
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// 루프 태스크가 끝날 때까지 기다립니다.
    ///
    /// 취소로 끝나면 누적 통계를, 복구 불가능한 에러로 끝나면 그 에러를 반환합니다.
    pub async fn wait(&mut self) -> Result<ForwarderStats, ForwarderError> {
        let task = self
            .task
            .take()
            .ok_or_else(|| ForwarderError::Lifecycle("forwarder is not running".to_owned()))?;
        task.await
            .map_err(|e| ForwarderError::Lifecycle(format!("forwarder task failed: {e}")))?
    }
}

impl<P: Publisher> Pipeline for LogForwarder<P> {
    async fn start(&mut self) -> Result<(), LinehaulError> {
        if self.task.is_some() {
            return Err(PipelineError::AlreadyRunning.into());
        }
        let Some(forward_loop) = self.pending.take() else {
            return Err(PipelineError::InitFailed(
                "forwarder cannot be restarted after stop".to_owned(),
            )
            .into());
        };

        info!("starting log forwarder");
        self.task = Some(tokio::spawn(forward_loop.run(self.cancel.clone())));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LinehaulError> {
        if self.task.is_none() {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping log forwarder");
        self.cancel.cancel();
        let stats = self.wait().await?;
        info!(published = stats.published, "log forwarder stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        if self.pending.is_some() {
            return HealthStatus::Unhealthy("not started".to_owned());
        }
        if self.status.state() == ForwarderState::Shutdown {
            return if self.status.fatal.load(Ordering::Acquire) {
                HealthStatus::Unhealthy("terminated after irrecoverable error".to_owned())
            } else {
                HealthStatus::Unhealthy("stopped".to_owned())
            };
        }

        let source_errors = self.status.consecutive_source_errors.load(Ordering::Relaxed);
        if source_errors > 0 {
            return HealthStatus::Degraded(format!("{source_errors} consecutive source errors"));
        }
        let failures = self.status.last_tick_publish_failures.load(Ordering::Relaxed);
        if failures > 0 {
            return HealthStatus::Degraded(format!("{failures} publish failures in last poll"));
        }
        HealthStatus::Healthy
    }
}

/// 로그 포워더 빌더
pub struct LogForwarderBuilder<P> {
    config: Option<ForwarderConfig>,
    publisher: Option<P>,
}

impl<P: Publisher> LogForwarderBuilder<P> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: None,
            publisher: None,
        }
    }

    /// 포워더 설정을 지정합니다. 지정하지 않으면 기본값을 사용합니다.
    pub fn config(mut self, config: ForwarderConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 발행자를 지정합니다 (필수).
    pub fn publisher(mut self, publisher: P) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// 지문 저장소를 열고 포워더를 생성합니다.
    pub async fn build(self) -> Result<LogForwarder<P>, ForwarderError> {
        let config = self.config.unwrap_or_default();
        let publisher = self.publisher.ok_or_else(|| ForwarderError::Config {
            field: "publisher".to_owned(),
            reason: "publisher is required".to_owned(),
        })?;
        let forward_loop = ForwardLoop::open(config, publisher).await?;
        Ok(LogForwarder::new(forward_loop))
    }
}

impl<P: Publisher> Default for LogForwarderBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}
