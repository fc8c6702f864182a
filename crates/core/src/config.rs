//! 설정 관리: linehaul.toml 파싱 및 런타임 설정
//!
//! [`LinehaulConfig`]는 모든 섹션의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LINEHAUL_BROKER_ADDRESS=kafka:9092` 형식)
//! 3. 설정 파일 (`linehaul.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), linehaul_core::error::LinehaulError> {
//! use linehaul_core::config::LinehaulConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LinehaulConfig::load("linehaul.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LinehaulConfig::parse("[broker]\naddress = \"kafka:9092\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LinehaulError};

/// 브로커 전달 정책
///
/// 지문 기록과 발행의 순서를 결정합니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// 기록 후 발행 (기본값). 발행 실패 시 해당 라인은 재시도하지 않습니다.
    #[default]
    AtMostOnce,
    /// 발행 성공 후 기록. 발행 실패한 라인은 다음에 다시 보이면 재전송됩니다.
    AtLeastOnce,
}

impl DeliveryPolicy {
    /// 설정 문자열에서 정책을 파싱합니다.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "at_most_once" => Some(Self::AtMostOnce),
            "at_least_once" => Some(Self::AtLeastOnce),
            _ => None,
        }
    }

    /// 설정 문자열 표현을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AtMostOnce => "at_most_once",
            Self::AtLeastOnce => "at_least_once",
        }
    }
}

/// linehaul 통합 설정
///
/// `linehaul.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinehaulConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// tail 대상 로그 파일 설정
    #[serde(default)]
    pub log: LogSourceConfig,
    /// 중복 제거 체크포인트 설정
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// 메시지 브로커 설정
    #[serde(default)]
    pub broker: BrokerConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl LinehaulConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LinehaulError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LinehaulError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LinehaulError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LinehaulError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LinehaulError> {
        toml::from_str(toml_str).map_err(|e| {
            LinehaulError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LINEHAUL_{SECTION}_{FIELD}`
    /// 예: `LINEHAUL_LOG_FILE_PATH=/var/log/app.log`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LINEHAUL_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LINEHAUL_GENERAL_LOG_FORMAT");

        // Log source
        override_string(&mut self.log.file_path, "LINEHAUL_LOG_FILE_PATH");
        override_u64(
            &mut self.log.poll_interval_ms,
            "LINEHAUL_LOG_POLL_INTERVAL_MS",
        );
        override_u64(
            &mut self.log.initial_delay_ms,
            "LINEHAUL_LOG_INITIAL_DELAY_MS",
        );
        override_usize(
            &mut self.log.max_line_length,
            "LINEHAUL_LOG_MAX_LINE_LENGTH",
        );
        override_usize(&mut self.log.max_read_bytes, "LINEHAUL_LOG_MAX_READ_BYTES");
        override_u32(
            &mut self.log.max_consecutive_errors,
            "LINEHAUL_LOG_MAX_CONSECUTIVE_ERRORS",
        );

        // Checkpoint
        override_string(&mut self.checkpoint.dir_path, "LINEHAUL_CHECKPOINT_DIR_PATH");
        override_usize(
            &mut self.checkpoint.cache_size,
            "LINEHAUL_CHECKPOINT_CACHE_SIZE",
        );
        override_bool(
            &mut self.checkpoint.sync_on_record,
            "LINEHAUL_CHECKPOINT_SYNC_ON_RECORD",
        );

        // Broker
        override_string(&mut self.broker.address, "LINEHAUL_BROKER_ADDRESS");
        override_string(&mut self.broker.topic, "LINEHAUL_BROKER_TOPIC");
        override_u64(
            &mut self.broker.message_timeout_ms,
            "LINEHAUL_BROKER_MESSAGE_TIMEOUT_MS",
        );
        override_delivery(&mut self.broker.delivery, "LINEHAUL_BROKER_DELIVERY");

        // Metrics
        override_bool(&mut self.metrics.enabled, "LINEHAUL_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "LINEHAUL_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "LINEHAUL_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LinehaulError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.log.file_path.trim().is_empty() {
            return Err(invalid("log.file_path", "must not be empty"));
        }

        if self.log.poll_interval_ms == 0 {
            return Err(invalid("log.poll_interval_ms", "must be greater than 0"));
        }

        if self.log.max_line_length == 0 {
            return Err(invalid("log.max_line_length", "must be greater than 0"));
        }

        if self.log.max_read_bytes < self.log.max_line_length {
            return Err(invalid(
                "log.max_read_bytes",
                "must be at least log.max_line_length",
            ));
        }

        if self.log.max_consecutive_errors == 0 {
            return Err(invalid(
                "log.max_consecutive_errors",
                "must be greater than 0",
            ));
        }

        if self.checkpoint.dir_path.trim().is_empty() {
            return Err(invalid("checkpoint.dir_path", "must not be empty"));
        }

        if self.checkpoint.cache_size == 0 {
            return Err(invalid("checkpoint.cache_size", "must be greater than 0"));
        }

        if self.broker.address.trim().is_empty() {
            return Err(invalid("broker.address", "must not be empty"));
        }

        if self.broker.topic.trim().is_empty() {
            return Err(invalid("broker.topic", "must not be empty"));
        }

        if self.broker.message_timeout_ms == 0 {
            return Err(invalid(
                "broker.message_timeout_ms",
                "must be greater than 0",
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> LinehaulError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// tail 대상 로그 파일 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSourceConfig {
    /// 감시할 로그 파일 경로
    pub file_path: String,
    /// 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 첫 폴링 전 대기 시간 (밀리초)
    pub initial_delay_ms: u64,
    /// 종결자 없이 허용되는 최대 라인 길이 (바이트)
    pub max_line_length: usize,
    /// 한 번의 폴링에서 읽을 최대 바이트 수
    pub max_read_bytes: usize,
    /// 연속 소스 에러 허용 횟수. 초과하면 파이프라인이 종료됩니다.
    pub max_consecutive_errors: u32,
}

impl Default for LogSourceConfig {
    fn default() -> Self {
        Self {
            file_path: "/data/logs/app.log".to_owned(),
            poll_interval_ms: 2000,
            initial_delay_ms: 1000,
            max_line_length: 64 * 1024,     // 64KB
            max_read_bytes: 8 * 1024 * 1024, // 8MB
            max_consecutive_errors: 5,
        }
    }
}

/// 중복 제거 체크포인트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// 지문 저장 파일이 위치할 디렉토리
    pub dir_path: String,
    /// 메모리에 유지할 지문 수
    pub cache_size: usize,
    /// 기록마다 fsync 수행 여부
    pub sync_on_record: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir_path: "/data/checkpoint".to_owned(),
            cache_size: 5000,
            sync_on_record: true,
        }
    }
}

/// 메시지 브로커 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// 브로커 주소 (쉼표로 여러 개 지정 가능)
    pub address: String,
    /// 발행 대상 토픽
    pub topic: String,
    /// 발행 확인 대기 시간 (밀리초)
    pub message_timeout_ms: u64,
    /// 전달 정책
    pub delivery: DeliveryPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:9092".to_owned(),
            topic: "log-topic".to_owned(),
            message_timeout_ms: 5000,
            delivery: DeliveryPolicy::AtMostOnce,
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 바인드 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_delivery(target: &mut DeliveryPolicy, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match DeliveryPolicy::from_name(val.trim()) {
            Some(parsed) => *target = parsed,
            None => warn!(
                env_key,
                value = val.as_str(),
                "unknown delivery policy in env var, ignoring"
            ),
        }
    }
}
