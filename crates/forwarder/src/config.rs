//! 포워더 설정
//!
//! [`ForwarderConfig`]는 core의 [`LinehaulConfig`]에서 파생되며,
//! tail / 중복 제거 / 전달 정책에 필요한 값만 담습니다.
//! 브로커 연결 설정은 [`KafkaPublisherConfig`](crate::publisher::KafkaPublisherConfig)가 담당합니다.
//!
//! # 사용 예시
//! ```ignore
//! use linehaul_core::config::LinehaulConfig;
//! use linehaul_forwarder::config::ForwarderConfig;
//!
//! let core_config = LinehaulConfig::default();
//! let config = ForwarderConfig::from_core(&core_config);
//! ```

use std::path::{Component, Path};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use linehaul_core::config::{DeliveryPolicy, LinehaulConfig};

use crate::collector::TailConfig;
use crate::error::ForwarderError;

/// 포워더 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// tail 대상 파일 경로
    pub file_path: String,
    /// 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 첫 폴링 전 대기 시간 (밀리초)
    pub initial_delay_ms: u64,
    /// 종결자 없이 허용되는 최대 라인 길이 (바이트)
    pub max_line_length: usize,
    /// 폴링당 최대 읽기 바이트 수
    pub max_read_bytes: usize,
    /// 연속 소스 에러 허용 횟수
    pub max_consecutive_errors: u32,
    /// 지문 저장 디렉토리
    pub checkpoint_dir: String,
    /// 메모리 지문 캐시 용량
    pub cache_size: usize,
    /// 기록마다 fsync 수행 여부
    pub sync_on_record: bool,
    /// 전달 정책
    pub delivery: DeliveryPolicy,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self::from_core(&LinehaulConfig::default())
    }
}

impl ForwarderConfig {
    /// core 설정에서 포워더 설정을 생성합니다.
    pub fn from_core(core: &LinehaulConfig) -> Self {
        Self {
            file_path: core.log.file_path.clone(),
            poll_interval_ms: core.log.poll_interval_ms,
            initial_delay_ms: core.log.initial_delay_ms,
            max_line_length: core.log.max_line_length,
            max_read_bytes: core.log.max_read_bytes,
            max_consecutive_errors: core.log.max_consecutive_errors,
            checkpoint_dir: core.checkpoint.dir_path.clone(),
            cache_size: core.checkpoint.cache_size,
            sync_on_record: core.checkpoint.sync_on_record,
            delivery: core.broker.delivery,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// 수집기 설정
    pub fn tail_config(&self) -> TailConfig {
        TailConfig {
            max_line_length: self.max_line_length,
            max_read_bytes: self.max_read_bytes,
        }
    }

    /// 경로에 `..` 컴포넌트가 없는지 검증합니다.
    fn validate_path(field: &str, path_str: &str) -> Result<(), ForwarderError> {
        if path_str.trim().is_empty() {
            return Err(config_error(field, "must not be empty"));
        }
        if Path::new(path_str)
            .components()
            .any(|c| c == Component::ParentDir)
        {
            return Err(config_error(
                field,
                format!("path '{path_str}' contains path traversal pattern '..'"),
            ));
        }
        Ok(())
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ForwarderError> {
        const MAX_CACHE_SIZE: usize = 10_000_000;

        Self::validate_path("file_path", &self.file_path)?;
        Self::validate_path("checkpoint_dir", &self.checkpoint_dir)?;

        if self.poll_interval_ms == 0 {
            return Err(config_error("poll_interval_ms", "must be greater than 0"));
        }

        if self.max_line_length == 0 {
            return Err(config_error("max_line_length", "must be greater than 0"));
        }

        if self.max_read_bytes < self.max_line_length {
            return Err(config_error(
                "max_read_bytes",
                "must be at least max_line_length",
            ));
        }

        if self.max_consecutive_errors == 0 {
            return Err(config_error(
                "max_consecutive_errors",
                "must be greater than 0",
            ));
        }

        if self.cache_size == 0 || self.cache_size > MAX_CACHE_SIZE {
            return Err(config_error(
                "cache_size",
                format!("must be 1-{MAX_CACHE_SIZE}"),
            ));
        }

        Ok(())
    }
}

fn config_error(field: &str, reason: impl Into<String>) -> ForwarderError {
    ForwarderError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 포워더 설정 빌더
#[derive(Debug, Default)]
pub struct ForwarderConfigBuilder {
    config: ForwarderConfig,
}

impl ForwarderConfigBuilder {
    /// 기본값으로 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_path(mut self, path: impl Into<String>) -> Self {
        self.config.file_path = path.into();
        self
    }

    pub fn checkpoint_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.checkpoint_dir = dir.into();
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.config.initial_delay_ms = ms;
        self
    }

    pub fn max_line_length(mut self, bytes: usize) -> Self {
        self.config.max_line_length = bytes;
        self
    }

    pub fn max_read_bytes(mut self, bytes: usize) -> Self {
        self.config.max_read_bytes = bytes;
        self
    }

    pub fn max_consecutive_errors(mut self, count: u32) -> Self {
        self.config.max_consecutive_errors = count;
        self
    }

    pub fn cache_size(mut self, size: usize) -> Self {
        self.config.cache_size = size;
        self
    }

    pub fn sync_on_record(mut self, sync: bool) -> Self {
        self.config.sync_on_record = sync;
        self
    }

    pub fn delivery(mut self, policy: DeliveryPolicy) -> Self {
        self.config.delivery = policy;
        self
    }

    /// 검증 후 설정을 반환합니다.
    pub fn build(self) -> Result<ForwarderConfig, ForwarderError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
