//! 포워더 에러 타입
//!
//! [`ForwarderError`]는 포워딩 루프를 중단시키는 에러를 표현합니다.
//! 발행 실패([`PublishError`])는 루프 안에서 기록/집계되고 전파되지 않습니다.
//! `From<ForwarderError> for LinehaulError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use linehaul_core::error::{ConfigError, LinehaulError, PipelineError};

/// 포워더 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    /// tail 대상 파일 I/O 실패 (파일 없음은 에러가 아님)
    #[error("source error: {path}: {reason}")]
    Source {
        /// 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 지문 저장소 I/O 실패
    #[error("dedup store error: {path}: {reason}")]
    Dedup {
        /// 저장 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 포워더 수명주기 에러 (태스크 join 실패 등)
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
}

impl From<ForwarderError> for LinehaulError {
    fn from(err: ForwarderError) -> Self {
        match err {
            ForwarderError::Config { field, reason } => {
                LinehaulError::Config(ConfigError::InvalidValue { field, reason })
            }
            other => LinehaulError::Pipeline(PipelineError::Terminated(other.to_string())),
        }
    }
}

/// 브로커 발행 에러
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// 프로듀서 클라이언트 생성 실패
    #[error("producer client error: {0}")]
    Client(String),

    /// 제한 시간 안에 전달 확인을 받지 못함
    #[error("delivery to '{topic}' timed out after {timeout_ms}ms")]
    Timeout {
        /// 대상 토픽
        topic: String,
        /// 대기 시간 (밀리초)
        timeout_ms: u64,
    },

    /// 브로커가 메시지를 거부했거나 전달 불가
    #[error("delivery to '{topic}' failed: {reason}")]
    Rejected {
        /// 대상 토픽
        topic: String,
        /// 실패 사유
        reason: String,
    },

    /// 프로듀서 flush 실패
    #[error("producer flush failed: {0}")]
    Flush(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_display() {
        let err = ForwarderError::Source {
            path: "/data/logs/app.log".to_owned(),
            reason: "permission denied".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("app.log"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn config_error_converts_to_core_config_error() {
        let err = ForwarderError::Config {
            field: "cache_size".to_owned(),
            reason: "must be greater than 0".to_owned(),
        };
        let core: LinehaulError = err.into();
        assert!(matches!(
            core,
            LinehaulError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "cache_size"
        ));
    }

    #[test]
    fn runtime_error_converts_to_terminated() {
        let err = ForwarderError::Lifecycle("task panicked".to_owned());
        let core: LinehaulError = err.into();
        assert!(matches!(
            core,
            LinehaulError::Pipeline(PipelineError::Terminated(_))
        ));
    }

    #[test]
    fn loop_stopping_errors_convert_to_terminated() {
        let errors = [
            ForwarderError::Source {
                path: "/data/logs/app.log".to_owned(),
                reason: "permission denied".to_owned(),
            },
            ForwarderError::Dedup {
                path: "/data/checkpoint/processedLineHashes.dat".to_owned(),
                reason: "disk full".to_owned(),
            },
        ];
        for err in errors {
            let msg = err.to_string();
            let core: LinehaulError = err.into();
            assert!(matches!(
                core,
                LinehaulError::Pipeline(PipelineError::Terminated(ref reason)) if *reason == msg
            ));
        }
    }

    #[test]
    fn publish_timeout_display() {
        let err = PublishError::Timeout {
            topic: "log-topic".to_owned(),
            timeout_ms: 5000,
        };
        assert_eq!(
            err.to_string(),
            "delivery to 'log-topic' timed out after 5000ms"
        );
    }
}
