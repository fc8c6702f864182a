//! 브로커 발행 모듈
//!
//! [`Publisher`] trait은 라인 하나를 브로커 토픽으로 전달하고 성공/실패를 보고합니다.
//! 재시도는 하지 않습니다. 재전송 여부는 파이프라인의 전달 정책이 결정합니다.
//!
//! # 구현체
//! - [`KafkaPublisher`]: rdkafka `FutureProducer` 기반

pub mod kafka;

pub use kafka::{KafkaPublisher, KafkaPublisherConfig};

use std::future::Future;

use crate::error::PublishError;
use crate::fingerprint::Fingerprint;

/// 발행 메시지에 함께 전달되는 메타데이터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMetadata {
    /// 라인 지문
    pub fingerprint: Fingerprint,
}

/// 라인 발행자
///
/// 파이프라인 태스크로 이동되므로 `Send + Sync + 'static`이어야 합니다.
pub trait Publisher: Send + Sync + 'static {
    /// 라인 하나를 발행하고 브로커 확인을 기다립니다.
    fn publish(
        &self,
        content: &str,
        metadata: &PublishMetadata,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// 대기 중인 메시지를 모두 전송합니다. 종료 시 호출됩니다.
    fn flush(&self) -> impl Future<Output = Result<(), PublishError>> + Send;
}
