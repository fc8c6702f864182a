//! Kafka 발행자
//!
//! 라인 하나를 메시지 하나로 설정된 토픽에 전송합니다.
//! 키는 비워 두고, 페이로드는 라인의 UTF-8 바이트, 지문은 `lineHash` 헤더로 전달합니다.

use std::time::{Duration, Instant};

use rdkafka::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::{debug, info};

use linehaul_core::config::BrokerConfig;
use linehaul_core::metrics as m;

use super::{PublishMetadata, Publisher};
use crate::error::PublishError;

/// 지문을 담는 메시지 헤더 이름
pub const LINE_HASH_HEADER: &str = "lineHash";

/// Kafka 발행자 설정
#[derive(Debug, Clone)]
pub struct KafkaPublisherConfig {
    /// 브로커 주소 목록 (쉼표 구분)
    pub brokers: String,
    /// 대상 토픽
    pub topic: String,
    /// 전달 확인 대기 시간 (밀리초)
    pub message_timeout_ms: u64,
}

impl KafkaPublisherConfig {
    /// core 설정에서 발행자 설정을 생성합니다.
    pub fn from_core(core: &BrokerConfig) -> Self {
        Self {
            brokers: core.address.clone(),
            topic: core.topic.clone(),
            message_timeout_ms: core.message_timeout_ms,
        }
    }

    /// rdkafka 클라이언트 설정으로 변환합니다.
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.brokers)
            .set("message.timeout.ms", self.message_timeout_ms.to_string());
        client_config
    }
}

/// rdkafka `FutureProducer` 기반 발행자
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    timeout_ms: u64,
}

impl KafkaPublisher {
    /// 프로듀서를 생성합니다.
    ///
    /// 브로커 연결은 지연 수립되므로 브로커가 내려가 있어도 생성은 성공합니다.
    pub fn new(config: KafkaPublisherConfig) -> Result<Self, PublishError> {
        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            "creating kafka producer"
        );
        let client_config = config.client_config();
        debug!("rdkafka configuration: {:?}", client_config);

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| PublishError::Client(e.to_string()))?;

        Ok(Self {
            producer,
            topic: config.topic,
            timeout_ms: config.message_timeout_ms,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn classify(&self, err: KafkaError) -> PublishError {
        match err.rdkafka_error_code() {
            Some(RDKafkaErrorCode::MessageTimedOut) => PublishError::Timeout {
                topic: self.topic.clone(),
                timeout_ms: self.timeout_ms,
            },
            _ => PublishError::Rejected {
                topic: self.topic.clone(),
                reason: err.to_string(),
            },
        }
    }
}

impl Publisher for KafkaPublisher {
    async fn publish(&self, content: &str, metadata: &PublishMetadata) -> Result<(), PublishError> {
        let headers = OwnedHeaders::new().insert(Header {
            key: LINE_HASH_HEADER,
            value: Some(metadata.fingerprint.as_str()),
        });
        let record = FutureRecord::<(), str>::to(&self.topic)
            .payload(content)
            .headers(headers);

        let started = Instant::now();
        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| self.classify(e))?;

        let result = match delivery.await {
            // 프로듀서가 닫혀 전달 결과를 받지 못함
            Err(_) => Err(PublishError::Rejected {
                topic: self.topic.clone(),
                reason: "delivery cancelled".to_owned(),
            }),
            Ok(Err((e, _))) => Err(self.classify(e)),
            Ok(Ok((partition, offset))) => {
                debug!(
                    fingerprint = %metadata.fingerprint,
                    partition,
                    offset,
                    "line delivered"
                );
                Ok(())
            }
        };
        metrics::histogram!(m::PUBLISH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn flush(&self) -> Result<(), PublishError> {
        let producer = self.producer.clone();
        let timeout = Duration::from_millis(self.timeout_ms);
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| PublishError::Flush(e.to_string()))?
            .map_err(|e| PublishError::Flush(e.to_string()))
    }
}
