#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`collector`]: 파일 tail (커서, truncation / rotation 감지)
//! - [`normalize`]: 후행 CR/LF 제거, 빈 라인 필터링
//! - [`fingerprint`]: SHA-256 라인 지문
//! - [`dedup`]: 유한 용량 지문 저장소 (append-only 파일 백업)
//! - [`publisher`]: 브로커 발행 trait 및 Kafka 구현
//! - [`pipeline`]: 폴링 루프 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 포워더 설정 (core 설정 파생)
//! - [`error`]: 도메인 에러 타입

pub mod config;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod normalize;
pub mod pipeline;

pub mod collector;
pub mod publisher;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{
    ForwardLoop, ForwarderState, ForwarderStats, LogForwarder, LogForwarderBuilder, TickReport,
};

// 설정
pub use config::{ForwarderConfig, ForwarderConfigBuilder};

// 에러
pub use error::{ForwarderError, PublishError};

// 수집기
pub use collector::{FileId, FileTail, LineEvent, ResetKind, TailBatch, TailConfig, TailCursor};

// 중복 제거
pub use dedup::{DedupEntry, DedupStore};
pub use fingerprint::{Fingerprint, fingerprint};
pub use normalize::normalize;

// 발행
pub use publisher::{KafkaPublisher, KafkaPublisherConfig, PublishMetadata, Publisher};
