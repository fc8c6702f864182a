//! 로그 파일 수집 모듈 -- 증가하는 파일에서 새 라인을 읽습니다.
//!
//! # 구성
//! - [`FileTail`]: `tail -f` 방식의 폴링 기반 파일 리더 (truncation / rotation 감지)
//! - [`TailCursor`]: 폴링 사이에 명시적으로 주고받는 읽기 위치
//! - [`FileId`]: 파일 식별자 (Unix: device + inode)
//!
//! # 아키텍처
//! 수집기는 상태를 숨기지 않습니다. 호출자가 커서를 [`FileTail::poll`]에 넘기고,
//! 반환된 [`TailBatch`]의 커서를 다음 폴링에 사용합니다.

pub mod cursor;
pub mod file;

pub use cursor::{CursorCheck, FileId, TailCursor};
pub use file::{FileTail, ResetKind, TailBatch, TailConfig};

use std::time::SystemTime;

/// 파일에서 읽은 한 라인
///
/// 수집기가 생성하고 정규화기가 소비합니다. 저장되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEvent {
    /// 라인 내용 (`\n` 종결자 제외, `\r`은 정규화 단계에서 제거)
    pub content: String,
    /// 파일 내 라인 첫 바이트의 오프셋
    pub source_offset: u64,
    /// 읽은 시각
    pub observed_at: SystemTime,
}

impl LineEvent {
    /// 새 이벤트를 생성합니다.
    pub fn new(content: impl Into<String>, source_offset: u64) -> Self {
        Self {
            content: content.into(),
            source_offset,
            observed_at: SystemTime::now(),
        }
    }
}
