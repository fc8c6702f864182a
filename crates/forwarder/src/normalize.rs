//! 라인 정규화
//!
//! 후행 CR/LF를 제거하고, 남은 내용이 비어 있거나 공백뿐이면 버립니다.
//! 앞뒤 공백 자체는 보존합니다 (내용의 일부이므로 지문에 포함됨).

use crate::collector::LineEvent;

/// tail 이벤트를 발행 후보 라인으로 정규화합니다.
///
/// 발행 대상이 아니면 `None`을 반환합니다.
pub fn normalize(event: &LineEvent) -> Option<String> {
    normalize_line(&event.content).map(str::to_owned)
}

/// 문자열 단위 정규화
pub fn normalize_line(content: &str) -> Option<&str> {
    let stripped = content.trim_end_matches(['\r', '\n']);
    if stripped.trim().is_empty() {
        None
    } else {
        Some(stripped)
    }
}
