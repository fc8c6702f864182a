//! 라인 지문 (SHA-256)
//!
//! 정규화된 라인 내용의 UTF-8 바이트를 SHA-256으로 해시하여
//! 64자리 소문자 hex 문자열로 표현합니다. 같은 내용은 항상 같은 지문을 가집니다.

use std::fmt;

use sha2::{Digest, Sha256};

/// hex 인코딩된 SHA-256 지문 길이
pub const FINGERPRINT_LEN: usize = 64;

/// 라인 내용 지문
///
/// 항상 64자리 소문자 hex 문자열입니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// 저장된 레코드를 지문으로 파싱합니다.
    ///
    /// 64자리 hex가 아니면 `None`을 반환합니다. 대문자는 소문자로 정규화됩니다.
    pub fn parse(record: &str) -> Option<Self> {
        let record = record.trim();
        if record.len() != FINGERPRINT_LEN || !record.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(record.to_ascii_lowercase()))
    }

    /// hex 문자열 참조를 반환합니다.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 라인 내용의 지문을 계산합니다.
pub fn fingerprint(line: &str) -> Fingerprint {
    Fingerprint(hex::encode(Sha256::digest(line.as_bytes())))
}
