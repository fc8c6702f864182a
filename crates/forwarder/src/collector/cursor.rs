//! tail 커서와 파일 식별자
//!
//! 커서는 "어느 파일의 어디까지 읽었는가"를 나타내는 값입니다.
//! 프로세스 수명 동안만 유지되며 디스크에 저장되지 않습니다.
//!
//! 커서는 이미 읽은 파일 앞부분([`HEAD_LEN`] 바이트까지)을 함께 기억합니다.
//! copytruncate 후 이전 오프셋보다 더 많이 쓰인 경우 크기 비교로는 감지할 수
//! 없으므로, 앞부분이 달라졌는지로 truncation을 판별합니다.

use std::fmt;
use std::path::{Path, PathBuf};

/// 커서가 기억하는 파일 앞부분의 최대 길이 (바이트)
pub const HEAD_LEN: usize = 256;

/// 파일 식별자
///
/// Unix에서는 device ID + inode 번호입니다. 파일 이름이 바뀌어도 유지되므로
/// 같은 경로에 새 파일이 생겼는지(rotation) 판별하는 데 사용합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    /// device / inode 값으로 생성합니다.
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// 파일 메타데이터에서 식별자를 추출합니다.
    #[cfg(unix)]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;

        Some(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    /// 비 Unix 플랫폼에서는 식별자가 없으며, 크기 축소 감지만 적용됩니다.
    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &std::fs::Metadata) -> Option<Self> {
        None
    }

    /// device ID
    pub fn dev(&self) -> u64 {
        self.dev
    }

    /// inode 번호
    pub fn ino(&self) -> u64 {
        self.ino
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// 커서와 현재 파일 상태를 비교한 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorCheck {
    /// 같은 파일, 이어서 읽기
    Continue,
    /// 파일 크기가 커서보다 작아지거나 앞부분이 달라짐 (copytruncate 등)
    Truncated,
    /// 같은 경로에 다른 파일이 존재 (rename + create 방식 rotation)
    Rotated,
}

/// tail 읽기 위치
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailCursor {
    path: PathBuf,
    offset: u64,
    file_id: Option<FileId>,
    head: Vec<u8>,
}

impl TailCursor {
    /// 파일 시작 위치의 커서를 생성합니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            file_id: None,
            head: Vec::new(),
        }
    }

    /// 지정한 위치의 커서를 생성합니다.
    pub fn at(path: impl Into<PathBuf>, offset: u64, file_id: Option<FileId>) -> Self {
        Self {
            path: path.into(),
            offset,
            file_id,
            head: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 다음에 읽을 바이트 오프셋
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 마지막으로 관측한 파일 식별자
    pub fn file_id(&self) -> Option<FileId> {
        self.file_id
    }

    /// 이미 읽은 파일 앞부분. 아직 아무것도 읽지 않았으면 비어 있습니다.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// 현재 파일 상태와 비교해 리셋 필요 여부를 판단합니다.
    ///
    /// `current_head`는 현재 파일의 처음 `self.head().len()` 바이트입니다
    /// (파일이 그보다 짧으면 읽을 수 있는 만큼).
    /// 식별자 변경을 먼저 검사합니다. 이전 식별자가 없으면 (첫 관측)
    /// rotation으로 보지 않습니다.
    pub fn check(&self, size: u64, file_id: Option<FileId>, current_head: &[u8]) -> CursorCheck {
        if let (Some(previous), Some(current)) = (self.file_id, file_id) {
            if previous != current {
                return CursorCheck::Rotated;
            }
        }
        if size < self.offset || current_head != self.head.as_slice() {
            CursorCheck::Truncated
        } else {
            CursorCheck::Continue
        }
    }

    /// 오프셋과 식별자, 앞부분을 갱신한 새 커서를 반환합니다.
    pub(crate) fn advanced(&self, offset: u64, file_id: Option<FileId>, head: Vec<u8>) -> Self {
        Self {
            path: self.path.clone(),
            offset,
            file_id: file_id.or(self.file_id),
            head,
        }
    }

    /// 같은 경로의 파일 시작 위치로 돌아간 커서를 반환합니다.
    pub(crate) fn rewound(&self, file_id: Option<FileId>) -> Self {
        Self {
            path: self.path.clone(),
            offset: 0,
            file_id,
            head: Vec::new(),
        }
    }
}
