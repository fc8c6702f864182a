//! 파일 기반 라인 수집기
//!
//! 로그 파일을 폴링하며 커서 이후에 추가된 라인을 읽습니다.
//! `tail -F`와 유사한 동작을 비동기 방식으로 구현합니다.
//!
//! # 로테이션 감지
//! - 파일 크기 축소 또는 앞부분 변경 감지 (truncation) -> 오프셋 0부터 다시 읽기
//! - inode 변경 감지 (logrotate rename + create) -> 이전 파일의 남은 라인을 마저 읽고
//!   새 파일을 오프셋 0부터 읽기
//! - 파일이 없으면 빈 배치를 반환하고 다음 폴링에서 재시도
//!
//! # 부분 라인
//! 종결자(`\n`)가 없는 마지막 조각은 커서를 전진시키지 않고 남겨 둡니다.
//! 조각이 `max_line_length`에 도달하면 진행을 보장하기 위해 라인으로 내보냅니다.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use linehaul_core::metrics as m;

use super::LineEvent;
use super::cursor::{CursorCheck, FileId, HEAD_LEN, TailCursor};
use crate::error::ForwarderError;

/// 파일 수집기 설정
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// 종결자 없이 허용되는 최대 라인 길이 (바이트)
    pub max_line_length: usize,
    /// 한 번의 폴링에서 읽을 최대 바이트 수
    pub max_read_bytes: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            max_line_length: 64 * 1024,      // 64KB
            max_read_bytes: 8 * 1024 * 1024, // 8MB
        }
    }
}

/// 커서 리셋 원인
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// 파일 크기 축소
    Truncated,
    /// 파일 식별자 변경
    Rotated,
}

impl ResetKind {
    /// 메트릭/로그 레이블 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Truncated => "truncated",
            Self::Rotated => "rotated",
        }
    }
}

/// 한 번의 폴링 결과
#[derive(Debug, Clone)]
pub struct TailBatch {
    /// 파일 순서대로 정렬된 라인
    pub events: Vec<LineEvent>,
    /// 다음 폴링에 사용할 커서
    pub cursor: TailCursor,
    /// 이번 폴링에서 발생한 리셋
    pub reset: Option<ResetKind>,
}

/// 열린 파일 핸들과 그 식별자
#[derive(Debug)]
struct OpenFile {
    file: File,
    id: Option<FileId>,
}

/// 파일 tail 소스
///
/// 파일 핸들은 폴링 사이에 유지됩니다. 같은 경로에 새 파일이 생기면
/// 이전 핸들에서 남은 라인을 먼저 읽은 뒤 새 파일로 전환합니다.
/// 파일 식별자를 얻을 수 없는 플랫폼에서는 매 폴링마다 다시 엽니다.
#[derive(Debug)]
pub struct FileTail {
    path: PathBuf,
    config: TailConfig,
    current: Option<OpenFile>,
}

impl FileTail {
    /// 새 tail 소스를 생성합니다. 파일이 아직 없어도 됩니다.
    pub fn open(path: impl Into<PathBuf>, config: TailConfig) -> Self {
        Self {
            path: path.into(),
            config,
            current: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 파일 시작 위치를 가리키는 초기 커서
    pub fn initial_cursor(&self) -> TailCursor {
        TailCursor::new(self.path.clone())
    }

    /// 커서 이후의 새 라인을 읽습니다.
    ///
    /// 파일이 없으면 빈 배치와 입력 커서를 그대로 반환합니다.
    /// 그 외 I/O 실패는 [`ForwarderError::Source`]로 반환되며,
    /// 열린 핸들은 버려지고 다음 폴링에서 다시 엽니다.
    pub async fn poll(&mut self, cursor: &TailCursor) -> Result<TailBatch, ForwarderError> {
        match self.poll_inner(cursor).await {
            Ok(batch) => {
                if let Some(kind) = batch.reset {
                    metrics::counter!(m::TAIL_RESETS_TOTAL, m::LABEL_RESET_KIND => kind.as_str())
                        .increment(1);
                }
                Ok(batch)
            }
            Err(e) => {
                self.current = None;
                Err(ForwarderError::Source {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn poll_inner(&mut self, cursor: &TailCursor) -> std::io::Result<TailBatch> {
        let mut events = Vec::new();
        let mut base = cursor.clone();
        let mut reset = None;

        let path_id = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Some(FileId::from_metadata(&meta)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        // 같은 경로에 다른 파일이 생겼으면 이전 핸들을 끝까지 읽고 닫음
        let replaced = match (&self.current, path_id) {
            (Some(open), Some(Some(new_id))) => open.id.is_some_and(|old| old != new_id),
            _ => false,
        };
        if replaced {
            if let Some(mut old) = self.current.take() {
                let drained = drain(&mut old.file, base.offset(), &self.config, &self.path).await?;
                info!(
                    path = %self.path.display(),
                    drained = drained.len(),
                    "file rotated, switching to new file"
                );
                events.extend(drained);
            }
            base = base.rewound(None);
            reset = Some(ResetKind::Rotated);
        }

        if self.current.is_none() {
            if path_id.is_none() {
                debug!(path = %self.path.display(), "file not found, waiting");
                return Ok(TailBatch {
                    events,
                    cursor: base,
                    reset,
                });
            }
            let file = match File::open(&self.path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(TailBatch {
                        events,
                        cursor: base,
                        reset,
                    });
                }
                Err(e) => return Err(e),
            };
            let id = FileId::from_metadata(&file.metadata().await?);
            self.current = Some(OpenFile { file, id });
        }

        let config = &self.config;
        let path = &self.path;
        let Some(open) = self.current.as_mut() else {
            return Ok(TailBatch {
                events,
                cursor: base,
                reset,
            });
        };

        let size = open.file.metadata().await?.len();
        let current_head = read_head(&mut open.file, base.head().len()).await?;
        match base.check(size, open.id, &current_head) {
            CursorCheck::Continue => {}
            CursorCheck::Truncated => {
                warn!(
                    path = %path.display(),
                    previous_offset = base.offset(),
                    current_size = size,
                    "file truncated, reading from start"
                );
                base = base.rewound(open.id);
                reset = Some(ResetKind::Truncated);
            }
            CursorCheck::Rotated => {
                warn!(
                    path = %path.display(),
                    previous_offset = base.offset(),
                    "file replaced while closed, reading from start"
                );
                base = base.rewound(open.id);
                reset = Some(ResetKind::Rotated);
            }
        }

        let (lines, next_offset) =
            read_chunk(&mut open.file, base.offset(), config, path, false).await?;
        events.extend(lines);

        // 앞부분은 이미 소비한 바이트 범위에서만 기억함
        let known = base.head().len();
        let head = if known < HEAD_LEN && next_offset > known as u64 {
            read_head(&mut open.file, next_offset.min(HEAD_LEN as u64) as usize).await?
        } else {
            base.head().to_vec()
        };
        let next_cursor = base.advanced(next_offset, open.id, head);

        // 식별자가 없으면 rotation을 판별할 수 없으므로 핸들을 유지하지 않음
        if open.id.is_none() {
            self.current = None;
        }

        Ok(TailBatch {
            events,
            cursor: next_cursor,
            reset,
        })
    }
}

/// 파일의 처음 `len` 바이트를 읽습니다. 파일이 더 짧으면 읽을 수 있는 만큼만 반환합니다.
async fn read_head(file: &mut File, len: usize) -> std::io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(len);
    if len > 0 {
        file.seek(SeekFrom::Start(0)).await?;
        (&mut *file).take(len as u64).read_to_end(&mut head).await?;
    }
    Ok(head)
}

/// rotation된 파일의 남은 내용을 끝까지 읽습니다. 마지막 조각도 라인으로 내보냅니다.
async fn drain(
    file: &mut File,
    mut offset: u64,
    config: &TailConfig,
    path: &Path,
) -> std::io::Result<Vec<LineEvent>> {
    let mut events = Vec::new();
    loop {
        let (mut lines, next) = read_chunk(file, offset, config, path, true).await?;
        if next == offset {
            break;
        }
        events.append(&mut lines);
        offset = next;
    }
    Ok(events)
}

/// `offset`부터 최대 `max_read_bytes`를 읽어 라인으로 분리합니다.
///
/// 반환되는 오프셋은 마지막으로 소비한 바이트 다음 위치입니다.
async fn read_chunk(
    file: &mut File,
    offset: u64,
    config: &TailConfig,
    path: &Path,
    flush_at_eof: bool,
) -> std::io::Result<(Vec<LineEvent>, u64)> {
    file.seek(SeekFrom::Start(offset)).await?;
    let limit = config.max_read_bytes as u64;
    let mut buf = Vec::new();
    (&mut *file).take(limit).read_to_end(&mut buf).await?;

    let reached_eof = (buf.len() as u64) < limit;
    let (events, consumed) = split_lines(
        &buf,
        offset,
        config.max_line_length,
        flush_at_eof && reached_eof,
        path,
    );
    Ok((events, offset + consumed as u64))
}

/// 버퍼를 `\n` 기준으로 분리합니다.
///
/// 반환값: (라인 목록, 소비한 바이트 수). 소비되지 않은 꼬리는 다음 폴링에서 다시 읽습니다.
fn split_lines(
    buf: &[u8],
    base_offset: u64,
    max_line_length: usize,
    flush_fragment: bool,
    path: &Path,
) -> (Vec<LineEvent>, usize) {
    let mut events = Vec::new();
    let mut start = 0;

    while start < buf.len() {
        let rest = &buf[start..];
        let line_offset = base_offset + start as u64;
        match rest.iter().position(|&b| b == b'\n') {
            Some(end) => {
                events.push(decode(&rest[..end], line_offset, path));
                start += end + 1;
            }
            None if flush_fragment => {
                events.push(decode(rest, line_offset, path));
                start = buf.len();
            }
            None if rest.len() >= max_line_length => {
                warn!(
                    path = %path.display(),
                    offset = line_offset,
                    max_line_length,
                    "line exceeds max_line_length without terminator, emitting partial line"
                );
                let cut = split_point(rest, max_line_length);
                events.push(decode(&rest[..cut], line_offset, path));
                start += cut;
            }
            None => break,
        }
    }

    (events, start)
}

/// `limit` 이하에서 UTF-8 문자 경계에 맞춘 분할 위치. 경계가 없으면 `limit`.
fn split_point(bytes: &[u8], limit: usize) -> usize {
    (limit.saturating_sub(3)..=limit)
        .rev()
        .find(|&i| i > 0 && bytes.get(i).is_none_or(|&b| b & 0xC0 != 0x80))
        .unwrap_or(limit)
}

fn decode(bytes: &[u8], offset: u64, path: &Path) -> LineEvent {
    let content = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(e) => {
            warn!(
                path = %path.display(),
                offset,
                error = %e,
                "invalid UTF-8 in line, decoding lossily"
            );
            String::from_utf8_lossy(bytes).into_owned()
        }
    };
    LineEvent::new(content, offset)
}
