//! 지문 기반 중복 제거 저장소
//!
//! [`DedupStore`]는 메모리의 유한한 지문 집합과 append-only 디스크 파일로 구성됩니다.
//!
//! # 디스크 형식
//! `<dir>/processedLineHashes.dat`, 한 줄에 지문 하나 (64자리 hex + `\n`).
//! 파일은 압축(compaction)되지 않으며, 재시작 시 마지막 `capacity`개의
//! 서로 다른 지문만 메모리로 로드합니다.
//!
//! # 축출
//! 용량을 넘으면 가장 먼저 삽입된 지문을 메모리에서만 제거합니다.
//! 축출된 지문이 다시 나타나면 중복으로 인식되지 않습니다.
//!
//! # 동시성
//! 저장소는 하나의 파이프라인이 독점합니다. 모든 변경 메서드가 `&mut self`를
//! 받으므로 check-and-set은 구조적으로 직렬화됩니다.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use linehaul_core::metrics as m;

use crate::error::ForwarderError;
use crate::fingerprint::Fingerprint;

/// 지문 저장 파일 이름 (기존 체크포인트 디렉토리와 호환)
pub const STORE_FILE_NAME: &str = "processedLineHashes.dat";

/// 메모리에 유지되는 지문 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    /// 라인 지문
    pub fingerprint: Fingerprint,
    /// 메모리 삽입 시각 (재시작 시 로드된 항목은 로드 시각)
    pub inserted_at: SystemTime,
}

/// 유한 용량 지문 저장소
#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    capacity: usize,
    sync_on_record: bool,
    index: HashSet<Fingerprint>,
    order: VecDeque<DedupEntry>,
    writer: File,
    evicted: u64,
}

impl DedupStore {
    /// 저장소를 엽니다.
    ///
    /// 디렉토리가 없으면 생성하고, 기존 파일이 있으면 가장 최근에 기록된
    /// 지문부터 최대 `capacity`개를 로드합니다. 형식이 잘못된 레코드는 경고 후
    /// 건너뛰며, 종결자 없이 끊긴 마지막 레코드는 복구합니다.
    pub async fn open(
        dir: impl AsRef<Path>,
        capacity: usize,
        sync_on_record: bool,
    ) -> Result<Self, ForwarderError> {
        let dir = dir.as_ref();
        let path = dir.join(STORE_FILE_NAME);
        let store_err = |e: std::io::Error| ForwarderError::Dedup {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        if capacity == 0 {
            return Err(ForwarderError::Config {
                field: "cache_size".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        tokio::fs::create_dir_all(dir).await.map_err(store_err)?;

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(store_err(e)),
        };

        let loaded = parse_records(&raw, &path);
        let order = most_recent_distinct(loaded.fingerprints, capacity);
        let index = order.iter().map(|e| e.fingerprint.clone()).collect();

        if let Some(tail) = loaded.torn_tail {
            repair_torn_tail(&path, &raw, tail).await.map_err(store_err)?;
        }

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(store_err)?;

        info!(
            path = %path.display(),
            loaded = order.len(),
            capacity,
            malformed = loaded.malformed,
            "dedup store opened"
        );
        metrics::gauge!(m::DEDUP_ENTRIES).set(order.len() as f64);

        Ok(Self {
            path,
            capacity,
            sync_on_record,
            index,
            order,
            writer,
            evicted: 0,
        })
    }

    /// 지문이 이미 있으면 `true`, 없으면 기록한 뒤 `false`를 반환합니다.
    ///
    /// `false`가 반환되었을 때 지문은 이미 디스크에 기록되어 있습니다.
    pub async fn seen_or_record(&mut self, fingerprint: &Fingerprint) -> Result<bool, ForwarderError> {
        if self.index.contains(fingerprint) {
            return Ok(true);
        }
        self.append(fingerprint).await?;
        Ok(false)
    }

    /// 메모리에 지문이 있는지 확인합니다.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.contains(fingerprint)
    }

    /// 지문을 기록합니다. 이미 있으면 아무 것도 하지 않습니다.
    pub async fn record(&mut self, fingerprint: &Fingerprint) -> Result<(), ForwarderError> {
        if self.index.contains(fingerprint) {
            return Ok(());
        }
        self.append(fingerprint).await
    }

    /// 디스크 기록 후 메모리에 삽입합니다. 디스크 기록이 실패하면 메모리는 변하지 않습니다.
    async fn append(&mut self, fingerprint: &Fingerprint) -> Result<(), ForwarderError> {
        let mut record = Vec::with_capacity(fingerprint.as_str().len() + 1);
        record.extend_from_slice(fingerprint.as_str().as_bytes());
        record.push(b'\n');

        self.writer
            .write_all(&record)
            .await
            .map_err(|e| self.io_error(e))?;
        self.writer.flush().await.map_err(|e| self.io_error(e))?;
        if self.sync_on_record {
            self.writer.sync_data().await.map_err(|e| self.io_error(e))?;
        }

        self.index.insert(fingerprint.clone());
        self.order.push_back(DedupEntry {
            fingerprint: fingerprint.clone(),
            inserted_at: SystemTime::now(),
        });
        self.evict_overflow();
        metrics::gauge!(m::DEDUP_ENTRIES).set(self.order.len() as f64);
        Ok(())
    }

    fn evict_overflow(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.index.remove(&oldest.fingerprint);
                self.evicted += 1;
                metrics::counter!(m::DEDUP_EVICTIONS_TOTAL).increment(1);
                debug!(fingerprint = %oldest.fingerprint, "evicted fingerprint from memory");
            }
        }
    }

    /// 버퍼를 비우고 디스크에 동기화합니다. 종료 시 호출됩니다.
    pub async fn flush(&mut self) -> Result<(), ForwarderError> {
        self.writer.flush().await.map_err(|e| self.io_error(e))?;
        self.writer.sync_all().await.map_err(|e| self.io_error(e))?;
        debug!(path = %self.path.display(), entries = self.order.len(), "dedup store flushed");
        Ok(())
    }

    /// 메모리에 있는 지문 수
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 저장 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 이번 세션에서 메모리에서 축출된 지문 수
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    /// 삽입 순서(오래된 것부터)로 항목을 순회합니다.
    pub fn entries(&self) -> impl Iterator<Item = &DedupEntry> {
        self.order.iter()
    }

    fn io_error(&self, e: std::io::Error) -> ForwarderError {
        ForwarderError::Dedup {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

/// 끊긴 마지막 레코드 처리 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TornTail {
    /// 유효한 지문이지만 종결자가 없음 -> `\n` 추가
    MissingNewline,
    /// 잘린 레코드 -> 이 위치로 파일 잘라내기
    TruncateAt(u64),
}

#[derive(Debug, Default)]
struct LoadedRecords {
    fingerprints: Vec<Fingerprint>,
    malformed: usize,
    torn_tail: Option<TornTail>,
}

fn parse_records(raw: &[u8], path: &Path) -> LoadedRecords {
    let mut loaded = LoadedRecords::default();
    let mut start = 0;

    while start < raw.len() {
        let rest = &raw[start..];
        let (record, terminated) = match rest.iter().position(|&b| b == b'\n') {
            Some(end) => (&rest[..end], true),
            None => (rest, false),
        };
        let parsed = std::str::from_utf8(record).ok().and_then(Fingerprint::parse);

        match (parsed, terminated) {
            (Some(fp), true) => loaded.fingerprints.push(fp),
            (Some(fp), false) => {
                loaded.fingerprints.push(fp);
                loaded.torn_tail = Some(TornTail::MissingNewline);
            }
            (None, false) => {
                warn!(
                    path = %path.display(),
                    offset = start,
                    "truncating torn tail record from dedup store"
                );
                loaded.torn_tail = Some(TornTail::TruncateAt(start as u64));
            }
            (None, true) => {
                // 빈 줄은 조용히 무시
                if !record.iter().all(u8::is_ascii_whitespace) {
                    warn!(
                        path = %path.display(),
                        offset = start,
                        "skipping malformed dedup record"
                    );
                    loaded.malformed += 1;
                }
            }
        }

        start += record.len() + usize::from(terminated);
    }

    loaded
}

/// 최근 기록된 순서로 서로 다른 지문을 최대 `capacity`개 선택하고,
/// 오래된 것부터 정렬하여 반환합니다.
fn most_recent_distinct(records: Vec<Fingerprint>, capacity: usize) -> VecDeque<DedupEntry> {
    let now = SystemTime::now();
    let mut seen = HashSet::new();
    let mut newest_first = Vec::new();

    for fp in records.into_iter().rev() {
        if newest_first.len() == capacity {
            break;
        }
        if seen.insert(fp.clone()) {
            newest_first.push(DedupEntry {
                fingerprint: fp,
                inserted_at: now,
            });
        }
    }

    newest_first.into_iter().rev().collect()
}

async fn repair_torn_tail(path: &Path, raw: &[u8], tail: TornTail) -> std::io::Result<()> {
    match tail {
        TornTail::MissingNewline => {
            let mut file = OpenOptions::new().append(true).open(path).await?;
            file.write_all(b"\n").await?;
            file.sync_all().await?;
            debug!(path = %path.display(), "terminated final dedup record");
        }
        TornTail::TruncateAt(len) => {
            let file = OpenOptions::new().write(true).open(path).await?;
            file.set_len(len).await?;
            file.sync_all().await?;
            debug!(
                path = %path.display(),
                removed = raw.len() as u64 - len,
                "truncated torn dedup record"
            );
        }
    }
    Ok(())
}
