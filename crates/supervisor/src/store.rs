//! 상태 저장소: 유닛별 영속 레코드
//!
//! [`FileStatusStore`]는 `<state_dir>/<unit-id>.json`에 레코드를 하나씩 저장합니다.
//! 쓰기는 임시 파일 작성 후 rename으로 원자적이며, 유닛 간 순서는 보장하지 않습니다.
//! 유닛 잠금은 `<state_dir>/.<unit-id>.lock`에 대한 advisory 잠금이라
//! 같은 디렉토리를 쓰는 CLI와 데몬 사이에서도 유닛 작업이 직렬화됩니다.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fs4::fs_std::FileExt;
use ironbot_core::BoxFuture;
use ironbot_core::error::StoreError;
use ironbot_core::unit::UnitId;
use tokio::sync::Mutex;
use tracing::debug;

use crate::state::UnitRecord;

/// 유닛 레코드 저장소
///
/// `async fn`을 trait 객체로 쓰기 위해 [`BoxFuture`]를 반환합니다.
pub trait StatusStore: Send + Sync {
    /// 레코드를 읽습니다. 없으면 `Ok(None)`
    fn load<'a>(&'a self, unit: &'a UnitId) -> BoxFuture<'a, Result<Option<UnitRecord>, StoreError>>;

    /// 레코드를 원자적으로 기록합니다.
    fn save<'a>(&'a self, record: &'a UnitRecord) -> BoxFuture<'a, Result<(), StoreError>>;

    /// 레코드를 삭제합니다. 없으면 성공으로 처리합니다.
    fn delete<'a>(&'a self, unit: &'a UnitId) -> BoxFuture<'a, Result<(), StoreError>>;

    /// 모든 레코드를 유닛 ID 순으로 반환합니다.
    fn list(&self) -> BoxFuture<'_, Result<Vec<UnitRecord>, StoreError>>;

    /// 유닛 잠금을 얻을 때까지 기다립니다. 같은 저장소를 쓰는 모든 감독자 사이에서 배타적입니다.
    fn lock<'a>(&'a self, unit: &'a UnitId) -> BoxFuture<'a, Result<StoreLock, StoreError>>;
}

/// 보유 중인 유닛 잠금. 드롭하면 풀립니다.
#[must_use = "the unit lock is released when dropped"]
pub struct StoreLock {
    _held: Box<dyn Send + Sync>,
}

impl StoreLock {
    pub fn new(held: impl Send + Sync + 'static) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

impl fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoreLock")
    }
}

// ─── FileStatusStore ─────────────────────────────────────────────────

/// 디렉토리 기반 JSON 레코드 저장소
#[derive(Debug, Clone)]
pub struct FileStatusStore {
    dir: PathBuf,
}

impl FileStatusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, unit: &UnitId) -> PathBuf {
        self.dir.join(format!("{unit}.json"))
    }

    fn lock_path(&self, unit: &UnitId) -> PathBuf {
        self.dir.join(format!(".{unit}.lock"))
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Unavailable {
                path: self.dir.display().to_string(),
                reason: e.to_string(),
            })
    }

    async fn read_record(&self, unit: &UnitId) -> Result<Option<UnitRecord>, StoreError> {
        let path = self.record_path(unit);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Read {
                    unit: unit.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                unit: unit.to_string(),
                reason: e.to_string(),
            })
    }

    async fn write_record(&self, record: &UnitRecord) -> Result<(), StoreError> {
        self.ensure_dir().await?;
        let write_err = |reason: String| StoreError::Write {
            unit: record.unit_id.to_string(),
            reason,
        };

        let body = serde_json::to_vec_pretty(record).map_err(|e| write_err(e.to_string()))?;
        let path = self.record_path(&record.unit_id);
        let tmp = self.dir.join(format!(".{}.json.tmp", record.unit_id));

        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| write_err(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| write_err(e.to_string()))?;

        debug!(unit_id = %record.unit_id, state = %record.state, "unit record saved");
        Ok(())
    }

    async fn remove_record(&self, unit: &UnitId) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.record_path(unit)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Write {
                unit: unit.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn list_records(&self) -> Result<Vec<UnitRecord>, StoreError> {
        let unavailable = |e: std::io::Error| StoreError::Unavailable {
            path: self.dir.display().to_string(),
            reason: e.to_string(),
        };

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable(e)),
        };

        let mut records = BTreeMap::new();
        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            let id = UnitId::from(id);
            if let Some(record) = self.read_record(&id).await? {
                records.insert(id, record);
            }
        }
        Ok(records.into_values().collect())
    }

    /// 잠금 파일은 지우지 않습니다. 지우면 대기 중인 쪽이 다른 inode를 잠글 수 있습니다.
    async fn lock_record(&self, unit: &UnitId) -> Result<StoreLock, StoreError> {
        self.ensure_dir().await?;
        let lock_err = |reason: String| StoreError::Lock {
            unit: unit.to_string(),
            reason,
        };

        let path = self.lock_path(unit);
        let file = tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            FileExt::lock_exclusive(&file)?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(|e| lock_err(e.to_string()))?
        .map_err(|e| lock_err(e.to_string()))?;

        debug!(unit_id = %unit, "unit lock acquired");
        Ok(StoreLock::new(file))
    }
}

impl StatusStore for FileStatusStore {
    fn load<'a>(&'a self, unit: &'a UnitId) -> BoxFuture<'a, Result<Option<UnitRecord>, StoreError>> {
        Box::pin(self.read_record(unit))
    }

    fn save<'a>(&'a self, record: &'a UnitRecord) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.write_record(record))
    }

    fn delete<'a>(&'a self, unit: &'a UnitId) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.remove_record(unit))
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<UnitRecord>, StoreError>> {
        Box::pin(self.list_records())
    }

    fn lock<'a>(&'a self, unit: &'a UnitId) -> BoxFuture<'a, Result<StoreLock, StoreError>> {
        Box::pin(self.lock_record(unit))
    }
}

// ─── MemoryStatusStore ───────────────────────────────────────────────

/// 프로세스 메모리 저장소. 테스트와 일회성 실행에 사용합니다.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: Mutex<BTreeMap<UnitId, UnitRecord>>,
    locks: Mutex<BTreeMap<UnitId, Arc<Mutex<()>>>>,
    unavailable: AtomicBool,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true`로 설정하면 모든 작업이 `StoreError::Unavailable`로 실패합니다.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                path: "memory".to_owned(),
                reason: "store marked unavailable".to_owned(),
            });
        }
        Ok(())
    }
}

impl StatusStore for MemoryStatusStore {
    fn load<'a>(&'a self, unit: &'a UnitId) -> BoxFuture<'a, Result<Option<UnitRecord>, StoreError>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.records.lock().await.get(unit).cloned())
        })
    }

    fn save<'a>(&'a self, record: &'a UnitRecord) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.check()?;
            self.records
                .lock()
                .await
                .insert(record.unit_id.clone(), record.clone());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, unit: &'a UnitId) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.check()?;
            self.records.lock().await.remove(unit);
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<UnitRecord>, StoreError>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.records.lock().await.values().cloned().collect())
        })
    }

    fn lock<'a>(&'a self, unit: &'a UnitId) -> BoxFuture<'a, Result<StoreLock, StoreError>> {
        Box::pin(async move {
            self.check()?;
            let lock = self.locks.lock().await.entry(unit.clone()).or_default().clone();
            Ok(StoreLock::new(lock.lock_owned().await))
        })
    }
}
