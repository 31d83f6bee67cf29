//! 오브젝트 스토어 인터페이스
//!
//! 분석 바이너리, 모듈 목록 파일, 접근 로그가 저장되는 버킷을 추상화합니다.
//! 오브젝트 이름은 `/`로 구분된 상대 경로입니다.

use std::future::Future;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::StorageError;

/// 분석 바이너리 디렉토리
pub const ANALYSIS_BINARY_DIR: &str = "analysis-binaries";

/// 모듈 목록 파일 디렉토리
pub const MODULE_FILE_DIR: &str = "module-files";

/// 오브젝트 스토어
pub trait ObjectStore: Send + Sync + 'static {
    /// 접두어로 시작하는 오브젝트 이름을 정렬된 순서로 나열합니다.
    fn list(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<String>, StorageError>> + Send;

    /// 오브젝트 내용을 읽습니다.
    fn read(&self, name: &str) -> impl Future<Output = Result<Bytes, StorageError>> + Send;

    /// 오브젝트를 씁니다 (덮어쓰기).
    fn write(
        &self,
        name: &str,
        data: Bytes,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 오브젝트의 hex SHA-256 체크섬. 오브젝트가 없으면 `None`.
    fn checksum(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<String>, StorageError>> + Send;
}

/// 분석 바이너리의 오브젝트 이름
pub fn analysis_binary_path(basename: &str) -> String {
    format!("{ANALYSIS_BINARY_DIR}/{basename}")
}

/// 모듈 목록 파일의 오브젝트 이름 (사용자 이름이 있으면 사용자 디렉토리 아래)
pub fn module_file_path(user: Option<&str>, basename: &str) -> String {
    match user {
        Some(user) if !user.is_empty() => format!("{user}/{MODULE_FILE_DIR}/{basename}"),
        _ => format!("{MODULE_FILE_DIR}/{basename}"),
    }
}

/// 바이트 내용의 hex SHA-256
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// 체크섬이 다를 때만 업로드합니다. 업로드했으면 `true`.
pub async fn upload_if_changed<S: ObjectStore>(
    store: &S,
    name: &str,
    data: Bytes,
) -> Result<bool, StorageError> {
    let local = sha256_hex(&data);
    if store.checksum(name).await?.as_deref() == Some(local.as_str()) {
        debug!(object = name, "checksum unchanged, skipping upload");
        return Ok(false);
    }
    store.write(name, data).await?;
    info!(object = name, sha256 = %local, "object uploaded");
    Ok(true)
}

/// 로컬 디렉토리를 버킷으로 사용하는 오브젝트 스토어
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// 루트 디렉토리로 스토어를 생성합니다.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 루트 디렉토리
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 오브젝트 이름을 루트 아래 파일 경로로 변환합니다.
    fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() {
            return Err(invalid_name(name, "name must not be empty"));
        }
        let relative = Path::new(name);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(invalid_name(
                        name,
                        "name must be a relative path without '..'",
                    ));
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

fn invalid_name(name: &str, reason: &str) -> StorageError {
    StorageError::InvalidName {
        name: name.to_owned(),
        reason: reason.to_owned(),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// 루트 아래 모든 파일을 `/` 구분 상대 이름으로 수집합니다.
fn walk(root: &Path) -> Result<Vec<String>, StorageError> {
    let mut names = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(source) => return Err(io_error(&dir, source)),
        };
        for entry in entries {
            let entry = entry.map_err(|source| io_error(&dir, source))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|source| io_error(&path, source))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file()
                && let Ok(relative) = path.strip_prefix(root)
            {
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                names.push(parts.join("/"));
            }
        }
    }
    names.sort();
    Ok(names)
}

impl ObjectStore for FsObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let root = self.root.clone();
        let prefix = prefix.to_owned();
        let names = tokio::task::spawn_blocking(move || walk(&root))
            .await
            .map_err(|e| io_error(&self.root, std::io::Error::other(e)))??;
        Ok(names
            .into_iter()
            .filter(|n| n.starts_with(&prefix))
            .collect())
    }

    async fn read(&self, name: &str) -> Result<Bytes, StorageError> {
        let path = self.resolve(name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_owned()))
            }
            Err(source) => Err(io_error(&path, source)),
        }
    }

    async fn write(&self, name: &str, data: Bytes) -> Result<(), StorageError> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(parent, source))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|source| io_error(&path, source))
    }

    async fn checksum(&self, name: &str) -> Result<Option<String>, StorageError> {
        match self.read(name).await {
            Ok(data) => Ok(Some(sha256_hex(&data))),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
