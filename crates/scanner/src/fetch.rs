//! 모듈 다운로드와 작업 디렉토리 준비
//!
//! [`GoModDownload`]는 `go mod download -json module@version`으로 모듈을
//! 모듈 캐시에 받습니다. 캐시는 읽기 전용이므로 스캔 전에
//! [`prepare_module`]로 쓰기 가능한 복사본을 만들고 의존성을 받습니다.

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::ScanError;

/// 다운로드된 모듈
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedModule {
    /// 모듈 경로
    pub path: String,
    /// 확정된 버전
    pub version: String,
    /// 모듈 캐시 안의 소스 디렉토리
    pub dir: PathBuf,
    /// 커밋 시각
    pub time: Option<DateTime<Utc>>,
}

/// 모듈 공급원
pub trait ModuleFetcher: Send + Sync + 'static {
    /// 모듈을 받아 소스 디렉토리를 반환합니다.
    fn fetch(
        &self,
        module: &str,
        version: &str,
    ) -> impl Future<Output = Result<FetchedModule, ScanError>> + Send;
}

/// `go mod download -json` 출력
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DownloadInfo {
    path: String,
    version: String,
    error: String,
    info: String,
    dir: String,
}

/// 모듈 캐시의 `.info` 파일
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct VersionInfo {
    time: Option<DateTime<Utc>>,
}

/// `go mod download` 기반 공급원
#[derive(Debug, Clone)]
pub struct GoModDownload {
    go: PathBuf,
    work_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl GoModDownload {
    /// `go` 실행 파일과 명령을 실행할 디렉토리로 생성합니다.
    pub fn new(go: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            go: go.into(),
            work_dir: work_dir.into(),
            env: Vec::new(),
        }
    }

    /// 환경변수를 추가합니다 (`GOMODCACHE`, `GOPROXY` 등).
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl ModuleFetcher for GoModDownload {
    async fn fetch(&self, module: &str, version: &str) -> Result<FetchedModule, ScanError> {
        let spec = format!("{module}@{version}");
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|source| ScanError::Io {
                path: self.work_dir.display().to_string(),
                source,
            })?;

        let output = tokio::process::Command::new(&self.go)
            .args(["mod", "download", "-json", spec.as_str()])
            .current_dir(&self.work_dir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ScanError::Start {
                program: self.go.display().to_string(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        let info: DownloadInfo = match serde_json::from_slice(&output.stdout) {
            Ok(info) => info,
            Err(_) if !output.status.success() => {
                return Err(ScanError::GoCommand {
                    command: "mod download".to_owned(),
                    stderr,
                });
            }
            Err(e) => {
                return Err(ScanError::Fetch {
                    module: spec,
                    reason: format!("decoding go mod download output: {e}"),
                });
            }
        };

        if !info.error.is_empty() {
            return Err(ScanError::Fetch {
                module: spec,
                reason: info.error,
            });
        }
        if !output.status.success() {
            return Err(ScanError::GoCommand {
                command: "mod download".to_owned(),
                stderr,
            });
        }
        if info.dir.is_empty() {
            return Err(ScanError::Fetch {
                module: spec,
                reason: "go mod download reported no directory".to_owned(),
            });
        }

        let time = if info.info.is_empty() {
            None
        } else {
            read_commit_time(Path::new(&info.info)).await
        };
        debug!(module = %spec, dir = %info.dir, "module downloaded");

        Ok(FetchedModule {
            path: if info.path.is_empty() {
                module.to_owned()
            } else {
                info.path
            },
            version: if info.version.is_empty() {
                version.to_owned()
            } else {
                info.version
            },
            dir: PathBuf::from(info.dir),
            time,
        })
    }
}

async fn read_commit_time(path: &Path) -> Option<DateTime<Utc>> {
    let data = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice::<VersionInfo>(&data).ok()?.time
}

/// 모듈 소스를 `dest`로 복사하고, 필요하면 의존성을 받습니다.
///
/// 복사본의 파일은 쓰기 가능합니다. `download_deps`가 참이면 복사본에서
/// `go mod download`를 실행해 `go.sum`을 채웁니다.
pub async fn prepare_module(
    go: &Path,
    source: &Path,
    dest: &Path,
    download_deps: bool,
) -> Result<(), ScanError> {
    let (from, to) = (source.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || copy_tree(&from, &to))
        .await
        .map_err(|e| ScanError::Task(e.to_string()))??;

    if !download_deps {
        return Ok(());
    }

    let output = tokio::process::Command::new(go)
        .args(["mod", "download"])
        .current_dir(dest)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ScanError::Start {
            program: go.display().to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(ScanError::GoCommand {
            command: "mod download".to_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(())
}

/// 디렉토리 트리를 복사합니다 (블로킹). 심볼릭 링크는 건너뜁니다.
fn copy_tree(source: &Path, dest: &Path) -> Result<(), ScanError> {
    let io_err = |path: &Path| {
        let path = path.display().to_string();
        move |source| ScanError::Io { path, source }
    };

    std::fs::create_dir_all(dest).map_err(io_err(dest))?;
    for entry in std::fs::read_dir(source).map_err(io_err(source))? {
        let entry = entry.map_err(io_err(source))?;
        let file_type = entry.file_type().map_err(io_err(&entry.path()))?;
        let target = dest.join(entry.file_name());
        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            // 모듈 캐시의 읽기 전용 권한을 복사하지 않도록 내용만 복사
            let mut reader = std::fs::File::open(entry.path()).map_err(io_err(&entry.path()))?;
            let mut writer = std::fs::File::create(&target).map_err(io_err(&target))?;
            std::io::copy(&mut reader, &mut writer).map_err(io_err(&target))?;
        }
    }
    Ok(())
}
