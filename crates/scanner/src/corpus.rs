//! 스캔 대상 코퍼스 선택
//!
//! 모듈 목록 파일을 읽어 import 수 범위로 걸러낸 뒤 스캔 순서를 정합니다.
//!
//! 파일 형식은 한 줄에 한 모듈입니다.
//!
//! ```text
//! # path [version] [imported_by]
//! golang.org/x/text v0.3.7 12000
//! example.com/tool
//! ```

use std::future::Future;
use std::io::BufRead;
use std::path::PathBuf;

use modscan_core::storage::ObjectStore;

use crate::error::ScanError;

/// 오브젝트 스토어 경로 접두어
pub const OBJSTORE_PREFIX: &str = "objstore://";

/// 코퍼스의 모듈 한 개
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    /// 모듈 경로
    pub path: String,
    /// 버전 (없으면 최신)
    pub version: Option<String>,
    /// 이 모듈을 import하는 모듈 수
    pub imported_by: u64,
}

/// import 수 범위 (양끝 포함, `max = None`이면 상한 없음)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportBounds {
    /// 최소 import 수
    pub min: u64,
    /// 최대 import 수
    pub max: Option<u64>,
}

impl ImportBounds {
    /// 범위 포함 여부
    pub fn contains(&self, imported_by: u64) -> bool {
        imported_by >= self.min && self.max.is_none_or(|max| imported_by <= max)
    }
}

/// 모듈 목록 파일을 읽습니다.
///
/// `#` 주석과 빈 줄은 건너뜁니다. 세 번째 필드가 숫자가 아니면
/// 줄 번호를 담은 에러를 반환합니다.
pub fn read_module_file<R: BufRead>(reader: R) -> Result<Vec<ModuleSpec>, ScanError> {
    let mut modules = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let lineno = index + 1;
        let line = line.map_err(|e| ScanError::Io {
            path: format!("module file line {lineno}"),
            source: e,
        })?;
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() > 3 {
            return Err(ScanError::InvalidRequest(format!(
                "module file line {lineno}: expected at most 3 fields, got {}",
                fields.len()
            )));
        }

        let imported_by = match fields.get(2) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                ScanError::InvalidRequest(format!(
                    "module file line {lineno}: invalid import count '{raw}'"
                ))
            })?,
            None => 0,
        };

        modules.push(ModuleSpec {
            path: fields[0].to_owned(),
            version: fields.get(1).map(|v| (*v).to_owned()),
            imported_by,
        });
    }
    Ok(modules)
}

/// 범위로 거르고 `imported_by` 내림차순, 경로 오름차순으로 정렬합니다.
pub fn select(modules: Vec<ModuleSpec>, bounds: ImportBounds) -> Vec<ModuleSpec> {
    let mut selected: Vec<ModuleSpec> = modules
        .into_iter()
        .filter(|m| bounds.contains(m.imported_by))
        .collect();
    selected.sort_by(|a, b| {
        b.imported_by
            .cmp(&a.imported_by)
            .then_with(|| a.path.cmp(&b.path))
    });
    selected
}

/// 모듈 목록 공급원
pub trait ModuleIndex: Send + Sync {
    /// 전체 모듈 목록을 반환합니다.
    fn modules(&self) -> impl Future<Output = Result<Vec<ModuleSpec>, ScanError>> + Send;
}

/// 로컬 파일 모듈 목록
#[derive(Debug, Clone)]
pub struct ModuleFile {
    path: PathBuf,
}

impl ModuleFile {
    /// 파일 경로로 생성합니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ModuleIndex for ModuleFile {
    async fn modules(&self) -> Result<Vec<ModuleSpec>, ScanError> {
        let content = tokio::fs::read(&self.path)
            .await
            .map_err(|source| ScanError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        read_module_file(content.as_slice())
    }
}

/// 오브젝트 스토어에 저장된 모듈 목록
#[derive(Debug)]
pub struct StoredModuleFile<'a, S> {
    store: &'a S,
    name: String,
}

impl<'a, S: ObjectStore> StoredModuleFile<'a, S> {
    /// `objstore://` 접두어는 있어도 없어도 됩니다.
    pub fn new(store: &'a S, name: &str) -> Self {
        Self {
            store,
            name: name.strip_prefix(OBJSTORE_PREFIX).unwrap_or(name).to_owned(),
        }
    }
}

impl<S: ObjectStore> ModuleIndex for StoredModuleFile<'_, S> {
    async fn modules(&self) -> Result<Vec<ModuleSpec>, ScanError> {
        let data = self
            .store
            .read(&self.name)
            .await
            .map_err(|e| ScanError::InvalidRequest(format!("reading module file: {e}")))?;
        read_module_file(&data[..])
    }
}
