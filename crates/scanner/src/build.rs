//! 바이너리 빌더 -- 모듈의 main 패키지 컴파일
//!
//! 바이너리 모드 스캔을 위해 모듈 트리의 모든 `main` 패키지를 찾아
//! 각각 빌드합니다. 한 패키지의 빌드 실패는 해당 [`BinaryInfo`]에 기록되고
//! 나머지 빌드는 계속됩니다.
//!
//! 출력 디렉토리의 수명은 호출자가 관리합니다.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use modscan_core::metrics as m;

use crate::error::ScanError;

/// main 패키지를 찾는 `go list` 템플릿
const MAIN_PACKAGE_TEMPLATE: &str = r#"{{if eq .Name "main"}}{{.ImportPath}}{{end}}"#;

/// 컴파일된 main 패키지 한 개
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryInfo {
    /// 패키지 import 경로
    pub import_path: String,
    /// 출력 바이너리 경로
    pub binary_path: PathBuf,
    /// 빌드 실패 메시지
    pub build_error: Option<String>,
    /// 빌드 소요 시간
    pub build_duration: Duration,
}

impl BinaryInfo {
    /// 바이너리 파일 이름
    pub fn name(&self) -> String {
        self.binary_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// 빌드 성공 여부
    pub fn is_built(&self) -> bool {
        self.build_error.is_none()
    }
}

/// 모듈 디렉토리의 main 패키지 import 경로를 찾습니다.
pub fn find_main_packages(go: &Path, module_dir: &Path) -> Result<Vec<String>, ScanError> {
    let output = Command::new(go)
        .args(["list", "-f", MAIN_PACKAGE_TEMPLATE, "./..."])
        .current_dir(module_dir)
        .output()
        .map_err(|source| ScanError::Start {
            program: go.display().to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ScanError::GoCommand {
            command: "list".to_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect())
}

/// import 경로에서 바이너리 이름을 만듭니다 (`/`, `.` -> `_`).
pub fn binary_name(import_path: &str) -> String {
    import_path.replace(['/', '.'], "_")
}

/// 모든 main 패키지를 `out_dir`에 빌드합니다.
///
/// 패키지 목록을 얻지 못하면 에러입니다. 개별 빌드 실패는 결과에 기록됩니다.
pub fn build_binaries(
    go: &Path,
    module_dir: &Path,
    out_dir: &Path,
) -> Result<Vec<BinaryInfo>, ScanError> {
    let packages = find_main_packages(go, module_dir)?;
    debug!(
        dir = %module_dir.display(),
        count = packages.len(),
        "found main packages"
    );

    let mut used = HashSet::new();
    let mut binaries = Vec::with_capacity(packages.len());
    for import_path in packages {
        let name = unique_name(&mut used, binary_name(&import_path));
        let binary_path = out_dir.join(&name);
        let started = Instant::now();
        let build_error = build_one(go, module_dir, &binary_path, &import_path).err();
        let build_duration = started.elapsed();

        if let Some(error) = &build_error {
            metrics::counter!(m::SCANNER_BUILD_FAILURES_TOTAL).increment(1);
            warn!(package = %import_path, error = %error, "binary build failed");
        }
        binaries.push(BinaryInfo {
            import_path,
            binary_path,
            build_error,
            build_duration,
        });
    }
    Ok(binaries)
}

fn unique_name(used: &mut HashSet<String>, base: String) -> String {
    if used.insert(base.clone()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}_{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn build_one(go: &Path, module_dir: &Path, output: &Path, import_path: &str) -> Result<(), String> {
    let result = Command::new(go)
        .arg("build")
        .arg("-o")
        .arg(output)
        .arg(import_path)
        .current_dir(module_dir)
        .output()
        .map_err(|e| format!("starting go build: {e}"))?;
    if result.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&result.stderr).trim().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_name_replaces_separators() {
        assert_eq!(binary_name("example.com/m/cmd/tool"), "example_com_m_cmd_tool");
    }

    #[test]
    fn unique_name_appends_counter() {
        let mut used = HashSet::new();
        assert_eq!(unique_name(&mut used, "a_b".to_owned()), "a_b");
        assert_eq!(unique_name(&mut used, "a_b".to_owned()), "a_b_2");
        assert_eq!(unique_name(&mut used, "a_b".to_owned()), "a_b_3");
    }

    #[test]
    fn binary_info_name() {
        let info = BinaryInfo {
            import_path: "example.com/m/cmd".to_owned(),
            binary_path: PathBuf::from("/tmp/out/example_com_m_cmd"),
            build_error: None,
            build_duration: Duration::ZERO,
        };
        assert_eq!(info.name(), "example_com_m_cmd");
        assert!(info.is_built());
    }

    #[test]
    fn missing_go_is_start_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_main_packages(Path::new("/nonexistent/go"), dir.path()).unwrap_err();
        assert!(matches!(err, ScanError::Start { .. }));
    }
}
