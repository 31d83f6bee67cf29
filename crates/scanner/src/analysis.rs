//! 분석 바이너리 실행
//!
//! 사용자가 올린 `go/analysis` 바이너리를 `<binary> -json [args..] ./...` 형태로
//! 모듈 디렉토리에서 실행하고, stdout을 [`JsonTree`]로 읽습니다.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::diagnostics::{JsonTree, parse_json_tree};
use crate::error::ScanError;

/// 분석 바이너리를 실행합니다.
///
/// 종료 코드가 0이 아니면 stderr를 담은 `ToolFailed`를 반환합니다.
pub fn run(binary: &Path, args: &[String], dir: &Path) -> Result<JsonTree, ScanError> {
    let program = binary.display().to_string();
    debug!(program = %program, args = ?args, dir = %dir.display(), "running analysis binary");

    let output = Command::new(binary)
        .arg("-json")
        .args(args)
        .arg("./...")
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ScanError::Start {
            program: program.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ScanError::ToolFailed {
            program,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    parse_json_tree(&output.stdout)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("analyzer");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn parses_stdout_tree() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(
            dir.path(),
            r#"echo '{"example.com/m":{"lint":[{"message":"x","posn":"a.go:1:1"}]}}'"#,
        );
        let tree = run(&bin, &[], dir.path()).unwrap();
        assert!(tree.contains_key("example.com/m"));
    }

    #[test]
    fn passes_json_flag_and_args_before_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(
            dir.path(),
            r#"[ "$1" = "-json" ] && [ "$2" = "-flag" ] && [ "$3" = "./..." ] && echo '{}' || exit 9"#,
        );
        assert!(run(&bin, &["-flag".to_owned()], dir.path()).unwrap().is_empty());
    }

    #[test]
    fn non_zero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "echo 'no packages' >&2; exit 1");
        let err = run(&bin, &[], dir.path()).unwrap_err();
        match err {
            ScanError::ToolFailed { code, stderr, .. } => {
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "no packages");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
