//! 서브프로세스 종료 대기 및 자원 사용량 측정
//!
//! [`UsageProbe`]는 자식 프로세스를 회수(reap)하면서 최대 RSS를 함께
//! 보고하는 전략 객체입니다. 플랫폼별 구현은 [`default_probe`]가 시작 시
//! 한 번 고릅니다.
//!
//! - Unix: [`RusageProbe`] (`wait4(2)`의 `ru_maxrss`)
//! - 그 외: [`NullProbe`] (항상 0)

use std::io;
use std::process::{Child, ExitStatus};
use std::sync::Arc;

/// 자식 프로세스 회수 + 최대 메모리 측정
pub trait UsageProbe: Send + Sync + std::fmt::Debug {
    /// 자식 프로세스가 끝날 때까지 기다리고 `(종료 상태, 최대 RSS 바이트)`를 반환합니다.
    fn wait(&self, child: &mut Child) -> io::Result<(ExitStatus, u64)>;
}

/// 자원 측정을 지원하지 않는 플랫폼용. 메모리는 항상 0입니다.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProbe;

impl UsageProbe for NullProbe {
    fn wait(&self, child: &mut Child) -> io::Result<(ExitStatus, u64)> {
        Ok((child.wait()?, 0))
    }
}

/// `wait4(2)` 기반 측정
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RusageProbe;

#[cfg(unix)]
impl UsageProbe for RusageProbe {
    fn wait(&self, child: &mut Child) -> io::Result<(ExitStatus, u64)> {
        use std::os::unix::process::ExitStatusExt;

        let pid = libc::pid_t::try_from(child.id())
            .map_err(|_| io::Error::other("child pid out of range"))?;
        let mut status: libc::c_int = 0;
        // SAFETY: rusage는 POD 구조체이며 0으로 초기화해도 유효합니다.
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };

        loop {
            // SAFETY: pid는 아직 회수되지 않은 자식 프로세스이고, status/usage는
            // 호출 동안 유효한 가변 참조입니다.
            let rc = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
            if rc == pid {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }

        Ok((ExitStatus::from_raw(status), max_rss_bytes(usage.ru_maxrss)))
    }
}

/// `ru_maxrss` 단위 변환: Linux는 KiB, macOS는 바이트
#[cfg(unix)]
fn max_rss_bytes(max_rss: libc::c_long) -> u64 {
    let value = u64::try_from(max_rss).unwrap_or(0);
    if cfg!(target_os = "macos") {
        value
    } else {
        value.saturating_mul(1024)
    }
}

/// 현재 플랫폼의 기본 측정 전략
pub fn default_probe() -> Arc<dyn UsageProbe> {
    #[cfg(unix)]
    {
        Arc::new(RusageProbe)
    }
    #[cfg(not(unix))]
    {
        Arc::new(NullProbe)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn rusage_probe_reports_exit_code_and_memory() {
        let mut child = Command::new("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .unwrap();
        let (status, rss) = RusageProbe.wait(&mut child).unwrap();
        assert_eq!(status.code(), Some(3));
        assert!(rss > 0);
    }

    #[test]
    fn null_probe_reports_zero() {
        let mut child = Command::new("sh").args(["-c", "true"]).spawn().unwrap();
        let (status, rss) = NullProbe.wait(&mut child).unwrap();
        assert!(status.success());
        assert_eq!(rss, 0);
    }

    #[test]
    fn rusage_probe_reports_signal_termination() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30"])
            .spawn()
            .unwrap();
        child.kill().unwrap();
        let (status, _) = RusageProbe.wait(&mut child).unwrap();
        assert_eq!(status.code(), None);
    }
}
