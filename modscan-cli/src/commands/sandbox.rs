//! `modscan sandbox` command handler
//!
//! Runs inside the sandbox runtime. The process always exits 0; failures
//! travel in the envelope's `Error` field on stdout.

use std::io::Write;

use modscan_scanner::{analysis_main, vulncheck_main};

use crate::cli::{SandboxAction, SandboxArgs};
use crate::error::CliError;

/// Execute the `sandbox` command, writing the envelope to stdout.
pub fn execute(args: SandboxArgs) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    run(args.action, stdout.lock())
}

/// Run one sandbox entrypoint and write its envelope to `out`.
pub fn run<W: Write>(action: SandboxAction, out: W) -> Result<(), CliError> {
    match action {
        SandboxAction::Vulncheck { args } => vulncheck_main(&args).write_to(out)?,
        SandboxAction::Analysis { args } => analysis_main(&args).write_to(out)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use modscan_scanner::sandbox::ERROR_KEY;

    fn envelope(action: SandboxAction) -> serde_json::Value {
        let mut out = Vec::new();
        run(action, &mut out).expect("sandbox entrypoints always succeed");
        assert!(out.ends_with(b"\n"));
        serde_json::from_slice(&out).expect("one JSON envelope")
    }

    #[test]
    fn bad_vulncheck_args_become_error_envelope() {
        let value = envelope(SandboxAction::Vulncheck {
            args: vec!["govulncheck".to_owned()],
        });
        let message = value[ERROR_KEY].as_str().expect("error envelope");
        assert!(message.contains("usage: vulncheck"), "{message}");
    }

    #[test]
    fn missing_analysis_binary_becomes_error_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let value = envelope(SandboxAction::Analysis {
            args: vec![
                dir.path().join("no-such-binary").display().to_string(),
                dir.path().display().to_string(),
            ],
        });
        assert!(value.get(ERROR_KEY).is_some(), "{value}");
    }
}
