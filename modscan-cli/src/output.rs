//! Text and JSON rendering of command results.
//!
//! Handlers build a payload and hand it to [`OutputWriter`]; they never
//! print directly. Only payloads go to stdout, logs go to stderr.

use std::io::{ErrorKind, Write};

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Writes payloads in the format chosen by `--output`.
pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Render to stdout.
    ///
    /// A closed pipe (`modscan jobs list | head`) is not an error.
    pub fn render<T: Render + Serialize>(&self, payload: &T) -> Result<(), CliError> {
        let mut handle = std::io::stdout().lock();
        match self.render_to(&mut handle, payload) {
            Err(CliError::Io(e)) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    }

    /// Render to any writer. JSON is pretty-printed with a trailing newline.
    pub fn render_to<T: Render + Serialize>(
        &self,
        w: &mut dyn Write,
        payload: &T,
    ) -> Result<(), CliError> {
        match self.format {
            OutputFormat::Text => payload.render_text(w)?,
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut *w, payload)?;
                writeln!(w)?;
            }
        }
        w.flush()?;
        Ok(())
    }
}

/// Human-readable rendering, implemented by every payload next to `Serialize`.
pub trait Render {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Summary {
        module: String,
        findings: u32,
    }

    impl Render for Summary {
        fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
            writeln!(w, "Module: {}", self.module)?;
            writeln!(w, "Findings: {}", self.findings)?;
            Ok(())
        }
    }

    fn payload() -> Summary {
        Summary {
            module: "golang.org/x/text".to_owned(),
            findings: 42,
        }
    }

    #[test]
    fn text_format_uses_render() {
        let writer = OutputWriter::new(OutputFormat::Text);
        let mut buffer = Vec::new();
        writer
            .render_to(&mut buffer, &payload())
            .expect("text rendering should succeed");

        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert_eq!(output, "Module: golang.org/x/text\nFindings: 42\n");
    }

    #[test]
    fn json_format_is_pretty_with_newline() {
        let writer = OutputWriter::new(OutputFormat::Json);
        let mut buffer = Vec::new();
        writer
            .render_to(&mut buffer, &payload())
            .expect("json rendering should succeed");

        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert!(output.ends_with('\n'), "json output ends with a newline");
        let parsed: serde_json::Value = serde_json::from_str(&output).expect("valid JSON");
        assert_eq!(parsed["module"].as_str(), Some("golang.org/x/text"));
        assert_eq!(parsed["findings"].as_u64(), Some(42));
    }
}
