//! Protocol output on stdout.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use pancam_models::{ProtocolFormat, Record};
use tracing::warn;

/// Writes one protocol record per line. Clones share the same writer.
#[derive(Clone)]
pub struct Emitter {
    format: ProtocolFormat,
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Emitter {
    pub fn new(format: ProtocolFormat, out: Box<dyn Write + Send>) -> Self {
        Self {
            format,
            out: Arc::new(Mutex::new(out)),
        }
    }

    pub fn stdout(format: ProtocolFormat) -> Self {
        Self::new(format, Box::new(io::stdout()))
    }

    pub fn format(&self) -> ProtocolFormat {
        self.format
    }

    /// Write `record` if it has a rendering in this format. A closed stdout
    /// is logged, not fatal.
    pub fn emit(&self, record: &Record) {
        let Some(line) = record.render(self.format) else {
            return;
        };
        let Ok(mut out) = self.out.lock() else {
            warn!("Protocol writer poisoned");
            return;
        };
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            warn!(error = %e, "Failed to write protocol record");
        }
    }

    pub fn emit_all<'a>(&self, records: impl IntoIterator<Item = &'a Record>) {
        for record in records {
            self.emit(record);
        }
    }
}

/// In-memory writer for tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct Captured(pub Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Captured {
    pub fn emitter(&self, format: ProtocolFormat) -> Emitter {
        Emitter::new(format, Box::new(self.clone()))
    }

    pub fn lines(&self) -> Vec<String> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf).lines().map(str::to_string).collect()
    }
}

#[cfg(test)]
impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_records() {
        let captured = Captured::default();
        let emitter = captured.emitter(ProtocolFormat::Text);
        emitter.emit_all(&[
            Record::Ready,
            Record::Move(-4),
            Record::Lost,
            Record::MotionObservation(None),
        ]);
        assert_eq!(captured.lines(), vec!["READY", "MOVE -4", "LOST"]);
    }

    #[test]
    fn test_json_records() {
        let captured = Captured::default();
        let emitter = captured.emitter(ProtocolFormat::Json);
        emitter.emit(&Record::Ready);
        emitter.emit(&Record::Lost);
        emitter.emit(&Record::MotionObservation(None));
        assert_eq!(captured.lines(), vec![r#"{"ready":true}"#, r#"{"active":false}"#]);
    }

    #[test]
    fn test_clones_share_output() {
        let captured = Captured::default();
        let a = captured.emitter(ProtocolFormat::Text);
        let b = a.clone();
        a.emit(&Record::Motion);
        b.emit(&Record::Quiet);
        assert_eq!(captured.lines(), vec!["MOTION", "QUIET"]);
    }
}
