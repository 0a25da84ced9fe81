use std::fs::{self, File};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{TraceError, TracePayload, Tracer};

/// Appends one JSON object per event to a file.
///
/// The file is truncated when the tracer is opened, so each process run starts
/// with a fresh log.
pub struct JsonLinesTracer {
    path: PathBuf,
    writer: Mutex<LineWriter<File>>,
}

impl JsonLinesTracer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(LineWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Tracer for JsonLinesTracer {
    fn log(&self, event: &str, payload: &TracePayload) -> Result<(), TraceError> {
        let mut line = Map::new();
        line.insert(
            "ts".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        line.insert("event".to_string(), Value::String(event.to_string()));
        for (key, value) in payload {
            if key != "ts" && key != "event" {
                line.insert(key.clone(), value.clone());
            }
        }
        let encoded = serde_json::to_string(&Value::Object(line))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{encoded}")?;
        Ok(())
    }
}

impl std::fmt::Debug for JsonLinesTracer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("JsonLinesTracer")
            .field("path", &self.path)
            .finish()
    }
}
