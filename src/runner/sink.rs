//! Output sinks for accepted events.

use crate::error::{EngineError, Result};
use crate::event::Event;
use crate::observable::TableRow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Receives one row per accepted event, under the runner's output lock.
pub trait ResultSink: Send {
    fn write(&mut self, row: TableRow, event: &dyn Event) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects rows in memory. Clones share the same buffer, so a test can keep
/// one handle while the runner owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    rows: Arc<Mutex<Vec<TableRow>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<TableRow> {
        self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemorySink {
    fn write(&mut self, row: TableRow, _event: &dyn Event) -> Result<()> {
        self.rows
            .lock()
            .map_err(|_| EngineError::InvalidState("memory sink poisoned".into()))?
            .push(row);
        Ok(())
    }
}

/// Writes one JSON object per line: event info plus observables.
pub struct JsonLinesSink {
    writer: Box<dyn Write + Send>,
    written: u64,
}

impl JsonLinesSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self { writer, written: 0 }
    }

    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        tracing::debug!("Writing rows to {:?}", path);
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl std::fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink")
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

impl ResultSink for JsonLinesSink {
    fn write(&mut self, row: TableRow, event: &dyn Event) -> Result<()> {
        let mut value = serde_json::to_value(&row)?;
        if let Some(object) = value.as_object_mut() {
            object.insert("type".into(), event.type_tag().into());
        }
        serde_json::to_writer(&mut self.writer, &value)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
