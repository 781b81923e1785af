//! Window sinks: hand fired windows to another thread, or write them out as
//! newline-delimited JSON.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use slicewise_window::{SinkError, WindowDefinition, WindowResult, WindowSink};

/// Forwards every fired window over a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<WindowResult>,
}

impl ChannelSink {
    pub fn unbounded() -> (Self, Receiver<WindowResult>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    /// A full channel blocks the emitting worker until the receiver catches up.
    pub fn bounded(capacity: usize) -> (Self, Receiver<WindowResult>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl WindowSink for ChannelSink {
    fn emit(&self, result: WindowResult) -> Result<(), SinkError> {
        self.tx
            .send(result)
            .map_err(|_| SinkError("window receiver disconnected".into()))
    }
}

/// Streaming NDJSON writer: one object per result row with the columns
/// `window_start, window_end, sequence_number, [key], <aliases>`.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<BufWriter<W>>,
    key_name: Option<String>,
    aliases: Vec<String>,
}

impl JsonLinesSink<File> {
    pub fn to_path(path: &Path, definition: &WindowDefinition) -> io::Result<Self> {
        let f = File::create(path)?;
        Ok(Self::to_writer(f, definition))
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn to_writer(writer: W, definition: &WindowDefinition) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            key_name: definition.key.as_ref().map(|k| k.name().to_string()),
            aliases: definition.output_names(),
        }
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_inner()
            .map_err(|e| e.into_error())
    }

    fn write_result(&self, result: &WindowResult) -> io::Result<()> {
        let batch = result.to_row_batch(self.key_name.as_deref(), &self.aliases);
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        for r in 0..batch.num_rows() {
            let obj: serde_json::Map<String, serde_json::Value> = batch
                .columns
                .iter()
                .map(|c| (c.name.clone(), c.values[r].to_json()))
                .collect();
            let line = serde_json::to_string(&obj)?;
            writeln!(writer, "{line}")?;
        }
        writer.flush()
    }
}

impl<W: Write + Send> WindowSink for JsonLinesSink<W> {
    fn emit(&self, result: WindowResult) -> Result<(), SinkError> {
        self.write_result(&result)
            .map_err(|e| SinkError(format!("jsonl write failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use slicewise_core::types::{KeyValue, Scalar};
    use slicewise_window::{ResultRow, WindowOperatorConfig, WindowTriggerTask};

    use super::*;

    fn result(seq: u64, rows: Vec<ResultRow>) -> WindowResult {
        WindowResult {
            task: WindowTriggerTask {
                sequence_number: seq,
                window_start: 0,
                window_end: 100,
            },
            records: 3,
            rows,
        }
    }

    #[test]
    fn jsonl_writes_one_line_per_row() {
        let def = WindowOperatorConfig::from_json_str(
            r#"{"window_size_ms": 100, "timestamp_field": "ts", "key_field": "sensor",
                "aggregates": [{"function": {"sum": "v"}, "alias": "total"}]}"#,
        )
        .expect("parse")
        .build()
        .expect("valid");
        let sink = JsonLinesSink::to_writer(Vec::new(), &def);
        sink.emit(result(
            1,
            vec![
                ResultRow {
                    key: Some(KeyValue::from("a")),
                    values: vec![Scalar::F64(2.5)],
                },
                ResultRow {
                    key: Some(KeyValue::from("b")),
                    values: vec![Scalar::F64(1.0)],
                },
            ],
        ))
        .expect("emit");
        let text = String::from_utf8(sink.into_inner().expect("inner")).expect("utf8");
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["sensor"], "a");
        assert_eq!(lines[0]["total"], 2.5);
        assert_eq!(lines[1]["window_end"], 100);
        assert_eq!(lines[1]["sequence_number"], 1);
    }

    #[test]
    fn channel_sink_reports_a_dropped_receiver() {
        let (sink, rx) = ChannelSink::unbounded();
        sink.emit(result(1, Vec::new())).expect("emit");
        assert_eq!(rx.recv().expect("recv").task.sequence_number, 1);
        drop(rx);
        assert!(sink.emit(result(2, Vec::new())).is_err());
    }
}
