//! Run artifacts written while the simulation executes: the human-readable
//! trace (`simulation.log`) and the per-message node log (`node_log.txt`).
//!
//! These are simulation products with a fixed format, distinct from the
//! `tracing` diagnostics of the process itself.

use astrons_core::SimTime;
use chrono::{DateTime, Utc};
use std::io::Write;

/// The run's null message ID, used for node-level (message-less) trace lines.
pub const NULL_ID: &str = "00000000-0000-0000-000000000000";

/// Human-readable trace writer.
///
/// Each line carries run progress, virtual time, the virtual datetime, the
/// node label and kind, and the message ID involved.
pub struct TraceLog {
    writer: Box<dyn Write + Send>,
    end_time: SimTime,
}

impl std::fmt::Debug for TraceLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceLog")
            .field("end_time", &self.end_time)
            .finish()
    }
}

impl TraceLog {
    pub fn new(writer: Box<dyn Write + Send>, end_time: SimTime) -> Self {
        TraceLog { writer, end_time }
    }

    /// Discard all trace output.
    pub fn disabled() -> Self {
        TraceLog::new(Box::new(std::io::sink()), SimTime::MAX)
    }

    /// Fix the run horizon used for progress percentages.
    pub fn set_end_time(&mut self, end_time: SimTime) {
        self.end_time = end_time;
    }

    pub fn line(
        &mut self,
        now: SimTime,
        datetime: DateTime<Utc>,
        node: &str,
        kind: &str,
        msg_id: &str,
        text: &str,
    ) {
        let percent = if self.end_time == SimTime::MAX || self.end_time == SimTime::ZERO {
            0.0
        } else {
            now.as_secs_f64() / self.end_time.as_secs_f64() * 100.0
        };
        // Formatting failures on a trace sink are not worth killing a run.
        let _ = writeln!(
            self.writer,
            "{:4.1}%|{:8.2}|{}|{:^20}|[{:^15}]|{}|{}",
            percent,
            now.as_secs_f64(),
            datetime.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            node,
            kind,
            msg_id,
            text
        );
    }

    pub fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Tab-separated per-message, per-node event log.
pub struct NodeLog {
    writer: Box<dyn Write + Send>,
}

impl std::fmt::Debug for NodeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLog").finish()
    }
}

impl NodeLog {
    /// Wrap a writer and emit the column header.
    pub fn new(mut writer: Box<dyn Write + Send>) -> Self {
        let _ = writeln!(
            writer,
            "SimTime\tNode\tData_ID\tData_Size\tWait_time\tProcessing_time\tDelay_to_Next"
        );
        NodeLog { writer }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn line(
        &mut self,
        time_sent: f64,
        node: &str,
        msg_id: &str,
        size: f64,
        wait: f64,
        processing_time: f64,
        delay_to_next: f64,
    ) {
        let _ = writeln!(
            self.writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            time_sent, node, msg_id, size, wait, processing_time, delay_to_next
        );
    }

    pub fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Shared in-memory writer for asserting on log output.
    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_trace_line_format() {
        let sink = Sink::default();
        let mut log = TraceLog::new(Box::new(sink.clone()), SimTime::from_secs(100.0));
        log.line(
            SimTime::from_secs(50.0),
            DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            "Downlink",
            "DelaySize",
            "id-1",
            "Msg done.",
        );
        let out = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(out.starts_with("50.0%|"));
        assert!(out.contains("|id-1|Msg done."));
        assert!(out.contains("[   DelaySize   ]"));
    }

    #[test]
    fn test_node_log_header_and_rows() {
        let sink = Sink::default();
        let mut log = NodeLog::new(Box::new(sink.clone()));
        log.line(10.0, "Sink", "id-1", 100.0, 0.0, 10.0, 10.0);
        let out = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        let mut lines = out.lines();
        assert_eq!(
            lines.next().unwrap(),
            "SimTime\tNode\tData_ID\tData_Size\tWait_time\tProcessing_time\tDelay_to_Next"
        );
        assert_eq!(lines.next().unwrap(), "10\tSink\tid-1\t100\t0\t10\t10");
    }
}
