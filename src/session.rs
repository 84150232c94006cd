//! Streaming script execution.
//!
//! A session runs a script on a blocking worker (the engines are not
//! `Send`) and streams its output as tagged lines. Guest log lines ride a
//! bounded channel and are dropped when the consumer lags; the terminal
//! `[RESULT]`/`[ERROR]` line and the `[END]` sentinel are sent with
//! backpressure and never dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use crate::browser::Browser;
use crate::engine::{log_timestamp, new_engine, LogSink};
use crate::types::EngineKind;
use crate::value::{GuestValue, JsonIndent};

pub const END_LINE: &str = "[END] script execution finished";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Guest log channel; lines beyond this are dropped, not awaited.
    pub log_capacity: usize,
    /// Output line channel toward the consumer.
    pub stream_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            log_capacity: 128,
            stream_capacity: 256,
        }
    }
}

/// One cancellable script execution.
pub struct ExecutionSession {
    id: Uuid,
    cancel: CancellationToken,
    config: SessionConfig,
}

impl ExecutionSession {
    pub fn new(config: SessionConfig) -> Self {
        ExecutionSession {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            config,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token for cancelling this session from elsewhere.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Start the script and return the line stream. The stream always ends
    /// with [`END_LINE`], whatever happened before it.
    pub fn start(&self, kind: EngineKind, script: String) -> mpsc::Receiver<String> {
        let (out_tx, out_rx) = mpsc::channel::<String>(self.config.stream_capacity);
        let (log_tx, mut log_rx) = mpsc::channel::<String>(self.config.log_capacity);
        let cancel = self.cancel.clone();
        let session_id = self.id;

        // Guest-side emit never blocks the script; a lagging consumer
        // loses log lines rather than stalling execution.
        let sink: LogSink = Arc::new(move |line: &str| {
            let _ = log_tx.try_send(line.to_string());
        });

        let mut worker = tokio::task::spawn_blocking(move || {
            let browser = Browser::with_defaults()?;
            let mut engine = new_engine(kind, browser)?;
            engine.set_log_sink(sink);
            let result = engine.execute(&script);
            engine.close();
            result
        });

        tokio::spawn(async move {
            let banner = format!("[INFO][{}] executing {kind} script...", log_timestamp());
            let _ = out_tx.send(banner).await;

            let mut log_open = true;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(%session_id, "session cancelled");
                        worker.abort();
                        let _ = out_tx.send("[ERROR] execution cancelled".to_string()).await;
                        let _ = out_tx.send(END_LINE.to_string()).await;
                        return;
                    }
                    line = log_rx.recv(), if log_open => {
                        match line {
                            Some(line) => { let _ = out_tx.send(line).await; }
                            None => log_open = false,
                        }
                    }
                    joined = &mut worker => {
                        // Flush whatever the script logged before finishing.
                        while let Ok(line) = log_rx.try_recv() {
                            let _ = out_tx.send(line).await;
                        }
                        let terminal = match joined {
                            Ok(Ok(map)) => {
                                match GuestValue::Map(map).encode_json(&JsonIndent::Spaces(2)) {
                                    Ok(json) => format!("[RESULT] {json}"),
                                    Err(e) => format!("[ERROR] {e}"),
                                }
                            }
                            Ok(Err(e)) => format!("[ERROR] {e}"),
                            Err(join_err) => {
                                error!(%session_id, %join_err, "script worker died");
                                format!("[ERROR] script worker panicked: {join_err}")
                            }
                        };
                        let _ = out_tx.send(terminal).await;
                        let _ = out_tx.send(END_LINE.to_string()).await;
                        return;
                    }
                }
            }
        });

        out_rx
    }
}

/// Server-sent-events framing for a session line.
///
/// Log lines are wrapped in a JSON envelope; the result line's payload is
/// already JSON and passes through as the event data.
pub fn sse_frame(line: &str) -> String {
    if let Some(json) = line.strip_prefix("[RESULT] ") {
        let compact = json.replace('\n', "");
        return format!("event: result\ndata: {compact}\n\n");
    }
    if let Some(msg) = line.strip_prefix("[ERROR]") {
        return format!(
            "event: error\ndata: {{\"message\":{}}}\n\n",
            json_escape(msg.trim_start())
        );
    }
    if line.starts_with("[END]") {
        return "event: end\ndata: {}\n\n".to_string();
    }
    format!("event: log\ndata: {{\"message\":{}}}\n\n", json_escape(line))
}

pub fn sse_connected(session_id: Uuid) -> String {
    format!("event: connected\ndata: {{\"session\":\"{session_id}\"}}\n\n")
}

fn json_escape(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_lua_session_streams_result() {
        let session = ExecutionSession::new(SessionConfig::default());
        let rx = session.start(
            EngineKind::Lua,
            "print(\"working\") return { done = true }".to_string(),
        );
        let lines = collect(rx).await;

        assert!(lines[0].starts_with("[INFO]["));
        assert!(lines.iter().any(|l| l.starts_with("[PRINT][") && l.ends_with("working")));
        let result = lines.iter().find(|l| l.starts_with("[RESULT] ")).unwrap();
        assert!(result.contains("\"done\": true"));
        assert_eq!(lines.last().map(String::as_str), Some(END_LINE));
    }

    #[tokio::test]
    async fn test_js_session_streams_result() {
        let session = ExecutionSession::new(SessionConfig::default());
        let rx = session.start(
            EngineKind::JavaScript,
            "console.log(\"step\"); ({ n: 7 });".to_string(),
        );
        let lines = collect(rx).await;
        assert!(lines.iter().any(|l| l.starts_with("[LOG][") && l.ends_with("step")));
        assert!(lines.iter().any(|l| l.starts_with("[RESULT] ") && l.contains("\"n\": 7")));
        assert_eq!(lines.last().map(String::as_str), Some(END_LINE));
    }

    #[tokio::test]
    async fn test_script_error_becomes_error_line() {
        let session = ExecutionSession::new(SessionConfig::default());
        let rx = session.start(EngineKind::Lua, "error(\"exploded\")".to_string());
        let lines = collect(rx).await;
        assert!(lines.iter().any(|l| l.starts_with("[ERROR]") && l.contains("exploded")));
        assert_eq!(lines.last().map(String::as_str), Some(END_LINE));
    }

    #[tokio::test]
    async fn test_log_overflow_drops_lines_but_not_result() {
        let session = ExecutionSession::new(SessionConfig {
            log_capacity: 1,
            stream_capacity: 8,
        });
        let rx = session.start(
            EngineKind::Lua,
            "for i = 1, 1000 do print(i) end return { done = true }".to_string(),
        );
        let lines = collect(rx).await;

        // The script outruns the capacity-1 log channel, so most print
        // lines are shed. The terminal lines still arrive.
        let printed = lines.iter().filter(|l| l.starts_with("[PRINT][")).count();
        assert!(printed < 1000);
        let result = lines.iter().find(|l| l.starts_with("[RESULT] ")).unwrap();
        assert!(result.contains("\"done\": true"));
        assert_eq!(lines.last().map(String::as_str), Some(END_LINE));
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream() {
        let session = ExecutionSession::new(SessionConfig::default());
        let rx = session.start(
            EngineKind::Lua,
            "sleep(5000) return { done = true }".to_string(),
        );
        let token = session.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            token.cancel();
        });
        let lines = collect(rx).await;
        assert!(lines.iter().any(|l| l.contains("execution cancelled")));
        assert_eq!(lines.last().map(String::as_str), Some(END_LINE));
        assert!(!lines.iter().any(|l| l.starts_with("[RESULT]")));
    }

    #[test]
    fn test_sse_framing() {
        assert_eq!(
            sse_frame("[RESULT] {\"a\": 1}"),
            "event: result\ndata: {\"a\": 1}\n\n"
        );
        assert_eq!(
            sse_frame("[ERROR] boom"),
            "event: error\ndata: {\"message\":\"boom\"}\n\n"
        );
        assert_eq!(sse_frame(END_LINE), "event: end\ndata: {}\n\n");
        let log = sse_frame("[PRINT][ts] \"quoted\"");
        assert!(log.starts_with("event: log\ndata: {\"message\":"));
        assert!(log.contains("\\\"quoted\\\""));
    }

    #[test]
    fn test_sse_result_multiline_collapsed() {
        let framed = sse_frame("[RESULT] {\n  \"a\": 1\n}");
        // SSE data must be a single line.
        assert_eq!(framed.matches('\n').count(), 3);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = ExecutionSession::new(SessionConfig::default());
        let b = ExecutionSession::new(SessionConfig::default());
        assert_ne!(a.id(), b.id());
        let frame = sse_connected(a.id());
        assert!(frame.contains(&a.id().to_string()));
    }
}
