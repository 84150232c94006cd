//! Embedded script engines.
//!
//! Both engines expose the same capability surface to untrusted scripts:
//! HTTP fetch through the shared [`Browser`], HTML querying, JSON helpers
//! and log capture. Engines are not `Send`; construct and drive one on a
//! single thread (the session module uses a blocking worker for this).

pub mod js;
pub mod lua;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::browser::{Browser, Response};
use crate::errors::Result;
use crate::types::EngineKind;
use crate::value::GuestValue;

/// Receives every line the guest emits (prints, logs, security notices).
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// One engine instance: owns its VM and its browser.
pub trait ScriptEngine {
    /// Run a script to completion and return its terminal value as a map.
    /// Non-map terminal values become an empty map.
    fn execute(&mut self, script: &str) -> Result<BTreeMap<String, GuestValue>>;

    fn set_log_sink(&mut self, sink: LogSink);

    fn kind(&self) -> EngineKind;

    /// Release VM resources. Engines are single-use after this.
    fn close(&mut self) {}
}

pub fn new_engine(kind: EngineKind, browser: Browser) -> Result<Box<dyn ScriptEngine>> {
    Ok(match kind {
        EngineKind::Lua => Box::new(lua::LuaEngine::new(browser)?),
        EngineKind::JavaScript => Box::new(js::JsEngine::new(browser)?),
    })
}

/// Shared sink handle. Cloned into every host binding; lines emitted before
/// a sink is attached go to tracing instead of being lost.
#[derive(Clone, Default)]
pub(crate) struct OutputSink {
    inner: Rc<RefCell<Option<LogSink>>>,
}

impl OutputSink {
    pub fn set(&self, sink: LogSink) {
        *self.inner.borrow_mut() = Some(sink);
    }

    pub fn emit(&self, line: &str) {
        if let Some(sink) = self.inner.borrow().as_ref() {
            sink(line);
        } else {
            tracing::debug!(target: "script", "{line}");
        }
    }
}

/// Timestamp used in guest-visible log lines.
pub(crate) fn log_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

pub(crate) fn security_message(name: &str) -> String {
    format!("function '{name}' is disabled in the sandbox")
}

/// Shape of a response as scripts see it.
pub(crate) fn response_to_guest(resp: &Response) -> GuestValue {
    let mut map = BTreeMap::new();
    map.insert(
        "status_code".to_string(),
        GuestValue::Number(resp.status as f64),
    );
    map.insert("body".to_string(), GuestValue::String(resp.text()));
    map.insert("url".to_string(), GuestValue::String(resp.url.clone()));

    let mut headers = BTreeMap::new();
    for (name, value) in &resp.headers {
        headers.insert(name.clone(), GuestValue::String(value.clone()));
    }
    map.insert("headers".to_string(), GuestValue::Map(headers));

    let mut cookies = BTreeMap::new();
    for (name, value) in &resp.cookies {
        cookies.insert(name.clone(), GuestValue::String(value.clone()));
    }
    map.insert("cookies".to_string(), GuestValue::Map(cookies));
    GuestValue::Map(map)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Sink that buffers lines for assertions.
    #[derive(Clone, Default)]
    pub struct CaptureSink {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl CaptureSink {
        pub fn sink(&self) -> LogSink {
            let lines = Arc::clone(&self.lines);
            Arc::new(move |line: &str| {
                lines.lock().unwrap().push(line.to_string());
            })
        }

        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }
}
