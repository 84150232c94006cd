//! JavaScript engine binding.
//!
//! The sandbox is default-deny: scripts only see the globals bound here,
//! there is no module loader and no process or filesystem surface. Host
//! failures reach scripts as thrown exceptions, which the call harness
//! catches at its boundary.
//!
//! Bindings are installed inside the same context scope that evaluates the
//! script. Bound closures keep owned signatures; values that need the live
//! context (documents, selections, responses) travel as handle structs and
//! are lowered through [`IntoJs`] when the call returns.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

use rquickjs::function::{Func, Opt, Rest};
use rquickjs::{Context, Ctx, Exception, Function, IntoJs, Object, Runtime, Value as JsValue};

use crate::browser::{Browser, RequestOptions, Response};
use crate::dom::{Document, Selection};
use crate::errors::{Result, ScriptHostError};
use crate::value::{GuestValue, JsonIndent};

use super::{log_timestamp, LogSink, OutputSink, ScriptEngine};

pub struct JsEngine {
    runtime: Runtime,
    context: Context,
    state: EngineState,
}

/// Everything the host bindings share. Cloned into each closure.
#[derive(Clone)]
struct EngineState {
    browser: Rc<RefCell<Browser>>,
    sink: OutputSink,
    timers: Rc<RefCell<HashMap<String, Instant>>>,
    counters: Rc<RefCell<HashMap<String, u64>>>,
    indent: Rc<Cell<usize>>,
}

fn js_err(err: rquickjs::Error) -> ScriptHostError {
    ScriptHostError::Runtime(err.to_string())
}

/// Outcome of a fallible host call. Lowering a failure throws it as a
/// script exception.
enum HostOut<T> {
    Value(T),
    Thrown(String),
}

impl<'js, T: IntoJs<'js>> IntoJs<'js> for HostOut<T> {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<JsValue<'js>> {
        match self {
            HostOut::Value(value) => value.into_js(ctx),
            HostOut::Thrown(msg) => Err(Exception::throw_message(ctx, &msg)),
        }
    }
}

fn host_out<T, E: std::fmt::Display>(res: std::result::Result<T, E>) -> HostOut<T> {
    match res {
        Ok(value) => HostOut::Value(value),
        Err(err) => HostOut::Thrown(err.to_string()),
    }
}

impl JsEngine {
    pub fn new(browser: Browser) -> Result<Self> {
        let runtime = Runtime::new().map_err(js_err)?;
        let context = Context::full(&runtime).map_err(js_err)?;
        Ok(JsEngine {
            runtime,
            context,
            state: EngineState {
                browser: Rc::new(RefCell::new(browser)),
                sink: OutputSink::default(),
                timers: Rc::new(RefCell::new(HashMap::new())),
                counters: Rc::new(RefCell::new(HashMap::new())),
                indent: Rc::new(Cell::new(0)),
            },
        })
    }
}

impl ScriptEngine for JsEngine {
    fn execute(&mut self, script: &str) -> Result<BTreeMap<String, GuestValue>> {
        let state = self.state.clone();
        let result = self.context.with(|ctx| {
            install_bindings(&ctx, &state).map_err(js_err)?;
            match ctx.eval::<JsValue, _>(script) {
                Ok(value) => Ok(js_to_guest(&value)),
                Err(rquickjs::Error::Exception) => {
                    let raised = ctx.catch();
                    let (name, message) = exception_parts(&raised);
                    if name == "SyntaxError" {
                        Err(ScriptHostError::Compile(message))
                    } else {
                        Err(ScriptHostError::Runtime(message))
                    }
                }
                Err(err) => Err(ScriptHostError::Runtime(err.to_string())),
            }
        });

        // Settle any microtasks queued during evaluation.
        while self.runtime.is_job_pending() {
            if self.runtime.execute_pending_job().is_err() {
                break;
            }
        }

        match result? {
            GuestValue::Map(map) => Ok(map),
            _ => Ok(BTreeMap::new()),
        }
    }

    fn set_log_sink(&mut self, sink: LogSink) {
        self.state.sink.set(sink);
    }

    fn kind(&self) -> crate::types::EngineKind {
        crate::types::EngineKind::JavaScript
    }

    fn close(&mut self) {
        self.runtime.run_gc();
    }
}

fn exception_parts(value: &JsValue<'_>) -> (String, String) {
    if let Some(obj) = value.as_object() {
        let name: String = obj.get("name").unwrap_or_default();
        let message: String = obj.get("message").unwrap_or_default();
        let full = if name.is_empty() {
            message.clone()
        } else if message.is_empty() {
            name.clone()
        } else {
            format!("{name}: {message}")
        };
        return (name, full);
    }
    let text = value
        .as_string()
        .and_then(|s| s.to_string().ok())
        .unwrap_or_else(|| "unknown error".to_string());
    (String::new(), text)
}

/// Lower a JS value into the engine-neutral model. Functions and other
/// exotic values become nil.
fn js_to_guest(value: &JsValue<'_>) -> GuestValue {
    if value.is_undefined() || value.is_null() {
        return GuestValue::Nil;
    }
    if let Some(b) = value.as_bool() {
        return GuestValue::Bool(b);
    }
    if let Some(i) = value.as_int() {
        return GuestValue::Number(i as f64);
    }
    if let Some(f) = value.as_float() {
        return GuestValue::Number(f);
    }
    if let Some(s) = value.as_string() {
        return GuestValue::String(s.to_string().unwrap_or_default());
    }
    if let Some(arr) = value.as_array() {
        let mut items = Vec::new();
        for item in arr.iter::<JsValue>() {
            match item {
                Ok(v) => items.push(js_to_guest(&v)),
                Err(_) => items.push(GuestValue::Nil),
            }
        }
        return GuestValue::List(items);
    }
    if value.is_function() {
        return GuestValue::Nil;
    }
    if let Some(obj) = value.as_object() {
        let mut map = BTreeMap::new();
        for prop in obj.props::<String, JsValue>() {
            if let Ok((key, val)) = prop {
                map.insert(key, js_to_guest(&val));
            }
        }
        return GuestValue::Map(map);
    }
    GuestValue::Nil
}

fn guest_to_js<'js>(ctx: &Ctx<'js>, value: &GuestValue) -> rquickjs::Result<JsValue<'js>> {
    Ok(match value {
        GuestValue::Nil => JsValue::new_null(ctx.clone()),
        GuestValue::Bool(b) => JsValue::new_bool(ctx.clone(), *b),
        GuestValue::Number(n) => JsValue::new_number(ctx.clone(), *n),
        GuestValue::String(s) => rquickjs::String::from_str(ctx.clone(), s)?.into_value(),
        GuestValue::List(items) => {
            let arr = rquickjs::Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                arr.set(i, guest_to_js(ctx, item)?)?;
            }
            arr.into_value()
        }
        GuestValue::Map(fields) => {
            let obj = Object::new(ctx.clone())?;
            for (key, val) in fields {
                obj.set(key.as_str(), guest_to_js(ctx, val)?)?;
            }
            obj.into_value()
        }
    })
}

impl EngineState {
    fn console_line(&self, level: &str, args: &[JsValue<'_>]) {
        let rendered: Vec<String> = args.iter().map(render_arg).collect();
        self.console_plain_level(level, &rendered.join(" "));
    }

    fn console_plain(&self, text: &str) {
        self.console_plain_level("LOG", text);
    }

    fn console_plain_level(&self, level: &str, text: &str) {
        let pad = "  ".repeat(self.indent.get());
        self.sink
            .emit(&format!("[{level}][{}] {pad}{text}", log_timestamp()));
    }
}

fn render_arg(value: &JsValue<'_>) -> String {
    if let Some(s) = value.as_string() {
        return s.to_string().unwrap_or_default();
    }
    js_to_guest(value)
        .encode_json(&JsonIndent::Compact)
        .unwrap_or_else(|_| "<value>".to_string())
}

fn install_bindings<'js>(ctx: &Ctx<'js>, st: &EngineState) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    bind_console(ctx, &globals, st)?;
    bind_url_lib(ctx, &globals)?;
    bind_unicode_lib(ctx, &globals)?;

    globals.set(
        "parseHtml",
        Func::from(|html: String| DocumentHandle(Document::parse(&html))),
    )?;

    let state = st.clone();
    globals.set(
        "fetch",
        Func::from(
            move |url: String, options: Opt<JsValue<'js>>| -> HostOut<ResponseHandle> {
                let opts = options
                    .0
                    .as_ref()
                    .map(js_to_guest)
                    .unwrap_or(GuestValue::Nil);
                do_fetch(&state, &url, &opts)
            },
        ),
    )?;

    let state = st.clone();
    globals.set(
        "httpGet",
        Func::from(move |url: String| -> HostOut<ResponseHandle> {
            match state.browser.borrow().get(&url) {
                Ok(resp) => HostOut::Value(ResponseHandle {
                    requested: url,
                    resp,
                }),
                Err(e) => HostOut::Thrown(e.to_string()),
            }
        }),
    )?;

    let state = st.clone();
    globals.set(
        "httpPost",
        Func::from(
            move |url: String, data: JsValue<'js>| -> HostOut<ResponseHandle> {
                let data = js_to_guest(&data);
                match state.browser.borrow().post(&url, &data) {
                    Ok(resp) => HostOut::Value(ResponseHandle {
                        requested: url,
                        resp,
                    }),
                    Err(e) => HostOut::Thrown(e.to_string()),
                }
            },
        ),
    )?;

    let state = st.clone();
    globals.set(
        "getUserAgent",
        Func::from(move || -> String { state.browser.borrow().user_agent().to_string() }),
    )?;

    let state = st.clone();
    globals.set(
        "setHeaders",
        Func::from(move |value: JsValue<'js>| {
            if let Some(map) = js_to_guest(&value).as_map() {
                state.browser.borrow_mut().set_headers(string_map(map));
            }
        }),
    )?;

    let state = st.clone();
    globals.set(
        "setCookies",
        Func::from(move |value: JsValue<'js>| {
            if let Some(map) = js_to_guest(&value).as_map() {
                state.browser.borrow_mut().set_cookies(string_map(map));
            }
        }),
    )?;

    let state = st.clone();
    globals.set(
        "setUserAgent",
        Func::from(move |ua: String| {
            state.browser.borrow_mut().set_user_agent(&ua);
        }),
    )?;

    let state = st.clone();
    globals.set(
        "setRandomUserAgent",
        Func::from(move || {
            state.browser.borrow_mut().set_random_user_agent();
        }),
    )?;

    let state = st.clone();
    globals.set(
        "setUaToCurrentRequestUa",
        Func::from(move || -> String { state.browser.borrow_mut().ensure_user_agent() }),
    )?;

    let state = st.clone();
    globals.set(
        "setHttpTimeout",
        Func::from(move |seconds: f64| {
            if seconds.is_finite() && seconds > 0.0 {
                let _ = state
                    .browser
                    .borrow_mut()
                    .set_timeout(Duration::from_secs_f64(seconds));
            }
        }),
    )?;

    let state = st.clone();
    globals.set(
        "setProxy",
        Func::from(move |proxy: String| -> HostOut<()> {
            host_out(state.browser.borrow_mut().set_proxy(&proxy))
        }),
    )?;

    globals.set(
        "sleep",
        Func::from(|millis: u64| {
            std::thread::sleep(Duration::from_millis(millis));
        }),
    )?;

    Ok(())
}

fn string_map(map: &BTreeMap<String, GuestValue>) -> HashMap<String, String> {
    map.iter()
        .filter_map(|(k, v)| v.coerce_string().map(|v| (k.clone(), v)))
        .collect()
}

fn bind_console<'js>(
    ctx: &Ctx<'js>,
    globals: &Object<'js>,
    st: &EngineState,
) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;

    for (name, level) in [
        ("log", "LOG"),
        ("info", "INFO"),
        ("warn", "WARN"),
        ("error", "ERROR"),
        ("debug", "DEBUG"),
        ("trace", "TRACE"),
        ("table", "LOG"),
        ("dir", "LOG"),
    ] {
        let state = st.clone();
        console.set(
            name,
            Func::from(move |args: Rest<JsValue<'js>>| {
                state.console_line(level, &args.0);
            }),
        )?;
    }

    let state = st.clone();
    console.set(
        "time",
        Func::from(move |label: Opt<String>| {
            let label = label.0.unwrap_or_else(|| "default".to_string());
            state.timers.borrow_mut().insert(label, Instant::now());
        }),
    )?;

    let state = st.clone();
    console.set(
        "timeEnd",
        Func::from(move |label: Opt<String>| {
            let label = label.0.unwrap_or_else(|| "default".to_string());
            let elapsed = state.timers.borrow_mut().remove(&label);
            if let Some(start) = elapsed {
                state.console_plain(&format!(
                    "{label}: {:.3}ms",
                    start.elapsed().as_secs_f64() * 1000.0
                ));
            }
        }),
    )?;

    let state = st.clone();
    console.set(
        "count",
        Func::from(move |label: Opt<String>| {
            let label = label.0.unwrap_or_else(|| "default".to_string());
            let mut counters = state.counters.borrow_mut();
            let n = counters.entry(label.clone()).or_insert(0);
            *n += 1;
            let count = *n;
            drop(counters);
            state.console_plain(&format!("{label}: {count}"));
        }),
    )?;

    let state = st.clone();
    console.set(
        "countReset",
        Func::from(move |label: Opt<String>| {
            let label = label.0.unwrap_or_else(|| "default".to_string());
            state.counters.borrow_mut().remove(&label);
        }),
    )?;

    let state = st.clone();
    console.set(
        "assert",
        Func::from(move |args: Rest<JsValue<'js>>| {
            let holds = args.0.first().map(is_truthy).unwrap_or(false);
            if !holds {
                let rest = &args.0[args.0.len().min(1)..];
                let detail: Vec<String> = rest.iter().map(render_arg).collect();
                let mut line = "Assertion failed".to_string();
                if !detail.is_empty() {
                    line.push_str(": ");
                    line.push_str(&detail.join(" "));
                }
                state.console_plain_level("ERROR", &line);
            }
        }),
    )?;

    for name in ["group", "groupCollapsed"] {
        let state = st.clone();
        console.set(
            name,
            Func::from(move |args: Rest<JsValue<'js>>| {
                if !args.0.is_empty() {
                    state.console_line("LOG", &args.0);
                }
                state.indent.set(state.indent.get() + 1);
            }),
        )?;
    }

    let state = st.clone();
    console.set(
        "groupEnd",
        Func::from(move || {
            state.indent.set(state.indent.get().saturating_sub(1));
        }),
    )?;

    let state = st.clone();
    console.set(
        "clear",
        Func::from(move || {
            state.indent.set(0);
        }),
    )?;

    globals.set("console", console)
}

fn is_truthy(value: &JsValue<'_>) -> bool {
    if value.is_undefined() || value.is_null() {
        return false;
    }
    if let Some(b) = value.as_bool() {
        return b;
    }
    if let Some(i) = value.as_int() {
        return i != 0;
    }
    if let Some(f) = value.as_float() {
        return f != 0.0 && !f.is_nan();
    }
    if let Some(s) = value.as_string() {
        return !s.to_string().unwrap_or_default().is_empty();
    }
    true
}

fn bind_url_lib<'js>(ctx: &Ctx<'js>, globals: &Object<'js>) -> rquickjs::Result<()> {
    let lib = Object::new(ctx.clone())?;

    lib.set(
        "encode",
        Func::from(|text: String| urlencoding::encode(&text).into_owned()),
    )?;

    lib.set(
        "decode",
        Func::from(|text: String| -> HostOut<String> {
            match urlencoding::decode(&text) {
                Ok(s) => HostOut::Value(s.into_owned()),
                Err(e) => HostOut::Thrown(format!("url decode failed: {e}")),
            }
        }),
    )?;

    lib.set(
        "parse",
        Func::from(|text: String| -> HostOut<ParsedUrl> {
            match url::Url::parse(&text) {
                Ok(parsed) => HostOut::Value(ParsedUrl(parsed)),
                Err(e) => HostOut::Thrown(format!("invalid url: {e}")),
            }
        }),
    )?;

    lib.set(
        "resolve",
        Func::from(|base: String, rel: String| -> HostOut<String> {
            let base = match url::Url::parse(&base) {
                Ok(base) => base,
                Err(e) => return HostOut::Thrown(format!("invalid base url: {e}")),
            };
            match base.join(&rel) {
                Ok(joined) => HostOut::Value(joined.to_string()),
                Err(e) => HostOut::Thrown(format!("invalid url: {e}")),
            }
        }),
    )?;

    lib.set(
        "build",
        Func::from(|parts: JsValue<'js>| -> String {
            let parts = js_to_guest(&parts);
            let scheme = parts
                .get("scheme")
                .coerce_string()
                .unwrap_or_else(|| "https".to_string());
            let host = parts.get("host").coerce_string().unwrap_or_default();
            let path = parts.get("path").coerce_string().unwrap_or_default();
            let query = parts.get("query").coerce_string().unwrap_or_default();
            let fragment = parts.get("fragment").coerce_string().unwrap_or_default();
            let mut out = format!("{scheme}://{host}");
            if !path.is_empty() {
                if !path.starts_with('/') {
                    out.push('/');
                }
                out.push_str(&path);
            }
            if !query.is_empty() {
                out.push('?');
                out.push_str(&query);
            }
            if !fragment.is_empty() {
                out.push('#');
                out.push_str(&fragment);
            }
            out
        }),
    )?;

    globals.set("url", lib)
}

fn bind_unicode_lib<'js>(ctx: &Ctx<'js>, globals: &Object<'js>) -> rquickjs::Result<()> {
    let lib = Object::new(ctx.clone())?;

    lib.set("encode", Func::from(|text: String| unicode_encode(&text)))?;
    lib.set("decode", Func::from(|text: String| unicode_decode(&text)))?;
    lib.set(
        "isAscii",
        Func::from(|text: String| text.is_ascii()),
    )?;
    lib.set(
        "length",
        Func::from(|text: String| text.chars().count() as i32),
    )?;

    globals.set("unicode", lib)
}

/// Escape every non-ASCII character as `\uXXXX` UTF-16 units.
fn unicode_encode(input: &str) -> String {
    let mut out = String::new();
    for c in input.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf).iter() {
                out.push_str(&format!("\\u{unit:04X}"));
            }
        }
    }
    out
}

/// Inverse of [`unicode_encode`]. Consecutive escapes are decoded as one
/// UTF-16 run so surrogate pairs survive.
fn unicode_decode(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::new();
    let mut units: Vec<u16> = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 5 < chars.len() && chars[i + 1] == 'u' {
            let hex: String = chars[i + 2..i + 6].iter().collect();
            if let Ok(unit) = u16::from_str_radix(&hex, 16) {
                units.push(unit);
                i += 6;
                continue;
            }
        }
        if !units.is_empty() {
            out.push_str(&String::from_utf16_lossy(&units));
            units.clear();
        }
        out.push(chars[i]);
        i += 1;
    }
    if !units.is_empty() {
        out.push_str(&String::from_utf16_lossy(&units));
    }
    out
}

fn do_fetch(st: &EngineState, url: &str, opts: &GuestValue) -> HostOut<ResponseHandle> {
    let method = opts
        .get("method")
        .coerce_string()
        .unwrap_or_else(|| "GET".to_string());

    let mut headers = HashMap::new();
    if let Some(map) = opts.get("headers").as_map() {
        for (key, val) in map {
            if let Some(val) = val.coerce_string() {
                headers.insert(key.clone(), val);
            }
        }
    }

    let body = match opts.get("body") {
        GuestValue::Nil => None,
        GuestValue::String(text) => Some(text.clone().into_bytes()),
        structured @ (GuestValue::Map(_) | GuestValue::List(_)) => {
            if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                headers.insert("Content-Type".to_string(), "application/json".to_string());
            }
            match structured.encode_json(&JsonIndent::Compact) {
                Ok(text) => Some(text.into_bytes()),
                Err(e) => return HostOut::Thrown(e.to_string()),
            }
        }
        scalar => scalar.coerce_string().map(String::into_bytes),
    };

    let timeout = opts
        .get("timeout")
        .as_f64()
        .filter(|ms| *ms > 0.0)
        .map(|ms| Duration::from_millis(ms as u64));

    let redirect = opts
        .get("redirect")
        .coerce_string()
        .unwrap_or_else(|| "follow".to_string());
    let follow_redirects = match redirect.as_str() {
        "manual" | "error" => Some(false),
        _ => None,
    };

    let resp = match st.browser.borrow().request(
        url,
        &RequestOptions {
            method,
            headers,
            body,
            timeout,
            follow_redirects,
        },
    ) {
        Ok(resp) => resp,
        Err(e) => return HostOut::Thrown(e.to_string()),
    };

    if redirect == "error" && resp.is_redirect() {
        return HostOut::Thrown(format!("fetch redirected with status {}", resp.status));
    }

    HostOut::Value(ResponseHandle {
        requested: url.to_string(),
        resp,
    })
}

fn status_text(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

/// A fetched response waiting to be lowered into a script object.
struct ResponseHandle {
    requested: String,
    resp: Response,
}

/// A parsed document handed to scripts.
struct DocumentHandle(Document);

/// A node set handed to scripts.
struct SelectionHandle(Selection);

/// A decoded JSON body, lowered via the guest bridge.
struct JsonBody(GuestValue);

/// Raw response bytes, lowered as an ArrayBuffer.
struct BodyBuffer(Vec<u8>);

impl<'js> IntoJs<'js> for JsonBody {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<JsValue<'js>> {
        guest_to_js(ctx, &self.0)
    }
}

impl<'js> IntoJs<'js> for BodyBuffer {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<JsValue<'js>> {
        rquickjs::ArrayBuffer::new(ctx.clone(), self.0)?.into_js(ctx)
    }
}

/// Decomposed URL parts, lowered as a plain object.
struct ParsedUrl(url::Url);

impl<'js> IntoJs<'js> for ParsedUrl {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<JsValue<'js>> {
        let obj = Object::new(ctx.clone())?;
        obj.set("scheme", self.0.scheme())?;
        obj.set("host", self.0.host_str().unwrap_or(""))?;
        match self.0.port() {
            Some(port) => obj.set("port", port as i32)?,
            None => obj.set("port", JsValue::new_null(ctx.clone()))?,
        }
        obj.set("path", self.0.path())?;
        obj.set("query", self.0.query().unwrap_or(""))?;
        obj.set("fragment", self.0.fragment().unwrap_or(""))?;
        Ok(obj.into_value())
    }
}

impl<'js> IntoJs<'js> for ResponseHandle {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<JsValue<'js>> {
        let ResponseHandle { requested, resp } = self;
        let obj = Object::new(ctx.clone())?;
        obj.set("status", resp.status as i32)?;
        obj.set("statusText", status_text(resp.status))?;
        obj.set("ok", resp.is_success())?;
        obj.set("url", resp.url.clone())?;
        obj.set(
            "redirected",
            !resp.url.is_empty()
                && resp.url.trim_end_matches('/') != requested.trim_end_matches('/'),
        )?;
        if resp.is_redirect() {
            if let Some(location) = resp.header("location") {
                obj.set("location", location.to_string())?;
            }
        }

        let lower: HashMap<String, String> = resp
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();

        let headers = Object::new(ctx.clone())?;
        {
            let map = lower.clone();
            headers.set(
                "get",
                Func::from(move |name: String| -> Option<String> {
                    map.get(&name.to_ascii_lowercase()).cloned()
                }),
            )?;
        }
        {
            let map = lower.clone();
            headers.set(
                "has",
                Func::from(move |name: String| map.contains_key(&name.to_ascii_lowercase())),
            )?;
        }
        {
            let map = lower.clone();
            headers.set(
                "keys",
                Func::from(move || -> Vec<String> {
                    let mut keys: Vec<String> = map.keys().cloned().collect();
                    keys.sort();
                    keys
                }),
            )?;
        }
        {
            let map = lower.clone();
            headers.set(
                "values",
                Func::from(move || -> Vec<String> {
                    let mut keys: Vec<&String> = map.keys().collect();
                    keys.sort();
                    keys.iter().filter_map(|k| map.get(*k).cloned()).collect()
                }),
            )?;
        }
        {
            let map = lower.clone();
            headers.set(
                "entries",
                Func::from(move || -> Vec<Vec<String>> {
                    let mut entries: Vec<Vec<String>> = map
                        .iter()
                        .map(|(k, v)| vec![k.clone(), v.clone()])
                        .collect();
                    entries.sort();
                    entries
                }),
            )?;
        }
        {
            let map = lower;
            headers.set(
                "forEach",
                Func::from(move |cb: Function<'js>| -> rquickjs::Result<()> {
                    for (key, val) in &map {
                        cb.call::<_, ()>((val.clone(), key.clone()))?;
                    }
                    Ok(())
                }),
            )?;
        }
        obj.set("headers", headers)?;

        let cookies = Object::new(ctx.clone())?;
        for (key, val) in &resp.cookies {
            cookies.set(key.as_str(), val.clone())?;
        }
        obj.set("cookies", cookies)?;

        let body = Rc::new(resp.body);
        {
            let body = Rc::clone(&body);
            obj.set(
                "text",
                Func::from(move || -> String { String::from_utf8_lossy(&body).into_owned() }),
            )?;
        }
        {
            let body = Rc::clone(&body);
            obj.set(
                "json",
                Func::from(move || -> HostOut<JsonBody> {
                    let text = String::from_utf8_lossy(&body);
                    match GuestValue::decode_json(&text) {
                        Ok(value) => HostOut::Value(JsonBody(value)),
                        Err(e) => HostOut::Thrown(format!("invalid json body: {e}")),
                    }
                }),
            )?;
        }
        {
            let body = Rc::clone(&body);
            obj.set(
                "arrayBuffer",
                Func::from(move || -> BodyBuffer { BodyBuffer(body.as_ref().clone()) }),
            )?;
        }

        Ok(obj.into_value())
    }
}

impl<'js> IntoJs<'js> for DocumentHandle {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<JsValue<'js>> {
        let obj = Object::new(ctx.clone())?;

        for name in ["select", "querySelectorAll"] {
            let doc = self.0.clone();
            obj.set(
                name,
                Func::from(move |css: String| -> HostOut<SelectionHandle> {
                    host_out(doc.select(&css).map(SelectionHandle))
                }),
            )?;
        }

        for name in ["selectOne", "querySelector"] {
            let doc = self.0.clone();
            obj.set(
                name,
                Func::from(move |css: String| -> HostOut<SelectionHandle> {
                    host_out(doc.select_one(&css).map(SelectionHandle))
                }),
            )?;
        }

        {
            let doc = self.0.clone();
            obj.set(
                "text",
                Func::from(move || -> String { doc.text().trim().to_string() }),
            )?;
        }
        {
            let doc = self.0;
            obj.set("html", Func::from(move || -> String { doc.html() }))?;
        }

        Ok(obj.into_value())
    }
}

impl<'js> IntoJs<'js> for SelectionHandle {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<JsValue<'js>> {
        let obj = Object::new(ctx.clone())?;
        obj.set("length", self.0.len() as i32)?;

        for name in ["select", "querySelectorAll"] {
            let sel = self.0.clone();
            obj.set(
                name,
                Func::from(move |css: String| -> HostOut<SelectionHandle> {
                    host_out(sel.select(&css).map(SelectionHandle))
                }),
            )?;
        }

        for name in ["selectOne", "querySelector"] {
            let sel = self.0.clone();
            obj.set(
                name,
                Func::from(move |css: String| -> HostOut<SelectionHandle> {
                    host_out(sel.select_one(&css).map(SelectionHandle))
                }),
            )?;
        }

        for name in ["text", "innerText"] {
            let sel = self.0.clone();
            obj.set(
                name,
                Func::from(move || -> String { sel.text().trim().to_string() }),
            )?;
        }
        for name in ["html", "innerHTML"] {
            let sel = self.0.clone();
            obj.set(name, Func::from(move || -> String { sel.html() }))?;
        }
        for name in ["attr", "getAttribute"] {
            let sel = self.0.clone();
            obj.set(
                name,
                Func::from(move |attr: String| -> Option<String> { sel.attr(&attr) }),
            )?;
        }

        for (name, op) in [
            ("first", 0usize),
            ("parent", 1),
            ("children", 2),
            ("next", 3),
            ("prev", 4),
        ] {
            let sel = self.0.clone();
            obj.set(
                name,
                Func::from(move || -> SelectionHandle {
                    SelectionHandle(match op {
                        0 => sel.first(),
                        1 => sel.parent(),
                        2 => sel.children(),
                        3 => sel.next(),
                        _ => sel.prev(),
                    })
                }),
            )?;
        }

        {
            let sel = self.0.clone();
            obj.set(
                "eq",
                Func::from(move |index: i32| -> SelectionHandle {
                    SelectionHandle(sel.eq(index as isize))
                }),
            )?;
        }

        {
            let sel = self.0;
            obj.set(
                "each",
                Func::from(move |cb: Function<'js>| -> rquickjs::Result<()> {
                    for (i, item) in sel.iter().enumerate() {
                        cb.call::<_, ()>((SelectionHandle(item), i as i32))?;
                    }
                    Ok(())
                }),
            )?;
        }

        Ok(obj.into_value())
    }
}
