//! Lua engine binding.
//!
//! Host calls that fail return the Lua convention `(nil, errmsg)` rather
//! than raising, so scripts can branch on failures. Filesystem and process
//! primitives are replaced with stubs that log a security notice.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

use chrono::{Datelike, Local, TimeZone, Timelike};
use mlua::{Lua, MultiValue, UserData, UserDataMethods, Value};

use crate::browser::{Browser, RequestOptions};
use crate::dom::{Document, Selection};
use crate::errors::{Result, ScriptHostError};
use crate::value::{GuestValue, JsonIndent};

use super::{log_timestamp, response_to_guest, security_message, LogSink, OutputSink, ScriptEngine};

pub struct LuaEngine {
    lua: Lua,
    sink: OutputSink,
    exit_flag: Rc<Cell<bool>>,
}

fn lua_err(err: mlua::Error) -> ScriptHostError {
    ScriptHostError::Runtime(err.to_string())
}

impl LuaEngine {
    pub fn new(browser: Browser) -> Result<Self> {
        let lua = Lua::new();
        let sink = OutputSink::default();
        let exit_flag = Rc::new(Cell::new(false));
        let browser = Rc::new(RefCell::new(browser));

        register_host_api(&lua, &browser, &sink).map_err(lua_err)?;
        install_sandbox(&lua, &sink, &exit_flag).map_err(lua_err)?;

        Ok(LuaEngine {
            lua,
            sink,
            exit_flag,
        })
    }
}

impl ScriptEngine for LuaEngine {
    fn execute(&mut self, script: &str) -> Result<BTreeMap<String, GuestValue>> {
        self.exit_flag.set(false);

        let func = self
            .lua
            .load(script)
            .set_name("script")
            .into_function()
            .map_err(|e| match &e {
                mlua::Error::SyntaxError { message, .. } => {
                    ScriptHostError::Compile(message.clone())
                }
                _ => ScriptHostError::Compile(e.to_string()),
            })?;

        match func.call::<_, Value>(()) {
            Ok(value) => {
                if self.exit_flag.get() {
                    return Ok(BTreeMap::new());
                }
                match lua_to_guest(&value).map_err(lua_err)? {
                    GuestValue::Map(map) => Ok(map),
                    _ => Ok(BTreeMap::new()),
                }
            }
            Err(err) => {
                // os.exit surfaces as a raised error; treat it as a clean end.
                if self.exit_flag.get() {
                    return Ok(BTreeMap::new());
                }
                Err(ScriptHostError::Runtime(err.to_string()))
            }
        }
    }

    fn set_log_sink(&mut self, sink: LogSink) {
        self.sink.set(sink);
    }

    fn kind(&self) -> crate::types::EngineKind {
        crate::types::EngineKind::Lua
    }

    fn close(&mut self) {
        let _ = self.lua.gc_collect();
    }
}

/// Lower a Lua value into the engine-neutral model.
///
/// A table becomes a list only when its keys are exactly the integer
/// sequence 1..=n; any other key, and the whole table lowers to a map.
/// The empty table is a map.
fn lua_to_guest(value: &Value) -> mlua::Result<GuestValue> {
    Ok(match value {
        Value::Nil => GuestValue::Nil,
        Value::Boolean(b) => GuestValue::Bool(*b),
        Value::Integer(i) => GuestValue::Number(*i as f64),
        Value::Number(n) => GuestValue::Number(*n),
        Value::String(s) => GuestValue::String(s.to_string_lossy().into_owned()),
        Value::Table(table) => {
            let mut entries = Vec::new();
            for pair in table.clone().pairs::<Value, Value>() {
                let (key, val) = pair?;
                entries.push((key, lua_to_guest(&val)?));
            }
            // Table keys are unique, so n keys all in 1..=n are the full
            // sequence.
            let n = entries.len();
            let sequential = n > 0
                && entries
                    .iter()
                    .all(|(key, _)| matches!(key, Value::Integer(i) if *i >= 1 && *i as usize <= n));
            if sequential {
                entries.sort_by_key(|(key, _)| match key {
                    Value::Integer(i) => *i,
                    _ => 0,
                });
                GuestValue::List(entries.into_iter().map(|(_, val)| val).collect())
            } else {
                let mut map = BTreeMap::new();
                for (key, val) in entries {
                    if let Some(key) = scalar_key(&key) {
                        map.insert(key, val);
                    }
                }
                GuestValue::Map(map)
            }
        }
        _ => GuestValue::Nil,
    })
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_string_lossy().into_owned()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(format!("{n}")),
        Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

fn guest_to_lua<'lua>(lua: &'lua Lua, value: &GuestValue) -> mlua::Result<Value<'lua>> {
    Ok(match value {
        GuestValue::Nil => Value::Nil,
        GuestValue::Bool(b) => Value::Boolean(*b),
        GuestValue::Number(n) => Value::Number(*n),
        GuestValue::String(s) => Value::String(lua.create_string(s)?),
        GuestValue::List(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.set(i + 1, guest_to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
        GuestValue::Map(fields) => {
            let table = lua.create_table()?;
            for (key, val) in fields {
                table.set(key.as_str(), guest_to_lua(lua, val)?)?;
            }
            Value::Table(table)
        }
    })
}

/// How a value renders in print/log output.
fn display_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => format!("{n}"),
        Value::String(s) => s.to_string_lossy().into_owned(),
        Value::Table(_) => lua_to_guest(value)
            .ok()
            .and_then(|g| g.encode_json(&JsonIndent::Compact).ok())
            .unwrap_or_else(|| "table".to_string()),
        Value::Function(_) => "function".to_string(),
        Value::UserData(_) => "userdata".to_string(),
        other => other.type_name().to_string(),
    }
}

fn joined(args: &MultiValue) -> String {
    args.iter()
        .map(display_value)
        .collect::<Vec<_>>()
        .join(" ")
}

struct LuaDocument(Document);
struct LuaSelection(Selection);

impl UserData for LuaDocument {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("select", |_, this, css: String| {
            match this.0.select(&css) {
                Ok(sel) => Ok((Some(LuaSelection(sel)), None)),
                Err(e) => Ok((None, Some(e.to_string()))),
            }
        });
        methods.add_method("select_one", |_, this, css: String| {
            match this.0.select_one(&css) {
                Ok(sel) => Ok((Some(LuaSelection(sel)), None)),
                Err(e) => Ok((None, Some(e.to_string()))),
            }
        });
        methods.add_method("text", |_, this, ()| Ok(this.0.text()));
        methods.add_method("html", |_, this, ()| Ok(this.0.html()));
    }
}

impl UserData for LuaSelection {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("select", |_, this, css: String| {
            match this.0.select(&css) {
                Ok(sel) => Ok((Some(LuaSelection(sel)), None)),
                Err(e) => Ok((None, Some(e.to_string()))),
            }
        });
        methods.add_method("select_one", |_, this, css: String| {
            match this.0.select_one(&css) {
                Ok(sel) => Ok((Some(LuaSelection(sel)), None)),
                Err(e) => Ok((None, Some(e.to_string()))),
            }
        });
        methods.add_method("text", |_, this, ()| Ok(this.0.text()));
        methods.add_method("html", |_, this, ()| Ok(this.0.html()));
        methods.add_method("attr", |_, this, name: String| {
            match this.0.attr(&name) {
                Some(value) => Ok((Some(value), None)),
                None => Ok((None, Some("attribute not found".to_string()))),
            }
        });
        methods.add_method("len", |_, this, ()| Ok(this.0.len()));
        methods.add_method("first", |_, this, ()| Ok(LuaSelection(this.0.first())));
        methods.add_method("eq", |_, this, index: isize| {
            Ok(LuaSelection(this.0.eq(index)))
        });
        methods.add_method("parent", |_, this, ()| Ok(LuaSelection(this.0.parent())));
        methods.add_method("children", |_, this, ()| {
            Ok(LuaSelection(this.0.children()))
        });
        methods.add_method("next", |_, this, ()| Ok(LuaSelection(this.0.next())));
        methods.add_method("prev", |_, this, ()| Ok(LuaSelection(this.0.prev())));
    }
}

fn register_host_api(
    lua: &Lua,
    browser: &Rc<RefCell<Browser>>,
    sink: &OutputSink,
) -> mlua::Result<()> {
    let globals = lua.globals();

    let out = sink.clone();
    globals.set(
        "print",
        lua.create_function(move |_, args: MultiValue| {
            out.emit(&format!("[PRINT][{}] {}", log_timestamp(), joined(&args)));
            Ok(())
        })?,
    )?;

    let out = sink.clone();
    globals.set(
        "log",
        lua.create_function(move |_, args: MultiValue| {
            out.emit(&format!("[LOG][{}] {}", log_timestamp(), joined(&args)));
            Ok(())
        })?,
    )?;

    let b = Rc::clone(browser);
    globals.set(
        "http_get",
        lua.create_function(move |lua, url: String| match b.borrow().get(&url) {
            Ok(resp) => Ok((guest_to_lua(lua, &response_to_guest(&resp))?, None)),
            Err(e) => Ok((Value::Nil, Some(e.to_string()))),
        })?,
    )?;

    let b = Rc::clone(browser);
    globals.set(
        "http_post",
        lua.create_function(move |lua, (url, body): (String, Value)| {
            let outcome = match &body {
                Value::Table(_) => match lua_to_guest(&body) {
                    Ok(data) => b.borrow().post(&url, &data),
                    Err(e) => Err(ScriptHostError::Runtime(e.to_string())),
                },
                Value::String(text) => {
                    let mut headers = HashMap::new();
                    headers.insert("Content-Type".to_string(), "text/plain".to_string());
                    b.borrow().request(
                        &url,
                        &RequestOptions {
                            method: "POST".to_string(),
                            headers,
                            body: Some(text.as_bytes().to_vec()),
                            ..Default::default()
                        },
                    )
                }
                _ => Err(ScriptHostError::Http(
                    "http_post body must be a table or string".to_string(),
                )),
            };
            match outcome {
                Ok(resp) => Ok((guest_to_lua(lua, &response_to_guest(&resp))?, None)),
                Err(e) => Ok((Value::Nil, Some(e.to_string()))),
            }
        })?,
    )?;

    globals.set(
        "parse_html",
        lua.create_function(|_, html: String| {
            Ok((Some(LuaDocument(Document::parse(&html))), None::<String>))
        })?,
    )?;

    globals.set(
        "json_encode",
        lua.create_function(|_, (value, opt): (Value, Option<Value>)| {
            let indent = match opt {
                None | Some(Value::Nil) | Some(Value::Boolean(false)) => JsonIndent::Compact,
                Some(Value::Boolean(true)) => JsonIndent::Spaces(2),
                Some(Value::Integer(n)) => JsonIndent::Spaces(n.max(0) as usize),
                Some(Value::Number(n)) => JsonIndent::Spaces(n.max(0.0) as usize),
                Some(Value::String(s)) => JsonIndent::Custom(s.to_string_lossy().into_owned()),
                Some(_) => JsonIndent::Compact,
            };
            match lua_to_guest(&value) {
                Ok(guest) => match guest.encode_json(&indent) {
                    Ok(text) => Ok((Some(text), None)),
                    Err(e) => Ok((None, Some(e.to_string()))),
                },
                Err(e) => Ok((None, Some(e.to_string()))),
            }
        })?,
    )?;

    globals.set(
        "json_decode",
        lua.create_function(|lua, text: String| match GuestValue::decode_json(&text) {
            Ok(value) => Ok((guest_to_lua(lua, &value)?, None)),
            Err(e) => Ok((Value::Nil, Some(e.to_string()))),
        })?,
    )?;

    let b = Rc::clone(browser);
    globals.set(
        "set_headers",
        lua.create_function(move |_, headers: HashMap<String, String>| {
            b.borrow_mut().set_headers(headers);
            Ok(())
        })?,
    )?;

    let b = Rc::clone(browser);
    globals.set(
        "set_cookies",
        lua.create_function(move |_, cookies: HashMap<String, String>| {
            b.borrow_mut().set_cookies(cookies);
            Ok(())
        })?,
    )?;

    let b = Rc::clone(browser);
    globals.set(
        "set_user_agent",
        lua.create_function(move |_, ua: String| {
            b.borrow_mut().set_user_agent(&ua);
            Ok(())
        })?,
    )?;

    let b = Rc::clone(browser);
    globals.set(
        "set_random_user_agent",
        lua.create_function(move |_, ()| {
            b.borrow_mut().set_random_user_agent();
            Ok(())
        })?,
    )?;

    let b = Rc::clone(browser);
    globals.set(
        "get_user_agent",
        lua.create_function(move |_, ()| Ok(b.borrow().user_agent().to_string()))?,
    )?;

    let b = Rc::clone(browser);
    globals.set(
        "set_ua_to_current_request_ua",
        lua.create_function(move |_, ()| Ok(b.borrow_mut().ensure_user_agent()))?,
    )?;

    let b = Rc::clone(browser);
    globals.set(
        "set_timeout",
        lua.create_function(move |_, seconds: f64| {
            let seconds = if seconds.is_finite() && seconds > 0.0 {
                seconds
            } else {
                30.0
            };
            match b.borrow_mut().set_timeout(Duration::from_secs_f64(seconds)) {
                Ok(()) => Ok((Some(true), None)),
                Err(e) => Ok((None, Some(e.to_string()))),
            }
        })?,
    )?;

    let b = Rc::clone(browser);
    globals.set(
        "set_proxy",
        lua.create_function(move |_, proxy: String| {
            match b.borrow_mut().set_proxy(&proxy) {
                Ok(()) => Ok((Some(true), None)),
                Err(e) => Ok((None, Some(e.to_string()))),
            }
        })?,
    )?;

    globals.set(
        "sleep",
        lua.create_function(|_, millis: u64| {
            std::thread::sleep(Duration::from_millis(millis));
            Ok(())
        })?,
    )?;

    globals.set(
        "split",
        lua.create_function(|lua, (text, sep): (String, String)| {
            let parts: Vec<String> = if sep.is_empty() {
                text.chars().map(|c| c.to_string()).collect()
            } else {
                text.split(&sep).map(str::to_string).collect()
            };
            lua.create_sequence_from(parts)
        })?,
    )?;

    globals.set(
        "trim",
        lua.create_function(|_, text: String| Ok(text.trim().to_string()))?,
    )?;

    Ok(())
}

/// Replace filesystem and process access with logging stubs and a reduced
/// os table.
fn install_sandbox(lua: &Lua, sink: &OutputSink, exit_flag: &Rc<Cell<bool>>) -> mlua::Result<()> {
    let globals = lua.globals();

    let io = lua.create_table()?;
    for name in [
        "open", "popen", "close", "read", "write", "flush", "lines", "input", "output", "tmpfile",
    ] {
        io.set(name, disabled_function(lua, sink, format!("io.{name}"))?)?;
    }
    globals.set("io", io)?;

    let package = lua.create_table()?;
    for name in ["loadlib", "searchpath", "seeall"] {
        package.set(name, disabled_function(lua, sink, format!("package.{name}"))?)?;
    }
    globals.set("package", package)?;

    for name in ["require", "dofile", "loadfile"] {
        globals.set(name, disabled_function(lua, sink, name.to_string())?)?;
    }

    let os = lua.create_table()?;
    os.set(
        "time",
        lua.create_function(|_, spec: Option<mlua::Table>| {
            let now = Local::now();
            let Some(spec) = spec else {
                return Ok(now.timestamp());
            };
            let year: i32 = spec.get("year").unwrap_or(now.year());
            let month: u32 = spec.get("month").unwrap_or(now.month());
            let day: u32 = spec.get("day").unwrap_or(now.day());
            let hour: u32 = spec.get("hour").unwrap_or(now.hour());
            let min: u32 = spec.get("min").unwrap_or(now.minute());
            let sec: u32 = spec.get("sec").unwrap_or(now.second());
            Ok(Local
                .with_ymd_and_hms(year, month, day, hour, min, sec)
                .single()
                .map(|t| t.timestamp())
                .unwrap_or_else(|| now.timestamp()))
        })?,
    )?;
    os.set(
        "date",
        lua.create_function(|lua, (fmt, stamp): (Option<String>, Option<i64>)| {
            let time = match stamp {
                Some(secs) => Local
                    .timestamp_opt(secs, 0)
                    .single()
                    .unwrap_or_else(Local::now),
                None => Local::now(),
            };
            let fmt = fmt.unwrap_or_default();
            if fmt == "*t" || fmt == "!*t" {
                let table = lua.create_table()?;
                table.set("year", time.year())?;
                table.set("month", time.month())?;
                table.set("day", time.day())?;
                table.set("hour", time.hour())?;
                table.set("min", time.minute())?;
                table.set("sec", time.second())?;
                // Lua convention: Sunday is 1.
                table.set("wday", time.weekday().num_days_from_sunday() + 1)?;
                table.set("yday", time.ordinal())?;
                return Ok(Value::Table(table));
            }
            let text = time.format("%Y-%m-%d %H:%M:%S").to_string();
            Ok(Value::String(lua.create_string(&text)?))
        })?,
    )?;
    os.set(
        "clock",
        lua.create_function(|_, ()| {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default();
            Ok(now.as_secs_f64())
        })?,
    )?;
    let flag = Rc::clone(exit_flag);
    os.set(
        "exit",
        lua.create_function(move |_, _code: Option<i64>| -> mlua::Result<()> {
            flag.set(true);
            Err(mlua::Error::RuntimeError("os.exit".to_string()))
        })?,
    )?;
    for name in ["execute", "remove", "rename", "tmpname", "getenv", "setlocale"] {
        os.set(name, disabled_function(lua, sink, format!("os.{name}"))?)?;
    }
    globals.set("os", os)?;

    Ok(())
}

fn disabled_function<'lua>(
    lua: &'lua Lua,
    sink: &OutputSink,
    full_name: String,
) -> mlua::Result<mlua::Function<'lua>> {
    let out = sink.clone();
    lua.create_function(move |_, _args: MultiValue| {
        out.emit(&format!(
            "[SECURITY][{}] blocked call to disabled function '{full_name}'",
            log_timestamp()
        ));
        Ok((Value::Nil, security_message(&full_name)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserConfig;
    use crate::engine::test_support::CaptureSink;

    fn engine() -> LuaEngine {
        LuaEngine::new(Browser::new(BrowserConfig::default()).unwrap()).unwrap()
    }

    #[test]
    fn test_returns_table_as_map() {
        let mut eng = engine();
        let out = eng
            .execute("return { name = \"x\", count = 3, ok = true }")
            .unwrap();
        assert_eq!(out.get("name"), Some(&GuestValue::string("x")));
        assert_eq!(out.get("count"), Some(&GuestValue::Number(3.0)));
        assert_eq!(out.get("ok"), Some(&GuestValue::Bool(true)));
    }

    #[test]
    fn test_no_return_is_empty_map() {
        let mut eng = engine();
        assert!(eng.execute("local x = 1").unwrap().is_empty());
    }

    #[test]
    fn test_non_table_return_is_empty_map() {
        let mut eng = engine();
        assert!(eng.execute("return 42").unwrap().is_empty());
    }

    #[test]
    fn test_array_table_lowered_as_list() {
        let mut eng = engine();
        let out = eng.execute("return { items = { 1, 2, 3 } }").unwrap();
        assert_eq!(
            out.get("items"),
            Some(&GuestValue::List(vec![
                GuestValue::Number(1.0),
                GuestValue::Number(2.0),
                GuestValue::Number(3.0),
            ]))
        );
    }

    #[test]
    fn test_mixed_table_lowered_as_map() {
        let mut eng = engine();
        let out = eng
            .execute("return { mixed = { 1, 2, label = \"x\" } }")
            .unwrap();
        let mixed = out.get("mixed").and_then(GuestValue::as_map).unwrap();
        assert_eq!(mixed.get("1"), Some(&GuestValue::Number(1.0)));
        assert_eq!(mixed.get("2"), Some(&GuestValue::Number(2.0)));
        assert_eq!(mixed.get("label"), Some(&GuestValue::string("x")));
    }

    #[test]
    fn test_sparse_table_lowered_as_map() {
        let mut eng = engine();
        let out = eng
            .execute("local t = {}; t[1] = \"a\"; t[3] = \"b\"; return { sparse = t }")
            .unwrap();
        let sparse = out.get("sparse").and_then(GuestValue::as_map).unwrap();
        assert_eq!(sparse.get("1"), Some(&GuestValue::string("a")));
        assert_eq!(sparse.get("3"), Some(&GuestValue::string("b")));
    }

    #[test]
    fn test_empty_table_lowered_as_map() {
        let mut eng = engine();
        let out = eng.execute("return { empty = {} }").unwrap();
        assert_eq!(out.get("empty"), Some(&GuestValue::Map(BTreeMap::new())));
    }

    #[test]
    fn test_syntax_error_is_compile() {
        let mut eng = engine();
        assert!(matches!(
            eng.execute("return {{{"),
            Err(ScriptHostError::Compile(_))
        ));
    }

    #[test]
    fn test_raised_error_is_runtime() {
        let mut eng = engine();
        match eng.execute("error(\"boom\")") {
            Err(ScriptHostError::Runtime(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected Runtime, got {other:?}"),
        }
    }

    #[test]
    fn test_print_goes_to_sink() {
        let mut eng = engine();
        let capture = CaptureSink::default();
        eng.set_log_sink(capture.sink());
        eng.execute("print(\"hello\", 42)").unwrap();
        let lines = capture.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("[PRINT]["));
        assert!(lines[0].ends_with("hello 42"));
    }

    #[test]
    fn test_log_line_format() {
        let mut eng = engine();
        let capture = CaptureSink::default();
        eng.set_log_sink(capture.sink());
        eng.execute("log({ a = 1 })").unwrap();
        let lines = capture.lines();
        assert!(lines[0].starts_with("[LOG]["));
        assert!(lines[0].contains(r#"{"a":1.0}"#));
    }

    #[test]
    fn test_io_is_stubbed_with_security_notice() {
        let mut eng = engine();
        let capture = CaptureSink::default();
        eng.set_log_sink(capture.sink());
        let out = eng
            .execute(
                r#"
                local f, err = io.open("/etc/passwd")
                return { opened = f ~= nil, err = err }
                "#,
            )
            .unwrap();
        assert_eq!(out.get("opened"), Some(&GuestValue::Bool(false)));
        assert_eq!(
            out.get("err").and_then(|v| v.as_str().map(str::to_string)),
            Some(security_message("io.open"))
        );
        assert!(capture
            .lines()
            .iter()
            .any(|l| l.starts_with("[SECURITY][") && l.contains("io.open")));
    }

    #[test]
    fn test_require_is_stubbed() {
        let mut eng = engine();
        let out = eng
            .execute("local m, err = require(\"socket\") return { err = err }")
            .unwrap();
        assert_eq!(
            out.get("err").and_then(|v| v.as_str().map(str::to_string)),
            Some(security_message("require"))
        );
    }

    #[test]
    fn test_safe_os_subset() {
        let mut eng = engine();
        let out = eng
            .execute(
                r#"
                local t = os.date("*t")
                local _, execErr = os.execute("ls")
                return { year = t.year, wday = t.wday, ts = os.time(), execErr = execErr }
                "#,
            )
            .unwrap();
        assert!(out.get("year").and_then(GuestValue::as_f64).unwrap() >= 2024.0);
        let wday = out.get("wday").and_then(GuestValue::as_f64).unwrap();
        assert!((1.0..=7.0).contains(&wday));
        assert!(out.get("ts").and_then(GuestValue::as_f64).unwrap() > 0.0);
        assert_eq!(
            out.get("execErr").and_then(|v| v.as_str().map(str::to_string)),
            Some(security_message("os.execute"))
        );
    }

    #[test]
    fn test_os_exit_ends_cleanly() {
        let mut eng = engine();
        let out = eng.execute("os.exit() return { unreachable = true }").unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_json_round_trip_in_script() {
        let mut eng = engine();
        let out = eng
            .execute(
                r#"
                local encoded, err1 = json_encode({ name = "x", list = { 1, 2 } })
                local decoded, err2 = json_decode(encoded)
                return { name = decoded.name, second = decoded.list[2] }
                "#,
            )
            .unwrap();
        assert_eq!(out.get("name"), Some(&GuestValue::string("x")));
        assert_eq!(out.get("second"), Some(&GuestValue::Number(2.0)));
    }

    #[test]
    fn test_json_decode_bad_input_errors() {
        let mut eng = engine();
        let out = eng
            .execute("local v, err = json_decode(\"{oops\") return { failed = v == nil and err ~= nil }")
            .unwrap();
        assert_eq!(out.get("failed"), Some(&GuestValue::Bool(true)));
    }

    #[test]
    fn test_string_helpers() {
        let mut eng = engine();
        let out = eng
            .execute(
                r#"
                local parts = split("a,b,c", ",")
                return { n = #parts, first = parts[1], trimmed = trim("  hi  ") }
                "#,
            )
            .unwrap();
        assert_eq!(out.get("n"), Some(&GuestValue::Number(3.0)));
        assert_eq!(out.get("first"), Some(&GuestValue::string("a")));
        assert_eq!(out.get("trimmed"), Some(&GuestValue::string("hi")));
    }

    #[test]
    fn test_dom_api_from_script() {
        let mut eng = engine();
        let out = eng
            .execute(
                r#"
                local doc = parse_html('<div class="item"><a href="/v/1">First</a></div><div class="item">Second</div>')
                local items, err = doc:select(".item")
                local link = items:select_one("a")
                local href, aerr = link:attr("href")
                local missing, merr = doc:select_one(".nope")
                return { count = items:len(), href = href, text = link:text(), missErr = merr }
                "#,
            )
            .unwrap();
        assert_eq!(out.get("count"), Some(&GuestValue::Number(2.0)));
        assert_eq!(out.get("href"), Some(&GuestValue::string("/v/1")));
        assert_eq!(out.get("text"), Some(&GuestValue::string("First")));
        assert_eq!(
            out.get("missErr").and_then(|v| v.as_str().map(str::to_string)),
            Some("no element found".to_string())
        );
    }

    #[test]
    fn test_set_ua_to_current_request_ua_returns_value() {
        let mut eng = engine();
        let out = eng
            .execute("return { ua = set_ua_to_current_request_ua(), current = get_user_agent() }")
            .unwrap();
        let ua = out.get("ua").and_then(|v| v.as_str().map(str::to_string)).unwrap();
        assert!(ua.starts_with("Mozilla/5.0"));
        assert_eq!(out.get("current"), out.get("ua"));
    }

    #[test]
    fn test_http_get_unreachable_returns_error_pair() {
        let mut config = BrowserConfig::default();
        config.max_retries = 0;
        config.timeout = Duration::from_millis(300);
        let mut eng = LuaEngine::new(Browser::new(config).unwrap()).unwrap();
        let out = eng
            .execute(
                r#"
                local resp, err = http_get("http://127.0.0.1:1/")
                return { failed = resp == nil and err ~= nil }
                "#,
            )
            .unwrap();
        assert_eq!(out.get("failed"), Some(&GuestValue::Bool(true)));
    }
}
