//! Entry-point call harness.
//!
//! Site scripts define well-known functions; the harness appends a small
//! wrapper that calls one of them with a single string argument and
//! normalizes the outcome to a `{ data, err }` map, then validates the data
//! payload into the typed result shapes.

use tracing::instrument;

use crate::browser::Browser;
use crate::engine::{new_engine, ScriptEngine};
use crate::errors::{Result, ScriptHostError};
use crate::types::{
    validate_detail, validate_play, validate_search, DetailResult, EngineKind, PlayResult,
    SearchResult, SiteSource,
};
use crate::value::GuestValue;

/// The functions a site script is expected to define.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    SearchVideo,
    GetVideoDetail,
    GetPlayVideoDetail,
}

impl EntryPoint {
    pub fn name(self) -> &'static str {
        match self {
            EntryPoint::SearchVideo => "search_video",
            EntryPoint::GetVideoDetail => "get_video_detail",
            EntryPoint::GetPlayVideoDetail => "get_play_video_detail",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "search_video" => Ok(EntryPoint::SearchVideo),
            "get_video_detail" => Ok(EntryPoint::GetVideoDetail),
            "get_play_video_detail" => Ok(EntryPoint::GetPlayVideoDetail),
            other => Err(ScriptHostError::UnsupportedEntryPoint(other.to_string())),
        }
    }
}

impl std::fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Validated outcome of one harness call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Search(Vec<SearchResult>),
    Detail(DetailResult),
    Play(PlayResult),
}

/// Append the engine-appropriate wrapper that invokes `entry` with `arg`
/// and yields `{ data, err }` as the script's terminal value.
pub fn wrap_script(kind: EngineKind, script: &str, entry: EntryPoint, arg: &str) -> String {
    match kind {
        EngineKind::Lua => format!(
            "{script}\n\nlocal __data, __err = {entry}({arg})\nreturn {{ data = __data, err = __err }}\n",
            entry = entry.name(),
            arg = lua_string_literal(arg),
        ),
        EngineKind::JavaScript => format!(
            "{script}\n\nvar __ret = (function() {{ try {{ var r = {entry}({arg}); return {{ data: r, err: null }}; }} catch (e) {{ return {{ data: null, err: String(e) }}; }} }})();\n__ret;\n",
            entry = entry.name(),
            arg = js_string_literal(arg),
        ),
    }
}

fn lua_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn js_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Run one entry point on an already constructed engine and return the
/// `data` payload. A non-empty `err` in the terminal map wins over data.
pub fn invoke_with(
    engine: &mut dyn ScriptEngine,
    script: &str,
    entry: EntryPoint,
    arg: &str,
) -> Result<GuestValue> {
    let wrapped = wrap_script(engine.kind(), script, entry, arg);
    let mut ret = engine.execute(&wrapped)?;

    match ret.get("err") {
        Some(GuestValue::String(msg)) if !msg.is_empty() => {
            return Err(ScriptHostError::ScriptReported(msg.clone()));
        }
        Some(GuestValue::Nil) | None => {}
        Some(other) => {
            if let Some(msg) = other.coerce_string() {
                return Err(ScriptHostError::ScriptReported(msg));
            }
        }
    }

    Ok(ret.remove("data").unwrap_or(GuestValue::Nil))
}

/// Run one entry point of a site source on a fresh engine.
#[instrument(skip(site), fields(site = %site.id, entry = %entry.name()))]
pub fn invoke(site: &SiteSource, entry: EntryPoint, arg: &str) -> Result<GuestValue> {
    let browser = Browser::with_defaults()?;
    let mut engine = new_engine(site.engine_kind, browser)?;
    let result = invoke_with(engine.as_mut(), &site.script_text, entry, arg);
    engine.close();
    result
}

/// [`invoke`] plus result-shape validation.
pub fn invoke_validated(site: &SiteSource, entry: EntryPoint, arg: &str) -> Result<CallOutcome> {
    let data = invoke(site, entry, arg)?;
    outcome_for(entry, &data)
}

pub fn outcome_for(entry: EntryPoint, data: &GuestValue) -> Result<CallOutcome> {
    match entry {
        EntryPoint::SearchVideo => Ok(CallOutcome::Search(validate_search(data))),
        EntryPoint::GetVideoDetail => validate_detail(data)
            .map(CallOutcome::Detail)
            .ok_or_else(|| {
                ScriptHostError::Validation("detail result is not an object".to_string())
            }),
        EntryPoint::GetPlayVideoDetail => validate_play(data)
            .map(CallOutcome::Play)
            .ok_or_else(|| {
                ScriptHostError::Validation("play result is not an object".to_string())
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserConfig;
    use crate::engine::lua::LuaEngine;

    fn lua_engine() -> LuaEngine {
        LuaEngine::new(Browser::new(BrowserConfig::default()).unwrap()).unwrap()
    }

    fn js_engine() -> crate::engine::js::JsEngine {
        crate::engine::js::JsEngine::new(Browser::new(BrowserConfig::default()).unwrap()).unwrap()
    }

    const LUA_SITE: &str = r#"
function search_video(keyword)
    return {
        { name = "Result for " .. keyword, url = "/v/1", score = 8.5 },
    }, nil
end

function get_video_detail(url)
    return {
        name = "Title",
        url = url,
        source = { { name = "HD", episodes = { { name = "E1", url = "/p/1" } } } },
    }, nil
end

function get_play_video_detail(url)
    if url == "" then
        return nil, "empty url"
    end
    return { video_url = "https://cdn/stream.m3u8" }, nil
end
"#;

    const JS_SITE: &str = r#"
function search_video(keyword) {
    return [{ name: "Result for " + keyword, url: "/v/1", score: 8.5 }];
}

function get_video_detail(url) {
    return {
        name: "Title",
        url: url,
        source: [{ name: "HD", episodes: [{ name: "E1", url: "/p/1" }] }]
    };
}

function get_play_video_detail(url) {
    if (url === "") {
        throw new Error("empty url");
    }
    return { video_url: "https://cdn/stream.m3u8" };
}
"#;

    #[test]
    fn test_entry_point_names() {
        assert_eq!(EntryPoint::SearchVideo.name(), "search_video");
        assert_eq!(
            EntryPoint::parse("get_play_video_detail").unwrap(),
            EntryPoint::GetPlayVideoDetail
        );
        assert!(matches!(
            EntryPoint::parse("nope"),
            Err(ScriptHostError::UnsupportedEntryPoint(_))
        ));
    }

    #[test]
    fn test_wrap_script_lua_shape() {
        let wrapped = wrap_script(EngineKind::Lua, "-- body", EntryPoint::SearchVideo, "hero");
        assert!(wrapped.starts_with("-- body\n"));
        assert!(wrapped.contains("local __data, __err = search_video(\"hero\")"));
        assert!(wrapped.contains("return { data = __data, err = __err }"));
    }

    #[test]
    fn test_wrap_script_js_shape() {
        let wrapped = wrap_script(
            EngineKind::JavaScript,
            "// body",
            EntryPoint::GetVideoDetail,
            "/v/1",
        );
        assert!(wrapped.contains("get_video_detail(\"/v/1\")"));
        assert!(wrapped.contains("catch (e)"));
        assert!(wrapped.trim_end().ends_with("__ret;"));
    }

    #[test]
    fn test_argument_escaping() {
        let lua = wrap_script(
            EngineKind::Lua,
            "",
            EntryPoint::SearchVideo,
            "he said \"hi\"\nline2\\end",
        );
        assert!(lua.contains(r#"search_video("he said \"hi\"\nline2\\end")"#));
        let js = wrap_script(
            EngineKind::JavaScript,
            "",
            EntryPoint::SearchVideo,
            "a\"b\\c\nd",
        );
        assert!(js.contains(r#"search_video("a\"b\\c\nd")"#));
    }

    #[test]
    fn test_invoke_lua_search() {
        let mut eng = lua_engine();
        let data = invoke_with(&mut eng, LUA_SITE, EntryPoint::SearchVideo, "hero").unwrap();
        let results = validate_search(&data);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Result for hero");
        assert_eq!(results[0].score, "8.5");
        assert_eq!(results[0].cover, "");
    }

    #[test]
    fn test_invoke_js_search() {
        let mut eng = js_engine();
        let data = invoke_with(&mut eng, JS_SITE, EntryPoint::SearchVideo, "hero").unwrap();
        let results = validate_search(&data);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Result for hero");
    }

    #[test]
    fn test_invoke_detail_both_engines() {
        let mut lua = lua_engine();
        let data = invoke_with(&mut lua, LUA_SITE, EntryPoint::GetVideoDetail, "/v/1").unwrap();
        let detail = validate_detail(&data).unwrap();
        assert_eq!(detail.url, "/v/1");
        assert_eq!(detail.source[0].episodes[0].url, "/p/1");

        let mut js = js_engine();
        let data = invoke_with(&mut js, JS_SITE, EntryPoint::GetVideoDetail, "/v/1").unwrap();
        let detail = validate_detail(&data).unwrap();
        assert_eq!(detail.source[0].name, "HD");
    }

    #[test]
    fn test_script_error_propagates_lua() {
        let mut eng = lua_engine();
        match invoke_with(&mut eng, LUA_SITE, EntryPoint::GetPlayVideoDetail, "") {
            Err(ScriptHostError::ScriptReported(msg)) => assert_eq!(msg, "empty url"),
            other => panic!("expected ScriptReported, got {other:?}"),
        }
    }

    #[test]
    fn test_script_error_propagates_js() {
        let mut eng = js_engine();
        match invoke_with(&mut eng, JS_SITE, EntryPoint::GetPlayVideoDetail, "") {
            Err(ScriptHostError::ScriptReported(msg)) => {
                assert!(msg.contains("empty url"));
            }
            other => panic!("expected ScriptReported, got {other:?}"),
        }
    }

    #[test]
    fn test_play_outcome() {
        let mut eng = lua_engine();
        let data =
            invoke_with(&mut eng, LUA_SITE, EntryPoint::GetPlayVideoDetail, "/p/1").unwrap();
        match outcome_for(EntryPoint::GetPlayVideoDetail, &data).unwrap() {
            CallOutcome::Play(play) => assert_eq!(play.video_url, "https://cdn/stream.m3u8"),
            other => panic!("expected Play, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_entry_point_is_runtime_error() {
        let mut eng = lua_engine();
        let outcome = invoke_with(&mut eng, "-- empty", EntryPoint::SearchVideo, "x");
        // Lua raises "attempt to call a nil value" from the wrapper.
        assert!(matches!(outcome, Err(ScriptHostError::Runtime(_))));
    }

    #[test]
    fn test_validation_rejects_non_map_detail() {
        let bad = GuestValue::string("not a map");
        assert!(matches!(
            outcome_for(EntryPoint::GetVideoDetail, &bad),
            Err(ScriptHostError::Validation(_))
        ));
    }
}
