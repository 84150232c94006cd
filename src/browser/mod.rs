//! Scripted HTTP browser.
//!
//! The fetch surface every engine binding goes through: persistent headers
//! and cookies, retrying GETs, proxy support and transparent decompression.

pub mod config;
pub mod response;
pub mod user_agent;

pub use config::BrowserConfig;
pub use response::Response;
pub use user_agent::{random_user_agent, FALLBACK_USER_AGENT};

use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::redirect::Policy;
use reqwest::Method;
use tracing::{debug, warn};

use crate::errors::{Result, ScriptHostError};
use crate::value::{GuestValue, JsonIndent};

/// Per-request overrides for [`Browser::request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub follow_redirects: Option<bool>,
}

/// Blocking HTTP client with browser-like persistent state.
#[derive(Debug)]
pub struct Browser {
    client: Client,
    config: BrowserConfig,
}

impl Browser {
    pub fn new(config: BrowserConfig) -> Result<Self> {
        let client = build_client(&config, None, None)?;
        Ok(Browser { client, config })
    }

    /// Browser with realistic defaults and a pooled user agent.
    pub fn with_defaults() -> Result<Self> {
        Browser::new(BrowserConfig::realistic())
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// GET with retries. Only transport failures are retried; any HTTP
    /// status, including 5xx, counts as a completed request.
    pub fn get(&self, url: &str) -> Result<Response> {
        let attempts = self.config.max_retries + 1;
        let mut last_err = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                std::thread::sleep(self.config.retry_delay);
                debug!(url, attempt, "retrying GET");
            }
            match self.execute(&self.client, Method::GET, url, None, &HashMap::new()) {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    warn!(url, attempt, %err, "GET attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ScriptHostError::Http("request failed".to_string())))
    }

    /// POST a value as JSON. POSTs are never retried since the server may
    /// have acted on a request whose response was lost.
    pub fn post(&self, url: &str, data: &GuestValue) -> Result<Response> {
        let body = data.encode_json(&JsonIndent::Compact)?;
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        self.execute(
            &self.client,
            Method::POST,
            url,
            Some(body.into_bytes()),
            &headers,
        )
    }

    /// Arbitrary request with per-call overrides. No retries.
    pub fn request(&self, url: &str, opts: &RequestOptions) -> Result<Response> {
        let method = if opts.method.is_empty() {
            Method::GET
        } else {
            Method::from_bytes(opts.method.to_ascii_uppercase().as_bytes())
                .map_err(|_| ScriptHostError::Http(format!("invalid method: {}", opts.method)))?
        };

        // Timeout or redirect overrides need a dedicated client.
        if opts.timeout.is_some() || opts.follow_redirects.is_some() {
            let client = build_client(&self.config, opts.timeout, opts.follow_redirects)?;
            return self.execute(&client, method, url, opts.body.clone(), &opts.headers);
        }
        self.execute(&self.client, method, url, opts.body.clone(), &opts.headers)
    }

    fn execute(
        &self,
        client: &Client,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        extra_headers: &HashMap<String, String>,
    ) -> Result<Response> {
        let mut builder = client.request(method, url);

        if !self.config.user_agent.is_empty() {
            builder = builder.header("User-Agent", &self.config.user_agent);
        }
        for (name, value) in &self.config.headers {
            builder = builder.header(name, value);
        }
        if !self.config.cookies.is_empty() {
            builder = builder.header("Cookie", cookie_header(&self.config.cookies));
        }
        // Per-request headers win over persistent ones.
        for (name, value) in extra_headers {
            builder = builder.header(name, value);
        }
        if let Some(bytes) = body {
            builder = builder.body(bytes);
        }

        let resp = builder.send().map_err(ScriptHostError::http)?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let headers = flatten_headers(resp.headers());
        let cookies = parse_set_cookies(resp.headers());
        let raw = resp.bytes().map_err(ScriptHostError::http)?.to_vec();

        let encoding = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-encoding"))
            .map(|(_, v)| v.as_str());
        let body = response::decompress_body(encoding, raw)
            .map_err(|e| ScriptHostError::Http(format!("decompress failed: {e}")))?;

        Ok(Response {
            status,
            url: final_url,
            headers,
            cookies,
            body,
        })
    }

    /// Merge headers into the persistent set. Existing names are replaced,
    /// others are untouched.
    pub fn set_headers(&mut self, headers: HashMap<String, String>) {
        self.config.headers.extend(headers);
    }

    /// Merge cookies into the persistent jar.
    pub fn set_cookies(&mut self, cookies: HashMap<String, String>) {
        self.config.cookies.extend(cookies);
    }

    /// Pin the user agent. Updates both the config field and the
    /// persistent `User-Agent` header so both observation paths agree.
    pub fn set_user_agent(&mut self, user_agent: &str) {
        self.config.user_agent = user_agent.to_string();
        self.config
            .headers
            .insert("User-Agent".to_string(), user_agent.to_string());
    }

    pub fn set_random_user_agent(&mut self) {
        self.set_user_agent(random_user_agent());
    }

    /// The user agent requests will carry; pins a random one first if none
    /// is set, so the answer stays true for subsequent requests.
    pub fn ensure_user_agent(&mut self) -> String {
        if self.config.user_agent.is_empty() {
            self.set_random_user_agent();
        }
        self.config.user_agent.clone()
    }

    pub fn user_agent(&self) -> &str {
        &self.config.user_agent
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub fn follow_redirects(&self) -> bool {
        self.config.follow_redirects
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.config.timeout = timeout;
        self.client = build_client(&self.config, None, None)?;
        Ok(())
    }

    pub fn set_proxy(&mut self, proxy: &str) -> Result<()> {
        self.config.proxy = proxy.to_string();
        self.client = build_client(&self.config, None, None)?;
        Ok(())
    }

    pub fn set_follow_redirects(&mut self, follow: bool) -> Result<()> {
        self.config.follow_redirects = follow;
        self.client = build_client(&self.config, None, None)?;
        Ok(())
    }

    /// The underlying client holds no external resources beyond its
    /// connection pool, which drops with it.
    pub fn close(self) {}
}

fn build_client(
    config: &BrowserConfig,
    timeout_override: Option<Duration>,
    redirect_override: Option<bool>,
) -> Result<Client> {
    let follow = redirect_override.unwrap_or(config.follow_redirects);
    let mut builder = Client::builder()
        .timeout(timeout_override.unwrap_or(config.timeout))
        .redirect(if follow {
            Policy::limited(10)
        } else {
            Policy::none()
        });

    if !config.proxy.is_empty() {
        let proxy = reqwest::Proxy::all(&config.proxy)
            .map_err(|e| ScriptHostError::InvalidProxy(e.to_string()))?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(ScriptHostError::http)
}

fn cookie_header(cookies: &HashMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (name, value) in headers {
        if let Ok(text) = value.to_str() {
            out.entry(name.as_str().to_string())
                .or_insert_with(|| text.to_string());
        }
    }
    out
}

fn parse_set_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for value in headers.get_all(SET_COOKIE) {
        let Ok(text) = value.to_str() else { continue };
        let pair = text.split(';').next().unwrap_or("");
        if let Some((name, val)) = pair.split_once('=') {
            out.insert(name.trim().to_string(), val.trim().to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_headers_and_cookies() {
        let mut browser = Browser::new(BrowserConfig::default()).unwrap();
        let mut first = HashMap::new();
        first.insert("X-Token".to_string(), "aaa".to_string());
        first.insert("X-Keep".to_string(), "yes".to_string());
        browser.set_headers(first);

        let mut second = HashMap::new();
        second.insert("X-Token".to_string(), "bbb".to_string());
        browser.set_headers(second);

        assert_eq!(
            browser.config().headers.get("X-Token").map(String::as_str),
            Some("bbb")
        );
        assert_eq!(
            browser.config().headers.get("X-Keep").map(String::as_str),
            Some("yes")
        );

        let mut jar = HashMap::new();
        jar.insert("sid".to_string(), "123".to_string());
        browser.set_cookies(jar);
        let mut jar = HashMap::new();
        jar.insert("sid".to_string(), "456".to_string());
        jar.insert("lang".to_string(), "en".to_string());
        browser.set_cookies(jar);
        assert_eq!(
            browser.config().cookies.get("sid").map(String::as_str),
            Some("456")
        );
        assert_eq!(browser.config().cookies.len(), 2);
    }

    #[test]
    fn test_set_user_agent_updates_header_too() {
        let mut browser = Browser::new(BrowserConfig::default()).unwrap();
        browser.set_user_agent("TestAgent/1.0");
        assert_eq!(browser.user_agent(), "TestAgent/1.0");
        assert_eq!(
            browser.config().headers.get("User-Agent").map(String::as_str),
            Some("TestAgent/1.0")
        );
    }

    #[test]
    fn test_ensure_user_agent_pins_when_unset() {
        let mut browser = Browser::new(BrowserConfig::default()).unwrap();
        assert!(browser.user_agent().is_empty());
        let ua = browser.ensure_user_agent();
        assert!(!ua.is_empty());
        assert_eq!(browser.user_agent(), ua);
        // Second call returns the pinned one, not a new draw.
        assert_eq!(browser.ensure_user_agent(), ua);
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let mut config = BrowserConfig::default();
        config.proxy = "not a proxy url".to_string();
        match Browser::new(config) {
            Err(ScriptHostError::InvalidProxy(_)) => {}
            other => panic!("expected InvalidProxy, got {other:?}"),
        }
    }

    #[test]
    fn test_cookie_header_format() {
        let mut cookies = HashMap::new();
        cookies.insert("a".to_string(), "1".to_string());
        let header = cookie_header(&cookies);
        assert_eq!(header, "a=1");
    }

    #[test]
    fn test_get_unreachable_host_errors() {
        let mut config = BrowserConfig::default();
        config.max_retries = 0;
        config.timeout = Duration::from_millis(300);
        let browser = Browser::new(config).unwrap();
        match browser.get("http://127.0.0.1:1/") {
            Err(ScriptHostError::Http(_)) => {}
            other => panic!("expected Http error, got {other:?}"),
        }
    }
}
