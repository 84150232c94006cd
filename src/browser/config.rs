use std::collections::HashMap;
use std::time::Duration;

use super::user_agent::random_user_agent;

/// Settings for the scripted HTTP browser.
///
/// An empty `user_agent` means "not pinned": each client rebuild draws a
/// fresh one from the pool.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub proxy: String,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub follow_redirects: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        BrowserConfig {
            timeout: Duration::from_secs(30),
            user_agent: String::new(),
            proxy: String::new(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            follow_redirects: true,
        }
    }
}

impl BrowserConfig {
    /// Defaults that pass for an ordinary desktop browser: pooled user
    /// agent plus the header set real browsers send on navigation.
    pub fn realistic() -> Self {
        let mut config = BrowserConfig {
            user_agent: random_user_agent().to_string(),
            ..Default::default()
        };
        config.headers.insert(
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
                .to_string(),
        );
        config
            .headers
            .insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());
        config
            .headers
            .insert("Accept-Encoding".to_string(), "gzip, deflate".to_string());
        config
            .headers
            .insert("Connection".to_string(), "keep-alive".to_string());
        config.headers.insert(
            "Upgrade-Insecure-Requests".to_string(),
            "1".to_string(),
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrowserConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert!(config.follow_redirects);
        assert!(config.user_agent.is_empty());
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_realistic_config_has_browser_headers() {
        let config = BrowserConfig::realistic();
        assert!(!config.user_agent.is_empty());
        assert!(config.headers.contains_key("Accept"));
        assert_eq!(
            config.headers.get("Accept-Encoding").map(String::as_str),
            Some("gzip, deflate")
        );
    }
}
