use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::value::GuestValue;

/// Which embedded engine runs a source's script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Lua,
    JavaScript,
}

impl EngineKind {
    /// Numeric code used in stored source records: 0 = Lua, 1 = JavaScript.
    pub fn code(self) -> u8 {
        match self {
            EngineKind::Lua => 0,
            EngineKind::JavaScript => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(EngineKind::Lua),
            1 => Some(EngineKind::JavaScript),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Lua => write!(f, "lua"),
            EngineKind::JavaScript => write!(f, "javascript"),
        }
    }
}

impl Serialize for EngineKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for EngineKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        EngineKind::from_code(code)
            .ok_or_else(|| D::Error::custom(format!("unknown engine kind: {code}")))
    }
}

/// A scriptable site: where it lives and the script that drives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSource {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub engine_kind: EngineKind,
    pub script_text: String,
    #[serde(default)]
    pub status: SiteStatus,
}

/// Operational status of a site source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SiteStatus {
    Disabled,
    #[default]
    Normal,
    Maintenance,
    Unavailable,
}

impl SiteStatus {
    pub fn code(self) -> u8 {
        match self {
            SiteStatus::Disabled => 0,
            SiteStatus::Normal => 1,
            SiteStatus::Maintenance => 2,
            SiteStatus::Unavailable => 3,
        }
    }
}

impl Serialize for SiteStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for SiteStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match i64::deserialize(deserializer)? {
            0 => Ok(SiteStatus::Disabled),
            1 => Ok(SiteStatus::Normal),
            2 => Ok(SiteStatus::Maintenance),
            3 => Ok(SiteStatus::Unavailable),
            other => Err(D::Error::custom(format!("unknown site status: {other}"))),
        }
    }
}

/// One row of a search-results page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub cover: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub actor: String,
    pub director: String,
    pub release_date: String,
    pub region: String,
    pub language: String,
    pub description: String,
    pub score: String,
}

/// Full metadata for a single title, including its playable sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailResult {
    pub cover: String,
    pub name: String,
    pub url: String,
    pub actor: String,
    pub director: String,
    pub release_date: String,
    pub region: String,
    pub language: String,
    pub description: String,
    pub score: String,
    pub source: Vec<SourceItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub name: String,
    pub episodes: Vec<EpisodeItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeItem {
    pub name: String,
    pub url: String,
}

/// Resolved playable stream for one episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayResult {
    pub video_url: String,
}

fn field(value: &GuestValue, key: &str) -> String {
    value.get(key).coerce_string().unwrap_or_default()
}

impl SearchResult {
    /// Lenient extraction: missing or non-scalar fields become "".
    pub fn from_guest(value: &GuestValue) -> Self {
        SearchResult {
            cover: field(value, "cover"),
            name: field(value, "name"),
            kind: field(value, "type"),
            url: field(value, "url"),
            actor: field(value, "actor"),
            director: field(value, "director"),
            release_date: field(value, "release_date"),
            region: field(value, "region"),
            language: field(value, "language"),
            description: field(value, "description"),
            score: field(value, "score"),
        }
    }
}

impl DetailResult {
    pub fn from_guest(value: &GuestValue) -> Self {
        let source = value
            .get("source")
            .as_list()
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.as_map().is_some())
                    .map(SourceItem::from_guest)
                    .collect()
            })
            .unwrap_or_default();

        DetailResult {
            cover: field(value, "cover"),
            name: field(value, "name"),
            url: field(value, "url"),
            actor: field(value, "actor"),
            director: field(value, "director"),
            release_date: field(value, "release_date"),
            region: field(value, "region"),
            language: field(value, "language"),
            description: field(value, "description"),
            score: field(value, "score"),
            source,
        }
    }
}

impl SourceItem {
    fn from_guest(value: &GuestValue) -> Self {
        let episodes = value
            .get("episodes")
            .as_list()
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.as_map().is_some())
                    .map(|item| EpisodeItem {
                        name: field(item, "name"),
                        url: field(item, "url"),
                    })
                    .collect()
            })
            .unwrap_or_default();

        SourceItem {
            name: field(value, "name"),
            episodes,
        }
    }
}

impl PlayResult {
    pub fn from_guest(value: &GuestValue) -> Self {
        PlayResult {
            video_url: field(value, "video_url"),
        }
    }
}

/// Validate a search entry point's data payload: list entries that are not
/// maps are dropped, everything else is coerced field by field.
pub fn validate_search(data: &GuestValue) -> Vec<SearchResult> {
    match data {
        GuestValue::List(items) => items
            .iter()
            .filter(|item| item.as_map().is_some())
            .map(SearchResult::from_guest)
            .collect(),
        GuestValue::Map(_) => vec![SearchResult::from_guest(data)],
        _ => Vec::new(),
    }
}

pub fn validate_detail(data: &GuestValue) -> Option<DetailResult> {
    data.as_map().map(|_| DetailResult::from_guest(data))
}

pub fn validate_play(data: &GuestValue) -> Option<PlayResult> {
    data.as_map().map(|_| PlayResult::from_guest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::GuestValue;

    #[test]
    fn test_engine_kind_codes() {
        assert_eq!(EngineKind::from_code(0), Some(EngineKind::Lua));
        assert_eq!(EngineKind::from_code(1), Some(EngineKind::JavaScript));
        assert_eq!(EngineKind::from_code(7), None);
        assert_eq!(EngineKind::JavaScript.code(), 1);
    }

    #[test]
    fn test_validate_search_coerces_and_drops() {
        let data = GuestValue::decode_json(
            r#"[{"name":"Movie","score":8.5,"url":"/v/1"},"junk",{"name":"Other"}]"#,
        )
        .unwrap();
        let results = validate_search(&data);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "Movie");
        assert_eq!(results[0].score, "8.5");
        assert_eq!(results[0].cover, "");
        assert_eq!(results[1].name, "Other");
    }

    #[test]
    fn test_validate_detail_nested_sources() {
        let data = GuestValue::decode_json(
            r#"{"name":"Movie","source":[{"name":"HD","episodes":[{"name":"E1","url":"/p/1"},{"name":"E2","url":"/p/2"}]}]}"#,
        )
        .unwrap();
        let detail = validate_detail(&data).unwrap();
        assert_eq!(detail.name, "Movie");
        assert_eq!(detail.source.len(), 1);
        assert_eq!(detail.source[0].episodes[1].url, "/p/2");
    }

    #[test]
    fn test_validate_play_requires_map() {
        let data = GuestValue::decode_json(r#"{"video_url":"https://cdn/x.m3u8"}"#).unwrap();
        assert_eq!(
            validate_play(&data).unwrap().video_url,
            "https://cdn/x.m3u8"
        );
        assert!(validate_play(&GuestValue::string("nope")).is_none());
    }

    #[test]
    fn test_search_result_type_field_rename() {
        let row = SearchResult {
            kind: "movie".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("\"type\":\"movie\""));
    }
}
