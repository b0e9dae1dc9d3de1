//! Run file loading and validation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::error::{PbenchError, Result};
use crate::profile::LoadProfile;

/// Top-level run file.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub settings: ToolSettings,
    pub execution: ExecutionConfig,
}

/// Where the load generator lives and where its files go.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ToolSettings {
    #[serde(default = "default_tool_path")]
    pub path: PathBuf,
    /// Directory holding the generator's loadable modules.
    #[serde(default)]
    pub modules_path: Option<PathBuf>,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            path: default_tool_path(),
            modules_path: None,
            artifacts_dir: default_artifacts_dir(),
        }
    }
}

fn default_tool_path() -> PathBuf {
    PathBuf::from("phantom")
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

/// Load shape plus the scenario it drives.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecutionConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    #[serde(default)]
    pub throughput: f64,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub ramp_up: Duration,
    #[serde(default = "default_hold_for", deserialize_with = "deserialize_hold_for")]
    pub hold_for: Option<Duration>,
    #[serde(default)]
    pub steps: u32,
    #[serde(default)]
    pub iterations: Option<u64>,
    pub scenario: ScenarioConfig,
}

fn default_concurrency() -> u32 {
    1
}

fn default_hold_for() -> Option<Duration> {
    Some(Duration::ZERO)
}

impl ExecutionConfig {
    pub fn load_profile(&self) -> LoadProfile {
        LoadProfile {
            concurrency: self.concurrency,
            throughput: self.throughput,
            ramp_up: self.ramp_up,
            hold_for: self.hold_for,
            steps: self.steps,
            iterations: self.iterations,
        }
    }
}

/// Requests to fire and the defaults they share.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScenarioConfig {
    /// Base address for requests whose URL has no host, e.g. `http://localhost:8080`.
    #[serde(default)]
    pub default_address: Option<String>,
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    #[serde(default)]
    pub headers: OrderedPairs,
    #[serde(default)]
    pub requests: Vec<RequestEntry>,
    /// Pre-built test case file used instead of `requests`.
    #[serde(default)]
    pub script: Option<PathBuf>,
    #[serde(default = "default_log_responses")]
    pub log_responses: String,
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_log_responses() -> String {
    "proto_warning".to_string()
}

/// A request given either as a bare URL or as a full description.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RequestEntry {
    Url(String),
    Full(RequestSpec),
}

impl RequestEntry {
    pub fn into_spec(self) -> RequestSpec {
        match self {
            Self::Url(url) => RequestSpec {
                url,
                ..RequestSpec::default()
            },
            Self::Full(spec) => spec,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestSpec {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub headers: OrderedPairs,
    #[serde(default)]
    pub body: Option<RequestBody>,
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self {
            url: "/".to_string(),
            method: default_method(),
            label: None,
            headers: OrderedPairs::default(),
            body: None,
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// Request body: raw text or an ordered parameter mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RequestBody {
    Text(String),
    Params(OrderedPairs),
}

/// A mapping that keeps declaration order, with scalar values stringified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedPairs(pub Vec<(String, String)>);

impl OrderedPairs {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OrderedPairs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for OrderedPairs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = OrderedPairs;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of names to scalar values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
                let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, Scalar>()? {
                    pairs.push((key, value.to_string()));
                }
                Ok(OrderedPairs(pairs))
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(OrderedPairs::default())
            }
        }

        deserializer.deserialize_any(PairsVisitor)
    }
}

/// Duration as written in a run file: bare seconds or a suffixed string.
#[derive(Deserialize)]
#[serde(untagged)]
enum DurationSpec {
    Seconds(u64),
    FractionalSeconds(f64),
    Text(String),
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    match DurationSpec::deserialize(deserializer)? {
        DurationSpec::Seconds(s) => Ok(Duration::from_secs(s)),
        DurationSpec::FractionalSeconds(s) => seconds(s).map_err(de::Error::custom),
        DurationSpec::Text(text) => parse_duration(&text).map_err(de::Error::custom),
    }
}

fn deserialize_hold_for<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error> {
    match Option::<DurationSpec>::deserialize(deserializer)? {
        None => Ok(Some(Duration::ZERO)),
        Some(DurationSpec::Text(text)) if is_unbounded(&text) => Ok(None),
        Some(DurationSpec::Text(text)) => parse_duration(&text).map(Some).map_err(de::Error::custom),
        Some(DurationSpec::Seconds(s)) => Ok(Some(Duration::from_secs(s))),
        Some(DurationSpec::FractionalSeconds(s)) if s == f64::INFINITY => Ok(None),
        Some(DurationSpec::FractionalSeconds(s)) => seconds(s).map(Some).map_err(de::Error::custom),
    }
}

/// Non-negative, representable seconds.
fn seconds(secs: f64) -> Result<Duration> {
    if secs < 0.0 {
        return Err(PbenchError::InvalidConfig(format!(
            "duration must be non-negative, got {}",
            secs
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| {
        PbenchError::InvalidConfig(format!("duration of {} seconds is out of range", secs))
    })
}

fn is_unbounded(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "inf" | "infinite" | "forever"
    )
}

/// Parse `"90"`, `"15s"`, `"250ms"`, `"1m"`, `"1h30m"` style durations.
/// A bare number is seconds.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return Err(PbenchError::InvalidConfig("empty duration".to_string()));
    }
    if let Ok(secs) = text.parse::<f64>() {
        return seconds(secs);
    }

    let invalid = || PbenchError::InvalidConfig(format!("invalid duration '{}'", text));
    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let secs = match unit {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            "d" => value * 86400.0,
            _ => return Err(invalid()),
        };
        total = total.checked_add(seconds(secs)?).ok_or_else(|| {
            PbenchError::InvalidConfig(format!("duration '{}' is out of range", text))
        })?;
    }
    Ok(total)
}

impl RunConfig {
    /// Load configuration from YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: RunConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let execution = &self.execution;
        if execution.concurrency == 0 {
            return Err(PbenchError::InvalidConfig(
                "concurrency must be > 0".to_string(),
            ));
        }
        let scenario = &execution.scenario;
        if scenario.requests.is_empty() && scenario.script.is_none() {
            return Err(PbenchError::InvalidConfig(
                "scenario needs either requests or a script".to_string(),
            ));
        }
        if scenario.script.is_some() && scenario.default_address.is_none() {
            return Err(PbenchError::InvalidConfig(
                "a script scenario needs a default-address to target".to_string(),
            ));
        }
        execution.load_profile().validate()
    }
}
