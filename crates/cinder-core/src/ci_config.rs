//! CI configuration types.
//!
//! These types represent the user-authored CI YAML: a list of stages,
//! global variables and one mapping entry per job. Top-level keys that are
//! not reserved keywords are job definitions; keys starting with `.` are
//! hidden templates and ignored.

use crate::job::When;
use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;

/// Stages used when the config does not declare any.
pub const DEFAULT_STAGES: [&str; 3] = ["build", "test", "deploy"];

/// Stage assigned to jobs that do not name one.
pub const DEFAULT_JOB_STAGE: &str = "test";

const RESERVED_KEYS: [&str; 10] = [
    "stages",
    "variables",
    "default",
    "workflow",
    "include",
    "image",
    "services",
    "cache",
    "before_script",
    "after_script",
];

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CiConfig {
    /// Stage names in execution order, including the implicit `.pre` and `.post`.
    pub stages: Vec<String>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Job definitions in file order.
    pub jobs: Vec<JobDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDefinition {
    pub name: String,
    pub stage: String,
    pub script: Vec<String>,
    #[serde(default)]
    pub resource_group: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub when: When,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawJob {
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    script: Option<Script>,
    // Accepted for compatibility; execution details are the runner's concern.
    #[serde(default, rename = "before_script")]
    _before_script: Option<Script>,
    #[serde(default, rename = "after_script")]
    _after_script: Option<Script>,
    #[serde(default, rename = "image")]
    _image: Option<Value>,
    #[serde(default, rename = "environment")]
    _environment: Option<Value>,
    #[serde(default)]
    resource_group: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    timeout: Option<Timeout>,
    #[serde(default)]
    when: When,
    #[serde(default)]
    variables: Option<Mapping>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Script {
    Line(String),
    Lines(Vec<String>),
}

impl Script {
    fn into_lines(self) -> Vec<String> {
        match self {
            Script::Line(line) => vec![line],
            Script::Lines(lines) => lines,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Timeout {
    Seconds(u64),
    Text(String),
}

impl CiConfig {
    /// Parse and validate CI YAML content.
    pub fn parse(content: &str) -> Result<Self> {
        let root: Value =
            serde_yaml::from_str(content).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let Value::Mapping(root) = root else {
            return Err(Error::InvalidConfig("Invalid configuration format".to_string()));
        };

        let stages = parse_stages(root.get("stages"))?;
        let variables = match root.get("variables") {
            Some(Value::Mapping(map)) => scalar_map(map, "variables")?,
            Some(Value::Null) | None => HashMap::new(),
            Some(_) => {
                return Err(Error::InvalidConfig(
                    "variables config should be a hash of key value pairs".to_string(),
                ));
            }
        };

        let mut jobs = Vec::new();
        for (key, value) in &root {
            let Some(name) = key.as_str() else {
                return Err(Error::InvalidConfig(
                    "jobs config should contain string keys".to_string(),
                ));
            };
            if RESERVED_KEYS.contains(&name) || name.starts_with('.') {
                continue;
            }
            jobs.push(parse_job(name, value, &stages)?);
        }

        if jobs.is_empty() {
            return Err(Error::InvalidConfig(
                "jobs config should contain at least one visible job".to_string(),
            ));
        }

        Ok(Self {
            stages,
            variables,
            jobs,
        })
    }

    /// Position of `stage` in the stage list.
    pub fn stage_index(&self, stage: &str) -> Option<u32> {
        self.stages
            .iter()
            .position(|s| s == stage)
            .map(|idx| idx as u32)
    }

    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|job| job.name == name)
    }
}

fn parse_stages(value: Option<&Value>) -> Result<Vec<String>> {
    let declared: Vec<String> = match value {
        None | Some(Value::Null) => DEFAULT_STAGES.iter().map(|s| s.to_string()).collect(),
        Some(value) => serde_yaml::from_value(value.clone()).map_err(|_| {
            Error::InvalidConfig("stages config should be an array of strings".to_string())
        })?,
    };

    let mut stages = vec![".pre".to_string()];
    stages.extend(
        declared
            .into_iter()
            .filter(|stage| stage != ".pre" && stage != ".post"),
    );
    stages.push(".post".to_string());
    Ok(stages)
}

fn parse_job(name: &str, value: &Value, stages: &[String]) -> Result<JobDefinition> {
    if !value.is_mapping() {
        return Err(Error::InvalidConfig(format!(
            "jobs:{} config should be a hash",
            name
        )));
    }

    let raw: RawJob = serde_yaml::from_value(value.clone())
        .map_err(|e| Error::InvalidConfig(format!("jobs:{} config {}", name, e)))?;

    let script = raw.script.map(Script::into_lines).unwrap_or_default();
    if script.iter().all(|line| line.trim().is_empty()) {
        return Err(Error::InvalidConfig(format!(
            "jobs:{} script can't be blank",
            name
        )));
    }

    let stage = raw.stage.unwrap_or_else(|| DEFAULT_JOB_STAGE.to_string());
    if !stages.contains(&stage) {
        return Err(Error::InvalidConfig(format!(
            "{} job: chosen stage {} does not exist; available stages are {}",
            name,
            stage,
            stages.join(", ")
        )));
    }

    if raw
        .resource_group
        .as_deref()
        .is_some_and(|group| group.trim().is_empty())
    {
        return Err(Error::InvalidConfig(format!(
            "jobs:{} resource_group can't be blank",
            name
        )));
    }

    let timeout_secs = match raw.timeout {
        None => None,
        Some(Timeout::Seconds(secs)) => Some(secs),
        Some(Timeout::Text(text)) => Some(parse_duration(&text).ok_or_else(|| {
            Error::InvalidConfig(format!("jobs:{} timeout should be a duration", name))
        })?),
    };

    let variables = match &raw.variables {
        Some(map) => scalar_map(map, &format!("jobs:{} variables", name))?,
        None => HashMap::new(),
    };

    Ok(JobDefinition {
        name: name.to_string(),
        stage,
        script,
        resource_group: raw.resource_group,
        tags: raw.tags,
        timeout_secs,
        when: raw.when,
        variables,
    })
}

fn scalar_map(map: &Mapping, context: &str) -> Result<HashMap<String, String>> {
    let invalid = || {
        Error::InvalidConfig(format!(
            "{} config should be a hash of key value pairs",
            context
        ))
    };

    map.iter()
        .map(|(key, value)| {
            let key = key.as_str().ok_or_else(invalid)?.to_string();
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                _ => return Err(invalid()),
            };
            Ok((key, value))
        })
        .collect()
}

/// Parse a human duration such as `90`, `45m`, `1h 30m` or `2 hours`.
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Option<u64> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Some(secs);
    }

    let mut total: u64 = 0;
    let mut rest = input;
    while !rest.is_empty() {
        rest = rest.trim_start();
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let amount: u64 = rest[..digits].parse().ok()?;
        rest = rest[digits..].trim_start();

        let unit_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let multiplier = match &rest[..unit_len] {
            "s" | "sec" | "secs" | "second" | "seconds" => 1,
            "m" | "min" | "mins" | "minute" | "minutes" => 60,
            "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
            "d" | "day" | "days" => 86_400,
            _ => return None,
        };
        total = total.checked_add(amount.checked_mul(multiplier)?)?;
        rest = rest[unit_len..].trim_start_matches([' ', ',']);
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90"), Some(90));
        assert_eq!(parse_duration("45m"), Some(2700));
        assert_eq!(parse_duration("1h 30m"), Some(5400));
        assert_eq!(parse_duration("2 hours"), Some(7200));
        assert_eq!(parse_duration("1d, 2h"), Some(93_600));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("10 fortnights"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_implicit_stages() {
        let stages = parse_stages(None).unwrap();
        assert_eq!(stages, vec![".pre", "build", "test", "deploy", ".post"]);
    }
}
