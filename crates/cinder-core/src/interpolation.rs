//! Variable expansion for resource-group keys and other job attributes.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("variable pattern is valid")
});

/// Variables available while seeding jobs.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Predefined variables (`CI_*`), which win over user variables.
    pub predefined: HashMap<String, String>,
    /// Variables from the CI config and the creation command.
    pub variables: HashMap<String, String>,
}

impl InterpolationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_predefined(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.predefined.insert(key.into(), value.into());
        self
    }

    pub fn with_variables(mut self, variables: &HashMap<String, String>) -> Self {
        self.variables
            .extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.predefined
            .get(name)
            .or_else(|| self.variables.get(name))
            .map(String::as_str)
    }

    /// Expand `$VAR` and `${VAR}` references.
    ///
    /// Unknown variables expand to the empty string.
    pub fn expand(&self, input: &str) -> String {
        VARIABLE
            .replace_all(input, |caps: &regex::Captures| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map_or("", |m| m.as_str());
                self.lookup(name).unwrap_or_default().to_string()
            })
            .into_owned()
    }
}
