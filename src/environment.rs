use std::collections::BTreeMap;
use std::str::FromStr;

/// Environment overrides layered on top of the harness's own environment
/// when a child process is spawned.
///
/// Keys are kept sorted so that log lines and command descriptions are stable
/// from run to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment(BTreeMap<String, String>);

impl Environment {
    /// Creates an empty set of overrides.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Sets (or replaces) a variable.
    ///
    /// # Examples
    /// ```
    /// use forward_harness::Environment;
    ///
    /// let mut env = Environment::new();
    /// env.set("PEBBLE_WFE_NONCEREJECT", "0");
    /// assert_eq!(env.get("PEBBLE_WFE_NONCEREJECT"), Some("0"));
    /// ```
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder form of [`Environment::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Merges `other` into this set; `other` wins on conflicting keys.
    pub fn extend(&mut self, other: Environment) {
        self.0.extend(other.0);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Names of the overridden variables, for logging without leaking values.
    pub fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

impl FromIterator<(String, String)> for Environment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A single `KEY=VALUE` assignment as written on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvAssignment {
    pub key: String,
    pub value: String,
}

impl FromStr for EnvAssignment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("empty variable name in '{}'", s));
        }
        Ok(EnvAssignment {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

impl FromIterator<EnvAssignment> for Environment {
    fn from_iter<I: IntoIterator<Item = EnvAssignment>>(iter: I) -> Self {
        iter.into_iter().map(|a| (a.key, a.value)).collect()
    }
}
