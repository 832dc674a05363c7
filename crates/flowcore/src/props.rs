use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered string properties passed into jobs and generated by flows.
///
/// Plain keys are last-write-wins. Every key merged in from a stage also keeps
/// the name of the stage that first produced it, and each stage's own output
/// is kept in a per-stage map that later stages never overwrite, so a value
/// shadowed by a downstream stage stays reachable through
/// [`Props::from_source`] and [`Props::namespaced`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Props {
    values: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    sources: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    stages: BTreeMap<String, BTreeMap<String, String>>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one for the key.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        self.sources.remove(&key);
        self.values.insert(key, value.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Plain key/value view, without source information.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }

    /// New set where every key of `overrides` replaces the same key here.
    /// Stage outputs recorded on either side are carried over.
    pub fn merge(&self, overrides: &Props) -> Props {
        let mut merged = self.clone();
        for (key, value) in &overrides.values {
            merged.values.insert(key.clone(), value.clone());
            match overrides.sources.get(key) {
                Some(source) => merged.sources.insert(key.clone(), source.clone()),
                None => merged.sources.remove(key),
            };
        }
        merged.absorb_stages(overrides);
        merged
    }

    /// Merge the output of stage `source` over this working set.
    ///
    /// Keys the output already attributes to an earlier stage keep that
    /// attribution. Untagged keys the stage added or changed are credited to
    /// `source` and recorded under its namespace; untagged keys it merely
    /// passed through unchanged are not.
    pub fn merged_from(&self, source: &str, output: &Props) -> Props {
        let mut merged = self.clone();
        merged.absorb_stages(output);
        for (key, value) in &output.values {
            let origin = match output.sources.get(key) {
                Some(origin) => Some(origin.clone()),
                None if self.values.get(key) == Some(value) => self.sources.get(key).cloned(),
                None => {
                    merged
                        .stages
                        .entry(source.to_string())
                        .or_default()
                        .insert(key.clone(), value.clone());
                    Some(source.to_string())
                }
            };
            merged.values.insert(key.clone(), value.clone());
            match origin {
                Some(origin) => merged.sources.insert(key.clone(), origin),
                None => merged.sources.remove(key),
            };
        }
        merged
    }

    fn absorb_stages(&mut self, other: &Props) {
        for (stage, output) in &other.stages {
            let entry = self.stages.entry(stage.clone()).or_default();
            for (key, value) in output {
                entry.insert(key.clone(), value.clone());
            }
        }
    }

    /// Name of the stage that first produced the current value of `key`.
    pub fn source_of(&self, key: &str) -> Option<&str> {
        self.sources.get(key).map(String::as_str)
    }

    /// Value stage `stage` produced for `key`, even if a later stage overwrote it.
    pub fn namespaced(&self, stage: &str, key: &str) -> Option<&str> {
        self.stages
            .get(stage)
            .and_then(|output| output.get(key))
            .map(String::as_str)
    }

    /// Everything stage `source` produced, tagged with it.
    pub fn from_source(&self, source: &str) -> Props {
        let mut scoped = Props::new();
        if let Some(output) = self.stages.get(source) {
            for (key, value) in output {
                scoped.values.insert(key.clone(), value.clone());
                scoped.sources.insert(key.clone(), source.to_string());
            }
        }
        scoped
    }

    /// Names of the stages whose output is recorded here.
    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for Props
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Props::new();
        for (key, value) in iter {
            props.put(key, value);
        }
        props
    }
}

impl From<BTreeMap<String, String>> for Props {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_overrides_and_keeps_the_rest() {
        let base = Props::new().with("a", "1").with("b", "2");
        let overrides = Props::new().with("b", "3").with("c", "4");

        let merged = base.merge(&overrides);

        assert_eq!(merged.get("a"), Some("1"));
        assert_eq!(merged.get("b"), Some("3"));
        assert_eq!(merged.get("c"), Some("4"));
        assert_eq!(merged.len(), 3);
        // inputs are untouched
        assert_eq!(base.get("b"), Some("2"));
    }

    #[test]
    fn colliding_stage_outputs_stay_reachable() {
        let working = Props::new().with("input", "x");
        let dependee = Props::new().with("out", "dependee-value");
        let depender = Props::new().with("out", "depender-value").with("extra", "3");

        let merged = working
            .merged_from("extract", &dependee)
            .merged_from("report", &depender);

        assert_eq!(merged.get("out"), Some("depender-value"));
        assert_eq!(merged.source_of("out"), Some("report"));
        assert_eq!(merged.source_of("input"), None);
        assert_eq!(merged.namespaced("extract", "out"), Some("dependee-value"));
        assert_eq!(merged.namespaced("report", "out"), Some("depender-value"));
        assert_eq!(merged.from_source("extract").get("out"), Some("dependee-value"));
        assert_eq!(merged.from_source("report").len(), 2);
        assert_eq!(merged.stages().collect::<Vec<_>>(), vec!["extract", "report"]);
    }

    #[test]
    fn earlier_attribution_survives_later_stages() {
        let a = Props::new().with("a.out", "1");
        let after_a = Props::new().merged_from("a", &a);

        // a leaf passes its inputs through, adding its own output
        let b_output = after_a.merge(&Props::new().with("b.out", "2"));
        let after_b = after_a.merged_from("b", &b_output);
        // the enclosing composition is named after its last stage
        let after_chain = Props::new().merged_from("b", &after_b);

        assert_eq!(after_chain.source_of("a.out"), Some("a"));
        assert_eq!(after_chain.source_of("b.out"), Some("b"));
        assert_eq!(after_chain.from_source("a").len(), 1);
        assert_eq!(after_chain.from_source("b").len(), 1);
    }

    #[test]
    fn passed_through_inputs_are_not_credited() {
        let working = Props::new().with("date", "2024-01-01");
        let output = working.merge(&Props::new().with("rows", "42"));

        let merged = working.merged_from("extract", &output);

        assert_eq!(merged.source_of("date"), None);
        assert_eq!(merged.source_of("rows"), Some("extract"));
        assert_eq!(merged.from_source("extract").to_map().len(), 1);
    }

    #[test]
    fn plain_put_clears_previous_source() {
        let mut props = Props::new().merged_from("stage", &Props::new().with("k", "v"));
        assert_eq!(props.source_of("k"), Some("stage"));

        props.put("k", "w");
        assert_eq!(props.source_of("k"), None);
        assert_eq!(props.get("k"), Some("w"));
    }
}
