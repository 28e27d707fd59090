use std::collections::BTreeSet;

use crate::rules::Rule;

pub const ACTIVATE_TOKEN_PREFIX: &str = "activate=";

/// Feature names activated for one run. Built before processing starts and
/// only ever borrowed immutably by the transformers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet {
    names: BTreeSet<String>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&mut self, name: &str) {
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            self.names.insert(trimmed.to_string());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut features = Self::new();
        for name in iter {
            features.activate(name.as_ref());
        }
        features
    }
}

pub fn is_active(rule: &Rule, features: &FeatureSet) -> bool {
    match rule.required_feature.as_deref() {
        Some(feature) => features.contains(feature),
        None => true,
    }
}

/// Parse the `activate=<feature>` token form.
pub fn parse_activation_token(token: &str) -> Option<&str> {
    token
        .strip_prefix(ACTIVATE_TOKEN_PREFIX)
        .map(str::trim)
        .filter(|name| !name.is_empty())
}
