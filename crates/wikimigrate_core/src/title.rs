use serde::Serialize;
use tracing::{debug, warn};

use crate::engine;
use crate::features::{FeatureSet, is_active};
use crate::rules::{Rule, RuleSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleOutcome {
    pub new_title: Option<String>,
    pub redirect: bool,
}

impl TitleOutcome {
    pub fn is_migrated(&self) -> bool {
        self.new_title.is_some() || self.redirect
    }

    /// Title the page would carry at the destination, if any rule applied.
    pub fn target<'a>(&'a self, title: &'a str) -> Option<&'a str> {
        match (&self.new_title, self.redirect) {
            (Some(new_title), _) => Some(new_title.as_str()),
            (None, true) => Some(title),
            (None, false) => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Cascade {
    text: String,
    changed: bool,
    redirect: bool,
}

/// Cascade every active rule over a single title.
pub fn transform_title(title: &str, rules: &RuleSet, features: &FeatureSet) -> TitleOutcome {
    let start = Cascade {
        text: title.to_string(),
        changed: false,
        redirect: false,
    };
    let end = rules
        .iter()
        .filter(|rule| is_active(rule, features) && rule.is_valid())
        .fold(start, |cascade, rule| step(cascade, rule, title));

    TitleOutcome {
        new_title: (end.changed && end.text != title).then_some(end.text),
        redirect: end.redirect,
    }
}

fn step(mut cascade: Cascade, rule: &Rule, title: &str) -> Cascade {
    // Redirect rules are tested against the title as it stands before their
    // own replacement, which is usually the identity.
    let matched = rule
        .regex()
        .map(|regex| regex.is_match(&cascade.text))
        .unwrap_or(false);
    if !matched {
        return cascade;
    }
    if rule.redirect_on_match {
        cascade.redirect = true;
    }

    match engine::apply_whole(rule, &cascade.text, title) {
        Ok(applied) if applied.text != cascade.text => {
            debug!(title, rule = rule.index, "title rewritten");
            cascade.text = applied.text;
            cascade.changed = true;
        }
        Ok(_) => {}
        Err(error) => warn!(%error, "title rule treated as no-op"),
    }
    cascade
}
