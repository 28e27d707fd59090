use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::{self, Delimiters};
use crate::error::ApplyError;
use crate::features::{FeatureSet, is_active};
use crate::rules::RuleSet;

#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    pub verbose: bool,
    pub delimiters: Delimiters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleHit {
    pub rule: usize,
    pub matches: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformResult {
    pub text: String,
    pub total_changes: usize,
    /// Rules that fired, in application order. Only filled when verbose.
    pub per_rule_log: Vec<RuleHit>,
    #[serde(skip)]
    pub rule_errors: Vec<ApplyError>,
}

impl TransformResult {
    pub fn changed(&self, original: &str) -> bool {
        self.text != original
    }
}

/// Run the gated rule sequence over one document, each rule reading the
/// previous rule's output. Inactive and invalid rules are skipped.
pub fn transform(
    document: &str,
    name: &str,
    rules: &RuleSet,
    features: &FeatureSet,
    options: &TransformOptions,
) -> TransformResult {
    let mut text = document.to_string();
    let mut total_changes = 0usize;
    let mut per_rule_log = Vec::new();
    let mut rule_errors = Vec::new();

    for rule in rules {
        if !is_active(rule, features) || !rule.is_valid() {
            continue;
        }
        match engine::apply(rule, &text, &options.delimiters, name) {
            Ok(applied) => {
                if applied.matches > 0 {
                    debug!(
                        document = name,
                        rule = rule.index,
                        matches = applied.matches,
                        "rule fired"
                    );
                    if options.verbose {
                        per_rule_log.push(RuleHit {
                            rule: rule.index,
                            matches: applied.matches,
                        });
                    }
                    text = applied.text;
                }
                total_changes += applied.matches;
            }
            Err(error) => {
                warn!(%error, "rule treated as no-op");
                rule_errors.push(error);
            }
        }
    }

    TransformResult {
        text,
        total_changes,
        per_rule_log,
        rule_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleDefinition, builtin_content_rules};

    fn rules(definitions: &[RuleDefinition]) -> RuleSet {
        RuleSet::from_definitions("test", definitions)
    }

    fn verbose() -> TransformOptions {
        TransformOptions {
            verbose: true,
            ..TransformOptions::default()
        }
    }

    #[test]
    fn category_tool_title_is_renamed() {
        let set = rules(&[RuleDefinition::new(
            "Category:Tool",
            "Category:Lingua Libre tool",
        )]);
        let result = transform(
            "<title>Category:Tool</title>",
            "page",
            &set,
            &FeatureSet::new(),
            &TransformOptions::default(),
        );
        assert_eq!(result.text, "<title>Category:Lingua Libre tool</title>");
        assert_eq!(result.total_changes, 1);
    }

    #[test]
    fn list_namespace_moves_under_commons() {
        let set = rules(&[RuleDefinition::new(
            "List:",
            "Commons:Lingua Libre/List/",
        )]);
        let result = transform(
            "<title>List:Fra/Animals</title>",
            "page",
            &set,
            &FeatureSet::new(),
            &TransformOptions::default(),
        );
        assert_eq!(
            result.text,
            "<title>Commons:Lingua Libre/List/Fra/Animals</title>"
        );
    }

    #[test]
    fn declared_order_is_the_order_applied() {
        let a = RuleDefinition::new("cat", "dog");
        let b = RuleDefinition::new("dog", "bird");
        let forward = transform(
            "cat",
            "page",
            &rules(&[a.clone(), b.clone()]),
            &FeatureSet::new(),
            &TransformOptions::default(),
        );
        let reverse = transform(
            "cat",
            "page",
            &rules(&[b, a]),
            &FeatureSet::new(),
            &TransformOptions::default(),
        );
        assert_eq!(forward.text, "bird");
        assert_eq!(reverse.text, "dog");
    }

    #[test]
    fn gated_rules_contribute_nothing_without_features() {
        let set = rules(&[
            RuleDefinition::new("a", "b").requires("list"),
            RuleDefinition::new("a", "c").requires("other").line_by_line(),
        ]);
        let result = transform(
            "<text>a</text> a",
            "page",
            &set,
            &FeatureSet::new(),
            &verbose(),
        );
        assert_eq!(result.total_changes, 0);
        assert!(result.per_rule_log.is_empty());
        assert_eq!(result.text, "<text>a</text> a");
    }

    #[test]
    fn invalid_rule_is_skipped_and_others_run() {
        let set = rules(&[
            RuleDefinition::new("(", "x"),
            RuleDefinition::new("a", "b"),
        ]);
        let result = transform("aa", "page", &set, &FeatureSet::new(), &verbose());
        assert_eq!(result.text, "bb");
        assert_eq!(result.per_rule_log, vec![RuleHit { rule: 1, matches: 2 }]);
    }

    #[test]
    fn verbose_log_records_fired_rules_in_order() {
        let set = rules(&[
            RuleDefinition::new("x", "y"),
            RuleDefinition::new("absent", "z"),
            RuleDefinition::new("y", "w"),
        ]);
        let result = transform("xx", "page", &set, &FeatureSet::new(), &verbose());
        assert_eq!(result.text, "ww");
        assert_eq!(result.total_changes, 4);
        assert_eq!(
            result.per_rule_log,
            vec![
                RuleHit { rule: 0, matches: 2 },
                RuleHit { rule: 2, matches: 2 }
            ]
        );
    }

    #[test]
    fn quiet_run_keeps_no_log() {
        let set = rules(&[RuleDefinition::new("x", "y")]);
        let result = transform(
            "x",
            "page",
            &set,
            &FeatureSet::new(),
            &TransformOptions::default(),
        );
        assert!(result.per_rule_log.is_empty());
        assert_eq!(result.total_changes, 1);
    }

    #[test]
    fn builtin_list_feature_numbers_bullets() {
        let set = builtin_content_rules().expect("rules");
        let input = "<text>* apple\n* banana</text>";

        let inactive = transform(input, "page", &set, &FeatureSet::new(), &verbose());
        assert_eq!(inactive.text, input);
        assert!(!inactive.changed(input));

        let active = transform(
            input,
            "page",
            &set,
            &FeatureSet::from_iter(["list"]),
            &verbose(),
        );
        assert_eq!(
            active.text,
            "<text>{{Lingua Libre list}}\n# apple\n# banana</text>"
        );
        assert!(active.changed(input));
    }

    #[test]
    fn list_header_goes_before_first_numbered_line() {
        let set = builtin_content_rules().expect("rules");
        let result = transform(
            "<text>intro\n* apple\n* banana</text>",
            "page",
            &set,
            &FeatureSet::from_iter(["list"]),
            &TransformOptions::default(),
        );
        assert_eq!(
            result.text,
            "<text>intro\n{{Lingua Libre list}}\n# apple\n# banana</text>"
        );
    }

    #[test]
    fn list_header_ignores_lookalike_tags() {
        let set = builtin_content_rules().expect("rules");
        let features = FeatureSet::from_iter(["list"]);
        for input in [
            "<textarea>#x</textarea>",
            "<text bytes=\"0\" />\n# x",
            "<text>intro</text>\n# x",
        ] {
            let result = transform(
                input,
                "page",
                &set,
                &features,
                &TransformOptions::default(),
            );
            assert_eq!(result.text, input);
            assert_eq!(result.total_changes, 0);
        }
    }

    #[test]
    fn line_rules_never_touch_text_outside_regions() {
        let set = builtin_content_rules().expect("rules");
        let outside = "* keep me\n";
        let input = format!("{outside}<text>* item</text>");
        let result = transform(
            &input,
            "page",
            &set,
            &FeatureSet::from_iter(["list"]),
            &TransformOptions::default(),
        );
        assert!(result.text.starts_with(outside));
        assert!(result.text.ends_with("# item</text>"));
    }
}
