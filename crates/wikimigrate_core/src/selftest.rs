use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::document::{TransformOptions, transform};
use crate::engine::Delimiters;
use crate::features::FeatureSet;
use crate::rules::RuleSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelfTestCase {
    pub name: String,
    pub input: String,
    pub expected: String,
    #[serde(default)]
    pub activate: Vec<String>,
}

impl SelfTestCase {
    fn new(name: &str, input: &str, expected: &str, activate: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            input: input.to_string(),
            expected: expected.to_string(),
            activate: activate.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfTestFailure {
    pub name: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SelfTestReport {
    pub passed: usize,
    pub failed: usize,
    pub failures: Vec<SelfTestFailure>,
}

impl SelfTestReport {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Literal fixtures for the built-in content rule table.
pub fn builtin_cases() -> Vec<SelfTestCase> {
    vec![
        SelfTestCase::new(
            "tool category",
            "<title>Category:Tool</title>",
            "<title>Category:Lingua Libre tool</title>",
            &[],
        ),
        SelfTestCase::new(
            "list namespace",
            "<title>List:Fra/Animals</title>",
            "<title>Commons:Lingua Libre/List/Fra/Animals</title>",
            &[],
        ),
        SelfTestCase::new(
            "project namespace link",
            "[[LinguaLibre:Main Page]]",
            "[[Commons:Lingua Libre/Main Page]]",
            &[],
        ),
        SelfTestCase::new(
            "lowercase project link",
            "[[lingualibre:Bot]]",
            "[[Commons:Lingua Libre/Bot]]",
            &[],
        ),
        SelfTestCase::new(
            "bullets without list feature",
            "<text>* apple\n* banana</text>",
            "<text>* apple\n* banana</text>",
            &[],
        ),
        SelfTestCase::new(
            "bullets with list feature",
            "<text>* apple\n* banana</text>",
            "<text>{{Lingua Libre list}}\n# apple\n# banana</text>",
            &["list"],
        ),
        SelfTestCase::new(
            "list header after leading prose",
            "<text>intro\n* apple\n* banana</text>",
            "<text>intro\n{{Lingua Libre list}}\n# apple\n# banana</text>",
            &["list"],
        ),
        SelfTestCase::new(
            "numbered lines in textarea",
            "<textarea>#x</textarea>",
            "<textarea>#x</textarea>",
            &["list"],
        ),
        SelfTestCase::new(
            "bullets outside text region",
            "* keep\n<text>* item</text>",
            "* keep\n<text>{{Lingua Libre list}}\n# item</text>",
            &["list"],
        ),
    ]
}

pub fn load_cases(path: &Path) -> Result<Vec<SelfTestCase>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))
}

pub fn run_cases(
    cases: &[SelfTestCase],
    rules: &RuleSet,
    delimiters: &Delimiters,
) -> SelfTestReport {
    let options = TransformOptions {
        verbose: false,
        delimiters: delimiters.clone(),
    };
    let mut report = SelfTestReport::default();
    for case in cases {
        let features = case.activate.iter().collect::<FeatureSet>();
        let result = transform(&case.input, &case.name, rules, &features, &options);
        if result.text == case.expected {
            report.passed += 1;
        } else {
            report.failed += 1;
            report.failures.push(SelfTestFailure {
                name: case.name.clone(),
                expected: case.expected.clone(),
                actual: result.text,
            });
        }
    }
    report
}
