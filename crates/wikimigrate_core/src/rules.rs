use std::fs;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{LoadError, RuleCompileError};

const BUILTIN_CONTENT_RULES: &str = include_str!("../../../config/content-rules.json");
const BUILTIN_TITLE_RULES: &str = include_str!("../../../config/title-rules.json");

/// Where a rule applies inside the text it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    WholeText,
    LineDelimited,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WholeText => "whole_text",
            Self::LineDelimited => "line_delimited",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessMode {
    #[serde(rename = "lineByLine")]
    LineByLine,
}

/// One declarative rule record as it appears in a rule source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(rename = "replace")]
    pub replacement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessMode>,
    #[serde(
        default,
        rename = "redirectToCommons",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub redirect_to_commons: bool,
}

impl RuleDefinition {
    pub fn new(pattern: &str, replacement: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            flags: None,
            requires: None,
            process: None,
            redirect_to_commons: false,
        }
    }

    pub fn flags(mut self, flags: &str) -> Self {
        self.flags = Some(flags.to_string());
        self
    }

    pub fn requires(mut self, feature: &str) -> Self {
        self.requires = Some(feature.to_string());
        self
    }

    pub fn line_by_line(mut self) -> Self {
        self.process = Some(ProcessMode::LineByLine);
        self
    }

    pub fn redirect_on_match(mut self) -> Self {
        self.redirect_to_commons = true;
        self
    }
}

/// Parsed JS-style flag string. `g` selects every match instead of the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleFlags {
    pub global: bool,
    pub case_insensitive: bool,
    pub multi_line: bool,
    pub dot_matches_new_line: bool,
}

impl Default for RuleFlags {
    fn default() -> Self {
        Self {
            global: true,
            case_insensitive: false,
            multi_line: false,
            dot_matches_new_line: false,
        }
    }
}

impl RuleFlags {
    pub fn parse(flags: &str, index: usize) -> Result<Self, RuleCompileError> {
        let mut parsed = Self {
            global: false,
            ..Self::default()
        };
        for flag in flags.chars() {
            match flag {
                'g' => parsed.global = true,
                'i' => parsed.case_insensitive = true,
                'm' => parsed.multi_line = true,
                's' => parsed.dot_matches_new_line = true,
                // Patterns are always Unicode-aware.
                'u' => {}
                other => {
                    return Err(RuleCompileError::Flag {
                        index,
                        flag: other,
                        flags: flags.to_string(),
                    });
                }
            }
        }
        Ok(parsed)
    }
}

/// A loaded, immutable rule. Identity is its position in the owning [`RuleSet`].
#[derive(Debug, Clone)]
pub struct Rule {
    pub index: usize,
    pub pattern: String,
    /// Replacement in the engine's `${n}` template form, newlines already expanded.
    pub template: String,
    pub flags: RuleFlags,
    pub required_feature: Option<String>,
    pub scope: Scope,
    pub redirect_on_match: bool,
    compiled: Result<Regex, RuleCompileError>,
}

impl Rule {
    pub fn compile(index: usize, definition: &RuleDefinition) -> Self {
        let flags = definition
            .flags
            .as_deref()
            .map(|flags| RuleFlags::parse(flags, index))
            .unwrap_or_else(|| Ok(RuleFlags::default()));
        let compiled = flags.clone().and_then(|flags| {
            RegexBuilder::new(&definition.pattern)
                .case_insensitive(flags.case_insensitive)
                .multi_line(flags.multi_line)
                .dot_matches_new_line(flags.dot_matches_new_line)
                .build()
                .map_err(|error| RuleCompileError::Pattern {
                    index,
                    pattern: definition.pattern.clone(),
                    message: error.to_string(),
                })
        });
        let compiled = compiled.and_then(|regex| match context_token(&definition.replacement) {
            Some(token) => Err(RuleCompileError::Template {
                index,
                token: token.to_string(),
            }),
            None => Ok(regex),
        });
        let template = match &compiled {
            Ok(regex) => normalize_template(&definition.replacement, regex),
            Err(_) => definition.replacement.clone(),
        };

        Self {
            index,
            pattern: definition.pattern.clone(),
            template,
            flags: flags.unwrap_or_default(),
            required_feature: definition.requires.clone(),
            scope: match definition.process {
                Some(ProcessMode::LineByLine) => Scope::LineDelimited,
                None => Scope::WholeText,
            },
            redirect_on_match: definition.redirect_to_commons,
            compiled,
        }
    }

    pub fn regex(&self) -> Result<&Regex, &RuleCompileError> {
        self.compiled.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.compiled.is_ok()
    }

    pub fn compile_error(&self) -> Option<&RuleCompileError> {
        self.compiled.as_ref().err()
    }
}

/// Ordered rule sequence, preserved exactly as declared.
#[derive(Debug, Clone)]
pub struct RuleSet {
    origin: String,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_definitions(origin: &str, definitions: &[RuleDefinition]) -> Self {
        let rules = definitions
            .iter()
            .enumerate()
            .map(|(index, definition)| Rule::compile(index, definition))
            .collect::<Vec<_>>();
        for rule in &rules {
            if let Some(error) = rule.compile_error() {
                warn!(origin, %error, "rule will be skipped");
            }
        }
        Self {
            origin: origin.to_string(),
            rules,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index)
    }

    pub fn compile_errors(&self) -> Vec<&RuleCompileError> {
        self.rules
            .iter()
            .filter_map(Rule::compile_error)
            .collect()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    Json,
    Yaml,
    Toml,
}

impl RuleFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml") | Some("yml") => Self::Yaml,
            Some("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuleSourceShape {
    List(Vec<RuleDefinition>),
    Document(RuleDocument),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDocument {
    rules: Vec<RuleDefinition>,
}

impl RuleSourceShape {
    fn into_definitions(self) -> Vec<RuleDefinition> {
        match self {
            Self::List(rules) => rules,
            Self::Document(document) => document.rules,
        }
    }
}

/// Load an ordered rule sequence from a file. Invalid patterns do not fail loading.
pub fn load_rules(path: &Path) -> Result<RuleSet, LoadError> {
    if !path.exists() {
        return Err(LoadError::Missing(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_rules(
        &content,
        RuleFormat::from_path(path),
        &path.to_string_lossy().replace('\\', "/"),
    )
}

pub fn parse_rules(content: &str, format: RuleFormat, origin: &str) -> Result<RuleSet, LoadError> {
    let malformed = |message: String| LoadError::Malformed {
        origin: origin.to_string(),
        message,
    };
    let definitions = match format {
        RuleFormat::Json => serde_json::from_str::<RuleSourceShape>(content)
            .map_err(|error| malformed(error.to_string()))?
            .into_definitions(),
        RuleFormat::Yaml => serde_yaml::from_str::<RuleSourceShape>(content)
            .map_err(|error| malformed(error.to_string()))?
            .into_definitions(),
        RuleFormat::Toml => {
            toml::from_str::<RuleDocument>(content)
                .map_err(|error| malformed(error.to_string()))?
                .rules
        }
    };
    Ok(RuleSet::from_definitions(origin, &definitions))
}

pub fn builtin_content_rules() -> Result<RuleSet, LoadError> {
    parse_rules(
        BUILTIN_CONTENT_RULES,
        RuleFormat::Json,
        "<builtin content rules>",
    )
}

pub fn builtin_title_rules() -> Result<RuleSet, LoadError> {
    parse_rules(
        BUILTIN_TITLE_RULES,
        RuleFormat::Json,
        "<builtin title rules>",
    )
}

/// First `` $` `` or `$'` token in a replacement. The engine expands groups
/// only, so text before or after the match cannot be spliced in.
fn context_token(raw: &str) -> Option<&'static str> {
    let mut chars = raw.chars();
    while let Some(current) = chars.next() {
        if current != '$' {
            continue;
        }
        match chars.next() {
            Some('`') => return Some("$`"),
            Some('\'') => return Some("$'"),
            _ => {}
        }
    }
    None
}

/// Rewrite a JS-style replacement into the regex crate's explicit form.
///
/// `$1`..`$99` become `${n}` when the group exists, `$&` is the whole match,
/// `$<name>` a named group, and any other `$` is literal. The two-character
/// marker `\n` becomes a line feed.
pub fn normalize_template(raw: &str, regex: &Regex) -> String {
    let group_count = regex.captures_len().saturating_sub(1);
    let chars = raw.chars().collect::<Vec<_>>();
    let mut out = String::with_capacity(raw.len() + 8);
    let mut cursor = 0usize;

    while cursor < chars.len() {
        let current = chars[cursor];
        let next = chars.get(cursor + 1).copied();
        match (current, next) {
            ('\\', Some('n')) => {
                out.push('\n');
                cursor += 2;
            }
            ('$', Some('$')) => {
                out.push_str("$$");
                cursor += 2;
            }
            ('$', Some('&')) => {
                out.push_str("${0}");
                cursor += 2;
            }
            ('$', Some(first)) if first.is_ascii_digit() => {
                let second = chars.get(cursor + 2).copied().filter(char::is_ascii_digit);
                let one = first.to_digit(10).unwrap_or(0) as usize;
                let two = second.map(|digit| one * 10 + digit.to_digit(10).unwrap_or(0) as usize);
                match two {
                    Some(group) if group >= 1 && group <= group_count => {
                        out.push_str(&format!("${{{group}}}"));
                        cursor += 3;
                    }
                    _ if one >= 1 && one <= group_count => {
                        out.push_str(&format!("${{{one}}}"));
                        cursor += 2;
                    }
                    _ => {
                        out.push_str("$$");
                        cursor += 1;
                    }
                }
            }
            ('$', Some('<')) => {
                let rest = &chars[cursor + 2..];
                let close = rest.iter().position(|ch| *ch == '>');
                let name = close.map(|end| rest[..end].iter().collect::<String>());
                match (close, name) {
                    (Some(end), Some(name))
                        if regex.capture_names().flatten().any(|known| known == name) =>
                    {
                        out.push_str(&format!("${{{name}}}"));
                        cursor += end + 3;
                    }
                    _ => {
                        out.push_str("$$");
                        cursor += 1;
                    }
                }
            }
            ('$', _) => {
                out.push_str("$$");
                cursor += 1;
            }
            (other, _) => {
                out.push(other);
                cursor += 1;
            }
        }
    }

    out
}
