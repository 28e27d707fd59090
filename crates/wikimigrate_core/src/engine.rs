use std::ops::Range;

use regex::Regex;

use crate::error::ApplyError;
use crate::rules::{Rule, Scope};

pub const DEFAULT_REGION_TAG: &str = "text";

/// Open/close marker pair bounding the regions a line-delimited rule edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    tag: String,
    open: String,
    close: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::new(DEFAULT_REGION_TAG)
    }
}

impl Delimiters {
    pub fn new(tag: &str) -> Self {
        let tag = tag.trim();
        Self {
            tag: tag.to_string(),
            open: format!("<{tag}"),
            close: format!("</{tag}>"),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Byte ranges of every region interior, in document order.
    ///
    /// `<text` must be followed by `>`, `/` or whitespace. A self-closing open
    /// tag holds no region and an unclosed one ends the scan.
    pub fn regions(&self, text: &str) -> Vec<Range<usize>> {
        let mut regions = Vec::new();
        let mut cursor = 0usize;

        while let Some(found) = text[cursor..].find(&self.open) {
            let after_name = cursor + found + self.open.len();
            let boundary = text[after_name..].chars().next();
            if !matches!(boundary, Some(ch) if ch == '>' || ch == '/' || ch.is_whitespace()) {
                cursor = after_name;
                continue;
            }
            let Some(tag_end) = text[after_name..].find('>') else {
                break;
            };
            let body_start = after_name + tag_end + 1;
            if text[..body_start].ends_with("/>") {
                cursor = body_start;
                continue;
            }
            let Some(close_at) = text[body_start..].find(&self.close) else {
                break;
            };
            let body_end = body_start + close_at;
            regions.push(body_start..body_end);
            cursor = body_end + self.close.len();
        }

        regions
    }
}

/// Rewritten text plus the number of matches found in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub text: String,
    pub matches: usize,
}

impl Applied {
    fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            matches: 0,
        }
    }
}

/// Apply one rule under its declared scope.
pub fn apply(
    rule: &Rule,
    text: &str,
    delimiters: &Delimiters,
    document: &str,
) -> Result<Applied, ApplyError> {
    apply_in_scope(rule, rule.scope, text, delimiters, document)
}

/// Apply one rule across the whole input, ignoring its declared scope.
pub fn apply_whole(rule: &Rule, text: &str, document: &str) -> Result<Applied, ApplyError> {
    apply_in_scope(
        rule,
        Scope::WholeText,
        text,
        &Delimiters::default(),
        document,
    )
}

fn apply_in_scope(
    rule: &Rule,
    scope: Scope,
    text: &str,
    delimiters: &Delimiters,
    document: &str,
) -> Result<Applied, ApplyError> {
    let regex = rule.regex().map_err(|error| ApplyError {
        index: rule.index,
        document: document.to_string(),
        message: error.to_string(),
    })?;

    Ok(match scope {
        Scope::WholeText => replace_counted(regex, &rule.template, rule.flags.global, text),
        Scope::LineDelimited => {
            apply_line_delimited(regex, &rule.template, rule.flags.global, text, delimiters)
        }
    })
}

fn apply_line_delimited(
    regex: &Regex,
    template: &str,
    global: bool,
    text: &str,
    delimiters: &Delimiters,
) -> Applied {
    let regions = delimiters.regions(text);
    if regions.is_empty() {
        return Applied::unchanged(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    let mut matches = 0usize;
    for region in regions {
        out.push_str(&text[cursor..region.start]);
        let rewritten = rewrite_lines(regex, template, global, &text[region.clone()]);
        out.push_str(&rewritten.text);
        matches += rewritten.matches;
        cursor = region.end;
    }
    out.push_str(&text[cursor..]);

    if matches == 0 {
        return Applied::unchanged(text);
    }
    Applied { text: out, matches }
}

fn rewrite_lines(regex: &Regex, template: &str, global: bool, interior: &str) -> Applied {
    let mut out = String::with_capacity(interior.len());
    let mut matches = 0usize;
    for (position, line) in interior.split('\n').enumerate() {
        if position > 0 {
            out.push('\n');
        }
        let (body, carriage_return) = match line.strip_suffix('\r') {
            Some(body) => (body, "\r"),
            None => (line, ""),
        };
        let rewritten = replace_counted(regex, template, global, body);
        out.push_str(&rewritten.text);
        out.push_str(carriage_return);
        matches += rewritten.matches;
    }
    Applied { text: out, matches }
}

/// Single-pass replace that counts matches against the input it was given.
///
/// `captures_iter` never yields two matches at the same offset and steps past
/// an empty match, so patterns that match the empty string terminate.
fn replace_counted(regex: &Regex, template: &str, global: bool, input: &str) -> Applied {
    let mut out = String::with_capacity(input.len());
    let mut last = 0usize;
    let mut matches = 0usize;

    for captures in regex.captures_iter(input) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        out.push_str(&input[last..whole.start()]);
        captures.expand(template, &mut out);
        last = whole.end();
        matches += 1;
        if !global {
            break;
        }
    }

    if matches == 0 {
        return Applied::unchanged(input);
    }
    out.push_str(&input[last..]);
    Applied { text: out, matches }
}
