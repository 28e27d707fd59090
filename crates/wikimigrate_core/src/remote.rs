use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RemoteCheckError;
use crate::features::FeatureSet;
use crate::rules::RuleSet;
use crate::title::transform_title;

pub const MAX_RETRIES: usize = 1;

/// Answers whether a page exists at the destination with at least one revision.
pub trait TitleCatalog {
    fn page_has_revisions(&mut self, title: &str) -> Result<bool, RemoteCheckError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub retry_delay_ms: u64,
}

impl RemoteConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

/// Fixed backoff between the single attempt and its one retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
}

pub struct CommonsClient {
    client: Client,
    config: RemoteConfig,
}

impl CommonsClient {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build remote catalog HTTP client")?;
        Ok(Self { client, config })
    }
}

impl TitleCatalog for CommonsClient {
    fn page_has_revisions(&mut self, title: &str) -> Result<bool, RemoteCheckError> {
        let url = Url::parse(&self.config.api_url).map_err(|error| {
            RemoteCheckError::permanent(
                title,
                format!("invalid API URL {}: {error}", self.config.api_url),
            )
        })?;
        let params = [
            ("action", "query"),
            ("format", "json"),
            ("formatversion", "2"),
            ("prop", "revisions"),
            ("rvprop", "ids"),
            ("rvlimit", "1"),
            ("titles", title),
        ];

        let response = self
            .client
            .get(url)
            .header("User-Agent", self.config.user_agent.clone())
            .query(&params)
            .send()
            .map_err(|error| {
                let message = format!("request failed: {error}");
                if is_retryable_error(&error) {
                    RemoteCheckError::transient(title, message)
                } else {
                    RemoteCheckError::permanent(title, message)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(title, status));
        }

        let payload: Value = response.json().map_err(|error| {
            RemoteCheckError::permanent(title, format!("failed to decode JSON: {error}"))
        })?;
        parse_revision_query(title, payload)
    }
}

/// Decide from a `prop=revisions` response whether the page has content.
pub fn parse_revision_query(title: &str, payload: Value) -> Result<bool, RemoteCheckError> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        let message = format!("API error [{code}]: {info}");
        return Err(if code == "ratelimited" || code == "maxlag" {
            RemoteCheckError::transient(title, message)
        } else {
            RemoteCheckError::permanent(title, message)
        });
    }

    let parsed: RevisionResponse = serde_json::from_value(payload).map_err(|error| {
        RemoteCheckError::permanent(title, format!("unexpected response shape: {error}"))
    })?;
    Ok(parsed.query.pages.iter().any(|page| {
        !page.missing && !page.invalid && !page.revisions.is_empty()
    }))
}

/// One attempt plus at most one retry on a transient failure.
pub fn check_with_retry(
    catalog: &mut dyn TitleCatalog,
    title: &str,
    policy: RetryPolicy,
) -> Result<bool, RemoteCheckError> {
    let mut attempt = 0usize;
    loop {
        match catalog.page_has_revisions(title) {
            Ok(exists) => return Ok(exists),
            Err(error) if error.transient && attempt < MAX_RETRIES => {
                debug!(%error, attempt, "retrying remote title check");
                attempt += 1;
                sleep(policy.delay);
            }
            Err(error) => return Err(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum TitleDecision {
    /// No rule applies; the page is shown as-is.
    NotApplicable,
    /// A target exists in principle but was not confirmed at the destination.
    Unmigrated { target: String, reason: String },
    Migrated { target: String },
}

impl TitleDecision {
    pub fn is_migrated(&self) -> bool {
        matches!(self, Self::Migrated { .. })
    }
}

/// Transform a page title and confirm the target at the destination.
/// An unreachable catalog leaves the page unmigrated.
pub fn resolve_title(
    catalog: &mut dyn TitleCatalog,
    title: &str,
    rules: &RuleSet,
    features: &FeatureSet,
    policy: RetryPolicy,
) -> TitleDecision {
    let outcome = transform_title(title, rules, features);
    let Some(target) = outcome.target(title) else {
        return TitleDecision::NotApplicable;
    };
    let target = target.to_string();

    match check_with_retry(catalog, &target, policy) {
        Ok(true) => TitleDecision::Migrated { target },
        Ok(false) => TitleDecision::Unmigrated {
            target,
            reason: "no revisions at destination".to_string(),
        },
        Err(error) => {
            warn!(%error, "remote title check failed; leaving page unmigrated");
            TitleDecision::Unmigrated {
                target,
                reason: error.to_string(),
            }
        }
    }
}

fn status_error(title: &str, status: StatusCode) -> RemoteCheckError {
    let message = format!("HTTP {status}");
    if is_retryable_status(status) {
        RemoteCheckError::transient(title, message)
    } else {
        RemoteCheckError::permanent(title, message)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct RevisionResponse {
    #[serde(default)]
    query: RevisionQuery,
}

#[derive(Debug, Deserialize, Default)]
struct RevisionQuery {
    #[serde(default)]
    pages: Vec<RevisionPage>,
}

#[derive(Debug, Deserialize)]
struct RevisionPage {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    revisions: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use reqwest::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::rules::builtin_title_rules;

    struct ScriptedCatalog {
        answers: VecDeque<Result<bool, RemoteCheckError>>,
        asked: Vec<String>,
    }

    impl ScriptedCatalog {
        fn new(answers: Vec<Result<bool, RemoteCheckError>>) -> Self {
            Self {
                answers: answers.into(),
                asked: Vec::new(),
            }
        }
    }

    impl TitleCatalog for ScriptedCatalog {
        fn page_has_revisions(&mut self, title: &str) -> Result<bool, RemoteCheckError> {
            self.asked.push(title.to_string());
            self.answers
                .pop_front()
                .unwrap_or_else(|| Err(RemoteCheckError::permanent(title, "exhausted")))
        }
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn transient_failure_is_retried_once() {
        let mut catalog = ScriptedCatalog::new(vec![
            Err(RemoteCheckError::transient("T", "HTTP 429")),
            Ok(true),
        ]);
        assert_eq!(check_with_retry(&mut catalog, "T", no_wait()), Ok(true));
        assert_eq!(catalog.asked.len(), 2);
    }

    #[test]
    fn second_transient_failure_gives_up() {
        let mut catalog = ScriptedCatalog::new(vec![
            Err(RemoteCheckError::transient("T", "timeout")),
            Err(RemoteCheckError::transient("T", "timeout")),
            Ok(true),
        ]);
        assert!(check_with_retry(&mut catalog, "T", no_wait()).is_err());
        assert_eq!(catalog.asked.len(), 2);
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let mut catalog =
            ScriptedCatalog::new(vec![Err(RemoteCheckError::permanent("T", "bad json"))]);
        assert!(check_with_retry(&mut catalog, "T", no_wait()).is_err());
        assert_eq!(catalog.asked.len(), 1);
    }

    #[test]
    fn migrated_when_target_has_revisions() {
        let rules = builtin_title_rules().expect("rules");
        let mut catalog = ScriptedCatalog::new(vec![Ok(true)]);
        let decision = resolve_title(
            &mut catalog,
            "LinguaLibre:Main Page",
            &rules,
            &FeatureSet::new(),
            no_wait(),
        );
        assert_eq!(
            decision,
            TitleDecision::Migrated {
                target: "Commons:Lingua Libre/Main Page".to_string()
            }
        );
        assert_eq!(catalog.asked, vec!["Commons:Lingua Libre/Main Page"]);
    }

    #[test]
    fn redirect_only_title_checks_original_title() {
        let rules = builtin_title_rules().expect("rules");
        let mut catalog = ScriptedCatalog::new(vec![Ok(true)]);
        let decision = resolve_title(
            &mut catalog,
            "User:Example",
            &rules,
            &FeatureSet::new(),
            no_wait(),
        );
        assert!(decision.is_migrated());
        assert_eq!(catalog.asked, vec!["User:Example"]);
    }

    #[test]
    fn unreachable_catalog_fails_open() {
        let rules = builtin_title_rules().expect("rules");
        let mut catalog = ScriptedCatalog::new(vec![
            Err(RemoteCheckError::transient("x", "connect")),
            Err(RemoteCheckError::transient("x", "connect")),
        ]);
        let decision = resolve_title(
            &mut catalog,
            "List:Fra/Animals",
            &rules,
            &FeatureSet::new(),
            no_wait(),
        );
        assert!(matches!(decision, TitleDecision::Unmigrated { .. }));
    }

    #[test]
    fn untouched_title_skips_the_network() {
        let rules = builtin_title_rules().expect("rules");
        let mut catalog = ScriptedCatalog::new(Vec::new());
        let decision = resolve_title(
            &mut catalog,
            "Main Page",
            &rules,
            &FeatureSet::new(),
            no_wait(),
        );
        assert_eq!(decision, TitleDecision::NotApplicable);
        assert!(catalog.asked.is_empty());
    }

    #[test]
    fn gateway_and_rate_limit_statuses_are_transient() {
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ] {
            assert!(is_retryable_status(status), "{status} should be retried");
            let error = status_error("T", status);
            assert!(error.transient);
            assert!(error.message.contains(status.as_str()));
        }
    }

    #[test]
    fn other_failure_statuses_are_permanent() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            assert!(!is_retryable_status(status), "{status} should not be retried");
            assert!(!status_error("T", status).transient);
        }
    }

    #[test]
    fn permanent_status_stops_after_one_attempt() {
        let mut catalog = ScriptedCatalog::new(vec![
            Err(status_error("T", StatusCode::NOT_FOUND)),
            Ok(true),
        ]);
        assert!(check_with_retry(&mut catalog, "T", no_wait()).is_err());
        assert_eq!(catalog.asked.len(), 1);
    }

    #[test]
    fn revision_query_detects_revisions() {
        let payload = json!({
            "batchcomplete": true,
            "query": {"pages": [{"pageid": 1, "ns": 4, "title": "T", "revisions": [{"revid": 9}]}]}
        });
        assert_eq!(parse_revision_query("T", payload), Ok(true));
    }

    #[test]
    fn revision_query_treats_missing_page_as_absent() {
        let payload = json!({"query": {"pages": [{"ns": 4, "title": "T", "missing": true}]}});
        assert_eq!(parse_revision_query("T", payload), Ok(false));
    }

    #[test]
    fn revision_query_classifies_rate_limit_error_as_transient() {
        let payload = json!({"error": {"code": "ratelimited", "info": "slow down"}});
        let error = parse_revision_query("T", payload).expect_err("must fail");
        assert!(error.transient);
        assert!(error.message.contains("ratelimited"));
    }
}
