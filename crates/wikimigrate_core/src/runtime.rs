use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::CONFIG_FILENAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }

    /// Resolve a path taken from the config file against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        absolutize(path, &self.project_root)
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = if let Some(path) = overrides.project_root.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("WIKIMIGRATE_PROJECT_ROOT")) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        (context.cwd.clone(), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("WIKIMIGRATE_CONFIG")) {
        (absolutize(Path::new(&value), &project_root), ValueSource::Env)
    } else {
        (project_root.join(CONFIG_FILENAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        project_root,
        config_path,
        root_source,
        config_source,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{PathOverrides, ResolutionContext, ValueSource, resolve_paths_with_lookup};

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let from_flag = temp.path().join("flag-root");
        let overrides = PathOverrides {
            project_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext {
            cwd: temp.path().join("cwd"),
        };
        let env = HashMap::from([(
            "WIKIMIGRATE_PROJECT_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert_eq!(resolved.config_path, from_flag.join("wikimigrate.toml"));
        assert_eq!(resolved.config_source, ValueSource::Default);
    }

    #[test]
    fn resolve_paths_reads_env_and_relative_config() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let env = HashMap::from([
            ("WIKIMIGRATE_PROJECT_ROOT".to_string(), "project".to_string()),
            ("WIKIMIGRATE_CONFIG".to_string(), "conf/migrate.toml".to_string()),
        ]);
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |key| {
            env.get(key).cloned()
        })
        .expect("resolve paths");
        assert_eq!(resolved.project_root, temp.path().join("project"));
        assert_eq!(resolved.root_source, ValueSource::Env);
        assert_eq!(
            resolved.config_path,
            temp.path().join("project").join("conf/migrate.toml")
        );
        assert!(resolved.diagnostics().contains("(env)"));
    }

    #[test]
    fn resolve_joins_relative_paths_to_project_root() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve");
        assert_eq!(resolved.root_source, ValueSource::Default);
        assert_eq!(
            resolved.resolve(Path::new("rules/content.json")),
            temp.path().join("rules/content.json")
        );
    }
}
