use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use thiserror::Error;

use crate::domain::PullRequest;

pub const DEFAULT_TEMPLATE_PATH: &str = ".github/PENDING_REVIEW_NOTIFICATION_TEMPLATE.md";

// `{{ username }}` and `{{ pr_list }}`, whitespace inside the braces ignored.
const PLACEHOLDER_PATTERN: &str = r"\{\{\s*(username|pr_list)\s*\}\}";

/// Notification body template loaded once per run.
pub struct Template {
    text: String,
    placeholder: Regex,
}

impl Template {
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(TemplateError::Missing(path.to_path_buf()));
            }
            Err(err) => {
                return Err(TemplateError::Io {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };
        Self::from_text(text)
    }

    pub fn from_text(text: impl Into<String>) -> Result<Self, TemplateError> {
        Ok(Self {
            text: text.into(),
            placeholder: Regex::new(PLACEHOLDER_PATTERN)?,
        })
    }

    /// Renders the message for `reviewer`, computing each waiting time against `now`.
    pub fn render(&self, reviewer: &str, pull_requests: &[PullRequest], now: DateTime<Utc>) -> String {
        let pr_list = pull_requests
            .iter()
            .filter_map(|pr| {
                let waiting = pr.get_assignee(reviewer)?.waiting_time_phrase(now)?;
                Some(format!(
                    "- [#{}]({}) [Waiting for the last {waiting}]",
                    pr.number, pr.url
                ))
            })
            .collect::<Vec<_>>()
            .join("\n");

        // Single pass, so substituted values are never expanded again.
        self.placeholder
            .replace_all(&self.text, |caps: &Captures<'_>| match &caps[1] {
                "username" => reviewer.to_owned(),
                _ => pr_list.clone(),
            })
            .into_owned()
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Please add a template file at: {}", .0.display())]
    Missing(PathBuf),
    #[error("Failed to read template {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("Invalid placeholder pattern: {0}")]
    Pattern(#[from] regex::Error),
}
