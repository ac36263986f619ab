use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

// Domain data structures shared across modules.

/// An `owner/name` repository reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl FromStr for RepoRef {
    type Err = InvalidRepoRef;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidRepoRef(raw.to_owned());
        let (owner, name) = raw.trim().split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }
        Ok(Self {
            owner: owner.to_owned(),
            name: name.to_owned(),
        })
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Error)]
#[error("expected a repository in the form owner/name, got `{0}`")]
pub struct InvalidRepoRef(String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignee {
    pub username: String,
    /// Set only when a matching "assigned" timeline event was found.
    pub assigned_on: Option<DateTime<Utc>>,
}

impl Assignee {
    pub fn new(username: impl Into<String>, assigned_on: Option<DateTime<Utc>>) -> Self {
        Self {
            username: username.into(),
            assigned_on,
        }
    }

    pub fn waiting_time(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.assigned_on.map(|assigned_on| now - assigned_on)
    }

    pub fn waiting_time_phrase(&self, now: DateTime<Utc>) -> Option<String> {
        self.waiting_time(now).map(describe_duration)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullRequest {
    pub url: String,
    pub number: u64,
    pub author: String,
    pub title: String,
    pub assignees: Vec<Assignee>,
}

impl PullRequest {
    pub fn is_reviewer_assigned(&self) -> bool {
        !self.assignees.is_empty()
    }

    pub fn get_assignee(&self, username: &str) -> Option<&Assignee> {
        self.assignees
            .iter()
            .find(|assignee| assignee.username == username)
    }

    /// Assignees other than the author; self-review is never pending.
    pub fn pending_assignees(&self) -> impl Iterator<Item = &Assignee> {
        self.assignees
            .iter()
            .filter(move |assignee| assignee.username != self.author)
    }
}

/// Reviewer login to the pull requests they are overdue on, in fetch order.
pub type ReviewerToOverduePrs = BTreeMap<String, Vec<PullRequest>>;

fn describe_duration(elapsed: Duration) -> String {
    let days = elapsed.num_days();
    let hours = elapsed.num_hours() - days * 24;

    let mut parts = Vec::with_capacity(2);
    if days > 0 {
        parts.push(pluralize(days, "day"));
    }
    if hours > 0 {
        parts.push(pluralize(hours, "hour"));
    }

    if parts.is_empty() {
        "less than an hour".to_owned()
    } else {
        parts.join(", ")
    }
}

fn pluralize(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("{count} {unit}")
    } else {
        format!("{count} {unit}s")
    }
}
