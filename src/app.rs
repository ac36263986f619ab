use std::path::PathBuf;

use chrono::{Duration, Utc};
use log::{info, warn};
use thiserror::Error;

use crate::{
    domain::RepoRef,
    github::{GithubClient, GithubError},
    staleness::overdue_reviewers,
    template::{Template, TemplateError},
};

pub struct Config {
    /// Repository whose open pull requests are inspected.
    pub repo: RepoRef,
    /// Repository whose discussions receive the notifications.
    pub discussion_repo: RepoRef,
    pub category: String,
    pub title: Option<String>,
    pub max_wait: Duration,
    pub template_path: PathBuf,
    pub dry_run: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub reviewer: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub pull_requests: usize,
    pub deleted: usize,
    pub created: usize,
    pub notifications: Vec<Notification>,
}

/// One full notification cycle: fetch, filter, render, then replace the
/// discussions in the configured category.
pub fn run(client: &GithubClient, config: &Config) -> Result<RunSummary, RunError> {
    let template = Template::load(&config.template_path)?;
    if let Some(title) = &config.title {
        info!("Running notification cycle \"{title}\"");
    }

    let pull_requests = client.fetch_open_pull_requests(&config.repo)?;
    info!(
        "Fetched {} open pull requests from {}",
        pull_requests.len(),
        config.repo
    );

    let overdue = overdue_reviewers(&pull_requests, config.max_wait, Utc::now());
    let rendered_at = Utc::now();
    let notifications: Vec<Notification> = overdue
        .iter()
        .map(|(reviewer, prs)| Notification {
            reviewer: reviewer.clone(),
            title: discussion_title(reviewer),
            body: template.render(reviewer, prs, rendered_at),
        })
        .collect();
    info!("{} reviewers have overdue reviews", notifications.len());

    let mut summary = RunSummary {
        pull_requests: pull_requests.len(),
        ..RunSummary::default()
    };

    if config.dry_run {
        info!("Dry run; leaving discussions in {} untouched", config.discussion_repo);
        summary.notifications = notifications;
        return Ok(summary);
    }

    let repo = &config.discussion_repo;
    let category_id = client.discussion_category_id(repo, &config.category)?;

    let existing = client.discussion_ids(repo, &category_id)?;
    for discussion_id in &existing {
        info!("Deleting discussion {discussion_id}");
        client.delete_discussion(discussion_id)?;
    }
    summary.deleted = existing.len();

    if notifications.is_empty() {
        warn!("No overdue reviews; category \"{}\" left empty", config.category);
        return Ok(summary);
    }

    let repository_id = client.repository_id(repo)?;
    for notification in &notifications {
        let id = client.create_discussion(
            &repository_id,
            &category_id,
            &notification.title,
            &notification.body,
        )?;
        info!("Created discussion {id} for @{}", notification.reviewer);
        summary.created += 1;
    }
    summary.notifications = notifications;

    Ok(summary)
}

pub fn discussion_title(reviewer: &str) -> String {
    format!("Pending Reviews: @{reviewer}")
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Github(#[from] GithubError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staleness::max_wait_from_hours;
    use chrono::SecondsFormat;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::io::Write;

    fn hours_ago(hours: i64) -> String {
        (Utc::now() - Duration::hours(hours)).to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    fn template_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "@{{{{ username }}}}\n{{{{ pr_list }}}}").expect("write template");
        file
    }

    fn config(template_path: PathBuf, dry_run: bool) -> Config {
        let repo: RepoRef = "orgName/repo".parse().expect("repo");
        Config {
            discussion_repo: repo.clone(),
            repo,
            category: "test_category_name_1".into(),
            title: Some("title".into()),
            max_wait: max_wait_from_hours(20),
            template_path,
            dry_run,
        }
    }

    fn mock_pull_requests(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET)
                .path("/repos/orgName/repo/pulls")
                .query_param("page", "1");
            then.status(200).json_body(json!([{
                "html_url": "https://githuburl.pull/123",
                "number": 123,
                "title": "PR title 1",
                "user": { "login": "authorName" },
                "assignees": [{ "login": "reviewerName1" }, { "login": "reviewerName2" }]
            }, {
                "html_url": "https://githuburl.pull/234",
                "number": 234,
                "title": "PR title 2",
                "user": { "login": "authorName" },
                "assignees": [{ "login": "reviewerName1" }, { "login": "reviewerName2" }]
            }]));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/repos/orgName/repo/pulls")
                .query_param("page", "2");
            then.status(200).json_body(json!([]));
        });

        for (number, first, second) in [(123, 22, 56), (234, 23, 19)] {
            let path = format!("/repos/orgName/repo/issues/{number}/timeline");
            server.mock(|when, then| {
                when.method(GET).path(path.as_str()).query_param("page", "1");
                then.status(200).json_body(json!([
                    { "event": "created" },
                    {
                        "event": "assigned",
                        "assignee": { "login": "reviewerName1" },
                        "created_at": hours_ago(first)
                    },
                    {
                        "event": "assigned",
                        "assignee": { "login": "reviewerName2" },
                        "created_at": hours_ago(second)
                    }
                ]));
            });
            server.mock(|when, then| {
                when.method(GET).path(path.as_str()).query_param("page", "2");
                then.status(200).json_body(json!([]));
            });
        }
    }

    fn mock_categories(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_contains("query DiscussionCategories");
            then.status(200).json_body(json!({
                "data": { "repository": { "discussionCategories": { "nodes": [
                    { "id": "test_category_id_1", "name": "test_category_name_1" }
                ]}}}
            }));
        })
    }

    #[test]
    fn run_replaces_discussions_per_reviewer() {
        let server = MockServer::start();
        mock_pull_requests(&server);
        let categories = mock_categories(&server);
        let list = server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_contains("query CategoryDiscussions");
            then.status(200).json_body(json!({
                "data": { "repository": { "discussions": { "nodes": [
                    { "id": "test_discussion_id_1", "title": "Pending Reviews: User-1", "number": 65 }
                ]}}}
            }));
        });
        let delete = server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_contains("mutation DeleteDiscussion")
                .body_contains("test_discussion_id_1");
            then.status(200).json_body(json!({
                "data": { "deleteDiscussion": { "discussion": { "title": "Pending Reviews: User-1" } } }
            }));
        });
        let repository = server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_contains("query RepositoryId");
            then.status(200).json_body(json!({
                "data": { "repository": { "id": "test_repository_id" } }
            }));
        });
        let create_first = server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_contains("mutation CreateDiscussion")
                .body_contains("Pending Reviews: @reviewerName1");
            then.status(200).json_body(json!({
                "data": { "createDiscussion": { "discussion": { "id": "D_1" } } }
            }));
        });
        let create_second = server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_contains("mutation CreateDiscussion")
                .body_contains("Pending Reviews: @reviewerName2");
            then.status(200).json_body(json!({
                "data": { "createDiscussion": { "discussion": { "id": "D_2" } } }
            }));
        });

        let template = template_file();
        let client = GithubClient::new("githubTokenForApiRequest", &server.base_url()).expect("client");
        let summary = run(&client, &config(template.path().to_path_buf(), false)).expect("run");

        assert_eq!(summary.pull_requests, 2);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.created, 2);

        let reviewers: Vec<_> = summary
            .notifications
            .iter()
            .map(|n| n.reviewer.as_str())
            .collect();
        assert_eq!(reviewers, vec!["reviewerName1", "reviewerName2"]);

        let first = &summary.notifications[0].body;
        assert!(first.starts_with("@reviewerName1\n"));
        assert!(first.contains("[#123](https://githuburl.pull/123)"));
        assert!(first.contains("[#234](https://githuburl.pull/234)"));
        let second = &summary.notifications[1].body;
        assert!(second.contains("[#123](https://githuburl.pull/123) [Waiting for the last 2 days, 8 hours]"));
        assert!(!second.contains("#234"));

        categories.assert_hits(1);
        list.assert_hits(1);
        delete.assert_hits(1);
        repository.assert_hits(1);
        create_first.assert_hits(1);
        create_second.assert_hits(1);
    }

    #[test]
    fn run_without_existing_discussions_only_creates() {
        let server = MockServer::start();
        mock_pull_requests(&server);
        mock_categories(&server);
        server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_contains("query CategoryDiscussions");
            then.status(200).json_body(json!({
                "data": { "repository": { "discussions": { "nodes": [] } } }
            }));
        });
        let delete = server.mock(|when, then| {
            when.method(POST).path("/graphql").body_contains("mutation DeleteDiscussion");
            then.status(200).json_body(json!({ "data": {} }));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_contains("query RepositoryId");
            then.status(200).json_body(json!({
                "data": { "repository": { "id": "test_repository_id" } }
            }));
        });
        let create = server.mock(|when, then| {
            when.method(POST).path("/graphql").body_contains("mutation CreateDiscussion");
            then.status(200).json_body(json!({
                "data": { "createDiscussion": { "discussion": { "id": "D_1" } } }
            }));
        });

        let template = template_file();
        let client = GithubClient::new("token", &server.base_url()).expect("client");
        let summary = run(&client, &config(template.path().to_path_buf(), false)).expect("run");

        assert_eq!(summary.deleted, 0);
        assert_eq!(summary.created, 2);
        delete.assert_hits(0);
        create.assert_hits(2);
    }

    #[test]
    fn run_fails_when_category_is_missing() {
        let server = MockServer::start();
        mock_pull_requests(&server);
        mock_categories(&server);
        let mutations = server.mock(|when, then| {
            when.method(POST).path("/graphql").body_contains("mutation");
            then.status(200).json_body(json!({ "data": {} }));
        });

        let template = template_file();
        let client = GithubClient::new("token", &server.base_url()).expect("client");
        let mut config = config(template.path().to_path_buf(), false);
        config.category = "Reminders".into();

        let err = run(&client, &config).expect_err("missing category");
        assert!(matches!(
            err,
            RunError::Github(GithubError::CategoryNotFound { .. })
        ));
        assert!(err.to_string().contains("Reminders"));
        mutations.assert_hits(0);
    }

    #[test]
    fn run_fails_before_any_request_when_template_is_missing() {
        let server = MockServer::start();
        let any_request = server.mock(|when, then| {
            when.path_contains("/");
            then.status(200).json_body(json!([]));
        });

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("PENDING_REVIEW_NOTIFICATION_TEMPLATE.md");
        let client = GithubClient::new("token", &server.base_url()).expect("client");

        let err = run(&client, &config(path.clone(), false)).expect_err("missing template");
        assert!(matches!(err, RunError::Template(TemplateError::Missing(_))));
        assert!(err.to_string().contains(&path.display().to_string()));
        any_request.assert_hits(0);
    }

    #[test]
    fn dry_run_renders_without_touching_discussions() {
        let server = MockServer::start();
        mock_pull_requests(&server);
        let graphql = server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200).json_body(json!({ "data": {} }));
        });

        let template = template_file();
        let client = GithubClient::new("token", &server.base_url()).expect("client");
        let summary = run(&client, &config(template.path().to_path_buf(), true)).expect("run");

        assert_eq!(summary.notifications.len(), 2);
        assert_eq!(summary.notifications[0].title, "Pending Reviews: @reviewerName1");
        assert_eq!(summary.created, 0);
        graphql.assert_hits(0);
    }
}
