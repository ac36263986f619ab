use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::{
    Method,
    blocking::{Client, RequestBuilder},
    header::{ACCEPT, USER_AGENT},
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use thiserror::Error;

use crate::domain::{Assignee, PullRequest, RepoRef};

pub const GH_API: &str = "https://api.github.com";
const USER_AGENT_HEADER: &str = "review-notifier/0.1";
const PER_PAGE: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const REPOSITORY_ID_QUERY: &str = r#"
    query RepositoryId($owner: String!, $name: String!) {
        repository(owner: $owner, name: $name) {
            id
        }
    }
"#;

const DISCUSSION_CATEGORIES_QUERY: &str = r#"
    query DiscussionCategories($owner: String!, $name: String!) {
        repository(owner: $owner, name: $name) {
            discussionCategories(first: 10) {
                nodes {
                    id
                    name
                }
            }
        }
    }
"#;

const DISCUSSIONS_QUERY: &str = r#"
    query CategoryDiscussions($owner: String!, $name: String!, $categoryId: ID!) {
        repository(owner: $owner, name: $name) {
            discussions(categoryId: $categoryId, last: 10) {
                nodes {
                    id
                    title
                    number
                }
            }
        }
    }
"#;

const DELETE_DISCUSSION_MUTATION: &str = r#"
    mutation DeleteDiscussion($discussionId: ID!) {
        deleteDiscussion(input: {id: $discussionId}) {
            discussion {
                title
            }
        }
    }
"#;

const CREATE_DISCUSSION_MUTATION: &str = r#"
    mutation CreateDiscussion($repositoryId: ID!, $categoryId: ID!, $title: String!, $body: String!) {
        createDiscussion(input: {repositoryId: $repositoryId, categoryId: $categoryId, title: $title, body: $body}) {
            discussion {
                id
            }
        }
    }
"#;

/// Authenticated GitHub client. Holding one proves a token was supplied.
pub struct GithubClient {
    http: Client,
    token: String,
    api_base: String,
}

impl GithubClient {
    pub fn new(token: &str, api_base: &str) -> Result<Self, GithubError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(GithubError::MissingToken);
        }

        let http = Client::builder()
            .user_agent(USER_AGENT_HEADER)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            token: token.to_owned(),
            api_base: api_base.trim_end_matches('/').to_owned(),
        })
    }

    /// Fetches every open pull request with assignment timestamps resolved from
    /// the issue timeline.
    pub fn fetch_open_pull_requests(&self, repo: &RepoRef) -> Result<Vec<PullRequest>, GithubError> {
        let url = format!("{}/repos/{}/{}/pulls", self.api_base, repo.owner, repo.name);
        info!("Fetching open pull requests of {repo}");
        let listed: Vec<PullRequestResponse> = self.fetch_all_pages(&url, &[("state", "open")])?;

        listed
            .into_iter()
            .map(|item| {
                let events = self.fetch_timeline(repo, item.number)?;
                let assignees = correlate_assignees(
                    item.number,
                    item.assignees.into_iter().map(|user| user.login).collect(),
                    &events,
                )?;
                Ok(PullRequest {
                    url: item.html_url,
                    number: item.number,
                    author: item.user.login,
                    title: item.title,
                    assignees,
                })
            })
            .collect()
    }

    fn fetch_timeline(&self, repo: &RepoRef, number: u64) -> Result<Vec<TimelineEvent>, GithubError> {
        let url = format!(
            "{}/repos/{}/{}/issues/{number}/timeline",
            self.api_base, repo.owner, repo.name
        );
        info!("Fetching PR #{number} timeline");
        self.fetch_all_pages(&url, &[])
    }

    /// Walks `page=1,2,..` until the endpoint answers with an empty page.
    fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, GithubError> {
        let mut items = Vec::new();
        let mut page: u32 = 1;
        loop {
            debug!("GET {url} page {page}");
            let batch: Vec<T> = self
                .request(Method::GET, url)
                .query(query)
                .query(&[("page", page), ("per_page", PER_PAGE)])
                .send()?
                .error_for_status()?
                .json()?;

            if batch.is_empty() {
                break;
            }
            items.extend(batch);
            page += 1;
        }
        Ok(items)
    }

    pub fn repository_id(&self, repo: &RepoRef) -> Result<String, GithubError> {
        let repository: RepositoryIdNode = self.query_repository(repo, REPOSITORY_ID_QUERY, json!({}))?;
        Ok(repository.id)
    }

    pub fn discussion_category_id(&self, repo: &RepoRef, category: &str) -> Result<String, GithubError> {
        let repository: CategoriesNode =
            self.query_repository(repo, DISCUSSION_CATEGORIES_QUERY, json!({}))?;

        repository
            .discussion_categories
            .nodes
            .into_iter()
            .find(|node| node.name == category)
            .map(|node| node.id)
            .ok_or_else(|| GithubError::CategoryNotFound {
                repo: repo.clone(),
                category: category.to_owned(),
            })
    }

    /// Ids of the ten most recent discussions in the category.
    pub fn discussion_ids(&self, repo: &RepoRef, category_id: &str) -> Result<Vec<String>, GithubError> {
        let repository: DiscussionsNode = self.query_repository(
            repo,
            DISCUSSIONS_QUERY,
            json!({ "categoryId": category_id }),
        )?;

        let ids: Vec<String> = repository
            .discussions
            .nodes
            .into_iter()
            .flatten()
            .map(|node| {
                debug!("Found discussion #{} \"{}\"", node.number, node.title);
                node.id
            })
            .collect();

        if ids.is_empty() {
            info!("No existing discussions found");
        }
        Ok(ids)
    }

    pub fn delete_discussion(&self, discussion_id: &str) -> Result<(), GithubError> {
        let _: Value = self.graphql(
            DELETE_DISCUSSION_MUTATION,
            json!({ "discussionId": discussion_id }),
        )?;
        Ok(())
    }

    /// Creates a discussion and returns its node id.
    pub fn create_discussion(
        &self,
        repository_id: &str,
        category_id: &str,
        title: &str,
        body: &str,
    ) -> Result<String, GithubError> {
        let data: CreateDiscussionData = self.graphql(
            CREATE_DISCUSSION_MUTATION,
            json!({
                "repositoryId": repository_id,
                "categoryId": category_id,
                "title": title,
                "body": body,
            }),
        )?;
        Ok(data.create_discussion.discussion.id)
    }

    fn query_repository<T: DeserializeOwned>(
        &self,
        repo: &RepoRef,
        query: &str,
        mut variables: Value,
    ) -> Result<T, GithubError> {
        variables["owner"] = json!(repo.owner);
        variables["name"] = json!(repo.name);

        let data: RepositoryData<T> = self.graphql(query, variables).map_err(|err| match err {
            GithubError::GraphQl { ref kinds, .. } if kinds.iter().any(|kind| kind == "NOT_FOUND") => {
                GithubError::RepositoryNotFound(repo.clone())
            }
            other => other,
        })?;

        data.repository
            .ok_or_else(|| GithubError::RepositoryNotFound(repo.clone()))
    }

    fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, GithubError> {
        let url = format!("{}/graphql", self.api_base);
        let response: GraphQlResponse<T> = self
            .request(Method::POST, &url)
            .json(&json!({ "query": query, "variables": variables }))
            .send()?
            .error_for_status()?
            .json()?;

        if !response.errors.is_empty() {
            return Err(GithubError::GraphQl {
                message: response
                    .errors
                    .iter()
                    .map(|error| error.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
                kinds: response
                    .errors
                    .into_iter()
                    .filter_map(|error| error.kind)
                    .collect(),
            });
        }

        response.data.ok_or(GithubError::MissingData)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(USER_AGENT, USER_AGENT_HEADER)
            .header(ACCEPT, "application/vnd.github+json")
            .bearer_auth(&self.token)
    }
}

/// Attaches the timestamp of the matching "assigned" event to each login.
/// Events are applied in order, so a later re-assignment overrides an earlier one.
fn correlate_assignees(
    number: u64,
    logins: Vec<String>,
    events: &[TimelineEvent],
) -> Result<Vec<Assignee>, GithubError> {
    let mut assigned_on: HashMap<&str, DateTime<Utc>> = HashMap::new();

    for event in events.iter().filter(|event| event.event == "assigned") {
        let login = event
            .assignee
            .as_ref()
            .map(|user| user.login.as_str())
            .ok_or(GithubError::MalformedEvent {
                number,
                field: "assignee",
            })?;
        if !logins.iter().any(|candidate| candidate == login) {
            continue;
        }

        let raw = event
            .created_at
            .as_deref()
            .ok_or(GithubError::MalformedEvent {
                number,
                field: "created_at",
            })?;
        let timestamp = DateTime::parse_from_rfc3339(raw)
            .map_err(|source| GithubError::Timestamp {
                number,
                value: raw.to_owned(),
                source,
            })?
            .with_timezone(&Utc);

        assigned_on.insert(login, timestamp);
    }

    Ok(logins
        .into_iter()
        .map(|login| {
            let timestamp = assigned_on.get(login.as_str()).copied();
            Assignee::new(login, timestamp)
        })
        .collect())
}

#[derive(Error, Debug)]
pub enum GithubError {
    #[error("GitHub API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Must provide a valid GitHub personal access token")]
    MissingToken,
    #[error("Repository {0} doesn't exist")]
    RepositoryNotFound(RepoRef),
    #[error("Discussion category \"{category}\" is missing in {repo}")]
    CategoryNotFound { repo: RepoRef, category: String },
    #[error("GitHub GraphQL request failed: {message}")]
    GraphQl { message: String, kinds: Vec<String> },
    #[error("GitHub GraphQL response carried no data")]
    MissingData,
    #[error("Assigned event on #{number} is missing `{field}`")]
    MalformedEvent { number: u64, field: &'static str },
    #[error("Invalid timestamp `{value}` on #{number}: {source}")]
    Timestamp {
        number: u64,
        value: String,
        source: chrono::ParseError,
    },
}

// Response payloads ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: u64,
    html_url: String,
    title: String,
    user: GitHubUser,
    #[serde(default)]
    assignees: Vec<GitHubUser>,
}

#[derive(Debug, Deserialize)]
struct TimelineEvent {
    event: String,
    assignee: Option<GitHubUser>,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorEntry {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryData<T> {
    repository: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RepositoryIdNode {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoriesNode {
    discussion_categories: Nodes<CategoryNode>,
}

#[derive(Debug, Deserialize)]
struct CategoryNode {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DiscussionsNode {
    discussions: Nodes<Option<DiscussionNode>>,
}

#[derive(Debug, Deserialize)]
struct DiscussionNode {
    id: String,
    title: String,
    number: u64,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDiscussionData {
    create_discussion: CreatedDiscussion,
}

#[derive(Debug, Deserialize)]
struct CreatedDiscussion {
    discussion: CreatedDiscussionNode,
}

#[derive(Debug, Deserialize)]
struct CreatedDiscussionNode {
    id: String,
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------
