use chrono::{DateTime, Duration, Utc};
use log::debug;

use crate::domain::{PullRequest, ReviewerToOverduePrs};

/// Groups pull requests under every assignee whose wait has reached `max_wait`.
///
/// The author is never counted as a pending reviewer, and assignees without an
/// assignment timestamp are not actionable yet.
pub fn overdue_reviewers(
    pull_requests: &[PullRequest],
    max_wait: Duration,
    now: DateTime<Utc>,
) -> ReviewerToOverduePrs {
    let mut overdue = ReviewerToOverduePrs::new();

    for pull_request in pull_requests.iter().filter(|pr| pr.is_reviewer_assigned()) {
        for assignee in pull_request.pending_assignees() {
            let Some(waiting) = assignee.waiting_time(now) else {
                continue;
            };
            if waiting >= max_wait {
                debug!(
                    "#{} \"{}\" waiting on @{} for {}h",
                    pull_request.number,
                    pull_request.title,
                    assignee.username,
                    waiting.num_hours()
                );
                overdue
                    .entry(assignee.username.clone())
                    .or_default()
                    .push(pull_request.clone());
            }
        }
    }

    overdue
}

pub fn max_wait_from_hours(hours: u32) -> Duration {
    Duration::hours(i64::from(hours))
}
