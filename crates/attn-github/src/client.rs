use std::sync::Mutex;

use attn_core::types::{Heat, Pr, PrReason, PrRole, PrState};
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use serde::Deserialize;

use crate::error::{GitHubError, Result};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// One host's GitHub (or GitHub Enterprise) client. Grounded on
/// `at-integrations::github::client::GitHubClient`'s octocrab wrapper,
/// generalized from a single configured owner/repo to a per-login
/// cross-repo search, since the dashboard tracks every PR the
/// reviewer authors or is requested on, not one fixed repository.
pub struct GitHubHostClient {
    host: String,
    login: String,
    octocrab: Octocrab,
    rate_limits: Mutex<std::collections::HashMap<String, RateLimitInfo>>,
}

impl GitHubHostClient {
    pub fn new(host: impl Into<String>, login: impl Into<String>, token: &str, base_url: Option<&str>) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(token.to_string());
        if let Some(url) = base_url {
            builder = builder.base_uri(url).map_err(GitHubError::Api)?;
        }
        let octocrab = builder.build().map_err(GitHubError::Api)?;
        Ok(Self { host: host.into(), login: login.into(), octocrab, rate_limits: Mutex::new(std::collections::HashMap::new()) })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// List every open PR the configured login authored or is a
    /// requested reviewer on, across every repo visible to the token.
    pub async fn fetch_all(&self) -> Result<Vec<Pr>> {
        let mut prs = Vec::new();
        prs.extend(self.search(&format!("is:pr is:open author:{}", self.login), PrRole::Author).await?);
        prs.extend(self.search(&format!("is:pr is:open review-requested:{}", self.login), PrRole::Reviewer).await?);
        self.record_rate_limit("search").await;
        Ok(prs)
    }

    async fn search(&self, query: &str, role: PrRole) -> Result<Vec<Pr>> {
        let route = format!("search/issues?q={}&per_page=50", percent_encode(query));
        let page: SearchResponse = self.octocrab.get(route, None::<&()>).await.map_err(GitHubError::Api)?;
        let now = Utc::now();
        Ok(page
            .items
            .into_iter()
            .filter_map(|item| {
                let (owner, repo) = parse_repository_url(&item.repository_url)?;
                Some(Pr {
                    host: self.host.clone(),
                    owner,
                    repo,
                    number: item.number,
                    title: item.title,
                    url: item.html_url,
                    role,
                    state: if item.draft.unwrap_or(false) { PrState::Draft } else { PrState::Waiting },
                    reason: PrReason::Unknown,
                    heat: Heat::Hot,
                    last_updated: item.updated_at,
                    last_polled: now,
                    head_sha: String::new(),
                    head_branch: String::new(),
                    ci_status: None,
                    review_status: None,
                    mergeable: None,
                    mergeable_state: None,
                    muted: false,
                })
            })
            .collect())
    }

    /// Fetch full detail for one PR (head sha, mergeable state) via
    /// the typed pulls endpoint, the same call the teacher uses in
    /// `pull_requests::get_pull_request`.
    pub async fn fetch_pr_details(&self, owner: &str, repo: &str, number: u64) -> Result<PrDetail> {
        let pr = self.octocrab.pulls(owner, repo).get(number).await.map_err(GitHubError::Api)?;
        self.record_rate_limit("core").await;

        let state = if pr.merged_at.is_some() {
            PrState::Merged
        } else if matches!(pr.state, Some(octocrab::models::IssueState::Closed)) {
            PrState::Closed
        } else if pr.draft.unwrap_or(false) {
            PrState::Draft
        } else {
            PrState::Waiting
        };

        let mergeable_state = pr.mergeable_state.map(|s| format!("{:?}", s).to_lowercase());
        let reason = match mergeable_state.as_deref() {
            Some("clean") => PrReason::ReadyToMerge,
            Some("dirty") | Some("behind") => PrReason::ChangesRequested,
            Some("blocked") => PrReason::AwaitingReview,
            Some("unstable") => PrReason::CiFailing,
            _ if pr.draft.unwrap_or(false) => PrReason::AwaitingReview,
            _ => PrReason::Unknown,
        };

        Ok(PrDetail {
            state,
            reason,
            head_sha: pr.head.sha,
            head_branch: pr.head.ref_field,
            mergeable: pr.mergeable,
            mergeable_state,
            title: pr.title.unwrap_or_default(),
            url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
        })
    }

    pub async fn is_rate_limited(&self, resource: &str) -> bool {
        match self.get_rate_limit(resource).await {
            Some(info) => info.remaining == 0 && info.reset_at > Utc::now(),
            None => false,
        }
    }

    pub async fn get_rate_limit(&self, resource: &str) -> Option<RateLimitInfo> {
        self.rate_limits.lock().unwrap_or_else(|e| e.into_inner()).get(resource).copied()
    }

    /// Refreshes the cached rate-limit snapshot for `resource` from
    /// GitHub's own `/rate_limit` endpoint.
    async fn record_rate_limit(&self, resource: &str) {
        let Ok(limits) = self.octocrab.ratelimit().get().await else { return };
        let bucket = match resource {
            "search" => limits.resources.search,
            _ => limits.resources.core,
        };
        let reset_at = DateTime::from_timestamp(bucket.reset as i64, 0).unwrap_or_else(Utc::now);
        let info = RateLimitInfo { limit: bucket.limit as u32, remaining: bucket.remaining as u32, reset_at };
        self.rate_limits.lock().unwrap_or_else(|e| e.into_inner()).insert(resource.to_string(), info);
    }
}

pub struct PrDetail {
    pub state: PrState,
    pub reason: PrReason,
    pub head_sha: String,
    pub head_branch: String,
    pub mergeable: Option<bool>,
    pub mergeable_state: Option<String>,
    pub title: String,
    pub url: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    number: u64,
    title: String,
    html_url: String,
    repository_url: String,
    updated_at: DateTime<Utc>,
    draft: Option<bool>,
}

fn parse_repository_url(url: &str) -> Option<(String, String)> {
    let mut segments = url.rsplit('/');
    let repo = segments.next()?.to_string();
    let owner = segments.next()?.to_string();
    Some((owner, repo))
}

fn percent_encode(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            ' ' => "+".to_string(),
            ':' => "%3A".to_string(),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => c.to_string(),
            c => format!("%{:02X}", c as u32),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_and_repo_from_repository_url() {
        let url = "https://api.github.com/repos/acme/widgets";
        assert_eq!(parse_repository_url(url), Some(("acme".to_string(), "widgets".to_string())));
    }

    #[test]
    fn rejects_url_without_enough_segments() {
        assert_eq!(parse_repository_url("widgets"), None);
    }

    #[test]
    fn percent_encodes_search_query() {
        let encoded = percent_encode("is:pr is:open author:alice");
        assert_eq!(encoded, "is%3Apr+is%3Aopen+author%3Aalice");
    }
}
