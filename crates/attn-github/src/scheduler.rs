use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use attn_core::config::PrRefreshConfig;
use attn_core::types::{Heat, Pr};
use attn_core::Store;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{GitHubError, Result};
use crate::events::PrEventSink;
use crate::registry::GitHubRegistry;

/// Two cadences sharing a per-host rate-limit discipline: a list poll
/// that merges-while-preserving skipped hosts, and a heat-driven
/// detail refresh. New — grounded on `at-daemon::scheduler::TaskScheduler`'s
/// shape (a small struct owning a store handle, driving periodic work
/// off a priority/heat ordering) rather than its bead-specific logic.
pub struct PrScheduler {
    store: Arc<Store>,
    registry: Arc<GitHubRegistry>,
    sink: Arc<dyn PrEventSink>,
    config: PrRefreshConfig,
    cycle: AtomicU64,
}

impl PrScheduler {
    pub fn new(store: Arc<Store>, registry: Arc<GitHubRegistry>, sink: Arc<dyn PrEventSink>, config: PrRefreshConfig) -> Self {
        Self { store, registry, sink, config, cycle: AtomicU64::new(0) }
    }

    /// Runs the list-poll + detail-refresh cycle on `list_poll_secs`,
    /// firing immediately on the first tick (tokio's `interval`
    /// default), until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: attn_harness::ShutdownSignal) {
        let mut stop_rx = shutdown.subscribe();
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.list_poll_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => self.cycle_once().await,
                _ = stop_rx.recv() => {
                    shutdown.confirm_drained();
                    break;
                }
            }
        }
    }

    async fn cycle_once(&self) {
        if let Err(e) = self.list_poll().await {
            warn!(error = %e, "PR list poll failed");
        }
        if let Err(e) = self.detail_refresh().await {
            warn!(error = %e, "PR detail refresh failed");
        }
    }

    pub async fn list_poll(&self) -> Result<()> {
        let mut earliest_reset: Option<DateTime<Utc>> = None;
        let mut any_rate_limited = false;

        for host in self.registry.hosts() {
            let Some(client) = self.registry.get(&host) else { continue };

            if client.is_rate_limited("search").await {
                any_rate_limited = true;
                if let Some(info) = client.get_rate_limit("search").await {
                    earliest_reset = Some(earliest_reset.map_or(info.reset_at, |e| e.min(info.reset_at)));
                }
                continue;
            }

            match client.fetch_all().await {
                Ok(prs) => {
                    if let Err(e) = self.store.replace_host_prs(&host, prs).await {
                        warn!(host = %host, error = %e, "failed to persist list poll results");
                    }
                }
                Err(GitHubError::RateLimited { reset_at, .. }) => {
                    any_rate_limited = true;
                    earliest_reset = Some(earliest_reset.map_or(reset_at, |e| e.min(reset_at)));
                }
                Err(e) => {
                    warn!(host = %host, error = %e, "list poll failed for host, preserving existing PRs");
                }
            }
        }

        self.sink.prs_updated();
        if any_rate_limited {
            if let Some(reset_at) = earliest_reset {
                self.sink.rate_limited("search", reset_at);
            }
        }
        Ok(())
    }

    pub async fn detail_refresh(&self) -> Result<()> {
        self.store.decay_all_pr_heat().await?;
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst);

        let prs = self.store.list_prs().await?;
        let mut earliest_reset: Option<DateTime<Utc>> = None;
        let mut rate_limited_hosts: HashSet<String> = HashSet::new();

        for pr in prs {
            if rate_limited_hosts.contains(&pr.host) || !self.needs_refresh(pr.heat, cycle) {
                continue;
            }
            let Some(client) = self.registry.get(&pr.host) else { continue };

            if client.is_rate_limited("core").await {
                rate_limited_hosts.insert(pr.host.clone());
                if let Some(info) = client.get_rate_limit("core").await {
                    earliest_reset = Some(earliest_reset.map_or(info.reset_at, |e| e.min(info.reset_at)));
                }
                continue;
            }

            match client.fetch_pr_details(&pr.owner, &pr.repo, pr.number).await {
                Ok(detail) => {
                    let changed_sha = !detail.head_sha.is_empty() && detail.head_sha != pr.head_sha;
                    let mut updated = pr.clone();
                    updated.state = detail.state;
                    updated.reason = detail.reason;
                    updated.head_sha = detail.head_sha;
                    updated.head_branch = detail.head_branch;
                    updated.mergeable = detail.mergeable;
                    updated.mergeable_state = detail.mergeable_state;
                    updated.title = detail.title;
                    updated.url = detail.url;
                    updated.last_polled = Utc::now();
                    if changed_sha {
                        updated.heat = Heat::Hot;
                    }
                    self.store.upsert_pr(updated).await?;
                }
                Err(GitHubError::RateLimited { reset_at, .. }) => {
                    rate_limited_hosts.insert(pr.host.clone());
                    earliest_reset = Some(earliest_reset.map_or(reset_at, |e| e.min(reset_at)));
                }
                Err(e) => {
                    warn!(pr = %pr.id(), error = %e, "detail refresh failed");
                }
            }
        }

        self.sink.prs_updated();
        if let Some(reset_at) = earliest_reset {
            self.sink.rate_limited("core", reset_at);
        }
        Ok(())
    }

    fn needs_refresh(&self, heat: Heat, cycle: u64) -> bool {
        match heat {
            Heat::Hot => true,
            Heat::Warm => cycle % self.config.warm_every_n_cycles.max(1) as u64 == 0,
            Heat::Cold => cycle % self.config.cold_every_n_cycles.max(1) as u64 == 0,
        }
    }

    /// Fired on every new WebSocket subscriber: asynchronously refresh
    /// every visible (non-muted, non-muted-repo) PR.
    pub async fn refresh_all_visible(&self) -> Result<()> {
        let muted_repos: HashSet<String> = self
            .store
            .list_repo_states()
            .await?
            .into_iter()
            .filter(|r| r.muted)
            .map(|r| format!("{}/{}", r.owner, r.repo))
            .collect();

        for pr in self.store.list_prs().await? {
            if pr.muted || muted_repos.contains(&pr.repo_key()) {
                continue;
            }
            self.refresh_one(&pr).await;
        }
        Ok(())
    }

    /// `pr_visited` / unmute-only `mute_pr` / `mute_repo` trigger: mark
    /// hot and fetch detail immediately.
    pub async fn refresh_immediate(&self, pr_id: &str) -> Result<()> {
        self.store.touch_pr_hot(pr_id).await?;
        let Some(pr) = self.store.get_pr(pr_id).await? else { return Ok(()) };
        self.refresh_one(&pr).await;
        Ok(())
    }

    async fn refresh_one(&self, pr: &Pr) {
        let Some(client) = self.registry.get(&pr.host) else { return };
        if client.is_rate_limited("core").await {
            return;
        }
        match client.fetch_pr_details(&pr.owner, &pr.repo, pr.number).await {
            Ok(detail) => {
                let mut updated = pr.clone();
                updated.state = detail.state;
                updated.reason = detail.reason;
                updated.head_sha = detail.head_sha;
                updated.head_branch = detail.head_branch;
                updated.mergeable = detail.mergeable;
                updated.mergeable_state = detail.mergeable_state;
                updated.title = detail.title;
                updated.url = detail.url;
                updated.last_polled = Utc::now();
                match self.store.upsert_pr(updated).await {
                    Ok(()) => self.sink.prs_updated(),
                    Err(e) => warn!(pr = %pr.id(), error = %e, "failed to persist immediate refresh"),
                }
            }
            Err(e) => warn!(pr = %pr.id(), error = %e, "immediate detail refresh failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attn_core::config::PrRefreshConfig;
    use attn_core::types::{PrReason, PrRole, PrState};
    use attn_core::Store;

    fn sample_pr(host: &str, number: u64) -> Pr {
        let now = Utc::now();
        Pr {
            host: host.to_string(),
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            number,
            title: "t".to_string(),
            url: "https://example.com".to_string(),
            role: PrRole::Author,
            state: PrState::Waiting,
            reason: PrReason::Unknown,
            heat: Heat::Cold,
            last_updated: now,
            last_polled: now,
            head_sha: "abc".to_string(),
            head_branch: "feature".to_string(),
            ci_status: None,
            review_status: None,
            mergeable: None,
            mergeable_state: None,
            muted: false,
        }
    }

    fn scheduler(store: Arc<Store>) -> PrScheduler {
        PrScheduler::new(store, Arc::new(GitHubRegistry::new()), Arc::new(crate::events::NullSink), PrRefreshConfig::default())
    }

    #[tokio::test]
    async fn hot_prs_always_need_refresh() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let s = scheduler(store);
        assert!(s.needs_refresh(Heat::Hot, 0));
        assert!(s.needs_refresh(Heat::Hot, 7));
    }

    #[tokio::test]
    async fn warm_prs_refresh_on_the_configured_cadence() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let s = scheduler(store);
        assert!(s.needs_refresh(Heat::Warm, 0));
        assert!(!s.needs_refresh(Heat::Warm, 1));
        assert!(s.needs_refresh(Heat::Warm, 2));
    }

    #[tokio::test]
    async fn list_poll_with_no_registered_hosts_is_a_no_op() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let s = scheduler(store.clone());
        s.list_poll().await.unwrap();
        assert!(store.list_prs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_immediate_on_unknown_pr_is_a_no_op() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let s = scheduler(store);
        s.refresh_immediate("github.com:acme/widgets#1").await.unwrap();
    }

    #[test]
    fn sample_pr_builds_a_valid_id() {
        let pr = sample_pr("github.com", 1);
        assert_eq!(pr.id(), "github.com:acme/widgets#1");
    }
}
