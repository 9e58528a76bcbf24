//! Reconcile settings shared by every declared resource.

use std::time::Duration;

use anyhow::{Context, Result};
use peerage_kubehub::RetryPolicy;
use peerage_peering::TeardownPolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub retry: RetryPolicy,
    pub teardown: TeardownPolicy,
    /// Deadline for one lifecycle call; `None` waits forever.
    pub call_timeout: Option<Duration>,
    pub skip_discovery: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            teardown: TeardownPolicy::default(),
            call_timeout: Some(Duration::from_secs(60)),
            skip_discovery: false,
        }
    }
}

impl Settings {
    /// `PEERAGE_CONFLICT_RETRIES`, `PEERAGE_TEARDOWN`, `PEERAGE_CALL_TIMEOUT_SECS`, `PEERAGE_SKIP_DISCOVERY`.
    pub fn from_env() -> Result<Self> {
        let teardown = match std::env::var("PEERAGE_TEARDOWN") {
            Ok(s) if !s.trim().is_empty() => s.parse::<TeardownPolicy>().context("PEERAGE_TEARDOWN")?,
            _ => TeardownPolicy::default(),
        };
        let call_timeout = std::env::var("PEERAGE_CALL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|secs| if secs == 0 { None } else { Some(Duration::from_secs(secs)) })
            .unwrap_or(Some(Duration::from_secs(60)));
        let skip_discovery = matches!(std::env::var("PEERAGE_SKIP_DISCOVERY").ok().as_deref(), Some("1") | Some("true"));
        Ok(Self { retry: RetryPolicy::from_env(), teardown, call_timeout, skip_discovery })
    }

    /// Settings for in-memory tests: no backoff sleeps, short deadline.
    pub fn for_tests() -> Self {
        Self { retry: RetryPolicy::immediate(3), call_timeout: Some(Duration::from_secs(5)), ..Default::default() }
    }
}
