//! Where to connect: kubeconfig paths, context overrides and client timeouts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct KubeTarget {
    /// Merged in order; empty means infer (in-cluster, then `$KUBECONFIG`, then `~/.kube/config`).
    pub kubeconfig_paths: Vec<PathBuf>,
    pub context: Option<String>,
    pub cluster: Option<String>,
    pub user: Option<String>,
    pub insecure: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for KubeTarget {
    fn default() -> Self {
        Self {
            kubeconfig_paths: Vec::new(),
            context: None,
            cluster: None,
            user: None,
            insecure: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

fn non_empty(var: &str) -> Option<String> { std::env::var(var).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) }

fn truthy(var: &str) -> bool {
    matches!(std::env::var(var).ok().as_deref().map(str::trim), Some("1") | Some("true") | Some("TRUE") | Some("yes"))
}

/// Expand a leading `~` against `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), std::env::var("HOME")) {
        (Some(rest), Ok(home)) if rest.is_empty() || rest.starts_with('/') => PathBuf::from(format!("{}{}", home, rest)),
        _ => PathBuf::from(path),
    }
}

fn parse_paths(single: Option<String>, multi: Option<String>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = single.iter().map(|p| expand_home(p)).collect();
    if let Some(m) = multi {
        out.extend(std::env::split_paths(&m).filter(|p| !p.as_os_str().is_empty()).map(|p| expand_home(&p.to_string_lossy())));
    }
    out
}

impl KubeTarget {
    /// `KUBE_CONFIG_PATH`, `KUBE_CONFIG_PATHS`, `KUBE_CTX`, `KUBE_CTX_CLUSTER`,
    /// `KUBE_CTX_AUTH_INFO`, `KUBE_INSECURE`.
    pub fn from_env() -> Self {
        Self {
            kubeconfig_paths: parse_paths(non_empty("KUBE_CONFIG_PATH"), non_empty("KUBE_CONFIG_PATHS")),
            context: non_empty("KUBE_CTX"),
            cluster: non_empty("KUBE_CTX_CLUSTER"),
            user: non_empty("KUBE_CTX_AUTH_INFO"),
            insecure: truthy("KUBE_INSECURE"),
            ..Default::default()
        }
    }

    pub fn with_kubeconfig(mut self, path: impl AsRef<str>) -> Self {
        self.kubeconfig_paths = vec![expand_home(path.as_ref())];
        self
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    fn options(&self) -> KubeConfigOptions {
        KubeConfigOptions { context: self.context.clone(), cluster: self.cluster.clone(), user: self.user.clone() }
    }

    fn has_overrides(&self) -> bool { self.context.is_some() || self.cluster.is_some() || self.user.is_some() }

    fn read_merged(paths: &[PathBuf]) -> Result<Kubeconfig> {
        let mut merged: Option<Kubeconfig> = None;
        for p in paths {
            let kc = Kubeconfig::read_from(Path::new(p)).with_context(|| format!("reading kubeconfig {}", p.display()))?;
            merged = Some(match merged {
                Some(acc) => acc.merge(kc).with_context(|| format!("merging kubeconfig {}", p.display()))?,
                None => kc,
            });
        }
        merged.context("no kubeconfig paths given")
    }

    pub async fn config(&self) -> Result<Config> {
        let mut config = if !self.kubeconfig_paths.is_empty() {
            let kc = Self::read_merged(&self.kubeconfig_paths)?;
            Config::from_custom_kubeconfig(kc, &self.options()).await.context("loading kubeconfig")?
        } else if self.has_overrides() {
            Config::from_kubeconfig(&self.options()).await.context("loading kubeconfig")?
        } else {
            Config::infer().await.context("inferring kube config")?
        };
        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);
        if self.insecure {
            config.accept_invalid_certs = true;
        }
        debug!(cluster_url = %config.cluster_url, ns = %config.default_namespace, "kube: config resolved");
        Ok(config)
    }

    pub async fn client(&self) -> Result<Client> {
        let t0 = std::time::Instant::now();
        let config = self.config().await?;
        let url = config.cluster_url.to_string();
        let client = Client::try_from(config).context("creating kube client")?;
        info!(cluster_url = %url, took_ms = %t0.elapsed().as_millis(), "kube: client ready");
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_expansion() {
        let home = std::env::var("HOME").unwrap_or_default();
        if home.is_empty() {
            return;
        }
        assert_eq!(expand_home("~/.kube/config"), PathBuf::from(format!("{}/.kube/config", home)));
        assert_eq!(expand_home("~"), PathBuf::from(home));
        assert_eq!(expand_home("/etc/kube"), PathBuf::from("/etc/kube"));
        assert_eq!(expand_home("~other/x"), PathBuf::from("~other/x"));
    }

    #[test]
    fn paths_single_then_multi() {
        let paths = parse_paths(Some("/a".into()), Some("/b:/c".into()));
        assert_eq!(paths, vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")]);
        assert!(parse_paths(None, None).is_empty());
    }

    #[test]
    fn builders_override() {
        let t = KubeTarget::default().with_kubeconfig("/tmp/kc").with_context("milan");
        assert_eq!(t.kubeconfig_paths, vec![PathBuf::from("/tmp/kc")]);
        assert!(t.has_overrides());
        assert_eq!(t.options().context.as_deref(), Some("milan"));
    }
}
