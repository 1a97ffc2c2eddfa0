//! Configuration sources feeding the local store.
//!
//! Every source reduces to "apply a complete resource set for one type".
//! A failed load or fetch is logged and leaves the applied set in effect.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use xds_cache::{ApplyOutcome, ResourceVersionStore};
use xds_core::{Resource, ResourceVersion, TypeUrl, XdsError, XdsResult};

use crate::bundle::ResourceBundle;

/// Resource bundle on disk for one type.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    type_url: TypeUrl,
}

impl FileSource {
    /// Source for `type_url` read from the bundle at `path`.
    pub fn new(path: impl Into<PathBuf>, type_url: impl Into<TypeUrl>) -> Self {
        Self {
            path: path.into(),
            type_url: type_url.into(),
        }
    }

    /// Load the bundle and apply this type's resources.
    ///
    /// The version is derived from the content, so reloading an unchanged
    /// file is [`ApplyOutcome::Unchanged`].
    ///
    /// # Errors
    ///
    /// Any read, parse, validation or apply error; nothing is applied.
    pub async fn load(
        &self,
        store: &ResourceVersionStore,
    ) -> XdsResult<(ResourceVersion, ApplyOutcome)> {
        let bundle = ResourceBundle::load(&self.path).await?;
        let resources = bundle.resources(self.type_url.as_str())?;
        store.apply_versioned(self.type_url.clone(), resources)
    }

    /// Apply the bundle, then reapply on every change to the file.
    ///
    /// # Errors
    ///
    /// Fails if the initial load fails or the file cannot be watched.
    /// Returns `Ok` once the watcher stops.
    pub async fn watch(self, store: Arc<ResourceVersionStore>) -> XdsResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |event: notify::Result<notify::Event>| {
                let _ = tx.send(event);
            },
            notify::Config::default(),
        )
        .map_err(|e| XdsError::internal("creating file watcher", e))?;

        let (version, _) = self.load(&store).await?;
        info!(
            path = %self.path.display(),
            type_url = %self.type_url,
            version = %version,
            "loaded configuration file"
        );

        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|e| XdsError::internal(format!("watching {}", self.path.display()), e))?;

        while let Some(event) = rx.recv().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "file watch error");
                    continue;
                }
            };
            trace!(kind = ?event.kind, "file event");
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                continue;
            }

            match self.load(&store).await {
                Ok((version, ApplyOutcome::Applied)) => {
                    info!(
                        path = %self.path.display(),
                        version = %version,
                        "configuration file reloaded"
                    );
                }
                Ok((_, ApplyOutcome::Unchanged)) => {
                    debug!(path = %self.path.display(), "configuration file unchanged");
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "keeping previous configuration"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Fetches complete resource sets from a remote API.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Current resources of `type_url`.
    async fn fetch(&self, type_url: &TypeUrl) -> XdsResult<Vec<Resource>>;
}

/// Polls a [`Fetcher`] on a fixed delay.
pub struct ApiPoller {
    type_url: TypeUrl,
    refresh_delay: Duration,
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for ApiPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiPoller")
            .field("type_url", &self.type_url)
            .field("refresh_delay", &self.refresh_delay)
            .finish_non_exhaustive()
    }
}

impl ApiPoller {
    /// Poll `fetcher` for `type_url` every `refresh_delay`.
    ///
    /// # Errors
    ///
    /// Returns [`XdsError::Configuration`] if `refresh_delay` is zero.
    pub fn new(
        type_url: impl Into<TypeUrl>,
        refresh_delay: Duration,
        fetcher: Arc<dyn Fetcher>,
    ) -> XdsResult<Self> {
        if refresh_delay.is_zero() {
            return Err(XdsError::Configuration(
                "refresh delay must be non-zero".into(),
            ));
        }
        Ok(Self {
            type_url: type_url.into(),
            refresh_delay,
            fetcher,
        })
    }

    /// Fetch once and apply.
    ///
    /// # Errors
    ///
    /// The fetch error, or a validation error from the store.
    pub async fn poll_once(
        &self,
        store: &ResourceVersionStore,
    ) -> XdsResult<(ResourceVersion, ApplyOutcome)> {
        let resources = self.fetcher.fetch(&self.type_url).await?;
        store.apply_versioned(self.type_url.clone(), resources)
    }

    /// Poll until the task is dropped.
    pub async fn run(self, store: Arc<ResourceVersionStore>) {
        let mut ticker = tokio::time::interval(self.refresh_delay);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.poll_once(&store).await {
                Ok((version, outcome)) => {
                    debug!(
                        type_url = %self.type_url,
                        version = %version,
                        ?outcome,
                        "polled configuration"
                    );
                }
                Err(e) => {
                    warn!(
                        type_url = %self.type_url,
                        error = %e,
                        "poll failed, keeping previous configuration"
                    );
                }
            }
        }
    }
}
