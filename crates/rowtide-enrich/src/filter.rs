//! Enrichment from a local snapshot of remote reference data.

use std::time::Duration;

use tracing::info;

use rowtide_config::StaticFilterSettings;
use rowtide_core::{Record, RetryPolicy};
use rowtide_sql::{AnyConnector, ConnectionManager, Connector};

use crate::cache::SnapshotCache;
use crate::error::{EnrichError, EnrichResult};
use crate::loader::RemoteLoader;
use crate::lookup::Lookup;
use crate::runner::LoadRunner;

pub struct StaticFilter<K: Connector = AnyConnector> {
    cache: SnapshotCache,
    runner: LoadRunner<K>,
    lookups: Vec<Lookup>,
    reload_interval: Option<Duration>,
}

impl StaticFilter<AnyConnector> {
    pub fn from_settings(settings: &StaticFilterSettings) -> EnrichResult<Self> {
        let cache = SnapshotCache::open(settings.staging_directory.as_deref())?;

        let loaders = settings
            .loaders
            .iter()
            .map(|def| -> EnrichResult<RemoteLoader> {
                let connection = def
                    .connection
                    .clone()
                    .or_else(|| settings.remote.clone())
                    .ok_or_else(|| EnrichError::Loader {
                        loader: def.id.clone(),
                        message: "no remote connection configured".to_string(),
                    })?;
                let connector = AnyConnector::new(connection, settings.remote_options.clone());
                let manager = ConnectionManager::new(
                    connector,
                    settings.remote_options.clone(),
                    RetryPolicy::default(),
                );
                Ok(RemoteLoader::new(def.clone(), manager))
            })
            .collect::<EnrichResult<Vec<_>>>()?;

        let runner = match settings.loader_schedule {
            Some(_) => LoadRunner::repeating(&settings.db_objects, loaders),
            None => LoadRunner::single(&settings.db_objects, loaders),
        };
        let lookups = settings.lookups.iter().cloned().map(Lookup::new).collect();

        Ok(Self::new(
            cache,
            runner,
            lookups,
            settings.loader_schedule.map(|s| s.interval()),
        ))
    }
}

impl<K: Connector> StaticFilter<K> {
    pub fn new(
        cache: SnapshotCache,
        runner: LoadRunner<K>,
        lookups: Vec<Lookup>,
        reload_interval: Option<Duration>,
    ) -> Self {
        Self {
            cache,
            runner,
            lookups,
            reload_interval,
        }
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn runner(&self) -> &LoadRunner<K> {
        &self.runner
    }

    /// How often [`StaticFilter::reload`] should be called, if at all.
    pub fn reload_interval(&self) -> Option<Duration> {
        self.reload_interval
    }

    /// Build the local tables and run the first load.
    pub async fn prepare(&self) -> EnrichResult<()> {
        self.runner.initial_load(&self.cache).await?;
        info!(lookups = self.lookups.len(), "Static filter ready");
        Ok(())
    }

    pub async fn reload(&self) -> EnrichResult<()> {
        self.runner.repeated_load(&self.cache).await
    }

    /// Apply every lookup in order. Returns false if any of them failed.
    pub async fn filter(&self, record: &mut Record) -> bool {
        let mut all_succeeded = true;
        for lookup in &self.lookups {
            if !lookup.enhance(&self.cache, record).await {
                all_succeeded = false;
            }
        }
        all_succeeded
    }
}
