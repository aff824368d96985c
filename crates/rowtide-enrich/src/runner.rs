//! Initial and scheduled loading of the snapshot cache.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use rowtide_core::DbObject;
use rowtide_sql::Connector;

use crate::cache::SnapshotCache;
use crate::error::EnrichResult;
use crate::loader::RemoteLoader;

enum Mode {
    Single,
    Repeating { reload_count: AtomicU64 },
}

/// Builds the local schema and fills it, once or on a schedule.
pub struct LoadRunner<K: Connector> {
    mode: Mode,
    preloaders: Vec<DbObject>,
    loaders: Vec<RemoteLoader<K>>,
}

impl<K: Connector> LoadRunner<K> {
    /// Load once at startup only.
    pub fn single(db_objects: &[DbObject], loaders: Vec<RemoteLoader<K>>) -> Self {
        Self::with_mode(Mode::Single, db_objects, loaders)
    }

    /// Load at startup and again on every [`LoadRunner::repeated_load`].
    pub fn repeating(db_objects: &[DbObject], loaders: Vec<RemoteLoader<K>>) -> Self {
        let mode = Mode::Repeating {
            reload_count: AtomicU64::new(0),
        };
        Self::with_mode(mode, db_objects, loaders)
    }

    fn with_mode(mode: Mode, db_objects: &[DbObject], loaders: Vec<RemoteLoader<K>>) -> Self {
        let mut preloaders: Vec<DbObject> = db_objects
            .iter()
            .flat_map(|object| [object.clone(), object.staging_variant()])
            .collect();
        preloaders.sort();
        preloaders.dedup_by(|a, b| a.name == b.name);
        Self {
            mode,
            preloaders,
            loaders,
        }
    }

    pub fn is_repeating(&self) -> bool {
        matches!(self.mode, Mode::Repeating { .. })
    }

    pub fn preloaders(&self) -> &[DbObject] {
        &self.preloaders
    }

    pub fn loaders(&self) -> &[RemoteLoader<K>] {
        &self.loaders
    }

    pub async fn initial_load(&self, cache: &SnapshotCache) -> EnrichResult<()> {
        for object in &self.preloaders {
            cache.build_db_object(object).await?;
        }
        cache.populate_all(&self.loaders).await?;
        info!(
            tables = self.preloaders.len(),
            loaders = self.loaders.len(),
            "Initial snapshot load completed"
        );
        Ok(())
    }

    /// Refresh every loader. Does nothing for a single-load runner.
    pub async fn repeated_load(&self, cache: &SnapshotCache) -> EnrichResult<()> {
        let Mode::Repeating { reload_count } = &self.mode else {
            return Ok(());
        };
        let reload = reload_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(reload, "Reloading snapshot");
        cache.repopulate_all(&self.loaders).await
    }

    /// Number of scheduled reloads started.
    pub fn reload_count(&self) -> u64 {
        match &self.mode {
            Mode::Single => 0,
            Mode::Repeating { reload_count } => reload_count.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rowtide_core::{row, Column, ConnectionOptions, LoaderDef, RetryPolicy};
    use rowtide_sql::testing::MockConnector;
    use rowtide_sql::{ConnectionManager, Params};

    fn objects() -> Vec<DbObject> {
        vec![
            DbObject::new("users", vec![Column::new("id", "int")]),
            DbObject::new("servers", vec![Column::new("ip", "text")]).preserve_existing(true),
        ]
    }

    fn loaders(mock: &MockConnector) -> Vec<RemoteLoader<MockConnector>> {
        vec![RemoteLoader::new(
            LoaderDef::new("servers", "SELECT ip FROM ref", "servers"),
            ConnectionManager::new(mock.clone(), ConnectionOptions::default(), RetryPolicy::once()),
        )]
    }

    #[test]
    fn test_preloaders_are_sorted_with_staging_tables() {
        let runner = LoadRunner::single(&objects(), loaders(&MockConnector::new()));
        let names: Vec<&str> = runner.preloaders().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["servers", "servers_temp", "users", "users_temp"]);
        assert!(runner.preloaders()[0].preserve_existing);
        assert!(!runner.preloaders()[1].preserve_existing);
    }

    #[tokio::test]
    async fn test_repeating_runner_counts_reloads() {
        let mock = MockConnector::with_rows(vec![row([("ip", "10.1.1.1")])]);
        let cache = SnapshotCache::in_memory().unwrap();
        let runner = LoadRunner::repeating(&objects(), loaders(&mock));

        runner.initial_load(&cache).await.unwrap();
        runner.repeated_load(&cache).await.unwrap();
        runner.repeated_load(&cache).await.unwrap();

        assert_eq!(runner.reload_count(), 2);
        assert_eq!(mock.call_count(), 3);
        let rows = cache.fetch("SELECT * FROM servers", &Params::None).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_single_runner_ignores_reloads() {
        let mock = MockConnector::with_rows(vec![row([("ip", "10.1.1.1")])]);
        let cache = SnapshotCache::in_memory().unwrap();
        let runner = LoadRunner::single(&objects(), loaders(&mock));

        runner.initial_load(&cache).await.unwrap();
        runner.repeated_load(&cache).await.unwrap();
        assert_eq!(runner.reload_count(), 0);
        assert_eq!(mock.call_count(), 1);
    }
}
