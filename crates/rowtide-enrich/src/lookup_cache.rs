//! Memoization of streaming lookup results.

use std::future::Future;
use std::sync::Arc;

use moka::future::Cache;

use rowtide_config::CacheSettings;
use rowtide_core::RowMap;
use rowtide_sql::Params;

/// Rows returned for one parameter tuple, or the fact that the query failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedPayload {
    pub rows: Vec<RowMap>,
    pub failed: bool,
}

impl CachedPayload {
    pub fn failed() -> Self {
        Self {
            rows: Vec::new(),
            failed: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub enum LookupCache {
    Cached(Cache<String, Arc<CachedPayload>>),
    Uncached,
}

impl LookupCache {
    pub fn new(settings: Option<&CacheSettings>) -> Self {
        match settings {
            Some(settings) => LookupCache::Cached(
                Cache::builder()
                    .max_capacity(settings.max_entries)
                    .time_to_live(settings.expiration)
                    .build(),
            ),
            None => LookupCache::Uncached,
        }
    }

    /// Return the payload for `params`, running `compute` on a miss.
    pub async fn get<F, Fut>(&self, params: &Params, compute: F) -> Arc<CachedPayload>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CachedPayload>,
    {
        match self {
            LookupCache::Cached(cache) => {
                cache
                    .get_with(cache_key(params), async move { Arc::new(compute().await) })
                    .await
            }
            LookupCache::Uncached => Arc::new(compute().await),
        }
    }
}

/// Named parameters are keyed in name order so binding order does not
/// split entries.
fn cache_key(params: &Params) -> String {
    let key = match params {
        Params::None => serde_json::Value::Null,
        Params::Named(pairs) => {
            let mut pairs: Vec<_> = pairs.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Array(
                pairs
                    .into_iter()
                    .map(|(name, value)| {
                        serde_json::Value::Array(vec![
                            serde_json::Value::String(name.clone()),
                            value.clone().into(),
                        ])
                    })
                    .collect(),
            )
        }
        Params::Positional(values) => {
            serde_json::Value::Array(values.iter().cloned().map(Into::into).collect())
        }
    };
    key.to_string()
}
