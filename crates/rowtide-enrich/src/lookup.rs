//! Lookups against the snapshot cache.

use tracing::warn;

use rowtide_core::{LookupDef, LookupParams, ParamBinding, Record, RowMap, Value};
use rowtide_sql::Params;

use crate::cache::SnapshotCache;

/// Outcome of one lookup query.
#[derive(Debug, Default)]
pub struct LookupResult {
    pub payload: Vec<RowMap>,
    pub failed: bool,
    pub invalid_parameters: bool,
}

impl LookupResult {
    pub fn is_valid(&self) -> bool {
        !self.failed && !self.invalid_parameters
    }
}

/// Resolve bindings against a record. Returns the first binding that could
/// not be resolved as the error.
pub(crate) fn resolve_params<'a>(
    parameters: &'a LookupParams,
    record: &Record,
) -> Result<Params, &'a ParamBinding> {
    match parameters {
        LookupParams::None => Ok(Params::None),
        LookupParams::Named(bindings) => bindings
            .iter()
            .map(|(name, binding)| {
                binding
                    .resolve(record)
                    .map(|value| (name.clone(), value))
                    .ok_or(binding)
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Params::Named),
        LookupParams::Positional(bindings) => bindings
            .iter()
            .map(|binding| binding.resolve(record).ok_or(binding))
            .collect::<Result<Vec<_>, _>>()
            .map(Params::Positional),
    }
}

pub(crate) fn rows_to_value(rows: Vec<RowMap>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

pub struct Lookup {
    def: LookupDef,
}

impl Lookup {
    pub fn new(def: LookupDef) -> Self {
        Self { def }
    }

    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn def(&self) -> &LookupDef {
        &self.def
    }

    /// Query the cache with parameters taken from `record`.
    pub async fn fetch(&self, cache: &SnapshotCache, record: &Record) -> LookupResult {
        let params = match resolve_params(&self.def.parameters, record) {
            Ok(params) => params,
            Err(binding) => {
                warn!(
                    lookup_id = %self.def.id,
                    parameter = %binding.describe(),
                    "Parameter field not found in record"
                );
                return LookupResult {
                    invalid_parameters: true,
                    ..Default::default()
                };
            }
        };

        match cache.fetch(&self.def.query, &params).await {
            Ok(payload) => LookupResult {
                payload,
                ..Default::default()
            },
            Err(e) => {
                warn!(
                    lookup_id = %self.def.id,
                    error = %e,
                    "Exception when executing lookup query"
                );
                LookupResult {
                    failed: true,
                    ..Default::default()
                }
            }
        }
    }

    /// Attach the lookup result to `record` under the target field.
    ///
    /// Returns false when the query failed or its parameters could not be
    /// resolved. The record is tagged with the failure tags in that case.
    pub async fn enhance(&self, cache: &SnapshotCache, record: &mut Record) -> bool {
        let result = self.fetch(cache, record).await;

        if !result.is_valid() {
            for tag in &self.def.tag_on_failure {
                record.tag(tag);
            }
            return false;
        }

        let value = match &self.def.default_hash {
            Some(default) if result.payload.is_empty() => {
                for tag in &self.def.tag_on_default_use {
                    record.tag(tag);
                }
                Value::Array(vec![Value::Object(default.clone())])
            }
            _ => rows_to_value(result.payload),
        };

        if let Err(e) = record.set(&self.def.target, value) {
            warn!(
                lookup_id = %self.def.id,
                field = %self.def.target,
                error = %e,
                "Could not set lookup target"
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use rowtide_core::{row, Column, DbObject};

    async fn cache() -> SnapshotCache {
        let cache = SnapshotCache::in_memory().unwrap();
        cache
            .build_db_object(&DbObject::new(
                "servers",
                vec![Column::new("ip", "text"), Column::new("name", "text")],
            ))
            .await
            .unwrap();
        cache
            .execute(
                "INSERT INTO servers VALUES ('10.1.1.1', 'ldn-server-1')",
                &Params::None,
            )
            .await
            .unwrap();
        cache
    }

    fn lookup(parameters: LookupParams) -> LookupDef {
        LookupDef::new("servers", "SELECT * FROM servers WHERE ip = :ip")
            .target("server")
            .parameters(parameters)
            .tags(vec!["_failed".into()], vec!["_default".into()])
    }

    fn by_ip() -> LookupParams {
        LookupParams::Named(vec![("ip".into(), ParamBinding::Field("ip".into()))])
    }

    fn record(ip: &str) -> Record {
        let mut r = Record::new();
        r.set("ip", Value::from(ip)).unwrap();
        r
    }

    #[tokio::test]
    async fn test_enhance_sets_target() {
        let cache = cache().await;
        let lookup = Lookup::new(lookup(by_ip()));
        let mut r = record("10.1.1.1");

        assert!(lookup.enhance(&cache, &mut r).await);
        assert_eq!(
            r.get("server"),
            Some(&Value::Array(vec![Value::Object(row([
                ("ip", "10.1.1.1"),
                ("name", "ldn-server-1"),
            ]))]))
        );
        assert!(r.tags().is_empty());
    }

    #[tokio::test]
    async fn test_empty_result_without_default() {
        let cache = cache().await;
        let lookup = Lookup::new(lookup(by_ip()));
        let mut r = record("10.9.9.9");

        assert!(lookup.enhance(&cache, &mut r).await);
        assert_eq!(r.get("server"), Some(&Value::Array(vec![])));
        assert!(r.tags().is_empty());
    }

    #[tokio::test]
    async fn test_default_hash_used_when_empty() {
        let cache = cache().await;
        let mut default = HashMap::new();
        default.insert("name".to_string(), Value::from("unknown"));
        let lookup = Lookup::new(lookup(by_ip()).default_hash(default.clone()));
        let mut r = record("10.9.9.9");

        assert!(lookup.enhance(&cache, &mut r).await);
        assert_eq!(
            r.get("server"),
            Some(&Value::Array(vec![Value::Object(default)]))
        );
        assert_eq!(r.tags(), vec!["_default"]);
    }

    #[tokio::test]
    async fn test_missing_parameter_field_tags_failure() {
        let cache = cache().await;
        let lookup = Lookup::new(lookup(by_ip()));
        let mut r = Record::new();

        assert!(!lookup.enhance(&cache, &mut r).await);
        assert_eq!(r.tags(), vec!["_failed"]);
        assert!(r.get("server").is_none());
    }

    #[tokio::test]
    async fn test_template_parameter() {
        let cache = cache().await;
        let lookup = Lookup::new(lookup(LookupParams::Named(vec![(
            "ip".into(),
            ParamBinding::Template("10.1.%{octet}".into()),
        )])));
        let mut r = Record::new();
        r.set("octet", Value::from("1.1")).unwrap();
        assert!(lookup.enhance(&cache, &mut r).await);

        let mut unresolved = Record::new();
        assert!(!lookup.enhance(&cache, &mut unresolved).await);
    }

    #[tokio::test]
    async fn test_query_error_tags_failure() {
        let cache = cache().await;
        let lookup = Lookup::new(
            LookupDef::new("broken", "SELECT * FROM missing_table")
                .tags(vec!["_failed".into()], vec![]),
        );
        let mut r = Record::new();
        assert!(!lookup.enhance(&cache, &mut r).await);
        assert_eq!(r.tags(), vec!["_failed"]);
    }

    #[tokio::test]
    async fn test_positional_parameters() {
        let cache = cache().await;
        let lookup = Lookup::new(
            LookupDef::new("servers", "SELECT name FROM servers WHERE ip = ?")
                .parameters(LookupParams::Positional(vec![ParamBinding::Field(
                    "ip".into(),
                )])),
        );
        let result = lookup.fetch(&cache, &record("10.1.1.1")).await;
        assert!(result.is_valid());
        assert_eq!(result.payload.len(), 1);
    }
}
