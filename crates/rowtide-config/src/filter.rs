//! Settings for the snapshot-cache enrichment filter.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Deserialize;

use rowtide_core::placeholders;
use rowtide_core::{
    Column, ConnectionOptions, ConnectionSettings, DbObject, LoaderDef, LookupDef, LookupParams,
    ParamBinding,
};

use crate::common::{toml_table_to_map, toml_to_value, ConnectionConfig, OptionsConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::schedule::Schedule;

pub const DEFAULT_STATIC_FAILURE_TAG: &str = "_jdbcstaticfailure";
pub const DEFAULT_STATIC_DEFAULT_TAG: &str = "_jdbcstaticdefaultsused";

/// Raw snapshot-cache filter configuration as parsed from TOML.
#[derive(Debug, Deserialize)]
pub struct StaticFilterConfig {
    /// Remote connection used by loaders without their own.
    pub remote: Option<ConnectionConfig>,
    #[serde(default)]
    pub remote_options: OptionsConfig,
    #[serde(default)]
    pub loaders: Vec<LoaderConfig>,
    #[serde(default)]
    pub local_db_objects: Vec<DbObjectConfig>,
    #[serde(default)]
    pub local_lookups: Vec<LookupConfig>,
    pub loader_schedule: Option<Schedule>,
    /// Keep the snapshot database in a file under this directory.
    pub staging_directory: Option<PathBuf>,
    #[serde(default = "default_failure_tags")]
    pub tag_on_failure: Vec<String>,
    #[serde(default = "default_default_tags")]
    pub tag_on_default_use: Vec<String>,
}

fn default_failure_tags() -> Vec<String> {
    vec![DEFAULT_STATIC_FAILURE_TAG.to_string()]
}

fn default_default_tags() -> Vec<String> {
    vec![DEFAULT_STATIC_DEFAULT_TAG.to_string()]
}

/// A loader (raw from TOML).
#[derive(Debug, Deserialize)]
pub struct LoaderConfig {
    pub id: Option<String>,
    pub query: Option<String>,
    pub local_table: Option<String>,
    pub max_rows: Option<u64>,
    pub connection: Option<ConnectionConfig>,
}

/// A local table definition (raw from TOML).
#[derive(Debug, Deserialize)]
pub struct DbObjectConfig {
    pub name: Option<String>,
    pub columns: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub index_columns: Vec<String>,
    #[serde(default)]
    pub preserve_existing: bool,
}

/// A lookup (raw from TOML).
#[derive(Debug, Deserialize)]
pub struct LookupConfig {
    pub id: Option<String>,
    pub query: Option<String>,
    pub parameters: Option<toml::Table>,
    pub prepared_parameters: Option<Vec<toml::Value>>,
    pub target: Option<String>,
    pub default_hash: Option<toml::Table>,
    pub tag_on_failure: Option<Vec<String>>,
    pub tag_on_default_use: Option<Vec<String>>,
}

/// Validated snapshot-cache filter settings.
#[derive(Debug, Clone)]
pub struct StaticFilterSettings {
    pub remote: Option<ConnectionSettings>,
    pub remote_options: ConnectionOptions,
    pub loaders: Vec<LoaderDef>,
    pub db_objects: Vec<DbObject>,
    pub lookups: Vec<LookupDef>,
    pub loader_schedule: Option<Schedule>,
    pub staging_directory: Option<PathBuf>,
}

impl StaticFilterConfig {
    /// Parse a filter config from a TOML string.
    pub fn parse(toml_str: &str) -> ConfigResult<Self> {
        let config: StaticFilterConfig = toml::from_str(toml_str)?;
        Ok(config)
    }

    /// Validate and convert into runtime settings.
    pub fn to_settings(&self) -> ConfigResult<StaticFilterSettings> {
        let remote = self.remote.as_ref().map(|c| c.to_settings()).transpose()?;

        let loaders = self
            .loaders
            .iter()
            .enumerate()
            .map(|(i, l)| l.to_def(i, remote.is_some()))
            .collect::<ConfigResult<Vec<_>>>()?;

        let db_objects = self
            .local_db_objects
            .iter()
            .map(DbObjectConfig::to_def)
            .collect::<ConfigResult<Vec<_>>>()?;

        let mut seen = HashSet::new();
        let mut lookups = Vec::with_capacity(self.local_lookups.len());
        for (i, lookup) in self.local_lookups.iter().enumerate() {
            let def = lookup.to_def(
                format!("lookup-{}", i + 1),
                &self.tag_on_failure,
                &self.tag_on_default_use,
            )?;
            if !seen.insert(def.id.clone()) {
                return Err(ConfigError::DuplicateLookupId(def.id));
            }
            lookups.push(def);
        }

        if let Some(dir) = &self.staging_directory {
            if dir.exists() && !dir.is_dir() {
                return Err(ConfigError::InvalidValue {
                    field: "staging_directory".to_string(),
                    message: format!("{} is not a directory", dir.display()),
                });
            }
        }

        Ok(StaticFilterSettings {
            remote,
            remote_options: self.remote_options.to_options()?,
            loaders,
            db_objects,
            lookups,
            loader_schedule: self.loader_schedule,
            staging_directory: self.staging_directory.clone(),
        })
    }
}

impl LoaderConfig {
    fn to_def(&self, index: usize, has_remote: bool) -> ConfigResult<LoaderDef> {
        let local_table = self.local_table.clone().ok_or_else(|| ConfigError::InvalidLoader {
            id: self.id.clone().unwrap_or_default(),
            message: "must include a 'local_table' string".to_string(),
        })?;
        let id = self
            .id
            .clone()
            .unwrap_or_else(|| format!("loader-{}", index + 1));
        let query = self.query.clone().ok_or_else(|| ConfigError::InvalidLoader {
            id: id.clone(),
            message: "must include a 'query' string".to_string(),
        })?;

        let connection = self.connection.as_ref().map(|c| c.to_settings()).transpose()?;
        if connection.is_none() && !has_remote {
            return Err(ConfigError::InvalidLoader {
                id,
                message: "no 'connection' given and no filter-wide [remote] connection".to_string(),
            });
        }

        Ok(LoaderDef {
            id,
            query,
            local_table,
            max_rows: self.max_rows,
            connection,
        })
    }
}

impl DbObjectConfig {
    fn to_def(&self) -> ConfigResult<DbObject> {
        let name = self.name.clone().ok_or_else(|| ConfigError::InvalidDbObject {
            name: "unnamed".to_string(),
            message: "must include a 'name' string".to_string(),
        })?;
        let invalid = |message: String| ConfigError::InvalidDbObject {
            name: name.clone(),
            message,
        };

        let raw_columns = self
            .columns
            .as_ref()
            .ok_or_else(|| invalid("must include a 'columns' array".to_string()))?;
        if raw_columns.is_empty() || raw_columns.iter().any(|c| c.len() != 2) {
            return Err(invalid(
                "the columns array is not uniform, it should contain arrays of two strings only"
                    .to_string(),
            ));
        }
        let columns: Vec<Column> = raw_columns
            .iter()
            .map(|c| Column::new(c[0].clone(), c[1].clone()))
            .collect();

        for index_column in &self.index_columns {
            if !columns.iter().any(|c| &c.name == index_column) {
                return Err(invalid(format!(
                    "the index_columns element '{}' must be a column defined in the columns array",
                    index_column
                )));
            }
        }

        Ok(DbObject::new(name.clone(), columns)
            .index_columns(self.index_columns.clone())
            .preserve_existing(self.preserve_existing))
    }
}

impl LookupConfig {
    fn to_def(
        &self,
        default_id: String,
        global_failure_tags: &[String],
        global_default_tags: &[String],
    ) -> ConfigResult<LookupDef> {
        let id = self.id.clone().unwrap_or(default_id);
        let invalid = |message: &str| ConfigError::InvalidLookup {
            id: id.clone(),
            message: message.to_string(),
        };

        let query = self
            .query
            .clone()
            .ok_or_else(|| invalid("must include a 'query' string"))?;

        let parameters = match (&self.parameters, &self.prepared_parameters) {
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "can't specify 'parameters' and 'prepared_parameters' in the same lookup",
                ))
            }
            (Some(named), None) => {
                let mut bindings: Vec<(String, ParamBinding)> = toml_table_to_map(named.clone())
                    .into_iter()
                    .map(|(k, v)| (k, ParamBinding::from_config(v)))
                    .collect();
                bindings.sort_by(|a, b| a.0.cmp(&b.0));
                LookupParams::Named(bindings)
            }
            (None, Some(positional)) => {
                if placeholders::count_positional(&query) != positional.len() {
                    return Err(invalid(
                        "'prepared_parameters' doesn't match the count of the query's placeholders",
                    ));
                }
                LookupParams::Positional(
                    positional
                        .iter()
                        .cloned()
                        .map(|v| ParamBinding::from_config(toml_to_value(v)))
                        .collect(),
                )
            }
            (None, None) => LookupParams::None,
        };

        let mut def = LookupDef::new(id.clone(), query)
            .parameters(parameters)
            .tags(
                self.tag_on_failure
                    .clone()
                    .unwrap_or_else(|| global_failure_tags.to_vec()),
                self.tag_on_default_use
                    .clone()
                    .unwrap_or_else(|| global_default_tags.to_vec()),
            );
        if let Some(target) = &self.target {
            def = def.target(target.clone());
        }
        if let Some(default_hash) = &self.default_hash {
            def = def.default_hash(toml_table_to_map(default_hash.clone()));
        }
        Ok(def)
    }
}
