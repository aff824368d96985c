use anyhow::{Context, Result};

use rowtide_config::StreamingParams;

use crate::config::ProjectConfig;

pub fn cmd_check(config: &ProjectConfig) -> Result<()> {
    if config.input.is_none() && config.static_filter.is_none() && config.streaming.is_none() {
        anyhow::bail!("Config file has no [input], [static_filter] or [streaming] section");
    }

    if let Some(input) = &config.input {
        let settings = input
            .to_settings()
            .context("Invalid [input] configuration")?;
        println!("[input]");
        println!("  driver:     {}", settings.connection.driver);
        let kind = match (&settings.statement.prepared, &settings.statement.paging) {
            (Some(prepared), _) => format!("prepared ({})", prepared.name),
            (None, Some(paging)) => {
                format!("paged ({:?}, {} rows)", paging.mode, paging.page_size)
            }
            (None, None) => "plain".to_string(),
        };
        println!("  statement:  {}", kind);
        match &settings.tracking.column {
            Some(column) if settings.tracking.use_column_value => {
                println!("  tracking:   column {}", column)
            }
            _ => println!("  tracking:   last run time"),
        }
        if settings.checkpoint.record_last_run {
            println!("  checkpoint: {}", settings.checkpoint.path.display());
        }
        match settings.schedule {
            Some(schedule) => println!("  schedule:   every {:?}", schedule.interval()),
            None => println!("  schedule:   once"),
        }
    }

    if let Some(filter) = &config.static_filter {
        let settings = filter
            .to_settings()
            .context("Invalid [static_filter] configuration")?;
        println!("[static_filter]");
        println!("  loaders:    {}", settings.loaders.len());
        println!("  tables:     {}", settings.db_objects.len());
        println!("  lookups:    {}", settings.lookups.len());
        if let Some(schedule) = settings.loader_schedule {
            println!("  reload:     every {:?}", schedule.interval());
        }
    }

    if let Some(streaming) = &config.streaming {
        let settings = streaming
            .to_settings()
            .context("Invalid [streaming] configuration")?;
        println!("[streaming]");
        println!("  driver:     {}", settings.connection.driver);
        println!("  target:     {}", settings.target);
        match &settings.parameters {
            StreamingParams::Named(params) => println!("  parameters: {}", params.len()),
            StreamingParams::Prepared { name, bind_values } => {
                println!("  prepared:   {} ({} values)", name, bind_values.len())
            }
        }
        match &settings.cache {
            Some(cache) => println!(
                "  cache:      {} entries, {:?}",
                cache.max_entries, cache.expiration
            ),
            None => println!("  cache:      disabled"),
        }
    }

    println!("Config OK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_rejects_empty_config() {
        let config = ProjectConfig::parse("").unwrap();
        assert!(cmd_check(&config).is_err());
    }

    #[test]
    fn test_check_reports_invalid_section() {
        let config = ProjectConfig::parse(
            r#"
[input]
driver = "sqlite"
connection_string = "jdbc:sqlite::memory:"
"#,
        )
        .unwrap();
        // Neither statement nor statement_filepath.
        assert!(cmd_check(&config).is_err());
    }
}
