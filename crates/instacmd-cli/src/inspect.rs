//! Offline commands that read the snippet store without connecting.

use std::path::Path;

use anyhow::{Context as _, bail};
use tokio::sync::mpsc;

use instacmd_config::InstaCmdConfig;
use instacmd_core::Registration;
use instacmd_types::{Collection, cleanup_code};

use crate::run::{build_compiler, open_storage};

fn collection(env: bool) -> Collection {
    if env {
        Collection::DevValues
    } else {
        Collection::Commands
    }
}

pub async fn list(config: &InstaCmdConfig, env: bool) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let records = storage.records(collection(env)).await?;
    if records.is_empty() {
        println!("Nothing stored in {}.", collection(env));
        return Ok(());
    }
    for record in records {
        let updated = chrono::DateTime::from_timestamp_millis(record.updated_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default();
        println!("{:<24} {updated}", record.name);
    }
    Ok(())
}

pub async fn source(config: &InstaCmdConfig, name: &str, env: bool) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    match storage.get(collection(env), name).await? {
        Some(source) => println!("{source}"),
        None => bail!("'{name}' is not stored in {}", collection(env)),
    }
    Ok(())
}

/// Compile and classify a snippet file. Returns a one-line summary.
pub async fn check(
    config: &InstaCmdConfig,
    file: &Path,
    dev_value: Option<String>,
) -> anyhow::Result<String> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let source = cleanup_code(&raw);

    let (outbound, _) = mpsc::unbounded_channel();
    let (_, compiler) = build_compiler(config, outbound)?;
    let compiled = tokio::task::spawn_blocking(move || compiler.compile(&source))
        .await?
        .context("Compilation failed")?;

    let registration = match dev_value {
        Some(name) => Registration::classify_dev_value(&name, &compiled)?,
        None => Registration::classify(&compiled)?,
    };
    Ok(describe(&registration))
}

fn describe(registration: &Registration) -> String {
    match registration.event_name() {
        Some(event) => format!(
            "{} `{}` (event {event})",
            registration.kind(),
            registration.name()
        ),
        None => format!("{} `{}`", registration.kind(), registration.name()),
    }
}

pub fn info(config: &InstaCmdConfig) -> anyhow::Result<()> {
    println!("instacmd {}", env!("CARGO_PKG_VERSION"));
    println!("  config file: {}", instacmd_config::config_file_path()?.display());
    println!("  database: {}", config.database_path()?.display());
    println!("  module dir: {}", config.module_dir()?.display());
    println!("  prefix: {}", config.bot.prefix);
    println!("  dev mode: {}", config.bot.dev_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> InstaCmdConfig {
        let mut config = InstaCmdConfig::default();
        config.storage.path = Some(dir.join("instacmd.db"));
        config.scripting.module_dir = Some(dir.join("modules"));
        config
    }

    #[tokio::test]
    async fn test_check_command_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ping.rhai");
        std::fs::write(
            &file,
            "```rhai\nfn ping(ctx) { \"pong\" }\nreturn command(\"ping\", Fn(\"ping\"));\n```",
        )
        .unwrap();

        let summary = check(&config_in(dir.path()), &file, None).await.unwrap();
        assert_eq!(summary, "command `ping`");
    }

    #[tokio::test]
    async fn test_check_listener_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("greet.rhai");
        std::fs::write(&file, "fn on_message(event) { }\nreturn Fn(\"on_message\");").unwrap();

        let summary = check(&config_in(dir.path()), &file, None).await.unwrap();
        assert_eq!(summary, "listener `on_message` (event on_message)");
    }

    #[tokio::test]
    async fn test_check_rejects_plain_value() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("value.rhai");
        std::fs::write(&file, "return 42;").unwrap();

        let err = check(&config_in(dir.path()), &file, None).await.unwrap_err();
        assert!(err.to_string().contains("expected a command"));
    }

    #[tokio::test]
    async fn test_check_does_not_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let file = dir.path().join("ping.rhai");
        std::fs::write(&file, "fn ping(ctx) { \"pong\" }\nreturn command(\"ping\", Fn(\"ping\"));")
            .unwrap();

        check(&config, &file, None).await.unwrap();
        let storage = open_storage(&config).unwrap();
        assert!(storage.get(Collection::Commands, "ping").await.unwrap().is_none());
    }
}
