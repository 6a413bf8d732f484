use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use denuncia_sdk::{InMemoryBackends, ReportAccess, Settings};
use denuncia_server::{DenunciaServer, ServerConfig};
use serde_json::json;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::from_env(cli.config.as_deref()).context("resolving configuration")?;
    tracing::info!(source = %settings.source, project = %settings.backend.project_id, "configuration resolved");
    match cli.command {
        Command::Serve(args) => cmd_serve(settings, args),
        Command::Config(args) => cmd_config(&settings, args),
    }
}

fn cmd_serve(settings: Settings, args: ServeArgs) -> anyhow::Result<()> {
    let mut config = ServerConfig::default();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(max) = args.max_upload_bytes {
        config.max_upload_bytes = max;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let backends = InMemoryBackends::new(&settings);
        let project = settings.backend.project_id.clone();
        let source = settings.source.clone();
        let access = ReportAccess::new(Arc::new(backends.client(settings)));
        let identity = access
            .ensure_session()
            .await
            .context("signing in anonymously")?;

        println!("{} Denuncia intake on {}", "✓".green().bold(), config.bind_addr.to_string().bold());
        println!("  Project: {} ({})", project.cyan(), source);
        println!("  Session: {}", identity.short_uid().yellow());
        DenunciaServer::new(config, access).serve().await?;
        Ok::<(), anyhow::Error>(())
    })
}

fn cmd_config(settings: &Settings, args: ConfigArgs) -> anyhow::Result<()> {
    let backend = &settings.backend;
    match args.format {
        OutputFormat::Json => {
            let value = json!({
                "source": settings.source,
                "backend": {
                    "api_key": backend.redacted_api_key(),
                    "auth_domain": backend.auth_domain,
                    "project_id": backend.project_id,
                    "storage_bucket": backend.storage_bucket,
                    "app_id": backend.app_id,
                },
                "sdk": settings.sdk,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("Source: {}", settings.source.to_string().bold());
            println!("  api_key:        {}", backend.redacted_api_key().dimmed());
            println!("  auth_domain:    {}", backend.auth_domain);
            println!("  project_id:     {}", backend.project_id.cyan());
            println!("  storage_bucket: {}", backend.storage_bucket);
            println!("  app_id:         {}", backend.app_id);
            println!("Collection: {}", settings.sdk.collection.yellow());
            println!("Note append mode: {:?}", settings.sdk.note_append_mode);
        }
    }
    Ok(())
}
