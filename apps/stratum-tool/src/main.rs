//! CLI tool for module registries.
//!
//! Provides commands for:
//! - Listing the module catalogue of addons directories
//! - Printing the composed model registry
//! - Assembling a view for a user
//! - Running an uninstall and printing its report

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use stratum_core::store::RecordId;
use stratum_core::{CoreConfig, Database};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory scanned for modules (repeatable)
    #[arg(long = "addons", global = true)]
    addons: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Modules installed before the command runs (repeatable)
    #[arg(short, long = "install", global = true)]
    install: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the module catalogue
    Modules,

    /// Print the composed registry
    Models {
        /// Only this model
        #[arg(long)]
        model: Option<String>,
    },

    /// Assemble a view
    View {
        /// View id or external id
        view: String,

        /// User id or external id
        #[arg(short, long, default_value = "base.user_admin")]
        user: String,

        /// Annotate nodes with their origin
        #[arg(long)]
        branding: bool,

        /// Print the field descriptors too
        #[arg(long)]
        json: bool,
    },

    /// Uninstall modules and print the report
    Uninstall {
        /// Modules to uninstall
        #[arg(required = true)]
        modules: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => CoreConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => CoreConfig::default(),
    };
    config.addons_paths.extend(cli.addons.iter().cloned());

    let db = Database::open(config).context("failed to open database")?;
    if !cli.install.is_empty() {
        let names: Vec<&str> = cli.install.iter().map(String::as_str).collect();
        let added = db.install(&names).context("install failed")?;
        tracing::info!(modules = ?added, "installed");
    }

    match cli.command {
        Commands::Modules => {
            let installed = db.installed_modules()?;
            for manifest in db.available_modules()? {
                let mark = if installed.contains(&manifest.name) { "*" } else { " " };
                println!(
                    "{} {:<24} {:<8} depends: [{}]",
                    mark,
                    manifest.name,
                    manifest.version,
                    manifest.depends.join(", ")
                );
            }
        }
        Commands::Models { model } => {
            let registry = db.registry();
            let mut out = serde_json::Map::new();
            for m in registry.models() {
                if model.as_deref().is_some_and(|wanted| wanted != m.name) {
                    continue;
                }
                out.insert(
                    m.name.clone(),
                    json!({
                        "description": m.description,
                        "modules": m.modules,
                        "fields": db.fields(&m.name)?,
                    }),
                );
            }
            if let Some(wanted) = model {
                if out.is_empty() {
                    bail!("unknown model '{}'", wanted);
                }
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::View {
            view,
            user,
            branding,
            json,
        } => {
            let view_id = resolve(&db, &view)?;
            let uid = resolve(&db, &user)?;
            let assembled = db.assemble(view_id, uid, None, branding)?;
            if json {
                println!("{}", serde_json::to_string_pretty(assembled.as_ref())?);
            } else {
                println!("{}", assembled.arch);
            }
        }
        Commands::Uninstall { modules } => {
            let names: Vec<&str> = modules.iter().map(String::as_str).collect();
            let report = db.uninstall(&names)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.residue.is_empty() {
                tracing::warn!(residue = report.residue.len(), "uninstall left residue");
            }
        }
    }
    Ok(())
}

/// Numeric id, or the record an external id points at.
fn resolve(db: &Database, reference: &str) -> Result<RecordId> {
    if let Ok(id) = reference.parse() {
        return Ok(id);
    }
    db.xmlid_to_res_id(reference)
        .with_context(|| format!("cannot resolve '{}'", reference))
}
