//! flexprov - provision and deploy a Flex Consumption function app.
//!
//! # Usage
//!
//! ```text
//! flexprov plan
//! flexprov provision --config flexprov.yaml
//! flexprov outputs
//! flexprov deploy
//! ```

mod cli;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use flexprov_core::convergence::cancel::{install_interrupt_handler, CancelFlag};
use flexprov_core::data::env_file::EnvFile;
use flexprov_core::data::settings::{self, CONFIG_ENV};
use flexprov_core::deploy::{deploy, DeployRequest};
use flexprov_core::errors::DeployError;
use flexprov_core::infrastructure::arm::ArmBackend;
use flexprov_core::infrastructure::runner::ProcessRunner;
use flexprov_core::provision;
use flexprov_core::types::config::Settings;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("flexprov: {e:#}");
        let code = e
            .downcast_ref::<DeployError>()
            .map(DeployError::exit_code)
            .unwrap_or(1);
        process::exit(code);
    }
}

/// Log to stderr. `-v` beats RUST_LOG; RUST_LOG beats the `info` default.
fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let (settings, env_vars) = load_settings(cli)?;

    match cli.command {
        Commands::Plan => {
            let plan = provision::plan(&settings)?;
            let d = &plan.derived;
            println!("storage account   {}", d.storage_account_name);
            println!("service plan      {}", d.plan_name);
            println!("function app      {}", d.host_name);
            println!("package container {}", d.deployment_container_name);
            println!("default domain    {}", d.host_default_domain);
            println!();
            for (i, node) in plan.order.iter().enumerate() {
                let deps: Vec<&str> = node.depends_on.iter().map(|d| d.as_str()).collect();
                println!(
                    "{:>2}. {:<22} {:<16} {} [{}]",
                    i + 1,
                    node.id,
                    node.kind,
                    node.name,
                    deps.join(", ")
                );
            }
        }
        Commands::Provision => {
            let cancel = CancelFlag::new();
            if !install_interrupt_handler(&cancel) {
                warn!("could not install interrupt handler; Ctrl-C will abort immediately");
            }
            let mut backend = ArmBackend::new(
                ProcessRunner,
                PathBuf::from(&settings.az_cli),
                settings.cloud.resource_manager(),
                settings.poll,
            );
            let report = provision::run(&settings, &mut backend, &cancel)
                .context("provisioning failed")?;
            for node in &report.apply.nodes {
                println!("{:<22} {:<10} {}", node.node, node.outcome, node.resource_id);
            }
            println!();
            for (key, value) in report.outputs.iter() {
                println!("{}={}", key, value);
            }
        }
        Commands::Outputs { json } => {
            let outputs = provision::outputs(&settings)?;
            if json {
                println!("{}", serde_json::to_string_pretty(outputs.as_map())?);
            } else {
                for (key, value) in outputs.iter() {
                    println!("{}={}", key, value);
                }
            }
        }
        Commands::Deploy => {
            let request = DeployRequest::from_process_env(&env_vars);
            let outcome = deploy(&request, &ProcessRunner)?;
            println!("published to {}", outcome.host_name);
        }
    }
    Ok(())
}

/// Settings file, overlaid by the env file, overlaid by the process
/// environment. Also returns the env file contents for the deploy step.
fn load_settings(cli: &Cli) -> Result<(Settings, HashMap<String, String>)> {
    let env_config = std::env::var(CONFIG_ENV).ok();
    let path = settings::resolve_config_path(cli.config.as_deref(), env_config.as_deref());
    let explicit = cli.config.is_some() || env_config.is_some();
    let mut settings = if explicit {
        settings::load(&path)?
    } else {
        settings::load_or_default(&path)?
    };

    if let Some(env_file) = &cli.env_file {
        settings.env_file = env_file.clone();
    }
    let env_vars = EnvFile::load(&settings.env_file)
        .with_context(|| format!("cannot read {}", settings.env_file.display()))?;
    settings::apply_overrides(&mut settings, &env_vars)?;
    settings::apply_overrides(&mut settings, &EnvFile::process())?;

    Ok((settings, env_vars))
}
