use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "flexprov")]
#[command(about = "Provision an Azure Flex Consumption function app and publish code to it")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (overrides FLEXPROV_CONFIG; default ./flexprov.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Env file to read inputs from and merge outputs into
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// More log output (-v debug, -vv trace). Overrides RUST_LOG.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Show derived names and the apply order without contacting the cloud
    Plan,
    /// Converge the infrastructure and write outputs to the env file
    Provision,
    /// Print outputs recorded by the last provision
    Outputs {
        /// Print as a JSON object instead of KEY=VALUE lines
        #[arg(long)]
        json: bool,
    },
    /// Publish the function code with a remote build
    Deploy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["flexprov", "provision", "--config", "x.yaml", "-vv"]).unwrap();
        assert_eq!(cli.command, Commands::Provision);
        assert_eq!(cli.config, Some(PathBuf::from("x.yaml")));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn outputs_json_flag() {
        let cli = Cli::try_parse_from(["flexprov", "outputs", "--json"]).unwrap();
        assert_eq!(cli.command, Commands::Outputs { json: true });
    }

    #[test]
    fn subcommand_required() {
        assert!(Cli::try_parse_from(["flexprov"]).is_err());
    }
}
