use anyhow::Result;
use console::style;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use agent_orchestrator::core::config::{CONFIG_FILE, OrchestratorConfig};
use agent_orchestrator::core::fleet::Fleet;
use agent_orchestrator::core::terminal::{self, GuideSection, print_error};
use agent_orchestrator::logging;

fn print_help() {
    GuideSection::new("Daemon")
        .command("run", "Start every running agent and keep them on schedule")
        .command("check", "Validate the configuration file and exit")
        .print();

    GuideSection::new("Options")
        .command("--config <path>", "Configuration file (default ./orchestrator.toml)")
        .print();

    println!(
        "\n {} {} <command> [--config <path>]\n",
        style("Usage:").bold(),
        style("agent-orchestrator").green()
    );
}

pub(crate) fn parse_config_flag(args: &[String], start: usize) -> PathBuf {
    let mut path = PathBuf::from(CONFIG_FILE);
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    path = PathBuf::from(&args[i + 1]);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    path
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let cmd = args[1].as_str();
    match cmd {
        "run" => {
            let config = OrchestratorConfig::load(parse_config_flag(&args, 2)).await?;
            logging::init_tracing(&config.daemon.log_level, config.daemon.log_file.as_deref())?;

            terminal::print_status("Database", &config.database_path().display().to_string());
            terminal::print_status("Model endpoint", &config.llm.base_url);
            if config.api_key().is_none() {
                terminal::print_warn(&format!(
                    "{} is not set; model calls go out without authorization",
                    config.llm.api_key_env
                ));
            }

            let fleet = Fleet::boot(&config).await?;
            fleet.run(CancellationToken::new()).await?;
            terminal::print_goodbye();
        }
        "check" => {
            let path = parse_config_flag(&args, 2);
            let config = OrchestratorConfig::load(&path).await?;
            logging::parse_level(&config.daemon.log_level)?;
            terminal::print_success(&format!("{} is valid", path.display()));
            terminal::print_status("Seeded agents", &config.agents.len().to_string());
            terminal::print_status("Webhook tools", &config.webhooks.len().to_string());
            terminal::print_status("Context feeds", &config.feeds.len().to_string());
        }
        "help" | "--help" | "-h" => print_help(),
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
        }
    }
    Ok(())
}
