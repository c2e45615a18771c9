mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use cli::{Cli, Command, ScenarioArg};
use gvimctl::client::RemoteClient;
use gvimctl::config::HarnessConfig;
use gvimctl::identity::SessionIdentity;
use gvimctl::locate;
use gvimctl::log::RunLog;
use gvimctl::report;
use gvimctl::session::Session;
use gvimctl::verify::{self, Scenario, ScenarioReport, ScenarioSettings};

impl From<ScenarioArg> for Scenario {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::EchoServerName => Scenario::EchoServerName,
            ScenarioArg::EchoAlphabet => Scenario::EchoAlphabet,
            ScenarioArg::BulkType => Scenario::BulkType,
        }
    }
}

fn run_all(
    session: &Session,
    scenarios: &[Scenario],
    settings: &ScenarioSettings,
) -> Result<Vec<ScenarioReport>> {
    let mut reports = Vec::with_capacity(scenarios.len());
    for &scenario in scenarios {
        let report = verify::run_scenario(session, scenario, settings)
            .with_context(|| format!("scenario '{scenario}' aborted"))?;
        reports.push(report);
    }
    Ok(reports)
}

fn attached_client(config: &HarnessConfig, server: String) -> Result<RemoteClient> {
    let paths = locate::resolve_editor_paths(&config.editor)?;
    let mut client = RemoteClient::new(paths, &config.timing);
    client.attach(SessionIdentity::from_existing(server));
    Ok(client)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config { .. });

    let filter = match cli.verbose {
        0 if is_config_command => "gvimctl=warn",
        0 => "gvimctl=info",
        1 => "gvimctl=debug",
        _ => "gvimctl=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (mut config, config_path) = HarnessConfig::load(&cwd)?;

    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .gvimctl/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Run {
            scenarios,
            lines,
            log,
            json,
        } => {
            if let Some(lines) = lines {
                config.bulk.line_count = lines;
            }
            let scenarios: Vec<Scenario> = if scenarios.is_empty() {
                Scenario::ALL.to_vec()
            } else {
                scenarios.into_iter().map(Scenario::from).collect()
            };
            let run_log = log.as_deref().map(RunLog::new).transpose()?;
            let settings = ScenarioSettings::from(&config);

            let session = Session::start(&config, &cwd, run_log)?;
            let server = session.identity().to_string();
            let outcome = run_all(&session, &scenarios, &settings);
            if let Err(e) = session.finish() {
                warn!(error = %e, "editor shutdown failed");
            }
            let reports = outcome?;

            if json {
                println!("{}", report::render_reports_json(&server, &reports)?);
            } else {
                print!("{}", report::render_reports_human(&server, &reports));
            }

            let failed: Vec<&str> = reports
                .iter()
                .filter(|r| !r.passed)
                .map(|r| r.scenario.as_str())
                .collect();
            if !failed.is_empty() {
                anyhow::bail!("scenarios failed: {}", failed.join(", "));
            }
        }
        Command::Servers => {
            let paths = locate::resolve_editor_paths(&config.editor)?;
            let client = RemoteClient::new(paths, &config.timing);
            for name in client.server_list()? {
                println!("{name}");
            }
        }
        Command::Locate => {
            let paths = locate::resolve_editor_paths(&config.editor)?;
            println!("gvim {}", paths.gvim.display());
            println!("vim  {}", paths.vim.display());
        }
        Command::Send { server, keys } => {
            let client = attached_client(&config, server)?;
            client.send(&keys)?;
        }
        Command::Expr { server, expr } => {
            let client = attached_client(&config, server)?;
            println!("{}", client.eval(&expr)?);
        }
        Command::Config { json } => {
            if json {
                println!(
                    "{}",
                    report::render_config_json(&config, config_path.as_deref())?
                );
            } else {
                print!(
                    "{}",
                    report::render_config_human(&config, config_path.as_deref())
                );
            }
        }
    }

    Ok(())
}
