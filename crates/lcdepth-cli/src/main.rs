//! `lcdepth` – light-curtain depth fusion command line.
//!
//! ```text
//! lcdepth run [--json] [--config <path>]   fuse the synthetic stepped-plane scene
//! lcdepth schema                           print the config file's JSON schema
//! lcdepth init-config [--force] [--config <path>]
//! lcdepth help
//! ```
//!
//! The config file defaults to `~/.lcdepth/config.toml`; `LCDEPTH_*`
//! environment variables override individual keys.

mod config;
mod scenario;

use colored::Colorize;
use std::path::PathBuf;

use lcdepth_runtime::telemetry::init_tracing;

#[derive(Debug, Default)]
struct Args {
    command: String,
    json: bool,
    force: bool,
    config: Option<PathBuf>,
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
    let mut args = Args {
        command: "help".to_string(),
        ..Args::default()
    };
    let mut iter = raw.iter();
    if let Some(cmd) = iter.next() {
        args.command = cmd.clone();
    }
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--json" => args.json = true,
            "--force" => args.force = true,
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            other => return Err(format!("unknown flag '{other}'")),
        }
    }
    Ok(args)
}

fn main() {
    let guard = init_tracing("lcdepth");
    tracing::debug!(otlp = guard.is_exporting(), "tracing initialised");
    let raw: Vec<String> = std::env::args().skip(1).collect();

    let result = parse_args(&raw).and_then(|args| dispatch(&args));
    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        drop(guard);
        std::process::exit(1);
    }
}

fn dispatch(args: &Args) -> Result<(), String> {
    let path = args.config.clone().unwrap_or_else(config::config_path);
    match args.command.as_str() {
        "run" => cmd_run(&path, args.json),
        "schema" => cmd_schema(),
        "init-config" => cmd_init_config(&path, args.force),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => Err(format!("unknown command '{other}' (try `lcdepth help`)")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_run(path: &std::path::Path, json: bool) -> Result<(), String> {
    let cfg = config::load_or_default(path)?;
    let scene =
        scenario::Scenario::build(&cfg.scenario, cfg.lc.epsilon).map_err(|e| e.to_string())?;
    let report = scenario::run(&cfg.lc, &scene).map_err(|e| e.to_string())?;

    if json {
        let out = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("Failed to encode report: {e}"))?;
        println!("{out}");
        return Ok(());
    }

    println!();
    println!(
        "  {} {}  planner {}  {}x{}",
        "run".bold().cyan(),
        report.run_id.to_string().dimmed(),
        report.planner.to_string().bold(),
        cfg.scenario.width,
        cfg.scenario.height,
    );
    println!("  prior depth error  {:>8.3} m", report.prior_error_m);
    println!("  {:>5}  {:>10}  {:>12}", "iter", "field rmse", "depth error");
    let mut previous = report.prior_error_m;
    for row in &report.iterations {
        let error = format!("{:>10.3} m", row.depth_error_m);
        let error = if row.depth_error_m <= previous { error.green() } else { error.yellow() };
        println!("  {:>5}  {:>10.4}  {}", row.iteration, row.field_rmse, error);
        previous = row.depth_error_m;
    }
    let verdict = if report.final_error_m < report.prior_error_m {
        "improved".green().bold()
    } else {
        "not improved".yellow().bold()
    };
    println!(
        "  final depth error  {:>8.3} m  ({})",
        report.final_error_m, verdict
    );
    println!();
    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(config::Config);
    let out = serde_json::to_string_pretty(&schema)
        .map_err(|e| format!("Failed to encode schema: {e}"))?;
    println!("{out}");
    Ok(())
}

fn cmd_init_config(path: &std::path::Path, force: bool) -> Result<(), String> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (pass --force to overwrite)",
            path.display()
        ));
    }
    config::save_to(&config::Config::default(), path)?;
    println!(
        "  {} Config saved to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}

fn print_help() {
    println!();
    println!(
        "  {} {}",
        "lcdepth".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Light-curtain depth fusion");
    println!();
    println!("  {}", "Commands".bold());
    println!("    run           Fuse the synthetic stepped-plane scene and report errors");
    println!("    schema        Print the config file's JSON schema");
    println!("    init-config   Write a default config file");
    println!("    help          Show this message");
    println!();
    println!("  {}", "Flags".bold());
    println!("    --config <path>   Config file (default ~/.lcdepth/config.toml)");
    println!("    --json            Machine-readable run report");
    println!("    --force           Overwrite an existing config file");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_means_help() {
        let args = parse_args(&[]).unwrap();
        assert_eq!(args.command, "help");
    }

    #[test]
    fn flags_are_parsed() {
        let args = parse_args(&strings(&["run", "--json", "--config", "/tmp/x.toml"])).unwrap();
        assert_eq!(args.command, "run");
        assert!(args.json);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/x.toml")));
    }

    #[test]
    fn bad_flags_are_rejected() {
        assert!(parse_args(&strings(&["run", "--config"])).is_err());
        assert!(parse_args(&strings(&["run", "--verbose"])).is_err());
    }

    #[test]
    fn unknown_command_is_an_error() {
        let args = parse_args(&strings(&["fly"])).unwrap();
        assert!(dispatch(&args).is_err());
    }

    #[test]
    fn init_config_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        cmd_init_config(&path, false).unwrap();
        assert!(cmd_init_config(&path, false).is_err());
        cmd_init_config(&path, true).unwrap();
    }
}
