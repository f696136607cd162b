use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use waypoint_core::adaptor::TestAdaptor;
use waypoint_core::config::Config;
use waypoint_core::context::{Context, Shared};
use waypoint_core::error::Errata;
use waypoint_core::hook::Hook;
use waypoint_core::value::Feature;

/// waypoint - validate and dry-run waypoint-core rule files offline
#[derive(Parser)]
#[command(name = "waypoint")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a rule file and report every load-time problem found
    Validate {
        /// Path to the YAML rule file
        file: PathBuf,
    },
    /// Load a rule file and run one hook against a synthetic request
    DryRun {
        /// Path to the YAML rule file
        file: PathBuf,
        /// Hook to invoke (e.g. "remap", "creq", "post-load")
        #[arg(long, default_value = "remap")]
        hook: String,
        /// User-agent-side request field, KEY=VALUE (repeatable)
        #[arg(long = "ua-field", value_parser = parse_key_value)]
        ua_fields: Vec<(String, String)>,
        /// User-agent-side request header, KEY=VALUE (repeatable)
        #[arg(long = "ua-header", value_parser = parse_key_value)]
        ua_headers: Vec<(String, String)>,
        /// Pre-seed a rule-file variable, KEY=VALUE (repeatable)
        #[arg(long = "var", value_parser = parse_key_value)]
        vars: Vec<(String, String)>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) => Ok((k.to_string(), v.to_string())),
        None => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let exit_ok = match cli.command {
        Commands::Validate { file } => validate(&file),
        Commands::DryRun {
            file,
            hook,
            ua_fields,
            ua_headers,
            vars,
        } => dry_run(&file, &hook, ua_fields, ua_headers, vars),
    };

    std::process::exit(if exit_ok { 0 } else { 1 });
}

fn validate(file: &PathBuf) -> bool {
    let (_config, errata) = Config::from_file(file);
    print_errata(&errata);
    if errata.is_ok() {
        println!("{} {}", "ok:".green().bold(), file.display());
    } else {
        println!("{} {}", "failed:".red().bold(), file.display());
    }
    errata.is_ok()
}

fn dry_run(
    file: &PathBuf,
    hook_name: &str,
    ua_fields: Vec<(String, String)>,
    ua_headers: Vec<(String, String)>,
    vars: Vec<(String, String)>,
) -> bool {
    let (config, errata) = Config::from_file(file);
    print_errata(&errata);
    if !errata.is_ok() {
        println!("{} aborting dry-run, rule file did not load cleanly", "error:".red().bold());
        return false;
    }

    let Some(hook) = Hook::from_name(hook_name) else {
        eprintln!("{} unknown hook '{hook_name}'", "error:".red().bold());
        return false;
    };

    let mut adaptor = TestAdaptor::default();
    for (k, v) in ua_fields {
        adaptor = adaptor.with_ua_field(&k, &v);
    }
    for (k, v) in ua_headers {
        adaptor = adaptor.with_ua_header(&k, &v);
    }

    let mut ctx = Context::new(Box::new(adaptor), Shared::default());
    for (k, v) in vars {
        ctx.set_var(k, Feature::string(v));
    }

    config.invoke_hook(hook, &mut ctx);
    ctx.run_finalizers();

    println!("{} {hook_name}", "invoked hook:".cyan().bold());
    println!("  ua request header Host = {:?}", ctx.request_header("Host"));
    println!("  proxy request header Host = {:?}", ctx.proxy_request_header("Host"));
    println!("  terminal = {}", ctx.is_terminal());
    true
}

fn print_errata(errata: &Errata) {
    for note in errata.notes() {
        let colored = match note.severity {
            waypoint_core::error::Severity::Error => note.to_string().red().bold(),
            waypoint_core::error::Severity::Warning => note.to_string().yellow().bold(),
        };
        println!("{colored}");
    }
}
