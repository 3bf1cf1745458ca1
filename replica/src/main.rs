use clap::ArgMatches;
use colored::Colorize;
use commands::command_argument_builder;
use replica::handlers::{handle_capture, handle_materialize, handle_serve, init_tracing};
use replica_core::print_banner;

mod commands;

#[tokio::main]
async fn main() {
    // Environment fallbacks for the arguments below may live in .env
    dotenvy::dotenv().ok();

    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // stdout carries the document when capture has no --output
    let stdout_is_data = matches!(
        chosen_command.subcommand(),
        Some(("capture", args)) if args.get_one::<String>("output").is_none()
    );
    if !quiet && !stdout_is_data {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }
    init_tracing(quiet);

    match chosen_command.subcommand() {
        Some(("serve", primary_command)) => run_serve(primary_command, quiet).await,
        Some(("capture", primary_command)) => run_capture(primary_command, quiet).await,
        Some(("materialize", primary_command)) => run_materialize(primary_command, quiet).await,
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

async fn run_serve(args: &ArgMatches, quiet: bool) {
    if let Err(e) = handle_serve(args, quiet).await {
        fail("Gateway failed", e);
    }
}

async fn run_capture(args: &ArgMatches, quiet: bool) {
    if let Err(e) = handle_capture(args, quiet).await {
        fail("Capture failed", e);
    }
}

async fn run_materialize(args: &ArgMatches, quiet: bool) {
    match handle_materialize(args, quiet).await {
        Ok(report) if report.is_clean() => {}
        Ok(report) => {
            eprintln!(
                "{} {} item(s) could not be written",
                "✗".red().bold(),
                report.failures.len()
            );
            std::process::exit(1);
        }
        Err(e) => fail("Materialize failed", e),
    }
}

fn fail(what: &str, err: anyhow::Error) -> ! {
    eprintln!("{} {}: {:#}", "✗".red().bold(), what, err);
    std::process::exit(1);
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
