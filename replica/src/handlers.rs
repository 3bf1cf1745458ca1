use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use replica_core::{MaterializeConfig, MaterializeReport, Materializer, MirrorConfig, parse_paths};
use replica_scanner::{CaptureJob, CaptureSummary, Crawler, Origin};
use replica_server::{Server, ServerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "replica=info,replica_core=info,replica_scanner=info,replica_server=info,tower_http=info";

/// Installs the global subscriber. Logs go to stderr so a capture document
/// written to stdout stays clean. `RUST_LOG` overrides the default filter.
pub fn init_tracing(quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("warn")
        } else {
            EnvFilter::new(DEFAULT_LOG_FILTER)
        }
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Flattens repeated and comma-separated path arguments, keeping order.
pub fn collect_paths<'a>(values: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let paths: Vec<String> = values.into_iter().flat_map(|v| parse_paths(v)).collect();
    if paths.is_empty() {
        vec!["/".to_string()]
    } else {
        paths
    }
}

/// Picks the origin resources are downloaded from.
pub fn resource_origin(resource: Option<&Origin>, proxy: Option<&Origin>) -> Result<Origin> {
    match resource.or(proxy) {
        Some(origin) => Ok(origin.clone()),
        None => bail!("--resource-origin (or RESOURCE_ORIGIN / PROXY_ORIGIN) is required"),
    }
}

pub fn mirror_config(args: &ArgMatches) -> MirrorConfig {
    let paths = args
        .get_one::<String>("rewrite-paths")
        .map(|p| parse_paths(p))
        .unwrap_or_default();

    MirrorConfig::new(args.get_one::<Origin>("proxy-origin").cloned())
        .with_rewrite_origin(args.get_one::<Origin>("rewrite-origin").cloned())
        .with_rewrite_paths(paths)
        .with_tagged_resources(args.get_flag("resource-types"))
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

pub async fn handle_serve(args: &ArgMatches, quiet: bool) -> Result<()> {
    let host = args
        .get_one::<String>("host")
        .cloned()
        .unwrap_or_else(|| replica_server::DEFAULT_HOST.to_string());
    let port = args
        .get_one::<u16>("port")
        .copied()
        .unwrap_or(replica_server::DEFAULT_PORT);
    let mirror = mirror_config(args);

    if !quiet {
        print_divider();
        println!("{}", "  REPLICA GATEWAY".bright_white().bold());
        print_divider();
        println!(
            "{} Listening: {}",
            "→".blue(),
            format!("http://{}:{}", host, port).bright_white()
        );
        match &mirror.proxy_origin {
            Some(origin) => println!("{} Source:    {}", "→".blue(), origin.to_string().bright_white()),
            None => println!(
                "{} Source:    {}",
                "⚠".yellow(),
                "none (pass ?proxy-origin= per request)".yellow()
            ),
        }
        if let Some(origin) = &mirror.rewrite_origin {
            println!("{} Rewriting: {}", "→".blue(), origin.to_string().bright_white());
        }
        if !mirror.rewrite_paths.is_empty() {
            println!("{} Batch:     {} path(s)", "→".blue(), mirror.rewrite_paths.len());
        }
        println!();
    }

    let config = ServerConfig::new(mirror).with_host(host).with_port(port);
    let server = Server::new(config).context("Failed to set up the gateway")?;
    server.run().await.context("Gateway stopped unexpectedly")?;
    Ok(())
}

pub async fn handle_capture(args: &ArgMatches, quiet: bool) -> Result<CaptureSummary> {
    let source = args
        .get_one::<Origin>("proxy-origin")
        .cloned()
        .context("--proxy-origin is required")?;
    let rewrite = args.get_one::<Origin>("rewrite-origin").cloned();
    let paths = collect_paths(args.get_many::<String>("paths").into_iter().flatten());
    let output = args
        .get_one::<String>("output")
        .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()));

    let job = CaptureJob::new(source, rewrite, paths)
        .with_tagged_resources(args.get_flag("resource-types"));
    capture_to(job, output, quiet).await
}

/// Runs a capture job, streaming the document to `output` or stdout.
pub async fn capture_to(
    job: CaptureJob,
    output: Option<PathBuf>,
    quiet: bool,
) -> Result<CaptureSummary> {
    let crawler = Crawler::new().context("Failed to create HTTP client")?;
    info!(
        "Capture document goes to {}",
        output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdout".to_string())
    );
    let (tx, mut rx) = mpsc::channel::<Bytes>(16);

    let spinner = if quiet || output.is_none() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(format!("Capturing {} path(s)...", job.paths.len()));
        pb
    };

    let writer_task = tokio::spawn(async move {
        let mut sink: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match &output {
            Some(path) => Box::new(
                tokio::fs::File::create(path)
                    .await
                    .with_context(|| format!("Failed to create {}", path.display()))?,
            ),
            None => Box::new(tokio::io::stdout()),
        };
        while let Some(chunk) = rx.recv().await {
            sink.write_all(&chunk).await.context("Failed to write capture")?;
        }
        sink.flush().await.context("Failed to write capture")?;
        Ok::<_, anyhow::Error>(output)
    });

    let summary = crawler.capture(&job, tx).await;
    let output = writer_task.await.context("Capture writer panicked")??;
    let summary = summary.context("Capture failed")?;
    spinner.finish_and_clear();

    if !quiet {
        if let Some(path) = output {
            println!(
                "{} Wrote {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        eprintln!(
            "{} {} captured, {} skipped, {} resources, {} pages",
            "✓".green().bold(),
            summary.captured,
            summary.skipped,
            summary.resources,
            summary.pages
        );
    }
    Ok(summary)
}

pub async fn handle_materialize(args: &ArgMatches, quiet: bool) -> Result<MaterializeReport> {
    let input = args
        .get_one::<String>("input")
        .context("--input (or CAPTURE_FILE) is required")?;
    let output = args
        .get_one::<String>("output")
        .map(String::as_str)
        .unwrap_or("./public");
    let origin = resource_origin(
        args.get_one::<Origin>("resource-origin"),
        args.get_one::<Origin>("proxy-origin"),
    )?;

    let config = MaterializeConfig::new(input, output, origin).with_progress(!quiet);
    let materializer = Materializer::new(config).context("Failed to create HTTP client")?;
    let report = materializer
        .run()
        .await
        .with_context(|| format!("Failed to materialize {}", input))?;

    if !quiet {
        print_report(&report, materializer.config());
    }
    Ok(report)
}

fn print_report(report: &MaterializeReport, config: &MaterializeConfig) {
    println!();
    println!(
        "{} {}",
        "✓".green().bold(),
        config.output.display().to_string().bright_white()
    );
    println!("  Pages written:     {}", report.pages_written);
    println!("  Resources written: {}", report.resources_written);
    if report.resources_skipped > 0 {
        println!(
            "  {} {}",
            "Resources skipped:".yellow(),
            report.resources_skipped
        );
    }
    if !report.is_clean() {
        println!("  {} {}", "Failures:".red().bold(), report.failures.len());
        for failure in &report.failures {
            println!("    {} {} ({})", "✗".red(), failure.path, failure.error);
        }
    }
}
