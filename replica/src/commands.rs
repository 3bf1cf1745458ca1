use crate::CLAP_STYLING;
use clap::{arg, command};
use replica_scanner::Origin;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("replica")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("replica")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("serve")
                .about(
                    "Run the rewriting proxy gateway in front of a source site, with the \
                capture endpoints enabled.",
                )
                .arg(
                    arg!(--"host" <HOST>)
                        .required(false)
                        .help("Address to listen on")
                        .env("REPLICA_HOST")
                        .default_value("127.0.0.1"),
                )
                .arg(
                    arg!(--"port" <PORT>)
                        .required(false)
                        .help("Port to listen on")
                        .env("PORT")
                        .value_parser(clap::value_parser!(u16))
                        .default_value("3000"),
                )
                .arg(
                    arg!(--"proxy-origin" <URL>)
                        .required(false)
                        .help("Source site to relay to (can be overridden per request)")
                        .env("PROXY_ORIGIN")
                        .value_parser(clap::value_parser!(Origin)),
                )
                .arg(
                    arg!(--"rewrite-origin" <URL>)
                        .required(false)
                        .help("Origin stripped from pages (default: the proxy origin)")
                        .env("REWRITE_ORIGIN")
                        .value_parser(clap::value_parser!(Origin)),
                )
                .arg(
                    arg!(--"rewrite-paths" <PATHS>)
                        .required(false)
                        .help("Comma-separated paths captured by /html-json/ when none are requested")
                        .env("REWRITE_PATHS"),
                )
                .arg(
                    arg!(--"resource-types")
                        .required(false)
                        .help("Tag captured resources with their kind by default")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("capture")
                .about("Capture a list of pages from the source site into a capture document")
                .arg(
                    arg!(--"proxy-origin" <URL>)
                        .required(true)
                        .help("Source site to fetch pages from")
                        .env("PROXY_ORIGIN")
                        .value_parser(clap::value_parser!(Origin)),
                )
                .arg(
                    arg!(--"rewrite-origin" <URL>)
                        .required(false)
                        .help("Origin stripped from pages (default: the proxy origin)")
                        .env("REWRITE_ORIGIN")
                        .value_parser(clap::value_parser!(Origin)),
                )
                .arg(
                    arg!(-p --"paths" <PATHS>)
                        .required(false)
                        .help("Paths to capture, comma-separated or repeated (default: /)")
                        .env("REWRITE_PATHS")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Write the document to a file (default: stdout)"),
                )
                .arg(
                    arg!(--"resource-types")
                        .required(false)
                        .help("Emit resources as {url, type} objects")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("materialize")
                .about("Write a capture document out as a static site")
                .arg(
                    arg!(-i --"input" <PATH>)
                        .required(true)
                        .help("Capture document or /proxy-capture snapshot to read")
                        .env("CAPTURE_FILE"),
                )
                .arg(
                    arg!(-o --"output" <DIR>)
                        .required(false)
                        .help("Root directory of the static site")
                        .env("OUTPUT_DIR")
                        .default_value("./public"),
                )
                .arg(
                    arg!(--"resource-origin" <URL>)
                        .required(false)
                        .help("Where resources are downloaded from (default: the proxy origin)")
                        .env("RESOURCE_ORIGIN")
                        .value_parser(clap::value_parser!(Origin)),
                )
                .arg(
                    arg!(--"proxy-origin" <URL>)
                        .required(false)
                        .help("Fallback for --resource-origin")
                        .env("PROXY_ORIGIN")
                        .value_parser(clap::value_parser!(Origin)),
                ),
        )
}
