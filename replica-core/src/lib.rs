pub mod config;
pub mod error;
pub mod materialize;
pub mod tracker;

use colored::Colorize;

pub use config::{MirrorConfig, Origins, parse_paths};
pub use error::CoreError;
pub use materialize::{MaterializeConfig, MaterializeReport, Materializer, load_document};
pub use tracker::{Tracker, TrackerSnapshot};

pub fn print_banner() {
    let banner = r#"
   ___  ___ ___ _    ___ ___   _
  | _ \| __| _ \ |  |_ _/ __| /_\
  |   /| _||  _/ |__ | | (__ / _ \
  |_|_\|___|_| |____|___\___/_/ \_\
"#;
    println!("{}", banner.cyan().bold());
    println!(
        "  {} {}\n",
        "mirror a live site into a static copy".dimmed(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
