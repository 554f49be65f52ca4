pub mod commands;
pub mod error;
pub mod output;

pub use commands::{FeedbackCommand, IngestCommand, StatsCommand, SweepCommand, TouchCommand};
pub use error::{CliError, CliResult};
pub use output::{OutputFormat, format_timestamp, print_json, truncate_string};
