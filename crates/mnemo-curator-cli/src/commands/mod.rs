mod feedback;
mod ingest;
mod stats;
mod sweep;
mod touch;

pub use feedback::FeedbackCommand;
pub use ingest::IngestCommand;
pub use stats::StatsCommand;
pub use sweep::SweepCommand;
pub use touch::TouchCommand;
