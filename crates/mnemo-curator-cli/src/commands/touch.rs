use clap::Parser;
use mnemo_curator::CurationPipeline;
use uuid::Uuid;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json};

#[derive(Parser)]
pub struct TouchCommand {
    #[clap(help = "Memory ID (UUID format)")]
    pub id: String,
}

impl TouchCommand {
    pub async fn execute(&self, pipeline: &CurationPipeline, format: OutputFormat) -> CliResult<()> {
        let id = Uuid::parse_str(&self.id)?;
        if !pipeline.touch(id).await? {
            return Err(format!("Memory not found: {id}").into());
        }

        match format {
            OutputFormat::Json => print_json(&serde_json::json!({ "id": id, "touched": true }))?,
            OutputFormat::Table => println!("Recorded access to {id}"),
        }

        Ok(())
    }
}
