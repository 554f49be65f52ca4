use clap::{Parser, ValueEnum};
use mnemo_curator::CurationPipeline;
use mnemo_curator::memory::CategoryPath;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Verdict {
    Useful,
    NotUseful,
}

#[derive(Parser)]
pub struct FeedbackCommand {
    #[clap(help = "Category path, e.g. development/testing")]
    pub category: String,

    #[clap(value_enum, help = "Whether memories from this category helped")]
    pub verdict: Verdict,
}

impl FeedbackCommand {
    pub async fn execute(&self, pipeline: &CurationPipeline, format: OutputFormat) -> CliResult<()> {
        let category: CategoryPath = self.category.parse()?;
        let useful = matches!(self.verdict, Verdict::Useful);
        let version = pipeline.record_feedback(&category, useful).await?;
        let history = pipeline.snapshot().historical_factor(&category);

        match format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "category": category.to_string(),
                "useful": useful,
                "scoring_version": version,
                "historical_factor": history,
            }))?,
            OutputFormat::Table => {
                println!(
                    "Recorded {} feedback for {category} (scoring version {version}, history {history:.3})",
                    if useful { "useful" } else { "not useful" }
                );
            }
        }

        Ok(())
    }
}
