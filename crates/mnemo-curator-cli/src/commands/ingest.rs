use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use mnemo_curator::CurationPipeline;
use mnemo_curator::memory::{Candidate, ContextProfile, SourceContext};

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json, truncate_string};

#[derive(Parser)]
pub struct IngestCommand {
    #[clap(help = "Candidate fact text")]
    pub text: String,

    #[clap(
        long,
        short,
        default_value = "autonomous_coding",
        help = "Context profile (autonomous_coding, interactive_debugging, knowledge_building)"
    )]
    pub profile: String,

    #[clap(long, help = "Session the fact was extracted from")]
    pub session: Option<String>,

    #[clap(long, help = "File the conversation was about")]
    pub file: Option<String>,

    #[clap(long, help = "Extractor confidence in [0, 1]")]
    pub extraction_confidence: Option<f32>,
}

impl IngestCommand {
    pub async fn execute(&self, pipeline: &CurationPipeline, format: OutputFormat) -> CliResult<()> {
        let profile: ContextProfile = self.profile.parse()?;

        let mut source = SourceContext::new();
        if let Some(session) = &self.session {
            source = source.with_session(session);
        }
        if let Some(file) = &self.file {
            source = source.with_file(file);
        }

        let mut candidate = Candidate::new(self.text.clone(), profile).with_source(source);
        if let Some(confidence) = self.extraction_confidence {
            candidate = candidate.with_extraction_confidence(confidence);
        }

        let outcome = pipeline.ingest(candidate).await?;

        match format {
            OutputFormat::Json => print_json(&outcome)?,
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Field", "Value"]);

                table.add_row(["Action", outcome.action.as_str()]);
                table.add_row(["Memory ID", &outcome.memory_id.to_string()]);
                table.add_row(["Category", &outcome.category_path.to_string()]);
                table.add_row(["Confidence", &format!("{:.3}", outcome.confidence)]);
                table.add_row(["Degraded", if outcome.degraded { "yes" } else { "no" }]);
                table.add_row(["Tags", &truncate_string(&outcome.tags.join(", "), 120)]);

                println!("{table}");
            }
        }

        Ok(())
    }
}
