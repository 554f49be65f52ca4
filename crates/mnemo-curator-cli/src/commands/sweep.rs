use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use mnemo_curator::CurationPipeline;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json};

#[derive(Parser)]
pub struct SweepCommand {
    #[clap(long, help = "List the purged memory ids")]
    pub show_ids: bool,
}

impl SweepCommand {
    pub async fn execute(&self, pipeline: &CurationPipeline, format: OutputFormat) -> CliResult<()> {
        let report = pipeline.sweep_now().await?;

        match format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Table => {
                println!("Eviction Sweep ({})", report.strategy.as_str());
                println!("======================\n");

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Scope", "Before", "Purged", "Remaining"]);

                for (scope, counts) in &report.per_category_counts {
                    table.add_row([
                        scope,
                        &counts.before.to_string(),
                        &counts.purged.to_string(),
                        &counts.remaining.to_string(),
                    ]);
                }

                println!("{table}\n");

                println!(
                    "Purged {} of {} candidates, {} released, {} aborted batches",
                    report.purged_ids.len(),
                    report.candidates_considered,
                    report.released,
                    report.aborted_batches
                );
                if report.deadline_hit {
                    println!("Deadline reached; remaining candidates wait for the next sweep");
                }

                if self.show_ids {
                    for id in &report.purged_ids {
                        println!("  {id}");
                    }
                }
            }
        }

        Ok(())
    }
}
