use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use mnemo_curator::CurationPipeline;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_optional_timestamp, print_json};

#[derive(Parser)]
pub struct StatsCommand {
    #[clap(long, help = "Only show categories under this prefix")]
    pub category: Option<String>,
}

impl StatsCommand {
    pub async fn execute(&self, pipeline: &CurationPipeline, format: OutputFormat) -> CliResult<()> {
        let mut stats = pipeline.stats().await?;
        if let Some(prefix) = &self.category {
            stats
                .categories
                .retain(|name, _| name == prefix || name.starts_with(&format!("{prefix}/")));
        }

        match format {
            OutputFormat::Json => print_json(&stats)?,
            OutputFormat::Table => {
                println!("Mnemo Curator Statistics");
                println!("========================\n");

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header([
                        "Category",
                        "Count",
                        "Avg Confidence",
                        "Candidates",
                        "Oldest",
                        "Newest",
                    ]);

                for (name, summary) in &stats.categories {
                    table.add_row([
                        name,
                        &summary.stats.count.to_string(),
                        &format!("{:.3}", summary.stats.average_confidence),
                        &summary.eviction_candidates.to_string(),
                        &format_optional_timestamp(summary.stats.oldest.as_ref()),
                        &format_optional_timestamp(summary.stats.newest.as_ref()),
                    ]);
                }

                println!("{table}\n");

                println!(
                    "Total: {} memories in {} store, {} tombstones",
                    stats.total_records, stats.store, stats.tombstones
                );
                println!(
                    "Last sweep: {}  Scoring version: {}",
                    format_optional_timestamp(stats.last_sweep.as_ref()),
                    stats.scoring_version
                );
            }
        }

        Ok(())
    }
}
