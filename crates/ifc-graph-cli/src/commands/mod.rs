pub mod config;
pub mod ingest;
pub mod inspect;

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use ifc_graph_core::{ModelSummary, PipelineStatistics};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, Clone)]
pub struct OutputContext {
    pub json: bool,
    pub verbose: bool,
}

/// Creates a progress bar with the given length
pub fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("█▓▒░"));
    }
    pb.set_message(message.to_string());
    pb
}

impl OutputContext {
    pub fn print_json<T: serde::Serialize>(&self, data: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(data)?);
        Ok(())
    }

    pub fn print_rows(&self, header: &[&str], rows: Vec<[String; 2]>) {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(header.to_vec());
        for row in rows {
            table.add_row(row.to_vec());
        }
        println!("{table}");
    }

    pub fn print_statistics(&self, stats: &PipelineStatistics) -> Result<()> {
        if self.json {
            return self.print_json(stats);
        }

        let mut rows = vec![
            ["Elements".to_string(), stats.element_count.to_string()],
            ["Spatial elements".to_string(), stats.spatial_element_count.to_string()],
            ["Relationships".to_string(), stats.relationship_count.to_string()],
            ["Property sets".to_string(), stats.property_set_count.to_string()],
            ["Materials".to_string(), stats.material_count.to_string()],
            [
                "Topological relationships".to_string(),
                stats.topological_relationship_count.to_string(),
            ],
            ["Skipped records".to_string(), stats.skipped_records.to_string()],
            ["Failed records".to_string(), stats.failed_records.to_string()],
            [
                "Batches".to_string(),
                format!("{} ({} failed)", stats.batch_count, stats.failed_batches),
            ],
            ["Nodes".to_string(), stats.node_count.to_string()],
            ["Edges".to_string(), stats.edge_count.to_string()],
            [
                "Mode".to_string(),
                if stats.parallel_processing {
                    format!("parallel, {} workers", stats.parallel_workers)
                } else {
                    "sequential".to_string()
                },
            ],
            ["Elapsed".to_string(), format!("{:.2}s", stats.elapsed_seconds)],
        ];
        for (kind, count) in &stats.topology_breakdown {
            rows.push([format!("  topology: {kind}"), count.to_string()]);
        }
        if self.verbose {
            for timing in &stats.phase_timings {
                rows.push([format!("  phase: {}", timing.phase), format!("{:.3}s", timing.seconds)]);
            }
        }
        self.print_rows(&["Statistic", "Value"], rows);

        for file in &stats.report_files {
            println!("Report written to {}", file.display());
        }
        Ok(())
    }

    pub fn print_summary(&self, summary: &ModelSummary) -> Result<()> {
        if self.json {
            return self.print_json(summary);
        }
        let yes_no = |b: bool| if b { "yes" } else { "no" }.to_string();
        self.print_rows(
            &["Model", &summary.name],
            vec![
                ["Project".to_string(), yes_no(summary.has_project)],
                ["Sites".to_string(), summary.sites.to_string()],
                ["Buildings".to_string(), summary.buildings.to_string()],
                ["Storeys".to_string(), summary.storeys.to_string()],
                ["Spaces".to_string(), summary.spaces.to_string()],
                [
                    "Elements".to_string(),
                    format!("{} ({} unreadable)", summary.elements, summary.unreadable_elements),
                ],
                [
                    "Relationships".to_string(),
                    format!(
                        "{} ({} incomplete)",
                        summary.relationships, summary.incomplete_relationships
                    ),
                ],
                ["Topology".to_string(), yes_no(summary.has_topology)],
            ],
        );
        Ok(())
    }
}
