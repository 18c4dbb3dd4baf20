use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::write_export;
use crate::app::ports::{export_file_name, LeadExporter};
use crate::pipeline::orchestrator::RunReport;

/// Plain-text daily sheet for a person working the phone.
///
/// The error tally is always printed, even when it is all zeros, so a quiet
/// day can be told apart from a broken one.
pub struct TextExporter;

pub fn render(report: &RunReport) -> Result<String, std::fmt::Error> {
    let set = &report.lead_set;
    let s = &report.summary;
    let mut out = String::new();

    writeln!(out, "Leads for {} (run {})", set.run_date(), set.run_id())?;
    writeln!(
        out,
        "{} leads, {} new | {} raw records, {} duplicates suppressed",
        s.leads_emitted, s.new_leads_emitted, s.raw_records_in, s.duplicates_suppressed
    )?;
    writeln!(out)?;

    if set.is_empty() {
        writeln!(out, "No leads today.")?;
    }
    for (rank, lead) in set.iter().enumerate() {
        let l = &lead.lead;
        writeln!(
            out,
            "{:>3}. [{}] {:>3}  {:<18} {}",
            rank + 1,
            lead.tier,
            lead.score.value(),
            l.project_type.as_str(),
            l.address
        )?;
        let mut detail = format!(
            "     seen {} via {}",
            l.date_first_observed,
            l.sources.join(", ")
        );
        if l.date_degraded {
            detail.push_str(" (date estimated)");
        }
        if !lead.is_new {
            detail.push_str(" (seen before)");
        }
        if !lead.units.is_empty() {
            let _ = write!(detail, " units: {}", lead.units.join(", "));
        }
        writeln!(out, "{}", detail)?;
        if !l.project_description.is_empty() {
            writeln!(out, "     {}", l.project_description)?;
        }
        writeln!(out, "     why: {}", lead.reason)?;
    }

    writeln!(out)?;
    let tiers: Vec<String> = s
        .tier_counts
        .iter()
        .map(|(tier, n)| format!("{}={}", tier, n))
        .collect();
    writeln!(out, "Tiers: {}", tiers.join(" "))?;
    let mut types: Vec<(&String, &usize)> = s.project_type_counts.iter().collect();
    types.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (project_type, n) in types {
        writeln!(out, "  {:<18} {}", project_type, n)?;
    }

    writeln!(out)?;
    writeln!(out, "Errors")?;
    writeln!(out, "  normalization failures: {}", s.normalization_failures)?;
    writeln!(out, "  collection failures:    {}", s.collection_failures.len())?;
    for failure in &s.collection_failures {
        writeln!(out, "    - {}", failure)?;
    }
    writeln!(out, "  history failures:       {}", s.history_failures)?;
    writeln!(out, "  scoring failures:       {}", s.scoring_failures.len())?;
    for failure in &s.scoring_failures {
        writeln!(out, "    - {}: {}", failure.canonical_address, failure.reason)?;
    }
    if !s.skipped_sources.is_empty() {
        writeln!(out, "  skipped sources:        {}", s.skipped_sources.join(", "))?;
    }
    Ok(out)
}

#[async_trait]
impl LeadExporter for TextExporter {
    fn format(&self) -> &'static str {
        "txt"
    }

    async fn export(&self, report: &RunReport, output_dir: &Path) -> anyhow::Result<PathBuf> {
        let text = render(report)?;
        let name = export_file_name(report.lead_set.run_date(), self.format());
        write_export(output_dir, &name, text.as_bytes()).await
    }
}
