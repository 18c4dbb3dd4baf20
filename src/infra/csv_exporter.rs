use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::write_export;
use crate::app::ports::{export_file_name, LeadExporter};
use crate::domain::DailyLeadSet;
use crate::pipeline::orchestrator::RunReport;

const HEADER: &[&str] = &[
    "rank",
    "score",
    "tier",
    "reason",
    "is_new",
    "project_type",
    "street",
    "unit",
    "city",
    "state",
    "postal_code",
    "date_first_observed",
    "date_degraded",
    "sources",
    "occurrences",
    "description",
    "reference",
    "fingerprint",
];

/// One row per lead, in daily-set order.
pub struct CsvExporter;

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write a single CSV row to any writer.
pub fn write_row<W: Write, S: AsRef<str>>(mut w: W, row: &[S]) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        let cell = cell.as_ref();
        if !first {
            write!(w, ",")?;
        } else {
            first = false;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{}", cell)?;
        }
    }
    writeln!(w)?;
    Ok(())
}

pub fn render(set: &DailyLeadSet) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    write_row(&mut out, HEADER)?;
    for (rank, lead) in set.iter().enumerate() {
        let l = &lead.lead;
        let row = [
            (rank + 1).to_string(),
            lead.score.to_string(),
            lead.tier.to_string(),
            lead.reason.clone(),
            lead.is_new.to_string(),
            l.project_type.to_string(),
            l.address.street.clone(),
            l.address.unit.clone().unwrap_or_else(|| lead.units.join("; ")),
            l.address.city.clone(),
            l.address.state.clone(),
            l.address.postal_code.clone().unwrap_or_default(),
            l.date_first_observed.format("%Y-%m-%d").to_string(),
            l.date_degraded.to_string(),
            l.sources.join(";"),
            lead.occurrences.to_string(),
            l.project_description.clone(),
            l.raw_reference.reference.clone(),
            lead.fingerprint.to_string(),
        ];
        write_row(&mut out, &row)?;
    }
    Ok(out)
}

#[async_trait]
impl LeadExporter for CsvExporter {
    fn format(&self) -> &'static str {
        "csv"
    }

    async fn export(&self, report: &RunReport, output_dir: &Path) -> anyhow::Result<PathBuf> {
        let bytes = render(&report.lead_set)?;
        let name = export_file_name(report.lead_set.run_date(), self.format());
        write_export(output_dir, &name, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_only_when_needed() {
        let mut out = Vec::new();
        write_row(&mut out, &["plain", "a,b", "say \"hi\"", "two\nlines"]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "plain,\"a,b\",\"say \"\"hi\"\"\",\"two\nlines\"\n"
        );
    }
}
