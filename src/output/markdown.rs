use super::simple::write_counts;
use crate::compare::{Comparison, Row};
use crate::error::Result;
use crate::model::{ComparisonStatus, Component};
use std::fmt::Write as _;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct VulnRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "URL")]
    url: String,
}

impl From<Row> for VulnRow {
    fn from(row: Row) -> Self {
        Self {
            id: row.id,
            severity: row.severity.to_string(),
            url: row.url,
        }
    }
}

/// Renders a comparison as markdown with one collapsible section per status.
pub fn render_markdown(comparison: &Comparison<'_>) -> Result<String> {
    let mut out = String::new();

    out.push_str(&header(&comparison.base.component, &comparison.new.component));
    write_counts(&mut out, comparison.counts());
    out.push('\n');

    for status in [
        ComparisonStatus::New,
        ComparisonStatus::Fixed,
        ComparisonStatus::Existing,
    ] {
        let rows: Vec<VulnRow> = comparison
            .rows(status)?
            .into_iter()
            .map(VulnRow::from)
            .collect();
        let table = Table::new(rows).with(Style::markdown()).to_string();

        out.push_str("<details>\n");
        let _ = writeln!(out, "<summary>{} vulnerabilities</summary>\n", status.label());
        out.push_str(&table);
        out.push_str("\n\n</details>\n");
    }

    out.push_str("\n---\n");
    Ok(out)
}

fn header(base: &Component, new: &Component) -> String {
    if base.name != new.name {
        format!(
            "### `{}:{}` -> `{}:{}`\n\n",
            base.name, base.version, new.name, new.version
        )
    } else if base.version != new.version {
        format!("### {} `{}` -> `{}`\n\n", base.name, base.version, new.version)
    } else {
        format!("### {} `{}`\n\n", new.name, new.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Vulnerability, VulnerabilityReport};

    fn reports() -> (VulnerabilityReport, VulnerabilityReport) {
        let base = VulnerabilityReport::new("alpine", "3.16").with_vulnerabilities(vec![
            Vulnerability::new("CVE-FIXED", "busybox@1.35")
                .with_severity("medium")
                .with_source_url("https://example.com/fixed"),
            Vulnerability::new("CVE-KEPT", "musl@1.2")
                .with_severity("high")
                .with_source_url("https://example.com/kept"),
        ]);
        let new = VulnerabilityReport::new("alpine", "3.17").with_vulnerabilities(vec![
            Vulnerability::new("CVE-KEPT", "musl@1.2.4")
                .with_severity("high")
                .with_source_url("https://example.com/kept"),
            Vulnerability::new("CVE-NEW", "openssl@3.0")
                .with_severity("critical")
                .with_advisory("https://adv.example/new"),
        ]);
        (base, new)
    }

    #[test]
    fn test_markdown_header_versions() {
        let (base, new) = reports();
        let out = render_markdown(&Comparison::new(&base, &new)).unwrap();
        assert!(out.starts_with("### alpine `3.16` -> `3.17`\n"));
    }

    #[test]
    fn test_markdown_header_different_images() {
        let (base, _) = reports();
        let other = VulnerabilityReport::new("busybox", "1.36.1");
        let out = render_markdown(&Comparison::new(&base, &other)).unwrap();
        assert!(out.starts_with("### `alpine:3.16` -> `busybox:1.36.1`\n"));
    }

    #[test]
    fn test_markdown_header_same_version() {
        let (_, new) = reports();
        let out = render_markdown(&Comparison::new(&new.empty_baseline(), &new)).unwrap();
        assert!(out.starts_with("### alpine `3.17`\n"));
    }

    #[test]
    fn test_markdown_sections_and_rows() {
        let (base, new) = reports();
        let out = render_markdown(&Comparison::new(&base, &new)).unwrap();

        assert!(out.contains("New vulnerabilities: 1\n"));
        assert!(out.contains("Fixed vulnerabilities: 1\n"));
        assert!(out.contains("Existing vulnerabilities: 1\n"));
        assert!(out.contains("<summary>New vulnerabilities</summary>"));
        assert!(out.contains("<summary>Fixed vulnerabilities</summary>"));
        assert!(out.contains("<summary>Existing vulnerabilities</summary>"));
        assert!(out.contains("| ID"));
        assert!(out.contains("https://adv.example/new"));
        assert!(out.trim_end().ends_with("---"));

        let new_section = out.find("<summary>New").unwrap();
        let fixed_section = out.find("<summary>Fixed").unwrap();
        let new_row = out.find("CVE-NEW").unwrap();
        let fixed_row = out.find("CVE-FIXED").unwrap();
        assert!(new_section < new_row && new_row < fixed_section);
        assert!(fixed_section < fixed_row);
    }
}
