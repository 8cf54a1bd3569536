use crate::compare::{Comparison, Counts};
use std::fmt::Write as _;

pub fn render_simple(comparison: &Comparison<'_>) -> String {
    let mut out = String::new();
    write_counts(&mut out, comparison.counts());
    out
}

pub(super) fn write_counts(out: &mut String, counts: Counts) {
    let _ = writeln!(out, "New vulnerabilities: {}", counts.new);
    let _ = writeln!(out, "Fixed vulnerabilities: {}", counts.fixed);
    let _ = writeln!(out, "Existing vulnerabilities: {}", counts.existing);
}
