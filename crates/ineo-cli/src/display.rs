//! Plain-text rendering of the mapping table and run summaries.

use std::fmt::Write;

use ineo_core::{EntryKind, MappingTable, Provider, TriState};

use crate::pipeline::RunSummary;

const LABEL_WIDTH: usize = 12;

/// Render the mapping table as one card per entry.
pub fn render_mapping(table: &MappingTable) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "INEO mapping: {} entries, global default = {}",
        table.len(),
        table.global_default()
    );
    for provider in table.providers() {
        out.push('\n');
        render_provider(&mut out, provider);
    }
    out
}

fn render_provider(out: &mut String, p: &Provider) {
    let kind = match p.kind {
        EntryKind::Provider => "provider",
        EntryKind::Root => "root",
    };
    let _ = writeln!(out, "── {} ({kind}) ──", p.name);
    field(out, "profile", p.profile.as_deref().unwrap_or("-"));
    field(
        out,
        "level",
        &p.level.map_or_else(|| "-".to_string(), |l| l.to_string()),
    );
    field(
        out,
        "default",
        match p.default_membership {
            TriState::Unspecified => "-",
            TriState::True => "true",
            TriState::False => "false",
        },
    );
    field(out, "assessment", if p.assessment_required { "yes" } else { "no" });
}

fn field(out: &mut String, label: &str, value: &str) {
    let _ = writeln!(out, "  {label:<LABEL_WIDTH$} {value}");
}

/// Render the end-of-run summary.
pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let l = &summary.labels;
    field(&mut out, "fetched", &summary.fetched.to_string());
    field(&mut out, "batches", &summary.batches.to_string());
    field(&mut out, "members", &l.members.to_string());
    field(&mut out, "non-members", &l.non_members.to_string());
    field(&mut out, "assessed", &l.assessed.to_string());
    field(&mut out, "cached", &l.skipped_cached.to_string());
    if l.skipped_disabled > 0 {
        field(&mut out, "unassessed", &l.skipped_disabled.to_string());
    }
    if l.cache_write_failures > 0 {
        field(&mut out, "not cached", &l.cache_write_failures.to_string());
    }
    let written = if summary.dry_run {
        "0 (dry run)".to_string()
    } else {
        summary.written.to_string()
    };
    field(&mut out, "written", &written);
    field(&mut out, "elapsed", &format!("{:.1}s", summary.elapsed_secs));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_card_lists_every_entry() {
        let table = MappingTable::new(
            true,
            [
                Provider::new("DANS").with_default(true),
                Provider::root("CLARIN Partners").with_level(0).with_assessment(true),
            ],
        );
        let text = render_mapping(&table);
        assert!(text.starts_with("INEO mapping: 2 entries, global default = true"));
        assert!(text.contains("── DANS (provider) ──"));
        assert!(text.contains("── CLARIN Partners (root) ──"));
        assert!(text.contains("  level        0"));
        assert!(text.contains("  assessment   yes"));
    }

    #[test]
    fn summary_marks_dry_run() {
        let summary = RunSummary {
            fetched: 10,
            dry_run: true,
            ..Default::default()
        };
        let text = render_summary(&summary);
        assert!(text.contains("  fetched      10"));
        assert!(text.contains("0 (dry run)"));
        assert!(!text.contains("not cached"));
    }
}
