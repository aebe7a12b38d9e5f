mod stats_table;

use std::collections::BTreeMap;

use tabled::settings::Style;
use tabled::Table;

use crate::aggregator::SeriesStats;
use crate::report::stats_table::{StatsRow, VerdictRow};
use crate::tags::Tag;
use crate::threshold::{RuleStatus, RunVerdict};

/// Render per tag statistics as a table, with a final `*` row for the totals.
pub fn render_stats_table(by_tag: &BTreeMap<Tag, SeriesStats>, total: &SeriesStats) -> String {
    let rows = by_tag
        .iter()
        .map(|(tag, stats)| stats_row(tag.to_string(), stats))
        .chain(std::iter::once(stats_row("*".to_string(), total)))
        .collect::<Vec<_>>();

    let mut table = Table::new(rows);
    table.with(Style::modern());

    table.to_string()
}

pub fn render_verdict_table(verdict: &RunVerdict) -> String {
    let rows = verdict
        .rules
        .iter()
        .map(|rule| VerdictRow {
            rule: rule.rule.to_string(),
            observed: rule.observed,
            samples: rule.samples,
            status: match rule.status {
                RuleStatus::Pass => "pass",
                RuleStatus::Fail => "FAIL",
                RuleStatus::Inconclusive => "inconclusive",
            }
            .to_string(),
        })
        .collect::<Vec<_>>();

    let mut table = Table::new(rows);
    table.with(Style::modern());

    table.to_string()
}

fn stats_row(tag: String, stats: &SeriesStats) -> StatsRow {
    StatsRow {
        tag,
        count: stats.count,
        failures: stats.failures,
        avg_ms: stats.avg_ms,
        min_ms: stats.min_ms,
        p50_ms: stats.p50_ms,
        p95_ms: stats.p95_ms,
        p99_ms: stats.p99_ms,
        max_ms: stats.max_ms,
    }
}
