//! Rendering of benchmark records for people and for spreadsheets.

use std::array;
use std::fmt::Write as _;
use std::time::Duration;

use itertools::Itertools;

use crate::BenchmarkRecord;

const TABLE_HEADER: [&str; 7] = [
    "strategy",
    "case",
    "ranks",
    "iterations",
    "best (µs)",
    "mean (µs)",
    "best (MB/s)",
];

const CSV_HEADER: [&str; 8] = [
    "strategy",
    "case",
    "ranks",
    "iterations",
    "trials",
    "best_ns",
    "mean_ns",
    "best_bytes_per_second",
];

/// Renders records as an aligned plain-text table, one row per record.
#[must_use]
pub fn render_table(records: &[BenchmarkRecord]) -> String {
    let rows = records
        .iter()
        .map(|record| {
            [
                record.strategy.to_string(),
                record.case.to_string(),
                record.ranks.to_string(),
                record.series.best().iterations().to_string(),
                format!("{:.3}", micros(record.best())),
                format!("{:.3}", micros(record.series.mean())),
                record
                    .best_bytes_per_second()
                    .map_or_else(|| "-".to_string(), |rate| format!("{:.1}", rate / 1e6)),
            ]
        })
        .collect_vec();

    let widths: [usize; 7] = array::from_fn(|column| {
        let header = TABLE_HEADER.get(column).map_or(0, |header| header.chars().count());

        rows.iter()
            .filter_map(|row| row.get(column))
            .map(|cell| cell.chars().count())
            .fold(header, usize::max)
    });

    let separator = widths.map(|width| "-".repeat(width));

    let mut table = String::new();

    write_table_row(&mut table, TABLE_HEADER.iter().copied(), &widths);
    write_table_row(&mut table, separator.iter().map(String::as_str), &widths);

    for row in &rows {
        write_table_row(&mut table, row.iter().map(String::as_str), &widths);
    }

    table
}

/// Renders records as CSV with a header row. Times are in nanoseconds.
#[must_use]
pub fn render_csv(records: &[BenchmarkRecord]) -> String {
    let mut csv = CSV_HEADER.iter().join(",");
    csv.push('\n');

    for record in records {
        let best = record.series.best();

        let fields = [
            record.strategy.to_string(),
            // Case names contain no commas but do contain spaces.
            format!("\"{}\"", record.case),
            record.ranks.to_string(),
            best.iterations().to_string(),
            record.series.samples().len().to_string(),
            best.per_operation().as_nanos().to_string(),
            record.series.mean().as_nanos().to_string(),
            record
                .best_bytes_per_second()
                .map_or_else(String::new, |rate| format!("{rate:.0}")),
        ];

        writeln!(csv, "{}", fields.iter().join(",")).expect("writing to a String cannot fail");
    }

    csv
}

fn write_table_row<'a>(
    out: &mut String,
    cells: impl Iterator<Item = &'a str>,
    widths: &[usize],
) {
    let line = cells
        .zip(widths)
        .format_with("  ", |(cell, &width), f| f(&format_args!("{cell:<width$}")));

    writeln!(out, "{}", line.to_string().trim_end()).expect("writing to a String cannot fail");
}

fn micros(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1e6
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::num::NonZero;

    use super::*;
    use crate::{Case, Measurement, Strategy, TrialSeries};

    fn record(strategy: Strategy, per_operation: Duration) -> BenchmarkRecord {
        let iterations = NonZero::new(100).unwrap();

        BenchmarkRecord {
            strategy,
            case: Case::Jagged {
                outer_size: 5,
                base_size: 50,
            },
            ranks: 2,
            series: TrialSeries::new(vec![
                Measurement::new(per_operation, 11_000, iterations),
                Measurement::new(per_operation.saturating_mul(3), 11_000, iterations),
            ]),
        }
    }

    #[test]
    fn csv_has_header_and_one_line_per_record() {
        let csv = render_csv(&[
            record(Strategy::Raw, Duration::from_micros(2)),
            record(Strategy::OneSided, Duration::from_micros(4)),
        ]);

        let lines = csv.lines().collect_vec();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "strategy,case,ranks,iterations,trials,best_ns,mean_ns,best_bytes_per_second"
        );
        assert_eq!(
            lines[1],
            "raw,\"outer=5 base=50\",2,100,2,2000,4000,5500000000"
        );
        assert!(lines[2].starts_with("one-sided,"));
    }

    #[test]
    fn csv_leaves_unmeasurable_throughput_empty() {
        let csv = render_csv(&[record(Strategy::Pack, Duration::ZERO)]);

        assert!(csv.lines().nth(1).unwrap().ends_with(",0,0,"));
    }

    #[test]
    fn table_columns_are_aligned() {
        let table = render_table(&[
            record(Strategy::Raw, Duration::from_micros(2)),
            record(Strategy::SerializedPrepacked, Duration::from_micros(4)),
        ]);

        let lines = table.lines().collect_vec();
        assert_eq!(lines.len(), 4);

        // The case column starts at the same offset on every line.
        let case_offsets = lines
            .iter()
            .filter(|line| !line.starts_with('-'))
            .map(|line| line.find("outer=").or_else(|| line.find("case")).unwrap())
            .collect_vec();

        assert!(case_offsets.iter().all_equal());
        assert!(lines[2].starts_with("raw "));
        assert!(lines[2].contains("2.000"));
    }

    #[test]
    fn empty_report_has_only_headers() {
        assert_eq!(render_table(&[]).lines().count(), 2);
        assert_eq!(render_csv(&[]).lines().count(), 1);
    }
}
