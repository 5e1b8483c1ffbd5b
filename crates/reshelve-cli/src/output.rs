//! Output renderers and formatting helpers for CLI commands.

use anyhow::anyhow;
use reshelve_engine::{
    AnalysisOutcome, ChangeRecord, ExecutionSummary, PreviewTree, ScanReport, format_hms,
};
use reshelve_events::{Event, LogLevel};
use serde::Serialize;
use serde_json::json;

use crate::cli::OutputFormat;
use crate::error::{CliError, CliResult};

pub(crate) fn render_json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
    println!("{text}");
    Ok(())
}

pub(crate) fn render_scan(
    reports: &[ScanReport],
    entries: bool,
    format: OutputFormat,
) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let roots: Vec<_> = reports
                .iter()
                .map(|report| {
                    let mut value = json!({
                        "root": report.root,
                        "entries": report.entries.len(),
                        "bytes": total_bytes(report),
                        "truncated": report.truncated,
                        "cancelled": report.cancelled,
                        "unreadable": report.unreadable,
                    });
                    if entries {
                        value["paths"] = json!(
                            report
                                .entries
                                .iter()
                                .map(|entry| entry.path.display().to_string())
                                .collect::<Vec<_>>()
                        );
                    }
                    value
                })
                .collect();
            render_json(&roots)?;
        }
        OutputFormat::Table => {
            println!("{:>9} {:>12} {:<10} ROOT", "ENTRIES", "SIZE", "STATE");
            for report in reports {
                println!(
                    "{:>9} {:>12} {:<10} {}",
                    report.entries.len(),
                    format_bytes(total_bytes(report)),
                    scan_state(report),
                    report.root.display()
                );
                if entries {
                    for entry in &report.entries {
                        let marker = if entry.attrs.is_dir { "/" } else { "" };
                        println!("  {}{marker}", entry.path.display());
                    }
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn render_preview(
    outcome: &AnalysisOutcome,
    tree: &PreviewTree,
    format: OutputFormat,
) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let stages: Vec<_> = outcome
                .stages
                .iter()
                .map(|stage| {
                    json!({
                        "stage": stage.stage,
                        "generation": stage.generation,
                        "consumed": stage.consumed,
                        "produced": stage.produced,
                        "added": stage.added,
                        "discarded": stage.discarded,
                        "rejected": stage.rejected,
                        "elapsed_ms": u64::try_from(stage.elapsed.as_millis()).unwrap_or(u64::MAX),
                    })
                })
                .collect();
            let records: Vec<&ChangeRecord> =
                outcome.records.iter().filter(|record| record.changed).collect();
            render_json(&json!({
                "cancelled": outcome.cancelled,
                "stages": stages,
                "records": records,
            }))?;
        }
        OutputFormat::Table => {
            for line in tree.render() {
                println!("{line}");
            }
            let changed = outcome.records.iter().filter(|record| record.changed).count();
            println!(
                "{changed} of {} records changed across {} stages{}",
                outcome.records.len(),
                outcome.stages.len(),
                if outcome.cancelled { " (cancelled)" } else { "" }
            );
        }
    }
    Ok(())
}

pub(crate) fn render_summary(summary: &ExecutionSummary, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => render_json(summary)?,
        OutputFormat::Table => {
            println!("{:>8} {:>8} {:>8} ROOT", "SUCCESS", "FAILED", "SKIPPED");
            for root in &summary.roots {
                println!(
                    "{:>8} {:>8} {:>8} {}",
                    root.success,
                    root.failed,
                    root.skipped,
                    root.root.display()
                );
            }
            for record in summary.records.iter().filter(|record| record.fail_reason.is_some()) {
                println!(
                    "  {} {} {}: {}",
                    record.status.as_str(),
                    record.operation.as_str(),
                    record.source_path.display(),
                    record.fail_reason.as_deref().unwrap_or_default()
                );
            }
            println!(
                "total: {} succeeded, {} failed, {} skipped{}",
                summary.success,
                summary.failed,
                summary.skipped,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
        }
    }
    Ok(())
}

/// One stderr line for the events worth showing while a command runs.
pub(crate) fn progress_line(event: &Event) -> Option<String> {
    match event {
        Event::Log { level, message } if *level != LogLevel::Info => {
            Some(format!("{}: {message}", level.as_str()))
        }
        Event::ScanCompleted {
            root,
            entries,
            truncated,
            ..
        } => Some(format!(
            "scanned {root}: {entries} entries{}",
            if *truncated { " (truncated)" } else { "" }
        )),
        Event::StageCompleted {
            stage,
            generation,
            produced,
            discarded,
            ..
        } => Some(format!(
            "stage {generation} {stage}: {produced} records, {discarded} discarded"
        )),
        Event::ExecutionProgress {
            root,
            done,
            total,
            remaining_secs,
        } => {
            let eta = remaining_secs
                .map(|secs| format!(", {} left", format_hms(std::time::Duration::from_secs(secs))))
                .unwrap_or_default();
            Some(format!("{root}: {done}/{total}{eta}"))
        }
        _ => None,
    }
}

fn total_bytes(report: &ScanReport) -> u64 {
    report.entries.iter().map(|entry| entry.attrs.size).sum()
}

const fn scan_state(report: &ScanReport) -> &'static str {
    if report.cancelled {
        "cancelled"
    } else if report.truncated {
        "truncated"
    } else {
        "complete"
    }
}

#[must_use]
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;
    let value = bytes_to_f64(bytes);
    if value >= GIB {
        format!("{:.2} GiB", value / GIB)
    } else if value >= MIB {
        format!("{:.2} MiB", value / MIB)
    } else if value >= KIB {
        format!("{:.2} KiB", value / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn bytes_to_f64(value: u64) -> f64 {
    let high = u32::try_from(value >> 32).unwrap_or(u32::MAX);
    let low = u32::try_from(value & 0xFFFF_FFFF).unwrap_or(u32::MAX);
    f64::from(high) * 4_294_967_296.0 + f64::from(low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_picks_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2_048), "2.00 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GiB");
    }

    #[test]
    fn progress_lines_cover_interesting_events() {
        assert_eq!(
            progress_line(&Event::ExecutionProgress {
                root: "/music".into(),
                done: 3,
                total: 10,
                remaining_secs: Some(75),
            })
            .as_deref(),
            Some("/music: 3/10, 00:01:15 left")
        );
        assert_eq!(
            progress_line(&Event::log(LogLevel::Warn, "unreadable entry")).as_deref(),
            Some("warn: unreadable entry")
        );
        assert!(progress_line(&Event::log(LogLevel::Info, "chatter")).is_none());
        assert!(
            progress_line(&Event::RecordStatusChanged {
                record_id: 1,
                status: "success".into(),
                detail: None,
            })
            .is_none()
        );
    }
}
