use anyhow::Result;
use thermalog::LogParser;
use tracing::info;

use crate::cli::LocateArgs;
use crate::commands::{emit, load_config};
use crate::report::{LocateReport, LocatedHour, REPORT_VERSION};
use crate::util::{now_utc_string, read_text, sha256_file};

pub fn run(args: LocateArgs) -> Result<()> {
    let parser = LogParser::new(load_config(args.config_path.as_deref())?)?;
    let ocr_text = read_text(&args.ocr_text_path)?;

    let hours = parser
        .locate(&ocr_text)
        .into_iter()
        .map(|(label, position)| LocatedHour {
            label: label.to_string(),
            line: position.line,
            column: position.column,
            absolute_position: position.absolute_position,
            confidence: position.confidence,
        })
        .collect::<Vec<LocatedHour>>();

    for hour in &hours {
        info!(
            label = %hour.label,
            line = hour.line,
            column = hour.column,
            confidence = hour.confidence,
            "located hour label"
        );
    }
    info!(
        path = %args.ocr_text_path.display(),
        hours = hours.len(),
        "locate completed"
    );

    if args.json {
        let report = LocateReport {
            report_version: REPORT_VERSION,
            generated_at: now_utc_string(),
            source_path: args.ocr_text_path.display().to_string(),
            source_sha256: sha256_file(&args.ocr_text_path)?,
            hour_count: hours.len(),
            hours,
        };
        emit(&report, None)?;
    }

    Ok(())
}
