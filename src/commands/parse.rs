use anyhow::{Context, Result};
use thermalog::{LogParser, ParseRequest, TokenLayout};
use tracing::{info, warn};

use crate::cli::ParseArgs;
use crate::commands::{emit, load_config};
use crate::report::{ParseReport, REPORT_VERSION};
use crate::util::{now_utc_string, read_json, read_text, sha256_file};

pub fn run(args: ParseArgs) -> Result<()> {
    let parser = LogParser::new(load_config(args.config_path.as_deref())?)?;
    let ocr_text = read_text(&args.ocr_text_path)?;
    let layout = args
        .layout_path
        .as_deref()
        .map(read_json::<TokenLayout>)
        .transpose()?;

    info!(
        path = %args.ocr_text_path.display(),
        target_hour = %args.target_hour,
        known_hours = args.known_hours.len(),
        layout = layout.is_some(),
        strict = args.strict,
        "parse requested"
    );

    let request = ParseRequest {
        ocr_text,
        target_hour: args.target_hour.clone(),
        known_hour_labels: args.known_hours.clone(),
        layout,
    };
    let processed = parser
        .process(&request, args.strict)
        .with_context(|| format!("failed to parse hour {}", args.target_hour))?;

    if let Some(reason) = &processed.outcome.reason {
        warn!(reason = %reason, "parse did not reach extraction");
    }
    for flag in &processed.hallucination_flags {
        warn!(
            kind = flag.kind.as_str(),
            field = %flag.affected_field.map(|field| field.to_string()).unwrap_or_default(),
            description = %flag.description,
            "hallucination flag"
        );
    }

    let report = ParseReport {
        report_version: REPORT_VERSION,
        generated_at: now_utc_string(),
        source_path: args.ocr_text_path.display().to_string(),
        source_sha256: sha256_file(&args.ocr_text_path)?,
        target_hour: args.target_hour.clone(),
        strict_mode: args.strict,
        verdict: processed.verdict(),
        outcome: processed.outcome,
        hallucination_flags: processed.hallucination_flags,
        validation: processed.validation,
    };

    info!(
        fields = report.outcome.reading.field_matches().len(),
        confidence = report.outcome.reading.overall_confidence(),
        verdict = ?report.verdict,
        "parse completed"
    );
    emit(&report, args.output_path.as_deref())
}
