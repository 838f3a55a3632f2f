use anyhow::Result;
use thermalog::{
    AntiHallucinationDetector, DetectionContext, HallucinationFlag, HourlyReading, TokenLayout,
    ValidationPipeline, ValidationRequest, Verdict,
};
use tracing::info;

use crate::cli::ValidateArgs;
use crate::commands::{emit, load_config};
use crate::report::{REPORT_VERSION, ValidationReport};
use crate::util::{now_utc_string, read_json, sha256_file};

pub fn run(args: ValidateArgs) -> Result<()> {
    let config = load_config(args.config_path.as_deref())?;
    let reading: HourlyReading = read_json(&args.reading_path)?;
    let series = match args.series_path.as_deref() {
        Some(path) => read_json::<Vec<HourlyReading>>(path)?,
        None => Vec::new(),
    };
    let layout = args
        .layout_path
        .as_deref()
        .map(read_json::<TokenLayout>)
        .transpose()?;

    let (flags, flags_detected) = match args.flags_path.as_deref() {
        Some(path) => (read_json::<Vec<HallucinationFlag>>(path)?, false),
        None => {
            let detector = AntiHallucinationDetector::new(&config);
            let context = DetectionContext {
                siblings: &series,
                layout: layout.as_ref(),
            };
            (detector.detect(&reading, &context), true)
        }
    };

    let pipeline = ValidationPipeline::new(&config)?;
    let validation = pipeline.validate(&ValidationRequest {
        reading: &reading,
        flags: &flags,
        layout: layout.as_ref(),
        strict_mode: args.strict,
        series: &series,
    });
    let verdict = Verdict::from_result(&validation);

    info!(
        path = %args.reading_path.display(),
        hour = %reading.inspection_time(),
        flags = flags.len(),
        errors = validation.errors.len(),
        warnings = validation.warnings.len(),
        verdict = ?verdict,
        "validation completed"
    );

    let report = ValidationReport {
        report_version: REPORT_VERSION,
        generated_at: now_utc_string(),
        reading_path: args.reading_path.display().to_string(),
        reading_sha256: sha256_file(&args.reading_path)?,
        strict_mode: args.strict,
        flags_detected,
        verdict,
        reading,
        hallucination_flags: flags,
        validation,
    };
    emit(&report, args.output_path.as_deref())
}
