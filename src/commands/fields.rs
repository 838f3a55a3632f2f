use anyhow::Result;
use serde_json::json;
use tracing::info;

use crate::cli::FieldsArgs;
use crate::commands::load_config;
use crate::util::write_json_pretty;

pub fn run(args: FieldsArgs) -> Result<()> {
    let config = load_config(args.config_path.as_deref())?;

    for pattern in config.fields() {
        let range = pattern
            .expected_range
            .map(|range| format!("{}-{}", range.min, range.max))
            .unwrap_or_default();
        info!(
            field = %pattern.name,
            field_type = pattern.field_type.as_str(),
            unit = %pattern.unit,
            range = %range,
            aliases = %pattern.aliases.join(", "),
            matcher = %pattern.matcher.as_str(),
            "configured field"
        );
    }

    let scoring = &config.scoring;
    info!(
        base = scoring.base,
        pattern_quality = scoring.pattern_quality,
        range_plausibility = scoring.range_plausibility,
        spatial_placement = scoring.spatial_placement,
        context_proximity = scoring.context_proximity,
        distinctiveness = scoring.distinctiveness,
        ocr_cleanliness = scoring.ocr_cleanliness,
        acceptance_floor = config.parsing.min_field_confidence,
        fuzzy_threshold = config.parsing.fuzzy_match_threshold,
        confidence_floor = config.validation.confidence_floor,
        "scoring configuration"
    );
    info!(fields = config.fields().len(), "field registry listed");

    if let Some(path) = args.output_path.as_deref() {
        let document = json!({
            "fields": config.fields().iter().map(|pattern| pattern.to_spec()).collect::<Vec<_>>(),
            "scoring": config.scoring,
            "parsing": config.parsing,
            "hallucination": config.hallucination,
            "validation": config.validation,
        });
        write_json_pretty(path, &document)?;
        info!(path = %path.display(), "wrote effective configuration");
    }

    Ok(())
}
