use std::fmt::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::error::{ForecastError, ReportError};
use crate::models::{AggregationResult, ForecastResult};

/// Markdown report plus the titles of sections that could not be rendered.
#[derive(Debug, Clone)]
pub struct Report {
    pub markdown: String,
    pub skipped: Vec<String>,
}

type Section = (&'static str, Result<String, ReportError>);

/// Render every section that can be rendered. A failing section is skipped
/// and listed at the end instead of failing the report.
pub fn build_report(
    scope: Option<&str>,
    kpis: &AggregationResult,
    forecast: Option<Result<ForecastResult, ForecastError>>,
) -> Report {
    let mut sections: Vec<Section> = vec![
        ("Overview", overview(kpis)),
        ("Monthly Volume", monthly_section(kpis)),
        ("Four-Month Window", window_section(kpis)),
        ("Motifs", motif_section(kpis)),
        ("Regions", region_section(kpis)),
        ("Data Quality", quality_section(kpis)),
    ];
    if let Some(result) = forecast {
        sections.push(("Forecast", forecast_section(result)));
    }

    let mut output = String::new();
    let mut skipped = Vec::new();

    let _ = writeln!(output, "# Appointment Activity Report");
    let _ = writeln!(output, "Generated for {}", scope.unwrap_or("all offices"));

    for (title, result) in sections {
        match result {
            Ok(body) => {
                let _ = writeln!(output);
                let _ = writeln!(output, "## {title}");
                output.push_str(&body);
            }
            Err(err) => {
                warn!(section = title, error = %err, "skipping report section");
                skipped.push(format!("{title}: {err}"));
            }
        }
    }

    if !skipped.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Skipped Sections");
        for line in skipped.iter() {
            let _ = writeln!(output, "- {line}");
        }
    }

    Report {
        markdown: output,
        skipped,
    }
}

fn unavailable(section: &str, reason: &str) -> ReportError {
    ReportError::Unavailable {
        section: section.to_string(),
        reason: reason.to_string(),
    }
}

fn overview(kpis: &AggregationResult) -> Result<String, ReportError> {
    let mut output = String::new();
    let _ = writeln!(output, "- Total appointments: {}", kpis.total_volume);
    let _ = writeln!(output, "- Records processed: {}", kpis.record_count);
    match kpis.mean_delay {
        Some(delay) => {
            let _ = writeln!(output, "- Mean booking delay: {delay:.1} days");
        }
        None => {
            let _ = writeln!(output, "- Mean booking delay: no data");
        }
    }
    if let Some((bureau, volume)) = kpis.top_bureau() {
        let _ = writeln!(output, "- Top office: {bureau} ({volume} appointments)");
    }
    Ok(output)
}

fn monthly_section(kpis: &AggregationResult) -> Result<String, ReportError> {
    if kpis.monthly_volume.is_empty() {
        return Err(unavailable("monthly volume", "no appointments"));
    }

    let mut output = String::new();
    for (month, volume) in kpis.monthly_volume.iter() {
        let trend = kpis.trend_ratio.get(month).copied().unwrap_or(0.0);
        let _ = writeln!(output, "- {month}: {volume} appointments ({trend:+.1}%)");
    }
    Ok(output)
}

fn window_section(kpis: &AggregationResult) -> Result<String, ReportError> {
    if kpis.window_volume.is_empty() {
        return Err(unavailable("window", "no appointments"));
    }

    let mut output = String::new();
    for (month, volume) in kpis.window_volume.iter() {
        let _ = writeln!(output, "- {month}: {volume}");
    }
    Ok(output)
}

fn motif_section(kpis: &AggregationResult) -> Result<String, ReportError> {
    if kpis.motif_volume.is_empty() {
        return Err(unavailable("motifs", "no appointments"));
    }

    let mut motifs: Vec<(&String, &u64)> = kpis.motif_volume.iter().collect();
    motifs.sort_by(|a, b| b.1.cmp(a.1));
    let mut sous_motifs: Vec<(&String, &u64)> = kpis.sous_motif_volume.iter().collect();
    sous_motifs.sort_by(|a, b| b.1.cmp(a.1));

    let mut output = String::new();
    for (motif, volume) in motifs {
        let _ = writeln!(output, "- {motif}: {volume}");
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "Sub-motifs:");
    for (sous_motif, volume) in sous_motifs.iter().take(10) {
        let _ = writeln!(output, "- {sous_motif}: {volume}");
    }
    Ok(output)
}

fn region_section(kpis: &AggregationResult) -> Result<String, ReportError> {
    if kpis.region_volume.is_empty() {
        return Err(unavailable("regions", "no appointment maps to a known region"));
    }

    let mut output = String::new();
    for (region, volume) in kpis.region_volume.iter() {
        let _ = writeln!(output, "- {region}: {volume}");
    }

    let _ = writeln!(output);
    match kpis.region_mom_delta.as_ref() {
        Some(delta) => {
            let _ = writeln!(
                output,
                "Change from {} to {}:",
                delta.previous, delta.latest
            );
            for (region, change) in delta.delta.iter() {
                let _ = writeln!(output, "- {region}: {change:+}");
            }
        }
        None => {
            let _ = writeln!(output, "Fewer than two months recorded, no monthly change.");
        }
    }
    Ok(output)
}

fn quality_section(kpis: &AggregationResult) -> Result<String, ReportError> {
    let mut output = String::new();
    if kpis.warnings.is_empty() {
        let _ = writeln!(output, "No data-quality findings.");
    } else {
        for warning in kpis.warnings.iter() {
            let _ = writeln!(
                output,
                "- Office {} has no region: {} records ({} appointments) left out of region totals",
                warning.bureau, warning.records, warning.volume
            );
        }
    }
    Ok(output)
}

fn forecast_section(result: Result<ForecastResult, ForecastError>) -> Result<String, ReportError> {
    let result = result?;
    let mut output = String::new();

    let origin = if result.reused { "cached" } else { "freshly fitted" };
    let _ = writeln!(
        output,
        "Model {} ({origin}), alpha {:.3}, beta {:.3}, gamma {:.3}",
        result.model_key, result.alpha, result.beta, result.gamma
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "Recent weeks:");
    for point in result.actual.iter().rev().take(8).rev() {
        let _ = writeln!(output, "- {}: {:.0}", point.week_end, point.volume);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "Projected weeks:");
    for point in result.forecast.iter() {
        let _ = writeln!(output, "- {}: {:.1}", point.week_end, point.volume);
    }
    Ok(output)
}

#[derive(Serialize)]
struct Export<'a> {
    kpis: &'a AggregationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    forecast: Option<&'a ForecastResult>,
}

/// Write the KPI bundle and, when present, the forecast as pretty JSON.
pub fn save_json(
    path: &Path,
    kpis: Option<&AggregationResult>,
    forecast: Option<&ForecastResult>,
) -> Result<()> {
    let json = match kpis {
        Some(kpis) => serde_json::to_string_pretty(&Export { kpis, forecast })?,
        None => serde_json::to_string_pretty(&forecast)?,
    };
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
