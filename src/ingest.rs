//! Loading and validation of appointment records.

use std::path::Path;

use tracing::{debug, info};

use crate::config::RegionMap;
use crate::error::IngestError;
use crate::models::{Appointment, RawAppointment, YearMonth};

/// Read raw rows from a CSV file whose headers match the record field names.
pub fn read_csv(path: &Path) -> Result<Vec<RawAppointment>, IngestError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();

    for (index, result) in reader.deserialize::<RawAppointment>().enumerate() {
        let row = result.map_err(|err| match err.kind() {
            csv::ErrorKind::Deserialize { .. } => {
                IngestError::schema(index + 1, "record", err.to_string())
            }
            _ => IngestError::Csv(err),
        })?;
        rows.push(row);
    }

    info!(path = %path.display(), rows = rows.len(), "read appointment CSV");
    Ok(rows)
}

/// Validate raw rows and compute `annee_mois`, `delay` and `region`.
///
/// Rows are numbered from 1 in errors. The first invalid row aborts the whole
/// set; nothing is clamped or dropped.
pub fn validate(
    raw: &[RawAppointment],
    regions: &RegionMap,
) -> Result<Vec<Appointment>, IngestError> {
    let appointments = raw
        .iter()
        .enumerate()
        .map(|(index, row)| validate_row(index + 1, row, regions))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(records = appointments.len(), "validated appointment records");
    Ok(appointments)
}

fn validate_row(
    row: usize,
    raw: &RawAppointment,
    regions: &RegionMap,
) -> Result<Appointment, IngestError> {
    let date_rdv = raw
        .date_rdv
        .ok_or_else(|| IngestError::schema(row, "date_rdv", "missing"))?;
    let date_creation = raw
        .date_creation
        .ok_or_else(|| IngestError::schema(row, "date_creation", "missing"))?;
    let motif = required_text(row, "motif", &raw.motif)?;
    let sous_motif = required_text(row, "sous_motif", &raw.sous_motif)?;
    let bureau = required_text(row, "bureau", &raw.bureau)?;

    let nb_rdv = match raw.nb_rdv {
        None => return Err(IngestError::schema(row, "nb_rdv", "missing")),
        Some(value) if value < 0 => {
            return Err(IngestError::schema(
                row,
                "nb_rdv",
                format!("must be non-negative, got {value}"),
            ))
        }
        Some(value) => value as u64,
    };

    if date_creation > date_rdv {
        return Err(IngestError::DataIntegrity {
            row,
            date_creation,
            date_rdv,
        });
    }

    let region = regions.region_for(&bureau).map(str::to_string);

    Ok(Appointment {
        date_rdv,
        date_creation,
        canal: optional_text(&raw.canal),
        profil: optional_text(&raw.profil),
        motif,
        sous_motif,
        id_conseiller: raw.id_conseiller,
        bureau,
        nb_rdv,
        annee_mois: YearMonth::from_date(date_rdv),
        delay: (date_rdv - date_creation).num_days(),
        region,
    })
}

fn required_text(row: usize, field: &str, value: &Option<String>) -> Result<String, IngestError> {
    match value.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(IngestError::schema(row, field, "missing")),
    }
}

fn optional_text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
