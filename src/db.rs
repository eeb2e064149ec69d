use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::config::RegionMap;
use crate::error::IngestError;
use crate::ingest;
use crate::models::{Appointment, RawAppointment};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

struct SeedRow {
    source_key: &'static str,
    date_rdv: (i32, u32, u32),
    delay_days: i64,
    canal: &'static str,
    profil: &'static str,
    motif: &'static str,
    sous_motif: &'static str,
    id_conseiller: i64,
    bureau: &'static str,
    nb_rdv: i64,
}

const SEED_ROWS: &[SeedRow] = &[
    SeedRow {
        source_key: "seed-001",
        date_rdv: (2025, 1, 8),
        delay_days: 6,
        canal: "phone",
        profil: "Junior",
        motif: "Vente",
        sous_motif: "Demande",
        id_conseiller: 101,
        bureau: "Paris",
        nb_rdv: 15,
    },
    SeedRow {
        source_key: "seed-002",
        date_rdv: (2025, 1, 22),
        delay_days: 3,
        canal: "web",
        profil: "Senior",
        motif: "Conseil",
        sous_motif: "Suivi",
        id_conseiller: 102,
        bureau: "Lyon",
        nb_rdv: 22,
    },
    SeedRow {
        source_key: "seed-003",
        date_rdv: (2025, 2, 5),
        delay_days: 10,
        canal: "phone",
        profil: "Manager",
        motif: "Réclamation",
        sous_motif: "Facturation",
        id_conseiller: 103,
        bureau: "Marseille",
        nb_rdv: 10,
    },
    SeedRow {
        source_key: "seed-004",
        date_rdv: (2025, 2, 19),
        delay_days: 1,
        canal: "agence",
        profil: "Directeur",
        motif: "Vente",
        sous_motif: "Renouvellement",
        id_conseiller: 101,
        bureau: "Paris",
        nb_rdv: 5,
    },
    SeedRow {
        source_key: "seed-005",
        date_rdv: (2025, 3, 12),
        delay_days: 4,
        canal: "web",
        profil: "Junior",
        motif: "Conseil",
        sous_motif: "Demande",
        id_conseiller: 104,
        bureau: "Lille",
        nb_rdv: 18,
    },
];

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    for row in SEED_ROWS {
        let (year, month, day) = row.date_rdv;
        let date_rdv = NaiveDate::from_ymd_opt(year, month, day).context("invalid date")?;
        let date_creation = date_rdv - chrono::Duration::days(row.delay_days);

        sqlx::query(
            r#"
            INSERT INTO rdv_insights.appointments
            (id, date_rdv, date_creation, canal, profil, motif, sous_motif,
             id_conseiller, bureau, nb_rdv, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(date_rdv)
        .bind(date_creation)
        .bind(row.canal)
        .bind(row.profil)
        .bind(row.motif)
        .bind(row.sous_motif)
        .bind(row.id_conseiller)
        .bind(row.bureau)
        .bind(row.nb_rdv)
        .bind(row.source_key)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn fetch_appointments(
    pool: &PgPool,
    since_date: Option<NaiveDate>,
) -> anyhow::Result<Vec<RawAppointment>> {
    let mut query = String::from(
        "SELECT date_rdv, date_creation, canal, profil, motif, sous_motif, \
         id_conseiller, bureau, nb_rdv \
         FROM rdv_insights.appointments",
    );

    if since_date.is_some() {
        query.push_str(" WHERE date_rdv >= $1");
    }
    query.push_str(" ORDER BY date_rdv");

    let mut rows = sqlx::query(&query);
    if let Some(value) = since_date {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut appointments = Vec::with_capacity(records.len());

    for row in records {
        appointments.push(RawAppointment {
            date_rdv: Some(row.get("date_rdv")),
            date_creation: Some(row.get("date_creation")),
            canal: row.get("canal"),
            profil: row.get("profil"),
            motif: Some(row.get("motif")),
            sous_motif: Some(row.get("sous_motif")),
            id_conseiller: row.get("id_conseiller"),
            bureau: Some(row.get("bureau")),
            nb_rdv: Some(row.get("nb_rdv")),
            source_key: None,
        });
    }

    info!(rows = appointments.len(), "fetched appointments from Postgres");
    Ok(appointments)
}

/// A validated row ready to be written, with its idempotency key.
#[derive(Debug, Clone)]
pub struct ImportRow {
    pub appointment: Appointment,
    pub source_key: String,
}

/// Validate every row of an import before anything is written. Rows without a
/// `source_key` get a fresh one.
pub fn prepare_import(
    rows: &[RawAppointment],
    regions: &RegionMap,
) -> Result<Vec<ImportRow>, IngestError> {
    let appointments = ingest::validate(rows, regions)?;

    Ok(appointments
        .into_iter()
        .zip(rows)
        .map(|(appointment, raw)| ImportRow {
            appointment,
            source_key: raw
                .source_key
                .clone()
                .unwrap_or_else(|| format!("import-{}", Uuid::new_v4())),
        })
        .collect())
}

/// Copy a CSV file into the appointments table in one transaction. The whole
/// file is validated first; an invalid row or a failed insert leaves the
/// table untouched. Returns the number of new rows.
pub async fn import_csv(
    pool: &PgPool,
    csv_path: &Path,
    regions: &RegionMap,
) -> anyhow::Result<usize> {
    let rows = ingest::read_csv(csv_path)?;
    let prepared = prepare_import(&rows, regions)
        .with_context(|| format!("{} was not imported", csv_path.display()))?;

    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for row in prepared.iter() {
        let record = &row.appointment;
        let nb_rdv = i64::try_from(record.nb_rdv).context("nb_rdv out of range")?;

        let result = sqlx::query(
            r#"
            INSERT INTO rdv_insights.appointments
            (id, date_rdv, date_creation, canal, profil, motif, sous_motif,
             id_conseiller, bureau, nb_rdv, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.date_rdv)
        .bind(record.date_creation)
        .bind(record.canal.as_deref())
        .bind(record.profil.as_deref())
        .bind(&record.motif)
        .bind(&record.sous_motif)
        .bind(record.id_conseiller)
        .bind(&record.bureau)
        .bind(nb_rdv)
        .bind(&row.source_key)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    tx.commit().await?;
    info!(
        path = %csv_path.display(),
        rows = prepared.len(),
        inserted,
        "imported appointment CSV"
    );
    Ok(inserted)
}
