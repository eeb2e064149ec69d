use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};

/// One appointment row as handed over by a loader, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAppointment {
    pub date_rdv: Option<NaiveDate>,
    pub date_creation: Option<NaiveDate>,
    pub canal: Option<String>,
    pub profil: Option<String>,
    pub motif: Option<String>,
    pub sous_motif: Option<String>,
    pub id_conseiller: Option<i64>,
    pub bureau: Option<String>,
    pub nb_rdv: Option<i64>,
    /// Stable import identifier, when the source provides one.
    #[serde(default)]
    pub source_key: Option<String>,
}

/// A validated appointment with its derived fields.
#[derive(Debug, Clone, Serialize)]
pub struct Appointment {
    pub date_rdv: NaiveDate,
    pub date_creation: NaiveDate,
    pub canal: Option<String>,
    pub profil: Option<String>,
    pub motif: String,
    pub sous_motif: String,
    pub id_conseiller: Option<i64>,
    pub bureau: String,
    pub nb_rdv: u64,
    pub annee_mois: YearMonth,
    /// Days between logging and occurrence, never negative.
    pub delay: i64,
    /// `None` when the bureau is absent from the region map.
    pub region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(self) -> NaiveDate {
        // month is always 1..=12 by construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn add_months(self, months: i32) -> Self {
        let index = self.year * 12 + (self.month as i32 - 1) + months;
        Self {
            year: index.div_euclid(12),
            month: index.rem_euclid(12) as u32 + 1,
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// ISO 8601 calendar week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsoWeek {
    pub year: i32,
    pub week: u32,
}

impl IsoWeek {
    pub fn from_date(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self {
            year: iso.year(),
            week: iso.week(),
        }
    }
}

impl fmt::Display for IsoWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-W{:02}", self.year, self.week)
    }
}

impl Serialize for IsoWeek {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Sunday closing the week that contains `date`.
pub fn week_ending(date: NaiveDate) -> NaiveDate {
    let days_to_sunday = 6 - date.weekday().num_days_from_monday() as i64;
    date + Duration::days(days_to_sunday)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub cumulative: u64,
}

/// Bureau missing from the region map, reported instead of failing the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmappedRegionWarning {
    pub bureau: String,
    pub records: usize,
    pub volume: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionDelta {
    pub previous: YearMonth,
    pub latest: YearMonth,
    pub delta: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult {
    pub record_count: usize,
    pub total_volume: u64,
    pub monthly_volume: BTreeMap<YearMonth, u64>,
    pub weekly_volume: BTreeMap<IsoWeek, u64>,
    /// `None` when there are no records.
    pub mean_delay: Option<f64>,
    pub cumulative_daily: Vec<DailyTotal>,
    pub window_volume: BTreeMap<YearMonth, u64>,
    pub motif_volume: BTreeMap<String, u64>,
    pub sous_motif_volume: BTreeMap<String, u64>,
    pub region_volume: BTreeMap<String, u64>,
    pub region_mom_delta: Option<RegionDelta>,
    pub trend_ratio: BTreeMap<YearMonth, f64>,
    /// Offices ranked by volume, highest first.
    pub bureau_volume: Vec<(String, u64)>,
    pub warnings: Vec<UnmappedRegionWarning>,
}

impl AggregationResult {
    pub fn top_bureau(&self) -> Option<(&str, u64)> {
        self.bureau_volume
            .first()
            .map(|(bureau, volume)| (bureau.as_str(), *volume))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyPoint {
    /// Sunday closing the week.
    pub week_end: NaiveDate,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastResult {
    pub actual: Vec<WeeklyPoint>,
    pub forecast: Vec<WeeklyPoint>,
    pub model_key: String,
    pub reused: bool,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_month_arithmetic_wraps_years() {
        let jan = YearMonth::new(2024, 1);
        assert_eq!(jan.add_months(-2), YearMonth::new(2023, 11));
        assert_eq!(jan.add_months(11), YearMonth::new(2024, 12));
        assert_eq!(jan.add_months(12), YearMonth::new(2025, 1));
        assert_eq!(jan.to_string(), "2024-01");
    }

    #[test]
    fn week_ending_lands_on_sunday() {
        let wednesday = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let sunday = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
        assert_eq!(week_ending(wednesday), sunday);
        assert_eq!(week_ending(sunday), sunday);
    }

    #[test]
    fn iso_week_labels() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 30).unwrap();
        assert_eq!(IsoWeek::from_date(date).to_string(), "2025-W01");
    }
}
