use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tracing::warn;

use crate::models::{
    AggregationResult, Appointment, DailyTotal, IsoWeek, RegionDelta, UnmappedRegionWarning,
    YearMonth,
};

/// Months before and after the latest month covered by the window.
const WINDOW_MONTHS_BEFORE: i32 = 2;
const WINDOW_MONTHS_AFTER: i32 = 1;

/// Build the full KPI bundle. An empty record set yields identity values.
pub fn aggregate(records: &[Appointment]) -> AggregationResult {
    let monthly_volume = monthly_volume(records);
    let warnings = unmapped_regions(records);

    for warning in warnings.iter() {
        warn!(
            bureau = %warning.bureau,
            records = warning.records,
            volume = warning.volume,
            "bureau missing from region map, excluded from region rollups"
        );
    }

    AggregationResult {
        record_count: records.len(),
        total_volume: total_volume(records),
        trend_ratio: trend_ratio(&monthly_volume),
        monthly_volume,
        weekly_volume: weekly_volume(records),
        mean_delay: mean_delay(records),
        cumulative_daily: cumulative_daily(records),
        window_volume: window_volume(records),
        motif_volume: sum_by(records, |r| Some(r.motif.as_str())),
        sous_motif_volume: sum_by(records, |r| Some(r.sous_motif.as_str())),
        region_volume: sum_by(records, |r| r.region.as_deref()),
        region_mom_delta: region_mom_delta(records),
        bureau_volume: bureau_ranking(records),
        warnings,
    }
}

pub fn total_volume(records: &[Appointment]) -> u64 {
    records.iter().map(|r| r.nb_rdv).sum()
}

pub fn monthly_volume(records: &[Appointment]) -> BTreeMap<YearMonth, u64> {
    let mut map = BTreeMap::new();
    for record in records {
        *map.entry(record.annee_mois).or_insert(0) += record.nb_rdv;
    }
    map
}

pub fn weekly_volume(records: &[Appointment]) -> BTreeMap<IsoWeek, u64> {
    let mut map = BTreeMap::new();
    for record in records {
        *map.entry(IsoWeek::from_date(record.date_rdv)).or_insert(0) += record.nb_rdv;
    }
    map
}

pub fn mean_delay(records: &[Appointment]) -> Option<f64> {
    if records.is_empty() {
        return None;
    }
    let total: i64 = records.iter().map(|r| r.delay).sum();
    Some(total as f64 / records.len() as f64)
}

/// Daily volume prefix-summed in date order.
pub fn cumulative_daily(records: &[Appointment]) -> Vec<DailyTotal> {
    let mut daily: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for record in records {
        *daily.entry(record.date_rdv).or_insert(0) += record.nb_rdv;
    }

    let mut running = 0u64;
    daily
        .into_iter()
        .map(|(date, volume)| {
            running += volume;
            DailyTotal {
                date,
                cumulative: running,
            }
        })
        .collect()
}

/// Monthly volume over `[M - 2 months, M + 1 month]`, where `M` is the first
/// day of the month holding the latest appointment.
pub fn window_volume(records: &[Appointment]) -> BTreeMap<YearMonth, u64> {
    let Some(latest) = records.iter().map(|r| r.date_rdv).max() else {
        return BTreeMap::new();
    };

    let anchor = YearMonth::from_date(latest);
    let start = anchor.add_months(-WINDOW_MONTHS_BEFORE).first_day();
    let end = anchor.add_months(WINDOW_MONTHS_AFTER).first_day();

    let mut map = BTreeMap::new();
    for record in records
        .iter()
        .filter(|r| r.date_rdv >= start && r.date_rdv <= end)
    {
        *map.entry(record.annee_mois).or_insert(0) += record.nb_rdv;
    }
    map
}

fn sum_by<'a, F>(records: &'a [Appointment], key: F) -> BTreeMap<String, u64>
where
    F: Fn(&'a Appointment) -> Option<&'a str>,
{
    let mut map: BTreeMap<String, u64> = BTreeMap::new();
    for record in records {
        if let Some(name) = key(record) {
            *map.entry(name.to_string()).or_insert(0) += record.nb_rdv;
        }
    }
    map
}

/// Latest minus previous month volume per region, for the two latest months.
///
/// A region present in only one of the two months counts as 0 in the other.
pub fn region_mom_delta(records: &[Appointment]) -> Option<RegionDelta> {
    let mut table: BTreeMap<(String, YearMonth), u64> = BTreeMap::new();
    let mut months = BTreeSet::new();

    for record in records {
        if let Some(region) = record.region.as_deref() {
            *table
                .entry((region.to_string(), record.annee_mois))
                .or_insert(0) += record.nb_rdv;
            months.insert(record.annee_mois);
        }
    }

    let mut recent = months.iter().rev();
    let latest = *recent.next()?;
    let previous = *recent.next()?;

    let regions: BTreeSet<&String> = table
        .keys()
        .filter(|(_, month)| *month == latest || *month == previous)
        .map(|(region, _)| region)
        .collect();

    let volume = |region: &String, month: YearMonth| -> i64 {
        table
            .get(&(region.clone(), month))
            .copied()
            .unwrap_or(0) as i64
    };

    let delta = regions
        .into_iter()
        .map(|region| {
            (
                region.clone(),
                volume(region, latest) - volume(region, previous),
            )
        })
        .collect();

    Some(RegionDelta {
        previous,
        latest,
        delta,
    })
}

/// Percent change of each month over the preceding month in the series.
///
/// The first month is 0. A preceding month with zero volume also yields 0.
pub fn trend_ratio(monthly: &BTreeMap<YearMonth, u64>) -> BTreeMap<YearMonth, f64> {
    let mut ratios = BTreeMap::new();
    let mut previous: Option<u64> = None;

    for (&month, &volume) in monthly {
        let ratio = match previous {
            Some(prev) if prev > 0 => (volume as f64 - prev as f64) / prev as f64 * 100.0,
            _ => 0.0,
        };
        ratios.insert(month, ratio);
        previous = Some(volume);
    }

    ratios
}

fn bureau_ranking(records: &[Appointment]) -> Vec<(String, u64)> {
    let mut ranking: Vec<(String, u64)> = sum_by(records, |r| Some(r.bureau.as_str()))
        .into_iter()
        .collect();
    // stable sort keeps alphabetical order between ties
    ranking.sort_by(|a, b| b.1.cmp(&a.1));
    ranking
}

fn unmapped_regions(records: &[Appointment]) -> Vec<UnmappedRegionWarning> {
    let mut unmapped: BTreeMap<&str, (usize, u64)> = BTreeMap::new();
    for record in records.iter().filter(|r| r.region.is_none()) {
        let entry = unmapped.entry(record.bureau.as_str()).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += record.nb_rdv;
    }

    unmapped
        .into_iter()
        .map(|(bureau, (records, volume))| UnmappedRegionWarning {
            bureau: bureau.to_string(),
            records,
            volume,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(date: (i32, u32, u32), delay: i64, nb_rdv: u64, bureau: &str) -> Appointment {
        let date_rdv = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        let region = match bureau {
            "Paris" => Some("Île-de-France".to_string()),
            "Lyon" => Some("Auvergne-Rhône-Alpes".to_string()),
            _ => None,
        };
        Appointment {
            date_rdv,
            date_creation: date_rdv - chrono::Duration::days(delay),
            canal: None,
            profil: None,
            motif: "Vente".to_string(),
            sous_motif: "Demande".to_string(),
            id_conseiller: None,
            bureau: bureau.to_string(),
            nb_rdv,
            annee_mois: YearMonth::from_date(date_rdv),
            delay,
            region,
        }
    }

    #[test]
    fn empty_records_degrade_to_identity_values() {
        let result = aggregate(&[]);
        assert_eq!(result.total_volume, 0);
        assert_eq!(result.mean_delay, None);
        assert!(result.monthly_volume.is_empty());
        assert!(result.cumulative_daily.is_empty());
        assert!(result.window_volume.is_empty());
        assert!(result.region_mom_delta.is_none());
        assert!(result.trend_ratio.is_empty());
        assert!(result.top_bureau().is_none());
    }

    #[test]
    fn groupings_count_each_record_once() {
        let records = vec![
            appointment((2024, 1, 3), 2, 4, "Paris"),
            appointment((2024, 1, 29), 1, 6, "Lyon"),
            appointment((2024, 2, 14), 0, 5, "Paris"),
            appointment((2024, 3, 1), 3, 7, "Nantes"),
        ];
        let result = aggregate(&records);
        assert_eq!(result.total_volume, 22);
        assert_eq!(result.monthly_volume.values().sum::<u64>(), 22);
        assert_eq!(result.weekly_volume.values().sum::<u64>(), 22);
        assert_eq!(result.motif_volume.values().sum::<u64>(), 22);
        assert_eq!(result.sous_motif_volume.values().sum::<u64>(), 22);
        assert_eq!(result.region_volume.values().sum::<u64>(), 15);
    }

    #[test]
    fn cumulative_daily_ends_at_total() {
        let records = vec![
            appointment((2024, 1, 5), 0, 3, "Paris"),
            appointment((2024, 1, 2), 0, 2, "Paris"),
            appointment((2024, 1, 5), 0, 1, "Lyon"),
        ];
        let cumulative = cumulative_daily(&records);
        let values: Vec<u64> = cumulative.iter().map(|d| d.cumulative).collect();
        assert_eq!(values, vec![2, 6]);
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*values.last().unwrap(), total_volume(&records));
    }

    #[test]
    fn mean_delay_averages_records() {
        let records = vec![
            appointment((2024, 1, 5), 2, 3, "Paris"),
            appointment((2024, 1, 6), 5, 1, "Paris"),
        ];
        assert_eq!(mean_delay(&records), Some(3.5));
    }

    #[test]
    fn window_spans_two_months_back_and_one_forward() {
        let records = vec![
            appointment((2023, 12, 31), 0, 100, "Paris"),
            appointment((2024, 1, 1), 0, 1, "Paris"),
            appointment((2024, 2, 10), 0, 2, "Paris"),
            appointment((2024, 3, 20), 0, 3, "Lyon"),
        ];
        let window = window_volume(&records);
        let months: Vec<String> = window.keys().map(|m| m.to_string()).collect();
        assert_eq!(months, vec!["2024-01", "2024-02", "2024-03"]);
        assert_eq!(window.values().sum::<u64>(), 6);
    }

    #[test]
    fn window_with_single_month_still_computes() {
        let records = vec![appointment((2024, 5, 2), 0, 4, "Paris")];
        let window = window_volume(&records);
        assert_eq!(window.get(&YearMonth::new(2024, 5)), Some(&4));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn region_delta_uses_two_latest_months() {
        let records = vec![
            appointment((2024, 1, 10), 0, 50, "Paris"),
            appointment((2024, 2, 10), 0, 10, "Paris"),
            appointment((2024, 2, 11), 0, 4, "Lyon"),
            appointment((2024, 3, 10), 0, 15, "Paris"),
        ];
        let delta = region_mom_delta(&records).unwrap();
        assert_eq!(delta.previous, YearMonth::new(2024, 2));
        assert_eq!(delta.latest, YearMonth::new(2024, 3));
        assert_eq!(delta.delta.get("Île-de-France"), Some(&5));
        assert_eq!(delta.delta.get("Auvergne-Rhône-Alpes"), Some(&-4));
    }

    #[test]
    fn region_delta_needs_two_months() {
        let records = vec![appointment((2024, 2, 10), 0, 10, "Paris")];
        assert!(region_mom_delta(&records).is_none());
    }

    #[test]
    fn trend_ratio_first_month_is_zero() {
        let mut monthly = BTreeMap::new();
        monthly.insert(YearMonth::new(2024, 1), 80);
        monthly.insert(YearMonth::new(2024, 2), 100);
        monthly.insert(YearMonth::new(2024, 3), 50);
        let ratios = trend_ratio(&monthly);
        assert_eq!(ratios[&YearMonth::new(2024, 1)], 0.0);
        assert!((ratios[&YearMonth::new(2024, 2)] - 25.0).abs() < 1e-9);
        assert!((ratios[&YearMonth::new(2024, 3)] + 50.0).abs() < 1e-9);
    }

    #[test]
    fn trend_ratio_after_empty_month_is_zero() {
        let mut monthly = BTreeMap::new();
        monthly.insert(YearMonth::new(2024, 1), 0);
        monthly.insert(YearMonth::new(2024, 2), 10);
        let ratios = trend_ratio(&monthly);
        assert_eq!(ratios[&YearMonth::new(2024, 2)], 0.0);
    }

    #[test]
    fn unmapped_bureau_is_reported_and_excluded() {
        let records = vec![
            appointment((2024, 1, 10), 0, 3, "Nantes"),
            appointment((2024, 1, 11), 0, 2, "Nantes"),
            appointment((2024, 1, 12), 0, 4, "Paris"),
        ];
        let result = aggregate(&records);
        assert_eq!(
            result.warnings,
            vec![UnmappedRegionWarning {
                bureau: "Nantes".to_string(),
                records: 2,
                volume: 5,
            }]
        );
        assert_eq!(result.region_volume.len(), 1);
        assert_eq!(result.region_volume.get("Île-de-France"), Some(&4));
        assert_eq!(result.top_bureau(), Some(("Nantes", 5)));
    }
}
