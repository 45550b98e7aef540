//! Period-column grammar: `Total <YYYY>` and `<Mes> <YYYY>`.
//!
//! Labels are parsed once when a workbook is loaded; everything downstream
//! works on [`PeriodLabel`] values and the canonical `(year, month)` order.

use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub const MONTHS: [&str; 12] = [
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

/// First year the receivables workbook carries totals for.
pub const FIRST_YEAR: i32 = 2018;

/// Sort key for labels that do not follow the grammar.
pub const UNPARSEABLE_KEY: (i32, u32) = (9999, 99);

lazy_static! {
    static ref TOTAL_REGEX: Regex = Regex::new(r"^(?i)total\s+(\d{4})$").unwrap();
    static ref MONTH_REGEX: Regex = Regex::new(r"^([A-Za-z]+)\s+(\d{4})$").unwrap();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodLabel {
    YearTotal(i32),
    Month { month: u32, year: i32 },
}

impl PeriodLabel {
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        if let Some(caps) = TOTAL_REGEX.captures(label) {
            return caps[1].parse().ok().map(PeriodLabel::YearTotal);
        }
        let caps = MONTH_REGEX.captures(label)?;
        let month = month_ordinal(&caps[1])?;
        let year = caps[2].parse().ok()?;
        Some(PeriodLabel::Month { month, year })
    }

    pub fn year(&self) -> i32 {
        match self {
            PeriodLabel::YearTotal(y) => *y,
            PeriodLabel::Month { year, .. } => *year,
        }
    }

    /// `(year, 0)` for totals, `(year, 1..=12)` for months.
    pub fn order_key(&self) -> (i32, u32) {
        match self {
            PeriodLabel::YearTotal(y) => (*y, 0),
            PeriodLabel::Month { month, year } => (*year, *month),
        }
    }

    pub fn is_total(&self) -> bool {
        matches!(self, PeriodLabel::YearTotal(_))
    }
}

impl fmt::Display for PeriodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodLabel::YearTotal(y) => write!(f, "Total {}", y),
            PeriodLabel::Month { month, year } => {
                write!(f, "{} {}", MONTHS[(*month as usize).saturating_sub(1) % 12], year)
            }
        }
    }
}

impl PartialOrd for PeriodLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeriodLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

/// 1-based month ordinal of a Spanish month name, case-insensitive.
pub fn month_ordinal(name: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(name.trim()))
        .map(|i| i as u32 + 1)
}

/// Month bucket label (`Marzo 2024`) for a date.
pub fn month_bucket(date: NaiveDate) -> PeriodLabel {
    PeriodLabel::Month {
        month: date.month(),
        year: date.year(),
    }
}

/// Canonical sort key of any label; unparseable labels sort last.
pub fn order_key(label: &str) -> (i32, u32) {
    PeriodLabel::parse(label)
        .map(|p| p.order_key())
        .unwrap_or(UNPARSEABLE_KEY)
}

/// Sorts labels in canonical period order, stable for equal keys.
pub fn sort_labels(labels: &mut [String]) {
    labels.sort_by_key(|l| order_key(l));
}

/// The twelve labels `<Mes> <year>` in calendar order.
pub fn months_for(year: i32) -> Vec<String> {
    MONTHS.iter().map(|m| format!("{} {}", m, year)).collect()
}

/// `Total <year_min>` … `Total <year_max>` ascending.
pub fn totals_through(year_max: i32, year_min: i32) -> Vec<String> {
    (year_min..=year_max).map(|y| format!("Total {}", y)).collect()
}

/// Present period columns split into the time windows the views use.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PeriodPartition {
    /// `Total 2018` … `Total Y-1`.
    pub historic_totals: Vec<PeriodLabel>,
    /// `Enero Y` … `Diciembre Y`.
    pub current_months: Vec<PeriodLabel>,
    /// `Total Y+1` onwards.
    pub future_totals: Vec<PeriodLabel>,
    /// `<Mes> Y` for months at or after the current month.
    pub remaining_months: Vec<PeriodLabel>,
}

/// Splits the present period columns around `today`.
///
/// Only labels actually present are returned, each window in canonical order.
pub fn partition(present: &[PeriodLabel], today: NaiveDate) -> PeriodPartition {
    let year = today.year();
    let month = today.month();
    let mut sorted: Vec<PeriodLabel> = present.to_vec();
    sorted.sort();
    sorted.dedup();

    let mut out = PeriodPartition::default();
    for p in sorted {
        match p {
            PeriodLabel::YearTotal(y) if (FIRST_YEAR..year).contains(&y) => {
                out.historic_totals.push(p)
            }
            PeriodLabel::YearTotal(y) if y > year => out.future_totals.push(p),
            PeriodLabel::Month { year: y, month: m } if y == year => {
                out.current_months.push(p);
                if m >= month {
                    out.remaining_months.push(p);
                }
            }
            _ => {}
        }
    }
    out
}

/// All `Total YYYY` columns present, in order.
pub fn all_totals(present: &[PeriodLabel]) -> Vec<PeriodLabel> {
    let mut out: Vec<PeriodLabel> = present.iter().copied().filter(|p| p.is_total()).collect();
    out.sort();
    out.dedup();
    out
}
