use crate::error::AnalysisError;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Daily closes for one ticker, strictly ascending by date.
#[derive(Debug, Clone, Serialize)]
pub struct PriceSeries {
    ticker: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(ticker: impl Into<String>, points: Vec<PricePoint>) -> Result<Self, AnalysisError> {
        let ticker = ticker.into();
        if points.is_empty() {
            return Err(AnalysisError::prices_unavailable(
                &ticker,
                "no price points in window",
            ));
        }

        for p in &points {
            if !p.close.is_finite() || p.close <= 0.0 {
                return Err(AnalysisError::prices_unavailable(
                    &ticker,
                    format!("invalid close {} on {}", p.close, p.date),
                ));
            }
        }

        for pair in points.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(AnalysisError::prices_unavailable(
                    &ticker,
                    format!(
                        "price points must be strictly ascending (got {} after {})",
                        pair[1].date, pair[0].date
                    ),
                ));
            }
        }

        Ok(Self { ticker, points })
    }

    /// Sorts by date and keeps the last close seen for a duplicated date before validating.
    pub fn from_unordered(
        ticker: impl Into<String>,
        mut points: Vec<PricePoint>,
    ) -> Result<Self, AnalysisError> {
        points.sort_by_key(|p| p.date);
        let mut deduped: Vec<PricePoint> = Vec::with_capacity(points.len());
        for p in points {
            match deduped.last_mut() {
                Some(last) if last.date == p.date => *last = p,
                _ => deduped.push(p),
            }
        }
        Self::new(ticker, deduped)
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.close)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> &PricePoint {
        // Non-empty by construction.
        &self.points[self.points.len() - 1]
    }
}

/// Longest lookback a window may span.
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

/// Inclusive date range of price history to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LookbackWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl LookbackWindow {
    /// `None` when the start would fall outside the calendar chrono can represent.
    pub fn ending(end: NaiveDate, days: u32) -> Option<Self> {
        let start = end.checked_sub_signed(Duration::days(i64::from(days)))?;
        Some(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    #[test]
    fn rejects_empty_and_unsorted_series() {
        assert!(PriceSeries::new("AAPL", vec![]).is_err());

        let unsorted = vec![
            PricePoint { date: d(3), close: 10.0 },
            PricePoint { date: d(2), close: 11.0 },
        ];
        assert!(PriceSeries::new("AAPL", unsorted).is_err());

        let dup = vec![
            PricePoint { date: d(2), close: 10.0 },
            PricePoint { date: d(2), close: 11.0 },
        ];
        assert!(PriceSeries::new("AAPL", dup).is_err());
    }

    #[test]
    fn rejects_non_positive_closes() {
        let points = vec![
            PricePoint { date: d(2), close: 10.0 },
            PricePoint { date: d(3), close: 0.0 },
        ];
        assert!(PriceSeries::new("AAPL", points).is_err());

        let points = vec![PricePoint { date: d(2), close: f64::NAN }];
        assert!(PriceSeries::new("AAPL", points).is_err());
    }

    #[test]
    fn from_unordered_sorts_and_dedupes() {
        let points = vec![
            PricePoint { date: d(4), close: 12.0 },
            PricePoint { date: d(2), close: 10.0 },
            PricePoint { date: d(4), close: 13.0 },
        ];
        let series = PriceSeries::from_unordered("AAPL", points).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.points()[0].date, d(2));
        assert_eq!(series.last().close, 13.0);
    }

    #[test]
    fn lookback_window_is_inclusive() {
        let w = LookbackWindow::ending(d(31), 30).unwrap();
        assert_eq!(w.start, d(1));
        assert!(w.contains(d(1)));
        assert!(w.contains(d(31)));
        assert!(!w.contains(NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()));
    }

    #[test]
    fn lookback_window_out_of_calendar_range() {
        assert_eq!(LookbackWindow::ending(d(31), u32::MAX), None);
        let w = LookbackWindow::ending(d(31), MAX_LOOKBACK_DAYS).unwrap();
        assert_eq!(w.start.year(), 1926);
    }
}
