//! Summary and per-day statistics over the detection history.
//!
//! Confidence figures are computed over the pool of every individual
//! detection, not over per-request averages. Days are keyed by the
//! `YYYY-MM-DD` prefix of the entry timestamp; entries whose prefix is not a
//! valid date count toward the totals but not toward any day.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::storage::HistoryEntry;

const DAILY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStat {
    pub date: String,
    pub count: usize,
    pub bears: usize,
    pub avg_confidence: f64,
    pub max_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total_requests: usize,
    pub total_bears: usize,
    /// Size of the confidence pool. Zero means the confidence fields below
    /// carry no information.
    pub detections: usize,
    pub avg_confidence: f64,
    pub max_confidence: f64,
    pub min_confidence: f64,
    pub bears_per_request: f64,
    pub daily_stats: Vec<DailyStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuickStats {
    pub total: usize,
    pub bears_total: usize,
    pub today: usize,
    pub today_bears: usize,
    pub avg_confidence: f64,
}

/// Mean, max and min of a confidence pool; all zero when it is empty.
#[derive(Debug, Default)]
struct Pool {
    count: usize,
    sum: f64,
    max: f64,
    min: f64,
}

impl Pool {
    fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.max = value;
            self.min = value;
        } else {
            self.max = self.max.max(value);
            self.min = self.min.min(value);
        }
        self.count += 1;
        self.sum += value;
    }

    fn extend(&mut self, entry: &HistoryEntry) {
        for det in &entry.detections {
            self.push(det.confidence);
        }
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[derive(Default)]
struct DayBucket {
    count: usize,
    bears: usize,
    pool: Pool,
}

/// Calendar date of an ISO-8601 timestamp, taken from its first ten
/// characters.
pub fn entry_date(timestamp: &str) -> Option<NaiveDate> {
    let prefix = timestamp.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

pub fn summarize(entries: &[HistoryEntry]) -> SummaryStats {
    let mut pool = Pool::default();
    let mut total_bears = 0;
    let mut days: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();

    for entry in entries {
        total_bears += entry.bear_count;
        pool.extend(entry);

        if let Some(date) = entry_date(&entry.timestamp) {
            let bucket = days.entry(date).or_default();
            bucket.count += 1;
            bucket.bears += entry.bear_count;
            bucket.pool.extend(entry);
        }
    }

    let daily_stats = days
        .iter()
        .rev()
        .take(DAILY_LIMIT)
        .map(|(date, bucket)| DailyStat {
            date: date.format("%Y-%m-%d").to_string(),
            count: bucket.count,
            bears: bucket.bears,
            avg_confidence: bucket.pool.mean(),
            max_confidence: bucket.pool.max,
        })
        .collect();

    let total_requests = entries.len();
    SummaryStats {
        total_requests,
        total_bears,
        detections: pool.count,
        avg_confidence: pool.mean(),
        max_confidence: pool.max,
        min_confidence: pool.min,
        bears_per_request: if total_requests > 0 {
            total_bears as f64 / total_requests as f64
        } else {
            0.0
        },
        daily_stats,
    }
}

pub fn quick_stats(entries: &[HistoryEntry], today: NaiveDate) -> QuickStats {
    let mut pool = Pool::default();
    let mut stats = QuickStats {
        total: entries.len(),
        bears_total: 0,
        today: 0,
        today_bears: 0,
        avg_confidence: 0.0,
    };

    for entry in entries {
        stats.bears_total += entry.bear_count;
        pool.extend(entry);
        if entry_date(&entry.timestamp) == Some(today) {
            stats.today += 1;
            stats.today_bears += entry.bear_count;
        }
    }

    stats.avg_confidence = pool.mean();
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;

    fn entry(timestamp: &str, confidences: &[f64]) -> HistoryEntry {
        let detections: Vec<Detection> = confidences
            .iter()
            .map(|c| Detection::new([0.0, 0.0, 10.0, 10.0], *c, 21, "bear".into()))
            .collect();
        HistoryEntry {
            id: format!("id-{timestamp}"),
            timestamp: timestamp.to_string(),
            original_image_ref: String::new(),
            result_image_ref: String::new(),
            bear_count: detections.len(),
            detections,
            processing_time: 0.1,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_history_is_all_zero() {
        let s = summarize(&[]);
        assert_eq!(s.total_requests, 0);
        assert_eq!(s.total_bears, 0);
        assert_eq!(s.detections, 0);
        assert_eq!(s.avg_confidence, 0.0);
        assert_eq!(s.max_confidence, 0.0);
        assert_eq!(s.min_confidence, 0.0);
        assert_eq!(s.bears_per_request, 0.0);
        assert!(s.daily_stats.is_empty());
    }

    #[test]
    fn confidence_pool_is_flattened_across_entries() {
        let entries = [
            entry("2024-01-05T10:00:00", &[0.9, 0.5]),
            entry("2024-01-05T11:00:00", &[0.7]),
        ];
        let s = summarize(&entries);
        assert!(close(s.avg_confidence, (0.9 + 0.5 + 0.7) / 3.0));
        assert_eq!(s.max_confidence, 0.9);
        assert_eq!(s.min_confidence, 0.5);
        assert_eq!(s.detections, 3);
    }

    #[test]
    fn pool_mean_is_not_a_mean_of_means() {
        let entries = [
            entry("2024-01-05T10:00:00", &[1.0]),
            entry("2024-01-05T11:00:00", &[0.0, 0.0, 0.0]),
        ];
        assert!(close(summarize(&entries).avg_confidence, 0.25));
    }

    #[test]
    fn bears_per_request_divides_totals() {
        let entries = [
            entry("2024-01-05T10:00:00", &[0.9, 0.8, 0.7]),
            entry("2024-01-06T10:00:00", &[]),
        ];
        let s = summarize(&entries);
        assert_eq!(s.total_requests, 2);
        assert_eq!(s.total_bears, 3);
        assert!(close(s.bears_per_request, 1.5));
    }

    #[test]
    fn same_calendar_date_shares_a_bucket() {
        let entries = [
            entry("2024-01-05T10:00:00", &[0.6]),
            entry("2024-01-05T23:00:00", &[0.8, 0.4]),
            entry("2024-01-04T09:00:00", &[]),
        ];
        let s = summarize(&entries);
        assert_eq!(s.daily_stats.len(), 2);

        let day = &s.daily_stats[0];
        assert_eq!(day.date, "2024-01-05");
        assert_eq!(day.count, 2);
        assert_eq!(day.bears, 3);
        assert!(close(day.avg_confidence, 0.6));
        assert_eq!(day.max_confidence, 0.8);

        let quiet = &s.daily_stats[1];
        assert_eq!(quiet.date, "2024-01-04");
        assert_eq!(quiet.avg_confidence, 0.0);
        assert_eq!(quiet.max_confidence, 0.0);
    }

    #[test]
    fn daily_view_keeps_ten_most_recent_dates_descending() {
        let entries: Vec<HistoryEntry> = (1..=15)
            .map(|d| entry(&format!("2024-03-{d:02}T12:00:00"), &[0.5]))
            .collect();
        let s = summarize(&entries);
        let dates: Vec<&str> = s.daily_stats.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates.len(), 10);
        assert_eq!(dates[0], "2024-03-15");
        assert_eq!(dates[9], "2024-03-06");
        assert!(dates.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(s.total_requests, 15);
    }

    #[test]
    fn malformed_timestamps_skip_daily_buckets_only() {
        let entries = [entry("yesterday", &[0.9]), entry("2024-01-05T10:00:00", &[])];
        let s = summarize(&entries);
        assert_eq!(s.total_requests, 2);
        assert_eq!(s.total_bears, 1);
        assert_eq!(s.daily_stats.len(), 1);
    }

    #[test]
    fn date_prefix_rule() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(entry_date("2024-01-05T10:00:00.123456"), Some(d));
        assert_eq!(entry_date("2024-01-05"), Some(d));
        assert_eq!(entry_date("2024-13-05T10:00:00"), None);
        assert_eq!(entry_date("2024-01"), None);
    }

    #[test]
    fn quick_stats_counts_today() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let entries = [
            entry("2024-01-05T08:00:00", &[0.9, 0.7]),
            entry("2024-01-05T20:00:00", &[0.5]),
            entry("2024-01-04T20:00:00", &[0.3]),
        ];
        let q = quick_stats(&entries, today);
        assert_eq!(q.total, 3);
        assert_eq!(q.bears_total, 4);
        assert_eq!(q.today, 2);
        assert_eq!(q.today_bears, 3);
        assert!(close(q.avg_confidence, 0.6));
    }

    #[test]
    fn quick_stats_empty() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let q = quick_stats(&[], today);
        assert_eq!(
            q,
            QuickStats {
                total: 0,
                bears_total: 0,
                today: 0,
                today_bears: 0,
                avg_confidence: 0.0,
            }
        );
    }
}
