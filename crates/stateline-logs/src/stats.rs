//! Report summary statistics

use serde::{Deserialize, Serialize};

/// One aggregated row with its share of the report total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowShare {
    pub label: String,
    pub count: u64,
    pub percent: f64,
}

/// Share of `part` in `total`, in percent. A zero total yields `0`, never
/// NaN or a division error.
pub fn percent_of_total(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}

/// Attach percent-of-total to each labelled count.
pub fn shares(rows: &[(String, u64)]) -> Vec<RowShare> {
    let total: u64 = rows.iter().map(|(_, count)| count).sum();
    rows.iter()
        .map(|(label, count)| RowShare {
            label: label.clone(),
            count: *count,
            percent: percent_of_total(*count, total),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_total_yields_zero_percent() {
        assert_eq!(percent_of_total(0, 0), 0.0);

        let rows = vec![("errors".to_string(), 0), ("warnings".to_string(), 0)];
        for share in shares(&rows) {
            assert_eq!(share.percent, 0.0);
        }
    }

    #[test]
    fn shares_sum_to_one_hundred() {
        let rows = vec![
            ("a".to_string(), 25),
            ("b".to_string(), 25),
            ("c".to_string(), 50),
        ];
        let shares = shares(&rows);
        assert_eq!(shares[0].percent, 25.0);
        assert_eq!(shares[2].percent, 50.0);
        let total: f64 = shares.iter().map(|s| s.percent).sum();
        assert!((total - 100.0).abs() < f64::EPSILON);
    }
}
