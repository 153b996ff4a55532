//! Rank-based percentile banding.

use std::collections::BTreeMap;

use risk_map_models::{CellId, RiskBand};
use serde::Serialize;

use crate::CompareError;

/// Percentile bucket and band of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandAssignment {
    /// 1 (lowest) to 100 (highest).
    pub percentile: u8,
    pub band: RiskBand,
}

/// Ranks `scores` ascending (ties by ascending cell id) and assigns the
/// zero-based rank `r` of `n` cells the bucket `floor(100 r / n) + 1`.
///
/// # Errors
///
/// Returns [`CompareError::NonFiniteScore`] for any NaN or infinite score.
pub fn assign_bands(
    scores: &BTreeMap<CellId, f64>,
) -> Result<BTreeMap<CellId, BandAssignment>, CompareError> {
    if let Some((cell, score)) = scores.iter().find(|(_, s)| !s.is_finite()) {
        return Err(CompareError::NonFiniteScore {
            cell: *cell,
            score: *score,
        });
    }

    let mut ranked: Vec<(CellId, f64)> = scores.iter().map(|(c, s)| (*c, *s)).collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

    let n = ranked.len();
    Ok(ranked
        .into_iter()
        .enumerate()
        .map(|(rank, (cell, _))| {
            let percentile = u8::try_from(100 * rank / n + 1).unwrap_or(100);
            (
                cell,
                BandAssignment {
                    percentile,
                    band: RiskBand::from_percentile(percentile),
                },
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(values: &[f64]) -> BTreeMap<CellId, f64> {
        values
            .iter()
            .zip(0u32..)
            .map(|(v, i)| (CellId(i), *v))
            .collect()
    }

    #[test]
    fn hundred_cells_split_eleven_twenty_twenty_twenty_twentynine() {
        let values: Vec<f64> = (0..100).map(f64::from).collect();
        let bands = assign_bands(&scores(&values)).unwrap();

        let count = |band: RiskBand| bands.values().filter(|a| a.band == band).count();
        assert_eq!(count(RiskBand::Highest), 11);
        assert_eq!(count(RiskBand::High), 20);
        assert_eq!(count(RiskBand::Moderate), 20);
        assert_eq!(count(RiskBand::Low), 20);
        assert_eq!(count(RiskBand::Lowest), 29);

        assert_eq!(bands[&CellId(0)].percentile, 1);
        assert_eq!(bands[&CellId(99)].percentile, 100);
    }

    #[test]
    fn ties_break_by_cell_id() {
        let bands = assign_bands(&scores(&[5.0, 5.0, 5.0, 5.0])).unwrap();
        let percentiles: Vec<u8> = bands.values().map(|a| a.percentile).collect();
        assert_eq!(percentiles, vec![1, 26, 51, 76]);
    }

    #[test]
    fn nan_is_rejected() {
        let err = assign_bands(&scores(&[1.0, f64::NAN])).unwrap_err();
        assert!(matches!(err, CompareError::NonFiniteScore { cell, .. } if cell == CellId(1)));
    }

    #[test]
    fn empty_scores_give_empty_bands() {
        assert!(assign_bands(&BTreeMap::new()).unwrap().is_empty());
    }
}
