//! Held-out event shares per risk band.

use std::collections::BTreeMap;

use risk_map_models::{CellId, RiskBand};
use serde::Serialize;

use crate::CompareError;
use crate::bands::assign_bands;

/// One (model, band) row of a comparison table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRow {
    pub model: String,
    pub band: RiskBand,
    /// Band label such as `"90% to 100%"`.
    pub label: String,
    /// Cells in the band.
    pub cells: usize,
    /// Held-out events in the band's cells.
    pub events: u64,
    /// `events` over all held-out events in scored cells, zero when there
    /// are none.
    pub share: f64,
}

/// Bands `scores` and tallies `held_out` counts per band.
///
/// Returns five rows, lowest band first. Held-out events in cells without
/// a score are ignored.
///
/// # Errors
///
/// * [`CompareError::EmptyScores`] if `scores` is empty.
/// * Errors of [`assign_bands`].
pub fn score_against_holdout(
    model: &str,
    scores: &BTreeMap<CellId, f64>,
    held_out: &BTreeMap<CellId, u64>,
) -> Result<Vec<ComparisonRow>, CompareError> {
    if scores.is_empty() {
        return Err(CompareError::EmptyScores {
            model: model.to_string(),
        });
    }

    let bands = assign_bands(scores)?;

    let mut tally: BTreeMap<RiskBand, (usize, u64)> =
        RiskBand::ALL.iter().map(|band| (*band, (0, 0))).collect();
    for (cell, assignment) in &bands {
        let entry = tally.entry(assignment.band).or_default();
        entry.0 += 1;
        entry.1 += held_out.get(cell).copied().unwrap_or(0);
    }

    let total: u64 = tally.values().map(|(_, events)| events).sum();
    if total == 0 {
        log::warn!("No held-out events fall in cells scored by '{model}'");
    }

    Ok(tally
        .into_iter()
        .map(|(band, (cells, events))| {
            #[allow(clippy::cast_precision_loss)]
            let share = if total == 0 {
                0.0
            } else {
                events as f64 / total as f64
            };
            ComparisonRow {
                model: model.to_string(),
                band,
                label: band.label().to_string(),
                cells,
                events,
                share,
            }
        })
        .collect())
}

/// Scores every `(label, scores)` model against the same held-out counts
/// and concatenates their rows in input order.
///
/// # Errors
///
/// Errors of [`score_against_holdout`].
pub fn compare_models(
    models: &[(String, BTreeMap<CellId, f64>)],
    held_out: &BTreeMap<CellId, u64>,
) -> Result<Vec<ComparisonRow>, CompareError> {
    let mut rows = Vec::with_capacity(models.len() * RiskBand::ALL.len());
    for (model, scores) in models {
        let model_rows = score_against_holdout(model, scores, held_out)?;
        if let Some(top) = model_rows.last() {
            log::info!(
                "'{model}': {:.1}% of held-out events in the {} band",
                top.share * 100.0,
                top.label
            );
        }
        rows.extend(model_rows);
    }
    Ok(rows)
}
