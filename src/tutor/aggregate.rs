//! Per-level averages and the weighted composite score.

use std::collections::BTreeMap;

use super::{ScoredTaxonomy, TaxonomyLevel};
use crate::error::WeightsError;

/// Sums closer to 1 than this are kept as entered.
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

/// One weight per taxonomy level, always summing to 1.
///
/// The only way to build one from user input is [`TaxonomyWeights::normalize`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaxonomyWeights {
    values: [f64; 6],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightAdjustment {
    Unchanged,
    /// Every weight was divided by the entered total.
    Rescaled { total: f64 },
    /// The entered weights summed to zero, equal weights were restored.
    ResetToEqual,
}

impl Default for TaxonomyWeights {
    fn default() -> Self {
        Self {
            values: [1.0 / 6.0; 6],
        }
    }
}

impl TaxonomyWeights {
    pub fn normalize(raw: [f64; 6]) -> (Self, WeightAdjustment) {
        let raw = raw.map(|w| if w.is_finite() && w > 0.0 { w } else { 0.0 });
        let total: f64 = raw.iter().sum();

        if total <= 0.0 {
            return (Self::default(), WeightAdjustment::ResetToEqual);
        }
        if (total - 1.0).abs() <= WEIGHT_TOLERANCE {
            return (Self { values: raw }, WeightAdjustment::Unchanged);
        }
        (
            Self {
                values: raw.map(|w| w / total),
            },
            WeightAdjustment::Rescaled { total },
        )
    }

    /// Reads weights typed by a user: six numbers in level order
    /// (`0.3 0.2 0.2 0.1 0.1 0.1`, commas allowed) or `level=value` pairs
    /// where unnamed levels get 0.
    pub fn parse(input: &str) -> Result<[f64; 6], WeightsError> {
        let tokens: Vec<&str> = input
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return Err(WeightsError::Empty);
        }

        let mut raw = [0.0; 6];
        if tokens.iter().any(|t| t.contains('=') || t.contains(':')) {
            for token in tokens {
                let (name, value) = token
                    .split_once(['=', ':'])
                    .ok_or_else(|| WeightsError::NotANumber(token.to_string()))?;
                let level = TaxonomyLevel::from_name(name)
                    .ok_or_else(|| WeightsError::UnknownLevel(name.to_string()))?;
                raw[level.index()] = parse_weight(value, level.name())?;
            }
        } else {
            if tokens.len() != raw.len() {
                return Err(WeightsError::WrongCount(tokens.len()));
            }
            for (level, token) in TaxonomyLevel::ALL.into_iter().zip(tokens) {
                raw[level.index()] = parse_weight(token, level.name())?;
            }
        }
        Ok(raw)
    }

    pub fn get(&self, level: TaxonomyLevel) -> f64 {
        self.values[level.index()]
    }

    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaxonomyLevel, f64)> + '_ {
        TaxonomyLevel::ALL.into_iter().map(move |level| (level, self.get(level)))
    }
}

fn parse_weight(token: &str, level: &str) -> Result<f64, WeightsError> {
    let value: f64 = token
        .trim()
        .parse()
        .map_err(|_| WeightsError::NotANumber(token.to_string()))?;
    if !value.is_finite() {
        return Err(WeightsError::NotANumber(token.to_string()));
    }
    if value < 0.0 {
        return Err(WeightsError::Negative(level.to_string()));
    }
    Ok(value)
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LevelEvaluation {
    pub average_score: f64,
    pub weight: f64,
    pub weighted_average: f64,
    pub scored_questions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Evaluation {
    pub levels: BTreeMap<TaxonomyLevel, LevelEvaluation>,
    pub total_weighted_score: f64,
}

impl Evaluation {
    /// Levels without scored questions are reported with zero averages and
    /// contribute nothing to the total.
    pub fn compute(scored: &ScoredTaxonomy, weights: &TaxonomyWeights) -> Self {
        let mut levels = BTreeMap::new();
        let mut total_weighted_score = 0.0;

        for level in TaxonomyLevel::ALL {
            let weight = weights.get(level);
            let (sum, count) = scored
                .scores(level)
                .map(|scores| {
                    scores.fold((0u32, 0usize), |(sum, count), s| (sum + s as u32, count + 1))
                })
                .unwrap_or((0, 0));
            let average_score = if count == 0 {
                0.0
            } else {
                sum as f64 / count as f64
            };
            let weighted_average = average_score * weight;
            total_weighted_score += weighted_average;

            levels.insert(
                level,
                LevelEvaluation {
                    average_score,
                    weight,
                    weighted_average,
                    scored_questions: count,
                },
            );
        }

        Self {
            levels,
            total_weighted_score,
        }
    }

    pub fn level(&self, level: TaxonomyLevel) -> Option<&LevelEvaluation> {
        self.levels.get(&level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tutor::ScoredSubQuestion;

    fn scored(levels: &[(TaxonomyLevel, &[u8])]) -> ScoredTaxonomy {
        let mut scored = ScoredTaxonomy::default();
        for (level, scores) in levels {
            scored.levels.insert(
                *level,
                scores
                    .iter()
                    .map(|&score| ScoredSubQuestion {
                        question: "q".to_string(),
                        score,
                        ..Default::default()
                    })
                    .collect(),
            );
        }
        scored
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn positive_totals_normalize_to_one() {
        let cases = [
            [1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
            [0.5, 0.5, 0.0, 0.0, 0.0, 0.0],
            [3.0, 0.1, 0.0, 7.5, 0.25, 0.001],
            [0.2, 0.2, 0.2, 0.2, 0.2, 0.2],
            [1e-7, 0.0, 0.0, 0.0, 0.0, 0.0],
        ];
        for raw in cases {
            let (weights, _) = TaxonomyWeights::normalize(raw);
            assert!((weights.total() - 1.0).abs() < 1e-6, "{:?}", raw);
        }
    }

    #[test]
    fn zero_total_resets_to_equal_weights() {
        let (weights, adjustment) = TaxonomyWeights::normalize([0.0; 6]);
        assert_eq!(adjustment, WeightAdjustment::ResetToEqual);
        for (_, weight) in weights.iter() {
            assert_close(weight, 1.0 / 6.0);
        }
    }

    #[test]
    fn weights_already_summing_to_one_are_kept() {
        let raw = [0.5, 0.5, 0.0, 0.0, 0.0, 0.0];
        let (weights, adjustment) = TaxonomyWeights::normalize(raw);
        assert_eq!(adjustment, WeightAdjustment::Unchanged);
        assert_eq!(weights.get(TaxonomyLevel::Remember), 0.5);
    }

    #[test]
    fn other_totals_are_rescaled() {
        let (weights, adjustment) = TaxonomyWeights::normalize([2.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(adjustment, WeightAdjustment::Rescaled { total: 4.0 });
        assert_close(weights.get(TaxonomyLevel::Understand), 0.5);
    }

    #[test]
    fn negative_and_nan_entries_count_as_zero() {
        let (weights, _) = TaxonomyWeights::normalize([-1.0, f64::NAN, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(weights.get(TaxonomyLevel::Remember), 0.0);
        assert_eq!(weights.get(TaxonomyLevel::Understand), 0.0);
        assert_close(weights.get(TaxonomyLevel::Apply), 1.0);
    }

    #[test]
    fn weights_parse_positional_and_named() {
        assert_eq!(
            TaxonomyWeights::parse("0.3, 0.2 0.2 0.1 0.1 0.1").unwrap(),
            [0.3, 0.2, 0.2, 0.1, 0.1, 0.1]
        );
        assert_eq!(
            TaxonomyWeights::parse("remember=0.5 Understand=0.5").unwrap(),
            [0.5, 0.5, 0.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn bad_weight_input_is_rejected() {
        assert_eq!(TaxonomyWeights::parse("  "), Err(WeightsError::Empty));
        assert_eq!(TaxonomyWeights::parse("0.5 0.5"), Err(WeightsError::WrongCount(2)));
        assert_eq!(
            TaxonomyWeights::parse("1 1 1 1 1 x"),
            Err(WeightsError::NotANumber("x".to_string()))
        );
        assert_eq!(
            TaxonomyWeights::parse("apply=-1"),
            Err(WeightsError::Negative("Apply".to_string()))
        );
        assert_eq!(
            TaxonomyWeights::parse("synthesis=1"),
            Err(WeightsError::UnknownLevel("synthesis".to_string()))
        );
    }

    #[test]
    fn average_is_the_arithmetic_mean() {
        let scored = scored(&[(TaxonomyLevel::Apply, &[1, 2, 4])]);
        let evaluation = Evaluation::compute(&scored, &TaxonomyWeights::default());
        let apply = evaluation.level(TaxonomyLevel::Apply).unwrap();
        assert_close(apply.average_score, 7.0 / 3.0);
        assert_eq!(apply.scored_questions, 3);
    }

    #[test]
    fn empty_level_averages_zero() {
        let scored = scored(&[(TaxonomyLevel::Create, &[])]);
        let evaluation = Evaluation::compute(&scored, &TaxonomyWeights::default());
        let create = evaluation.level(TaxonomyLevel::Create).unwrap();
        assert_eq!(create.average_score, 0.0);
        assert_eq!(create.scored_questions, 0);
    }

    #[test]
    fn two_level_scenario() {
        let scored = scored(&[
            (TaxonomyLevel::Remember, &[5, 3]),
            (TaxonomyLevel::Understand, &[4]),
        ]);
        let (weights, _) = TaxonomyWeights::normalize([0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);

        let evaluation = Evaluation::compute(&scored, &weights);

        for level in [TaxonomyLevel::Remember, TaxonomyLevel::Understand] {
            let entry = evaluation.level(level).unwrap();
            assert_close(entry.average_score, 4.0);
            assert_close(entry.weighted_average, 2.0);
        }
        assert_close(evaluation.total_weighted_score, 4.0);
    }

    #[test]
    fn absent_levels_keep_their_weight_but_score_zero() {
        let scored = scored(&[(TaxonomyLevel::Remember, &[5])]);
        let evaluation = Evaluation::compute(&scored, &TaxonomyWeights::default());

        let analyze = evaluation.level(TaxonomyLevel::Analyze).unwrap();
        assert_eq!(analyze.average_score, 0.0);
        assert_eq!(analyze.weighted_average, 0.0);
        assert_close(analyze.weight, 1.0 / 6.0);
        assert_eq!(evaluation.levels.len(), 6);
        assert_close(evaluation.total_weighted_score, 5.0 / 6.0);
    }

    #[test]
    fn total_is_sum_of_weighted_averages() {
        let scored = scored(&[
            (TaxonomyLevel::Remember, &[5, 4]),
            (TaxonomyLevel::Apply, &[2]),
            (TaxonomyLevel::Create, &[0, 1]),
        ]);
        let (weights, _) = TaxonomyWeights::normalize([0.3, 0.2, 0.2, 0.1, 0.1, 0.1]);

        let evaluation = Evaluation::compute(&scored, &weights);

        let sum: f64 = evaluation.levels.values().map(|l| l.weighted_average).sum();
        assert_close(evaluation.total_weighted_score, sum);
        assert_close(evaluation.total_weighted_score, 4.5 * 0.3 + 2.0 * 0.2 + 0.5 * 0.1);
    }
}
