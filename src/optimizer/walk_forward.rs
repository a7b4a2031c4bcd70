//! Walk-forward robustness analysis
//!
//! Quantifies the gap between in-sample and out-of-sample performance to
//! flag configurations that memorized the training window.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backtesting::PerformanceMetrics;

/// Divergence tier thresholds
const DIVERGENCE_MODERATE: f64 = 15.0;
const DIVERGENCE_SIGNIFICANT: f64 = 30.0;
const DIVERGENCE_SEVERE: f64 = 50.0;

/// Qualitative verdict by divergence tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    GeneralizesWell,
    ModerateDivergence,
    SignificantOverfitting,
    SevereOverfitting,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::GeneralizesWell => {
                write!(f, "Strategy generalizes well to unseen data")
            }
            Recommendation::ModerateDivergence => {
                write!(f, "Moderate divergence - acceptable with monitoring")
            }
            Recommendation::SignificantOverfitting => {
                write!(f, "Significant overfitting - re-tune with more data")
            }
            Recommendation::SevereOverfitting => {
                write!(f, "Severe overfitting - do not deploy")
            }
        }
    }
}

/// In-sample vs out-of-sample comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobustnessReport {
    /// inPnL - outPnL
    pub pnl_drop: f64,
    /// Fraction of in-sample PnL lost out-of-sample (0 when inPnL <= 0)
    pub pnl_drop_pct: f64,
    pub win_rate_drop: f64,
    pub sharpe_drop: f64,
    /// Weighted divergence score, higher is worse
    pub divergence_score: f64,
    pub is_overfit: bool,
    pub recommendation: Recommendation,
    /// 0-100, higher is more robust
    pub robustness_score: f64,
}

/// Compare training metrics against held-out metrics
pub fn analyze_robustness(
    in_sample: &PerformanceMetrics,
    out_of_sample: &PerformanceMetrics,
) -> RobustnessReport {
    let pnl_drop = in_sample.total_pnl - out_of_sample.total_pnl;
    let pnl_drop_pct = if in_sample.total_pnl > 0.0 {
        pnl_drop / in_sample.total_pnl
    } else {
        0.0
    };
    let win_rate_drop = in_sample.win_rate - out_of_sample.win_rate;
    let sharpe_drop = in_sample.sharpe_ratio - out_of_sample.sharpe_ratio;

    let mut divergence_score = 40.0 * pnl_drop_pct.max(0.0) + 30.0 * win_rate_drop.max(0.0);
    if in_sample.sharpe_ratio > 0.0 {
        divergence_score += 30.0 * (sharpe_drop / in_sample.sharpe_ratio).max(0.0);
    }

    let is_overfit = divergence_score > DIVERGENCE_SIGNIFICANT || pnl_drop_pct > 0.50;

    let recommendation = if divergence_score < DIVERGENCE_MODERATE {
        Recommendation::GeneralizesWell
    } else if divergence_score < DIVERGENCE_SIGNIFICANT {
        Recommendation::ModerateDivergence
    } else if divergence_score < DIVERGENCE_SEVERE {
        Recommendation::SignificantOverfitting
    } else {
        Recommendation::SevereOverfitting
    };

    let mut robustness_score = (100.0 - 2.0 * divergence_score).clamp(0.0, 100.0);
    if out_of_sample.total_pnl > 0.0 {
        robustness_score += 10.0;
    }
    if out_of_sample.sharpe_ratio > 0.0 {
        robustness_score += 10.0;
    }
    if out_of_sample.win_rate > 0.5 {
        robustness_score += 5.0;
    }
    robustness_score = robustness_score.min(100.0);

    RobustnessReport {
        pnl_drop,
        pnl_drop_pct,
        win_rate_drop,
        sharpe_drop,
        divergence_score,
        is_overfit,
        recommendation,
        robustness_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(pnl: f64, win_rate: f64, sharpe: f64) -> PerformanceMetrics {
        PerformanceMetrics {
            total_pnl: pnl,
            win_rate,
            sharpe_ratio: sharpe,
            ..PerformanceMetrics::default()
        }
    }

    #[test]
    fn test_identical_performance_is_robust() {
        let m = metrics(50.0, 0.6, 1.5);
        let report = analyze_robustness(&m, &m);

        assert_eq!(report.divergence_score, 0.0);
        assert!(!report.is_overfit);
        assert_eq!(report.recommendation, Recommendation::GeneralizesWell);
        // All three out-of-sample bonuses trigger; the score caps at 100
        assert_eq!(report.robustness_score, 100.0);
    }

    #[test]
    fn test_total_collapse_is_overfit() {
        let report = analyze_robustness(&metrics(100.0, 0.7, 2.0), &metrics(-20.0, 0.3, -0.5));

        // 40 * 1.2 + 30 * 0.4 + 30 * 1.25 = 97.5
        assert!((report.divergence_score - 97.5).abs() < 1e-9);
        assert!(report.is_overfit);
        assert_eq!(report.recommendation, Recommendation::SevereOverfitting);
        assert_eq!(report.robustness_score, 0.0);
    }

    #[test]
    fn test_pnl_drop_pct_guard() {
        let report = analyze_robustness(&metrics(-10.0, 0.4, 0.0), &metrics(-30.0, 0.4, 0.0));
        assert_eq!(report.pnl_drop_pct, 0.0);
        assert_eq!(report.pnl_drop, 20.0);
    }

    #[test]
    fn test_half_pnl_loss_flags_overfit() {
        let report = analyze_robustness(&metrics(100.0, 0.6, 1.0), &metrics(45.0, 0.6, 1.0));
        // Divergence = 40 * 0.55 = 22 (< 30) but the PnL drop alone crosses 50%
        assert!(report.pnl_drop_pct > 0.50);
        assert!(report.is_overfit);
        assert_eq!(report.recommendation, Recommendation::ModerateDivergence);
    }

    #[test]
    fn test_improvement_out_of_sample_counts_as_zero_divergence() {
        let report = analyze_robustness(&metrics(50.0, 0.5, 1.0), &metrics(80.0, 0.6, 1.4));
        assert_eq!(report.divergence_score, 0.0);
        assert!(report.robustness_score >= 100.0 - 1e-9);
    }
}
