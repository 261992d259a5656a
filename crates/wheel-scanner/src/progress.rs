use std::cmp::Ordering;

use scan_store::ScanResultRow;
use serde::{Deserialize, Serialize};
use wheel_core::{OwnerId, PortfolioExposure};

use crate::phases::{IvMetrics, SelectedPut, StockMetrics};
use crate::scorer::CompositeScore;

/// Phase whose inputs could not be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    StockFilter,
    IvScreen,
    OptionSelection,
}

/// Informational phase-5 result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PortfolioCheck {
    pub exposure: Option<PortfolioExposure>,
    /// Lookup failure, if any; never blocks the candidate
    pub error: Option<String>,
}

impl PortfolioCheck {
    pub fn note(&self) -> Option<String> {
        match (&self.exposure, &self.error) {
            (Some(exposure), _) => Some(exposure.advisory()),
            (None, Some(err)) => Some(format!("position check unavailable: {}", err)),
            (None, None) => None,
        }
    }
}

/// How far one ticker got through the pipeline, carrying exactly the data it reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ScanProgress {
    DataUnavailable {
        ticker: String,
        phase: Phase,
        stock: Option<StockMetrics>,
        iv: Option<IvMetrics>,
        error: String,
    },
    Phase1Failed {
        ticker: String,
        stock: StockMetrics,
    },
    Phase2Failed {
        ticker: String,
        stock: StockMetrics,
        iv: IvMetrics,
    },
    Phase3Failed {
        ticker: String,
        stock: StockMetrics,
        iv: IvMetrics,
        reason: String,
    },
    Qualified {
        ticker: String,
        stock: StockMetrics,
        iv: IvMetrics,
        put: SelectedPut,
        score: CompositeScore,
        portfolio: PortfolioCheck,
    },
}

impl ScanProgress {
    pub fn ticker(&self) -> &str {
        match self {
            ScanProgress::DataUnavailable { ticker, .. }
            | ScanProgress::Phase1Failed { ticker, .. }
            | ScanProgress::Phase2Failed { ticker, .. }
            | ScanProgress::Phase3Failed { ticker, .. }
            | ScanProgress::Qualified { ticker, .. } => ticker,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            ScanProgress::DataUnavailable { .. } => "data_unavailable",
            ScanProgress::Phase1Failed { .. } => "phase1_failed",
            ScanProgress::Phase2Failed { .. } => "phase2_failed",
            ScanProgress::Phase3Failed { .. } => "phase3_failed",
            ScanProgress::Qualified { .. } => "qualified",
        }
    }

    /// Phases 1-3 all passed
    pub fn passed(&self) -> bool {
        matches!(self, ScanProgress::Qualified { .. })
    }

    pub fn composite(&self) -> Option<f64> {
        match self {
            ScanProgress::Qualified { score, .. } => Some(score.composite),
            _ => None,
        }
    }

    /// Run ordering: passed first, then composite descending, then ticker.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .passed()
            .cmp(&self.passed())
            .then_with(|| match (self.composite(), other.composite()) {
                (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.ticker().cmp(other.ticker()))
    }

    /// Flatten into the persisted row; phases never reached stay NULL.
    pub fn to_row(&self, owner: &OwnerId, scan_date: &str) -> ScanResultRow {
        let mut row = ScanResultRow {
            owner: owner.to_string(),
            ticker: self.ticker().to_string(),
            scan_date: scan_date.to_string(),
            stage: self.stage().to_string(),
            passed: self.passed(),
            ..Default::default()
        };

        match self {
            ScanProgress::DataUnavailable {
                phase,
                stock,
                iv,
                error,
                ..
            } => {
                let reason = format!("data unavailable: {}", error);
                row.data_error = Some(error.clone());
                match phase {
                    Phase::StockFilter => {
                        if let Some(stock) = stock {
                            row.price = Some(stock.price);
                        }
                        row.phase1_reason = Some(reason);
                    }
                    Phase::IvScreen => {
                        if let Some(stock) = stock {
                            fill_stock(&mut row, stock, true);
                        }
                        row.phase2_passed = Some(false);
                        row.phase2_reason = Some(reason);
                    }
                    Phase::OptionSelection => {
                        if let Some(stock) = stock {
                            fill_stock(&mut row, stock, true);
                        }
                        if let Some(iv) = iv {
                            fill_iv(&mut row, iv, true);
                        }
                        row.phase3_passed = Some(false);
                        row.phase3_reason = Some(reason);
                    }
                }
            }
            ScanProgress::Phase1Failed { stock, .. } => {
                fill_stock(&mut row, stock, false);
            }
            ScanProgress::Phase2Failed { stock, iv, .. } => {
                fill_stock(&mut row, stock, true);
                fill_iv(&mut row, iv, false);
            }
            ScanProgress::Phase3Failed { stock, iv, reason, .. } => {
                fill_stock(&mut row, stock, true);
                fill_iv(&mut row, iv, true);
                row.phase3_passed = Some(false);
                row.phase3_reason = Some(reason.clone());
            }
            ScanProgress::Qualified {
                stock,
                iv,
                put,
                score,
                portfolio,
                ..
            } => {
                fill_stock(&mut row, stock, true);
                fill_iv(&mut row, iv, true);

                row.contract = Some(put.put.contract.clone());
                row.strike = Some(put.put.strike);
                row.expiration = Some(put.put.expiration.to_string());
                row.dte = Some(put.put.dte);
                row.delta = Some(put.put.delta);
                row.theta = put.put.theta;
                row.bid = Some(put.put.bid);
                row.option_volume = Some(put.put.volume);
                row.open_interest = Some(put.put.open_interest);
                row.annualized_yield = Some(put.annualized_yield);
                row.phase3_passed = Some(true);
                row.phase3_reason = Some(put.reason.clone());

                row.yield_score = Some(score.yield_score);
                row.iv_rank_score = Some(score.iv_rank_score);
                row.delta_score = Some(score.delta_score);
                row.liquidity_score = Some(score.liquidity_score);
                row.trend_score = Some(score.trend_score);
                row.composite_score = Some(score.composite);

                row.has_open_position = portfolio.error.is_none().then_some(portfolio.exposure.is_some());
                row.position_note = portfolio.note();
            }
        }

        row
    }
}

fn fill_stock(row: &mut ScanResultRow, stock: &StockMetrics, passed: bool) {
    row.price = Some(stock.price);
    row.avg_volume = stock.avg_volume;
    row.sma_50 = stock.sma_50;
    row.sma_200 = stock.sma_200;
    row.sma_200_prior = stock.sma_200_prior;
    row.phase1_passed = passed;
    row.phase1_reason = Some(stock.reason.clone());
}

fn fill_iv(row: &mut ScanResultRow, iv: &IvMetrics, passed: bool) {
    row.current_iv = Some(iv.current_iv);
    row.iv_rank = iv.iv_rank;
    row.phase2_passed = Some(passed);
    row.phase2_reason = Some(iv.reason.clone());
}
