use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amount::Amount;
use crate::period::DateRange;

/// Share of the top category that a user is nudged to cut.
const SUGGESTED_REDUCTION_PERCENT: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Expense,
    Income,
}

/// The minimal view of a ledger transaction the insight generator needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub category: String,
    pub amount: Amount,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    SpendingPattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub title: String,
    pub description: String,
    pub actionable: bool,
    pub suggestion: String,
    pub category: String,
    pub amount: Amount,
    /// Percentage of total expenses, one decimal place.
    #[serde(with = "rust_decimal::serde::float")]
    pub share_percent: Decimal,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InsightError {
    #[error("Expense totals for '{0}' exceed the supported amount range")]
    TotalOverflow(String),
}

/// Summaries over a user's transaction history.
pub struct SpendingInsights;

impl SpendingInsights {
    /// All insights for the transactions that fall inside `range` (or all of
    /// them when `range` is `None`). An empty history yields no insights.
    pub fn generate(
        transactions: &[TransactionRecord],
        range: Option<DateRange>,
    ) -> Result<Vec<Insight>, InsightError> {
        let in_range: Vec<&TransactionRecord> = transactions
            .iter()
            .filter(|tx| range.map_or(true, |r| r.contains(tx.date)))
            .collect();

        Ok([Self::spending_pattern(&in_range)?].into_iter().flatten().collect())
    }

    /// Top expense category by total, with its share of all expenses.
    fn spending_pattern(transactions: &[&TransactionRecord]) -> Result<Option<Insight>, InsightError> {
        let mut by_category: BTreeMap<&str, Amount> = BTreeMap::new();
        let mut total = Amount::zero();
        for tx in transactions.iter().filter(|tx| tx.kind == TransactionKind::Expense) {
            let overflow = || InsightError::TotalOverflow(tx.category.clone());
            let entry = by_category.entry(tx.category.as_str()).or_insert_with(Amount::zero);
            *entry = entry.checked_add(tx.amount).ok_or_else(overflow)?;
            total = total.checked_add(tx.amount).ok_or_else(overflow)?;
        }

        if total.as_decimal() <= Decimal::ZERO {
            return Ok(None);
        }

        // BTreeMap iterates alphabetically; keep the first of equal totals.
        let Some((top_category, top_amount)) = by_category
            .iter()
            .fold(None::<(&str, Amount)>, |best, (cat, amt)| match best {
                Some((_, best_amt)) if best_amt >= *amt => best,
                _ => Some((*cat, *amt)),
            })
        else {
            return Ok(None);
        };

        // Refunds booked as negative expenses can push the ratio out of range.
        let share = top_amount
            .as_decimal()
            .checked_div(total.as_decimal())
            .and_then(|ratio| ratio.checked_mul(Decimal::from(100)))
            .ok_or_else(|| InsightError::TotalOverflow(top_category.to_string()))?
            .round_dp(1);
        let saving = Amount::from_decimal(
            top_amount.as_decimal() * Decimal::new(SUGGESTED_REDUCTION_PERCENT, 2),
        );

        Ok(Some(Insight {
            kind: InsightKind::SpendingPattern,
            title: "Top Spending Category".to_string(),
            description: format!(
                "You spent {top_amount} on {top_category}, representing {share:.1}% of total expenses."
            ),
            actionable: true,
            suggestion: format!(
                "Consider reducing {top_category} spending by 10-{SUGGESTED_REDUCTION_PERCENT}% to save {saving} over a comparable period."
            ),
            category: top_category.to_string(),
            amount: top_amount,
            share_percent: share,
        }))
    }
}
