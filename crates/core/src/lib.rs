pub mod amount;
pub mod category;
pub mod insight;
pub mod period;

pub use amount::{Amount, AmountParseError};
pub use category::{CategoryRule, CategoryTable, CategoryTableError, DEFAULT_FALLBACK_CATEGORY};
pub use insight::{Insight, InsightError, InsightKind, SpendingInsights, TransactionKind, TransactionRecord};
pub use period::{DateRange, InvertedRangeError};
