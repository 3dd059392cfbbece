pub mod bonuses;
pub mod packages;
pub mod payments;
pub mod surveys;
pub mod transactions;
pub mod users;
pub mod withdrawals;

/// Monetary amounts are kept in minor units (cents) everywhere.
pub type Cents = i64;

pub const CENTS_PER_UNIT: Cents = 100;
