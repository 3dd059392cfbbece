use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Cents;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BonusType {
    Welcome,
    Deposit,
    Jackpot,
    Referral,
    Other,
}

impl BonusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BonusType::Welcome => "welcome",
            BonusType::Deposit => "deposit",
            BonusType::Jackpot => "jackpot",
            BonusType::Referral => "referral",
            BonusType::Other => "other",
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bonus {
    pub id: String,
    pub name: String,
    /// Zero for bonuses that carry no balance credit.
    pub amount: Cents,
    pub bonus_type: BonusType,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBonus {
    /// Bonuses are addressed by stable ids such as `welcome_bonus`.
    pub id: String,
    pub name: String,
    pub amount: Cents,
    pub bonus_type: BonusType,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserBonuses {
    pub user_id: String,
    pub available_bonuses: Vec<String>,
    pub claimed_bonuses: Vec<String>,
    pub total_bonus_earned: Cents,
    pub referral_code: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl UserBonuses {
    pub fn has_claimed(&self, bonus_id: &str) -> bool {
        self.claimed_bonuses.iter().any(|id| id == bonus_id)
    }
}

const REFERRAL_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const REFERRAL_CODE_LENGTH: usize = 8;

pub fn generate_referral_code() -> String {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    (0..REFERRAL_CODE_LENGTH)
        .map(|_| REFERRAL_ALPHABET[rng.gen_range(0..REFERRAL_ALPHABET.len())] as char)
        .collect()
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BonusClaim {
    pub bonus: Bonus,
    pub amount: Cents,
    /// Absent for bonuses without a balance credit.
    pub new_balance: Option<Cents>,
}
