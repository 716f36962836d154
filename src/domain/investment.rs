use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    pub enum InvestmentStatus {
        Pending => "PENDING",
        Confirmed => "CONFIRMED",
        Cancelled => "CANCELLED",
    }
}

/// A user's commitment to an offering, confirmed once the funding deposit settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Investment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub offering_id: Uuid,
    pub amount: BigDecimal,
    pub status: InvestmentStatus,
    pub transaction_id: Option<Uuid>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Investment {
    pub fn pending(user_id: Uuid, offering_id: Uuid, amount: BigDecimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            offering_id,
            amount,
            status: InvestmentStatus::Pending,
            transaction_id: None,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn confirm(&mut self, transaction_id: Uuid, now: DateTime<Utc>) {
        self.status = InvestmentStatus::Confirmed;
        self.transaction_id = Some(transaction_id);
        self.confirmed_at = Some(now);
        self.updated_at = now;
    }
}
