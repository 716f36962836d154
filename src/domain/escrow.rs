use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    pub enum EntryDirection {
        Credit => "CREDIT",
        Debit => "DEBIT",
    }
}

/// Per-offering holding balance. The balance is a cached projection of the
/// account's entries and only changes through the escrow ledger service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowAccount {
    pub id: Uuid,
    pub offering_id: Uuid,
    balance: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowAccount {
    pub(crate) fn open(offering_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            offering_id,
            balance: BigDecimal::from(0),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rehydrates a stored row.
    pub(crate) fn from_parts(
        id: Uuid,
        offering_id: Uuid,
        balance: BigDecimal,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            offering_id,
            balance,
            created_at,
            updated_at,
        }
    }

    pub fn balance(&self) -> &BigDecimal {
        &self.balance
    }

    pub(crate) fn apply(&mut self, direction: EntryDirection, amount: &BigDecimal, now: DateTime<Utc>) {
        self.balance = match direction {
            EntryDirection::Credit => self.balance.clone() + amount.clone(),
            EntryDirection::Debit => self.balance.clone() - amount.clone(),
        };
        self.updated_at = now;
    }
}

/// One applied movement. `(escrow_account_id, transaction_id, direction)` is unique
/// and doubles as the "already applied" marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowEntry {
    pub id: Uuid,
    pub escrow_account_id: Uuid,
    pub transaction_id: Uuid,
    pub direction: EntryDirection,
    pub amount: BigDecimal,
    pub created_at: DateTime<Utc>,
}

impl EscrowEntry {
    pub fn new(
        escrow_account_id: Uuid,
        transaction_id: Uuid,
        direction: EntryDirection,
        amount: BigDecimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            escrow_account_id,
            transaction_id,
            direction,
            amount,
            created_at: now,
        }
    }

    pub fn signed_amount(&self) -> BigDecimal {
        match self.direction {
            EntryDirection::Credit => self.amount.clone(),
            EntryDirection::Debit => BigDecimal::from(0) - self.amount.clone(),
        }
    }
}
