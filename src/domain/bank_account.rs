use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    pub enum VerificationStatus {
        Verified => "VERIFIED",
        Pending => "PENDING",
        ReverificationRequired => "REVERIFICATION_REQUIRED",
    }
}

/// A linked external bank account. Owned by the account-linking flow; the engine
/// only flips its verification status when the aggregator reports a broken link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub external_item_id: String,
    pub verification_status: VerificationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BankAccount {
    pub fn new(user_id: Uuid, external_item_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            external_item_id: external_item_id.into(),
            verification_status: VerificationStatus::Verified,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns false when the account was already flagged.
    pub fn require_reverification(&mut self, now: DateTime<Utc>) -> bool {
        if self.verification_status == VerificationStatus::ReverificationRequired {
            return false;
        }
        self.verification_status = VerificationStatus::ReverificationRequired;
        self.updated_at = now;
        true
    }
}
