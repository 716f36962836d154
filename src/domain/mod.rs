//! Domain entities.
//! Framework-agnostic representation of the money-movement records the engine owns.

use thiserror::Error;

/// A stored enum value that does not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a fieldless enum persisted and serialized as a fixed string.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::domain::UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::domain::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub mod actor;
pub mod audit;
pub mod bank_account;
pub mod compliance;
pub mod escrow;
pub mod events;
pub mod investment;
pub mod metadata;
pub mod provider_event;
pub mod transaction;
pub mod webhook;

pub use actor::{Actor, ActorRole};
pub use audit::AuditEntry;
pub use bank_account::{BankAccount, VerificationStatus};
pub use compliance::{CheckSeverity, CheckType, ComplianceCheck, ComplianceReport};
pub use escrow::{EntryDirection, EscrowAccount, EscrowEntry};
pub use events::{TransactionEvent, TransactionSnapshot};
pub use investment::{Investment, InvestmentStatus};
pub use metadata::{AuditNote, ProviderRefs, TransactionMetadata};
pub use provider_event::{ProviderEvent, ProviderEventError, TransferKind};
pub use transaction::{
    InvalidTransition, PaymentMethod, Transaction, TransactionDraft, TransactionStatus,
    TransactionType,
};
pub use webhook::{WebhookEvent, WebhookStatus};
