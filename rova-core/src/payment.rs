use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment session status. Completed and Failed are terminal: the store
/// refuses any transition out of them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PaymentStatus::Pending),
            "COMPLETED" => Some(PaymentStatus::Completed),
            "FAILED" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// Supported checkout routes on the hosted gateway
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    DomesticBank,
    Wallet,
}

impl PaymentMethod {
    /// Preselection hint forwarded to the gateway
    pub fn gateway_code(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "CARD",
            PaymentMethod::DomesticBank => "BANK",
            PaymentMethod::Wallet => "WALLET",
        }
    }
}

/// One attempt to settle a reservation's price through the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub order_id: String,
    pub reservation_id: Uuid,
    pub amount_minor: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub gateway_txn_ref: Option<String>,
    pub gateway_response_code: Option<String>,
    pub bank_code: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PaymentSession {
    pub fn new(order_id: String, reservation_id: Uuid, amount_minor: i64, method: PaymentMethod) -> Self {
        Self {
            order_id,
            reservation_id,
            amount_minor,
            method,
            status: PaymentStatus::Pending,
            gateway_txn_ref: None,
            gateway_response_code: None,
            bank_code: None,
            settled_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// The full set of fields the reconciler stamps onto a session when it
/// reaches a terminal state. Applied by the store as one guarded write.
#[derive(Debug, Clone)]
pub struct SettlementUpdate {
    pub status: PaymentStatus,
    pub gateway_txn_ref: Option<String>,
    pub gateway_response_code: Option<String>,
    pub bank_code: Option<String>,
    pub settled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }

    #[test]
    fn test_session_serialization() {
        let session = PaymentSession::new(
            "20240101120000123456".to_string(),
            Uuid::new_v4(),
            200000,
            PaymentMethod::Card,
        );
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["method"], "CARD");
        assert_eq!(json["amount_minor"], 200000);
    }
}
