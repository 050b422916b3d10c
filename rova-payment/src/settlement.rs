//! Settles payment sessions from signed gateway callbacks.
//!
//! The session record is the authority on payment outcome. Reservation
//! confirmation is a follow-up write; when it cannot happen (crash,
//! store error) the reconciliation sweep re-applies it from the session
//! table, so a settled payment is never lost.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rova_core::{
    PaymentSession, PaymentSessionStore, PaymentStatus, ReservationStatus, ReservationStore,
    SettlementUpdate, StoreError,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::notify::NotificationDispatcher;
use crate::signature::{self, SignatureCodec, SignatureError};

/// Gateway response code meaning the charge went through
pub const SUCCESS_RESPONSE_CODE: &str = "00";

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("callback rejected: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("callback names an unknown order: {0}")]
    SessionNotFound(String),

    #[error("callback is missing required field {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a processed callback amounted to
#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    pub order_id: String,
    pub reservation_id: Uuid,
    pub status: PaymentStatus,
    pub response_code: Option<String>,
    /// True when the session was already terminal and this callback was
    /// acknowledged without touching anything.
    pub replayed: bool,
}

/// Applies gateway callbacks to sessions and reservations.
pub struct SettlementReconciler {
    sessions: Arc<dyn PaymentSessionStore>,
    reservations: Arc<dyn ReservationStore>,
    codec: Arc<SignatureCodec>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl SettlementReconciler {
    pub fn new(
        sessions: Arc<dyn PaymentSessionStore>,
        reservations: Arc<dyn ReservationStore>,
        codec: Arc<SignatureCodec>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            sessions,
            reservations,
            codec,
            dispatcher,
        }
    }

    /// Process one gateway callback. Safe to call any number of times with
    /// the same parameters: a terminal session is acknowledged as a replay
    /// and nothing is re-run, including the confirmation mail.
    pub async fn reconcile(
        &self,
        mut params: BTreeMap<String, String>,
    ) -> Result<ReconciliationResult, SettlementError> {
        // 1. Authenticate before trusting a single field
        let provided = signature::strip_signature(&mut params).ok_or(SignatureError::Missing)?;
        self.codec.verify(&params, &provided)?;

        // 2. Locate the session the gateway is talking about
        let order_id = params
            .get("pay_txn_ref")
            .ok_or(SettlementError::MissingField("pay_txn_ref"))?
            .clone();
        let session = self
            .sessions
            .get_by_order_id(&order_id)
            .await?
            .ok_or_else(|| SettlementError::SessionNotFound(order_id.clone()))?;

        // 3. Gateway retries land here: acknowledge, change nothing
        if session.is_terminal() {
            info!(order_id = %order_id, status = session.status.as_str(), "Replayed callback acknowledged");
            return Ok(replay_ack(session));
        }

        // 4. Map the response code onto a terminal state
        let response_code = params
            .get("pay_response_code")
            .ok_or(SettlementError::MissingField("pay_response_code"))?
            .clone();
        let new_status = if response_code == SUCCESS_RESPONSE_CODE {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Failed
        };

        // 5. Guarded transition; losing a race to a concurrent callback
        //    turns this call into a replay acknowledgement too
        let update = SettlementUpdate {
            status: new_status,
            gateway_txn_ref: params.get("pay_txn_no").cloned(),
            gateway_response_code: Some(response_code.clone()),
            bank_code: params.get("pay_bank_code").cloned(),
            settled_at: Utc::now(),
        };
        let settled = match self.sessions.settle(&order_id, update).await {
            Ok(session) => session,
            Err(StoreError::AlreadySettled(_)) => {
                let current = self
                    .sessions
                    .get_by_order_id(&order_id)
                    .await?
                    .ok_or_else(|| SettlementError::SessionNotFound(order_id.clone()))?;
                info!(order_id = %order_id, "Concurrent callback already settled this session");
                return Ok(replay_ack(current));
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            order_id = %order_id,
            reservation_id = %settled.reservation_id,
            status = settled.status.as_str(),
            response_code = %response_code,
            "Payment session settled"
        );

        // 6. A completed settlement confirms the booking and mails the
        //    customer; a declined one leaves the reservation pending so the
        //    customer can try again
        if settled.status == PaymentStatus::Completed {
            self.confirm_and_notify(&settled).await?;
        }

        Ok(ReconciliationResult {
            order_id,
            reservation_id: settled.reservation_id,
            status: settled.status,
            response_code: Some(response_code),
            replayed: false,
        })
    }

    /// Re-apply reservation confirmation for settled sessions whose booking
    /// write was lost. Returns how many reservations were repaired. Sends
    /// no mail: the original settlement already enqueued it.
    pub async fn repair_unreconciled(&self) -> Result<usize, SettlementError> {
        let orphaned = self.sessions.find_unreconciled().await?;
        let mut repaired = 0;
        for session in orphaned {
            match self
                .reservations
                .set_status(session.reservation_id, ReservationStatus::Confirmed)
                .await
            {
                Ok(()) => {
                    repaired += 1;
                    info!(
                        order_id = %session.order_id,
                        reservation_id = %session.reservation_id,
                        "Sweep confirmed reservation for settled session"
                    );
                }
                Err(e) => {
                    error!(
                        order_id = %session.order_id,
                        reservation_id = %session.reservation_id,
                        error = %e,
                        "Sweep failed to confirm reservation"
                    );
                }
            }
        }
        Ok(repaired)
    }

    async fn confirm_and_notify(&self, settled: &PaymentSession) -> Result<(), SettlementError> {
        let reservation = match self.reservations.get_reservation(settled.reservation_id).await {
            Ok(Some(reservation)) => reservation,
            Ok(None) => {
                error!(
                    order_id = %settled.order_id,
                    reservation_id = %settled.reservation_id,
                    "Settled session points at a missing reservation"
                );
                return Ok(());
            }
            Err(e) => {
                // Session state already committed; the sweep picks this up
                error!(
                    order_id = %settled.order_id,
                    error = %e,
                    "Reservation read failed after settlement, leaving repair to the sweep"
                );
                return Ok(());
            }
        };

        match reservation.status {
            ReservationStatus::Pending => {
                if let Err(e) = self
                    .reservations
                    .set_status(reservation.id, ReservationStatus::Confirmed)
                    .await
                {
                    error!(
                        order_id = %settled.order_id,
                        reservation_id = %reservation.id,
                        error = %e,
                        "Reservation confirmation failed, leaving repair to the sweep"
                    );
                }

                let dispatcher = self.dispatcher.clone();
                let session = settled.clone();
                tokio::spawn(async move {
                    let recipient = reservation.customer_email.clone();
                    dispatcher
                        .send_confirmation(&recipient, &reservation, &session)
                        .await;
                });
            }
            other => {
                // Payment landed on a reservation someone already moved on;
                // support has to sort the money out by hand
                warn!(
                    order_id = %settled.order_id,
                    reservation_id = %reservation.id,
                    status = other.as_str(),
                    "Settled payment for a reservation that is no longer pending"
                );
            }
        }
        Ok(())
    }
}

fn replay_ack(session: PaymentSession) -> ReconciliationResult {
    ReconciliationResult {
        order_id: session.order_id.clone(),
        reservation_id: session.reservation_id,
        status: session.status,
        response_code: session.gateway_response_code.clone(),
        replayed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{MailTransport, TransportError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rova_core::{Car, CarStore, PaymentMethod, Reservation, ReservationStore};
    use rova_store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingTransport {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl MailTransport for CountingTransport {
        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), TransportError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const SECRET: &str = "merchant-secret";
    const ORDER_ID: &str = "20240301100000654321";

    async fn harness() -> (
        SettlementReconciler,
        Arc<MemoryStore>,
        Arc<CountingTransport>,
        PaymentSession,
    ) {
        let store = Arc::new(MemoryStore::new());
        let car = Car::new("Test Sedan".to_string(), "51H-123.45".to_string(), 100_000, 0);
        store.insert_car(&car).await.unwrap();

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 3, 9, 0, 0).unwrap();
        let reservation = Reservation::new(
            car.id,
            start,
            end,
            200_000,
            200_000,
            0,
            "renter@example.com".to_string(),
        );
        store.insert_if_available(&reservation).await.unwrap();

        let session = PaymentSession::new(
            ORDER_ID.to_string(),
            reservation.id,
            200_000,
            PaymentMethod::Card,
        );
        store.insert_session(&session).await.unwrap();

        let transport = Arc::new(CountingTransport {
            sent: AtomicUsize::new(0),
        });
        let dispatcher = Arc::new(NotificationDispatcher::new(
            transport.clone(),
            "bookings@rova.example".to_string(),
            0,
            Duration::from_millis(1),
        ));
        let reconciler = SettlementReconciler::new(
            store.clone(),
            store.clone(),
            Arc::new(SignatureCodec::new(SECRET)),
            dispatcher,
        );
        (reconciler, store, transport, session)
    }

    /// Builds callback parameters the way the gateway would: signed over
    /// the canonical set, with the signature fields appended afterwards.
    fn signed_callback(order_id: &str, response_code: &str) -> BTreeMap<String, String> {
        let codec = SignatureCodec::new(SECRET);
        let mut params = BTreeMap::from([
            ("pay_txn_ref".to_string(), order_id.to_string()),
            ("pay_response_code".to_string(), response_code.to_string()),
            ("pay_txn_no".to_string(), "GW12345678".to_string()),
            ("pay_bank_code".to_string(), "NCB".to_string()),
            ("pay_amount".to_string(), "20000000".to_string()),
            ("pay_pay_date".to_string(), "20240301120000".to_string()),
        ]);
        let sig = codec.sign(&params);
        params.insert(
            signature::SIGNATURE_ALG_PARAM.to_string(),
            signature::SIGNATURE_ALG.to_string(),
        );
        params.insert(signature::SIGNATURE_PARAM.to_string(), sig);
        params
    }

    async fn drain_spawned_tasks() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_success_callback_completes_session_and_confirms_reservation() {
        let (reconciler, store, transport, session) = harness().await;

        let result = reconciler
            .reconcile(signed_callback(ORDER_ID, "00"))
            .await
            .unwrap();

        assert_eq!(result.status, PaymentStatus::Completed);
        assert!(!result.replayed);
        assert_eq!(result.response_code.as_deref(), Some("00"));

        let settled = store.get_by_order_id(ORDER_ID).await.unwrap().unwrap();
        assert_eq!(settled.status, PaymentStatus::Completed);
        assert_eq!(settled.gateway_txn_ref.as_deref(), Some("GW12345678"));
        assert_eq!(settled.bank_code.as_deref(), Some("NCB"));
        assert!(settled.settled_at.is_some());

        let reservation = store
            .get_reservation(session.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reservation.status, ReservationStatus::Confirmed);

        drain_spawned_tasks().await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_declined_callback_fails_session_and_keeps_reservation_pending() {
        let (reconciler, store, transport, session) = harness().await;

        let result = reconciler
            .reconcile(signed_callback(ORDER_ID, "24"))
            .await
            .unwrap();

        assert_eq!(result.status, PaymentStatus::Failed);
        assert_eq!(result.response_code.as_deref(), Some("24"));

        let reservation = store
            .get_reservation(session.reservation_id)
            .await
            .unwrap()
            .unwrap();
        // A declined charge never burns the booking
        assert_eq!(reservation.status, ReservationStatus::Pending);

        drain_spawned_tasks().await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_callback_acks_without_second_notification() {
        let (reconciler, store, transport, _) = harness().await;

        let first = reconciler
            .reconcile(signed_callback(ORDER_ID, "00"))
            .await
            .unwrap();
        let second = reconciler
            .reconcile(signed_callback(ORDER_ID, "00"))
            .await
            .unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(second.status, PaymentStatus::Completed);

        let settled = store.get_by_order_id(ORDER_ID).await.unwrap().unwrap();
        assert_eq!(settled.gateway_txn_ref.as_deref(), Some("GW12345678"));

        drain_spawned_tasks().await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_late_success_never_resurrects_a_failed_session() {
        let (reconciler, store, transport, session) = harness().await;

        reconciler
            .reconcile(signed_callback(ORDER_ID, "24"))
            .await
            .unwrap();
        let late = reconciler
            .reconcile(signed_callback(ORDER_ID, "00"))
            .await
            .unwrap();

        assert!(late.replayed);
        assert_eq!(late.status, PaymentStatus::Failed);

        let reservation = store
            .get_reservation(session.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reservation.status, ReservationStatus::Pending);

        drain_spawned_tasks().await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tampered_params_rejected_without_mutation() {
        let (reconciler, store, transport, _) = harness().await;

        let mut params = signed_callback(ORDER_ID, "24");
        // Attacker upgrades the outcome but cannot re-sign it
        params.insert("pay_response_code".to_string(), "00".to_string());

        let err = reconciler.reconcile(params).await.unwrap_err();
        assert!(matches!(
            err,
            SettlementError::InvalidSignature(SignatureError::Mismatch)
        ));

        let session = store.get_by_order_id(ORDER_ID).await.unwrap().unwrap();
        assert_eq!(session.status, PaymentStatus::Pending);

        drain_spawned_tasks().await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsigned_callback_rejected() {
        let (reconciler, _, _, _) = harness().await;

        let mut params = signed_callback(ORDER_ID, "00");
        signature::strip_signature(&mut params);

        let err = reconciler.reconcile(params).await.unwrap_err();
        assert!(matches!(
            err,
            SettlementError::InvalidSignature(SignatureError::Missing)
        ));
    }

    #[tokio::test]
    async fn test_unknown_order_rejected() {
        let (reconciler, _, _, _) = harness().await;

        let err = reconciler
            .reconcile(signed_callback("19990101000000000000", "00"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_sweep_repairs_confirmations_lost_after_settlement() {
        let (reconciler, store, transport, session) = harness().await;

        // Simulate a crash after the session settled but before the
        // reservation confirmation landed
        store
            .settle(
                ORDER_ID,
                SettlementUpdate {
                    status: PaymentStatus::Completed,
                    gateway_txn_ref: Some("GW12345678".to_string()),
                    gateway_response_code: Some("00".to_string()),
                    bank_code: None,
                    settled_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let repaired = reconciler.repair_unreconciled().await.unwrap();
        assert_eq!(repaired, 1);

        let reservation = store
            .get_reservation(session.reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reservation.status, ReservationStatus::Confirmed);

        // Idempotent: a second pass finds nothing to do and sends no mail
        assert_eq!(reconciler.repair_unreconciled().await.unwrap(), 0);
        drain_spawned_tasks().await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
    }
}
