//! Opens hosted-checkout sessions against the payment gateway.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use rova_core::{
    PaymentMethod, PaymentSession, PaymentSessionStore, Reservation, ReservationStatus,
    ReservationStore, StoreError,
};
use url::Url;
use uuid::Uuid;

use crate::signature::{self, SignatureCodec};

/// Gateway protocol revision sent with every request
const PROTOCOL_VERSION: &str = "2.1.0";

/// Collision retries on order id generation before giving up
const ORDER_ID_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("reservation not found: {0}")]
    ReservationNotFound(Uuid),

    #[error("reservation {id} is not payable from status {status}")]
    NotPayable { id: Uuid, status: String },

    #[error("payment session not found: {0}")]
    SessionNotFound(String),

    #[error("gateway endpoint is not a valid url: {0}")]
    GatewayUrl(#[from] url::ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Merchant-side gateway settings, loaded once at startup
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub merchant_code: String,
    pub pay_url: String,
    pub return_url: String,
    pub currency: String,
    pub locale: String,
}

/// Outcome of opening a checkout session: where to send the customer
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutRedirect {
    pub order_id: String,
    pub redirect_url: String,
}

/// Builds signed checkout redirects and answers session status reads.
///
/// The charge amount is always taken from the stored reservation, never
/// from the caller, so a tampered client cannot choose what it pays.
pub struct PaymentSessionManager {
    reservations: Arc<dyn ReservationStore>,
    sessions: Arc<dyn PaymentSessionStore>,
    codec: Arc<SignatureCodec>,
    config: GatewayConfig,
}

impl PaymentSessionManager {
    pub fn new(
        reservations: Arc<dyn ReservationStore>,
        sessions: Arc<dyn PaymentSessionStore>,
        codec: Arc<SignatureCodec>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            reservations,
            sessions,
            codec,
            config,
        }
    }

    /// Open a payment session for a pending reservation and return the
    /// signed gateway redirect.
    pub async fn open(
        &self,
        reservation_id: Uuid,
        method: PaymentMethod,
        client_ip: &str,
    ) -> Result<CheckoutRedirect, PaymentError> {
        // 1. The reservation must exist and still be awaiting payment
        let reservation = self
            .reservations
            .get_reservation(reservation_id)
            .await?
            .ok_or(PaymentError::ReservationNotFound(reservation_id))?;

        if reservation.status != ReservationStatus::Pending {
            return Err(PaymentError::NotPayable {
                id: reservation_id,
                status: reservation.status.as_str().to_string(),
            });
        }

        // 2. Persist the session under a fresh order id. The store enforces
        //    order id uniqueness; a collision just means we roll again.
        let now = Utc::now();
        let mut session = PaymentSession::new(
            generate_order_id(now),
            reservation_id,
            reservation.final_price_minor,
            method,
        );
        let mut attempt = 1;
        loop {
            match self.sessions.insert_session(&session).await {
                Ok(()) => break,
                Err(StoreError::DuplicateOrderId(_)) if attempt < ORDER_ID_ATTEMPTS => {
                    attempt += 1;
                    session.order_id = generate_order_id(Utc::now());
                }
                Err(e) => return Err(e.into()),
            }
        }

        // 3. Assemble and sign the gateway parameter set
        let params = self.build_gateway_params(&session, &reservation, client_ip, now);
        let sig = self.codec.sign(&params);

        let mut url = Url::parse(&self.config.pay_url)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &params {
                if value.is_empty() {
                    continue;
                }
                pairs.append_pair(name, value);
            }
            pairs.append_pair(signature::SIGNATURE_ALG_PARAM, signature::SIGNATURE_ALG);
            pairs.append_pair(signature::SIGNATURE_PARAM, &sig);
        }

        tracing::info!(
            order_id = %session.order_id,
            reservation_id = %reservation_id,
            amount_minor = session.amount_minor,
            method = method.gateway_code(),
            "Payment session opened"
        );

        Ok(CheckoutRedirect {
            order_id: session.order_id,
            redirect_url: url.to_string(),
        })
    }

    /// Current state of a session. A pure read: polling never mutates.
    pub async fn get_status(&self, order_id: &str) -> Result<PaymentSession, PaymentError> {
        self.sessions
            .get_by_order_id(order_id)
            .await?
            .ok_or_else(|| PaymentError::SessionNotFound(order_id.to_string()))
    }

    fn build_gateway_params(
        &self,
        session: &PaymentSession,
        reservation: &Reservation,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("pay_version".to_string(), PROTOCOL_VERSION.to_string()),
            (
                "pay_merchant".to_string(),
                self.config.merchant_code.clone(),
            ),
            ("pay_currency".to_string(), self.config.currency.clone()),
            ("pay_txn_ref".to_string(), session.order_id.clone()),
            // Gateway wire format carries the amount multiplied by 100
            (
                "pay_amount".to_string(),
                (session.amount_minor * 100).to_string(),
            ),
            ("pay_locale".to_string(), self.config.locale.clone()),
            (
                "pay_order_info".to_string(),
                format!(
                    "Car rental {} for reservation {}",
                    session.order_id, reservation.id
                ),
            ),
            ("pay_method".to_string(), session.method.gateway_code().to_string()),
            ("pay_ip_addr".to_string(), client_ip.to_string()),
            (
                "pay_create_date".to_string(),
                now.format("%Y%m%d%H%M%S").to_string(),
            ),
            (
                "pay_return_url".to_string(),
                self.config.return_url.clone(),
            ),
        ])
    }
}

/// Order ids are a UTC second timestamp plus six random digits, unique
/// enough for human-readable references while the store guards against
/// the rare collision.
fn generate_order_id(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{}{:06}", now.format("%Y%m%d%H%M%S"), suffix)
}
