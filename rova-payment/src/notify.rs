//! Confirmation mail dispatch.
//!
//! Delivery is best-effort: failures are retried a bounded number of
//! times and then dropped with an error log. Nothing here ever feeds
//! back into reservation or payment state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rova_core::{PaymentSession, Reservation};
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error("mail transport failure: {0}")]
pub struct TransportError(pub String);

/// Outbound mail seam. The default wiring uses [`LogMailTransport`];
/// deployments swap in a real SMTP or provider-backed implementation.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str)
        -> Result<(), TransportError>;
}

/// Transport that records deliveries in the log stream and always
/// succeeds. Serves local development and test environments.
pub struct LogMailTransport;

#[async_trait]
impl MailTransport for LogMailTransport {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        _body: &str,
    ) -> Result<(), TransportError> {
        info!(recipient = %recipient, subject = %subject, "Mail delivered via log transport");
        Ok(())
    }
}

/// Sends booking confirmation mail with a bounded fixed-delay retry loop:
/// one initial attempt plus `max_retries` further tries.
pub struct NotificationDispatcher {
    transport: Arc<dyn MailTransport>,
    from_address: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        from_address: String,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            transport,
            from_address,
            max_retries,
            retry_delay,
        }
    }

    /// Deliver the confirmation for a settled booking. Returns whether any
    /// attempt succeeded; callers do not act on the answer beyond logging.
    pub async fn send_confirmation(
        &self,
        recipient: &str,
        reservation: &Reservation,
        session: &PaymentSession,
    ) -> bool {
        let subject = format!("Booking confirmed: order {}", session.order_id);
        let body = format!(
            "From: {}\n\nYour booking is confirmed.\n\nOrder: {}\nCar: {}\nPickup: {}\nReturn: {}\nAmount paid: {} (minor units)\n",
            self.from_address,
            session.order_id,
            reservation.car_id,
            reservation.start_time.to_rfc3339(),
            reservation.end_time.to_rfc3339(),
            session.amount_minor,
        );

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.transport.send(recipient, &subject, &body).await {
                Ok(()) => {
                    info!(
                        order_id = %session.order_id,
                        recipient = %recipient,
                        attempt,
                        "Confirmation mail sent"
                    );
                    return true;
                }
                Err(e) if attempt <= self.max_retries => {
                    warn!(
                        order_id = %session.order_id,
                        attempt,
                        error = %e,
                        "Confirmation mail failed, retrying"
                    );
                    sleep(self.retry_delay).await;
                }
                Err(e) => {
                    error!(
                        order_id = %session.order_id,
                        recipient = %recipient,
                        attempts = attempt,
                        error = %e,
                        "Confirmation mail abandoned after final retry"
                    );
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rova_core::PaymentMethod;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{advance, pause};
    use uuid::Uuid;

    /// Fails the first `failures` sends, then succeeds.
    struct FlakyTransport {
        attempts: AtomicUsize,
        failures: usize,
    }

    impl FlakyTransport {
        fn new(failures: usize) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                failures,
            }
        }
    }

    #[async_trait]
    impl MailTransport for FlakyTransport {
        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), TransportError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(TransportError("smtp connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn fixtures() -> (Reservation, PaymentSession) {
        let start = chrono::Utc::now();
        let reservation = Reservation::new(
            Uuid::new_v4(),
            start,
            start + chrono::Duration::days(2),
            200_000,
            200_000,
            0,
            "renter@example.com".to_string(),
        );
        let session = PaymentSession::new(
            "20240101120000123456".to_string(),
            reservation.id,
            200_000,
            PaymentMethod::Card,
        );
        (reservation, session)
    }

    fn dispatcher(transport: Arc<dyn MailTransport>, max_retries: u32) -> NotificationDispatcher {
        NotificationDispatcher::new(
            transport,
            "bookings@rova.example".to_string(),
            max_retries,
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_first_attempt_success_sends_once() {
        let transport = Arc::new(FlakyTransport::new(0));
        let d = dispatcher(transport.clone(), 3);
        let (reservation, session) = fixtures();

        assert!(d.send_confirmation("renter@example.com", &reservation, &session).await);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        pause();
        let transport = Arc::new(FlakyTransport::new(2));
        let d = dispatcher(transport.clone(), 3);
        let (reservation, session) = fixtures();

        let advancer = tokio::spawn(async {
            advance(Duration::from_secs(2)).await;
            advance(Duration::from_secs(2)).await;
        });

        assert!(d.send_confirmation("renter@example.com", &reservation, &session).await);
        advancer.await.unwrap();
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_attempts() {
        pause();
        let transport = Arc::new(FlakyTransport::new(usize::MAX));
        let d = dispatcher(transport.clone(), 3);
        let (reservation, session) = fixtures();

        let advancer = tokio::spawn(async {
            advance(Duration::from_secs(2)).await;
            advance(Duration::from_secs(2)).await;
            advance(Duration::from_secs(2)).await;
        });

        assert!(!d.send_confirmation("renter@example.com", &reservation, &session).await);
        advancer.await.unwrap();
        // one initial attempt plus three retries
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_log_transport_always_delivers() {
        let d = dispatcher(Arc::new(LogMailTransport), 0);
        let (reservation, session) = fixtures();
        assert!(d.send_confirmation("renter@example.com", &reservation, &session).await);
    }
}
