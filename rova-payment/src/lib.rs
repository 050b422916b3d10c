pub mod notify;
pub mod session;
pub mod settlement;
pub mod signature;

pub use notify::{LogMailTransport, MailTransport, NotificationDispatcher, TransportError};
pub use session::{CheckoutRedirect, GatewayConfig, PaymentError, PaymentSessionManager};
pub use settlement::{ReconciliationResult, SettlementError, SettlementReconciler};
pub use signature::{SignatureCodec, SignatureError};
