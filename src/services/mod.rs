pub mod payment;
pub mod mail;
pub mod templates;
pub mod notifier;
pub mod checkout;
pub mod reconcile;
pub mod settlement;
