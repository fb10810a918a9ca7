pub mod health;
pub mod messages;
pub mod metrics;
pub mod progress;
pub mod sagas;
