// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;
pub use infrastructure::redis;
pub use infrastructure::telemetry;

// Domain layer
pub mod domain;

pub use domain::message;
pub use domain::store;

// Application layer
pub mod chat;
pub mod outbox;

pub use outbox::Outbox;
