mod settings;

pub use settings::{LoggingConfig, QueueSettings, RedisConfig, Settings};
