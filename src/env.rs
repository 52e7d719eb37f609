/// Environment variable names used by this crate for convenient
/// configuration of the MongoDB target from microservices.
///
/// These are purely helpers; [`crate::config::MongoTargetConfig`] remains
/// usable without any environment access.

/// MongoDB connection string, e.g. `mongodb://127.0.0.1:27017`.
pub const LOG_SINK_MONGO_URL_ENV: &str = "LOG_SINK_MONGO_URL";

/// Database holding the log collection.
pub const LOG_SINK_MONGO_DB_ENV: &str = "LOG_SINK_MONGO_DB";

/// Log collection name.
pub const LOG_SINK_MONGO_COLLECTION_ENV: &str = "LOG_SINK_MONGO_COLLECTION";

/// `true`/`false`: create the collection capped.
pub const LOG_SINK_MONGO_CAPPED_ENV: &str = "LOG_SINK_MONGO_CAPPED";

/// Capped collection size in bytes.
pub const LOG_SINK_MONGO_CAPPED_SIZE_ENV: &str = "LOG_SINK_MONGO_CAPPED_SIZE";

/// Capped collection maximum document count.
pub const LOG_SINK_MONGO_CAPPED_MAX_ITEMS_ENV: &str = "LOG_SINK_MONGO_CAPPED_MAX_ITEMS";

/// `true`/`false`: store the rendered message instead of template + params.
pub const LOG_SINK_MONGO_FORMATTED_MESSAGE_ENV: &str = "LOG_SINK_MONGO_FORMATTED_MESSAGE";

/// Optional MongoDB user name.
pub const LOG_SINK_MONGO_USER_ENV: &str = "LOG_SINK_MONGO_USER";

/// Optional MongoDB password.
pub const LOG_SINK_MONGO_PASSWORD_ENV: &str = "LOG_SINK_MONGO_PASSWORD";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an environment variable, treating unset and empty as `None`.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
