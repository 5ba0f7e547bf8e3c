/// Queue rows are keyed by a PostgreSQL BIGSERIAL that doubles as the
/// insertion order.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
