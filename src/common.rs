/// Row id assigned by SQLite (`INTEGER PRIMARY KEY`).
pub type SqliteId = i64;

/// Sequence number of a JMdict entry, the join key for all of its rows.
pub type EntryKey = i64;

/// 1-based ordinal of a sense within its entry.
pub type SenseIndex = u32;
