//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `recipients`, `gifts`, and the
//! `gift_recipients` join table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Recipients
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS recipients (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    origin_id    TEXT NOT NULL,               -- UUID assigned once at creation
    name         TEXT NOT NULL,
    last_updated TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Gifts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS gifts (
    image_id     TEXT PRIMARY KEY NOT NULL,   -- UUID v4, also the photo key
    origin_id    TEXT NOT NULL,
    label        TEXT,
    is_archived  INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1, tombstone flag
    last_updated TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Gift <-> Recipient (many-to-many)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS gift_recipients (
    gift_id      TEXT NOT NULL,               -- FK -> gifts(image_id)
    recipient_id TEXT NOT NULL,               -- FK -> recipients(id)

    PRIMARY KEY (gift_id, recipient_id),
    FOREIGN KEY (gift_id) REFERENCES gifts(image_id) ON DELETE CASCADE,
    FOREIGN KEY (recipient_id) REFERENCES recipients(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_gift_recipients_recipient
    ON gift_recipients(recipient_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
