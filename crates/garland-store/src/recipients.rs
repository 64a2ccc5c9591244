use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use garland_shared::records::{ChangeSummary, Changelist, RecipientRecord};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Recipient, SyncMeta};

impl Database {
    pub fn insert_recipient(&self, recipient: &Recipient) -> Result<()> {
        self.conn().execute(
            "INSERT INTO recipients (id, origin_id, name, last_updated)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                recipient.id.to_string(),
                recipient.origin_id.to_string(),
                recipient.name,
                recipient.last_updated.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_recipient(&self, id: Uuid) -> Result<Recipient> {
        self.conn()
            .query_row(
                "SELECT id, origin_id, name, last_updated
                 FROM recipients
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_recipient,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn list_recipients(&self) -> Result<Vec<Recipient>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, origin_id, name, last_updated
             FROM recipients
             ORDER BY name, id",
        )?;

        let rows = stmt.query_map([], row_to_recipient)?;

        let mut recipients = Vec::new();
        for row in rows {
            recipients.push(row?);
        }
        Ok(recipients)
    }

    /// Rename a recipient, stamping a fresh `last_updated`.
    pub fn rename_recipient(&self, id: Uuid, name: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE recipients SET name = ?2, last_updated = ?3 WHERE id = ?1",
            params![id.to_string(), name, Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Changelist summary for every recipient. Recipients have no tombstone
    /// state, so `is_deleted` is always false here.
    pub fn recipient_changelist(&self) -> Result<Changelist> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, origin_id, last_updated FROM recipients")?;

        let rows = stmt.query_map([], |row| {
            let id_str: String = row.get(0)?;
            let origin_str: String = row.get(1)?;
            let updated_str: String = row.get(2)?;
            Ok((id_str, origin_str, updated_str))
        })?;

        let mut changelist = Changelist::new();
        for row in rows {
            let (id_str, origin_str, updated_str) = row?;
            changelist.insert(
                Uuid::parse_str(&id_str)?,
                ChangeSummary {
                    last_updated: parse_timestamp(&updated_str)?,
                    is_deleted: false,
                    origin_id: Uuid::parse_str(&origin_str)?,
                },
            );
        }
        Ok(changelist)
    }

    /// Merge metadata for every recipient, keyed by id.
    pub fn recipient_sync_meta(&self) -> Result<HashMap<Uuid, SyncMeta>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, origin_id, last_updated FROM recipients")?;

        let rows = stmt.query_map([], |row| {
            let id_str: String = row.get(0)?;
            let origin_str: String = row.get(1)?;
            let updated_str: String = row.get(2)?;
            Ok((id_str, origin_str, updated_str))
        })?;

        let mut meta = HashMap::new();
        for row in rows {
            let (id_str, origin_str, updated_str) = row?;
            meta.insert(
                Uuid::parse_str(&id_str)?,
                SyncMeta {
                    origin_id: Uuid::parse_str(&origin_str)?,
                    last_updated: parse_timestamp(&updated_str)?,
                    is_archived: false,
                },
            );
        }
        Ok(meta)
    }

    /// Apply a remote recipient snapshot: insert when absent, overwrite when
    /// the snapshot is origin-verified and strictly newer. Returns whether
    /// anything was written.
    ///
    /// `origin_id` is never rewritten on an existing row, and the incoming
    /// `gifts` set is ignored: the gift side of the relationship is
    /// authoritative and is resolved while merging gifts.
    pub fn merge_recipient(&mut self, record: &RecipientRecord) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT origin_id, last_updated FROM recipients WHERE id = ?1",
                params![record.id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let written = match existing {
            None => {
                tx.execute(
                    "INSERT INTO recipients (id, origin_id, name, last_updated)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        record.id.to_string(),
                        record.origin_id.to_string(),
                        record.name,
                        record.last_updated.to_rfc3339(),
                    ],
                )?;
                true
            }
            Some((origin_str, updated_str)) => {
                let origin = Uuid::parse_str(&origin_str)?;
                let updated = parse_timestamp(&updated_str)?;

                if origin != record.origin_id {
                    tracing::debug!(id = %record.id, "origin mismatch, leaving local recipient untouched");
                    false
                } else if record.last_updated > updated {
                    tx.execute(
                        "UPDATE recipients SET name = ?2, last_updated = ?3 WHERE id = ?1",
                        params![
                            record.id.to_string(),
                            record.name,
                            record.last_updated.to_rfc3339(),
                        ],
                    )?;
                    true
                } else {
                    false
                }
            }
        };

        tx.commit()?;
        Ok(written)
    }

    /// Full wire snapshot of one recipient, including its gift ids.
    pub fn recipient_record(&self, id: Uuid) -> Result<RecipientRecord> {
        let recipient = self.get_recipient(id)?;
        let gifts = self.gift_ids_of_recipient(id)?;

        Ok(RecipientRecord {
            id: recipient.id,
            origin_id: recipient.origin_id,
            name: recipient.name,
            last_updated: recipient.last_updated,
            gifts,
        })
    }

    /// Wire snapshots of every recipient, ordered by name.
    pub fn recipient_records(&self) -> Result<Vec<RecipientRecord>> {
        let recipients = self.list_recipients()?;

        let mut records = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let gifts = self.gift_ids_of_recipient(recipient.id)?;
            records.push(RecipientRecord {
                id: recipient.id,
                origin_id: recipient.origin_id,
                name: recipient.name,
                last_updated: recipient.last_updated,
                gifts,
            });
        }
        Ok(records)
    }

    pub fn gift_ids_of_recipient(&self, id: Uuid) -> Result<BTreeSet<Uuid>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT gift_id FROM gift_recipients WHERE recipient_id = ?1")?;

        let rows = stmt.query_map(params![id.to_string()], |row| row.get::<_, String>(0))?;

        let mut ids = BTreeSet::new();
        for row in rows {
            ids.insert(Uuid::parse_str(&row?)?);
        }
        Ok(ids)
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn row_to_recipient(row: &rusqlite::Row<'_>) -> rusqlite::Result<Recipient> {
    let id_str: String = row.get(0)?;
    let origin_str: String = row.get(1)?;
    let name: String = row.get(2)?;
    let updated_str: String = row.get(3)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let origin_id = Uuid::parse_str(&origin_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let last_updated: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Recipient {
        id,
        origin_id,
        name,
        last_updated,
    })
}
