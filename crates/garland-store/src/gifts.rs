use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};
use uuid::Uuid;

use garland_shared::records::{ChangeSummary, Changelist, GiftRecord};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Gift, Recipient, SyncMeta};
use crate::recipients::parse_timestamp;

impl Database {
    pub fn insert_gift(&self, gift: &Gift) -> Result<()> {
        self.conn().execute(
            "INSERT INTO gifts (image_id, origin_id, label, is_archived, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                gift.image_id.to_string(),
                gift.origin_id.to_string(),
                gift.label,
                gift.is_archived as i32,
                gift.last_updated.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_gift(&self, image_id: Uuid) -> Result<Gift> {
        self.conn()
            .query_row(
                "SELECT image_id, origin_id, label, is_archived, last_updated
                 FROM gifts
                 WHERE image_id = ?1",
                params![image_id.to_string()],
                row_to_gift,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List gifts, newest first. Archived gifts are excluded unless asked for.
    pub fn list_gifts(&self, include_archived: bool) -> Result<Vec<Gift>> {
        let sql = if include_archived {
            "SELECT image_id, origin_id, label, is_archived, last_updated
             FROM gifts ORDER BY last_updated DESC"
        } else {
            "SELECT image_id, origin_id, label, is_archived, last_updated
             FROM gifts WHERE is_archived = 0 ORDER BY last_updated DESC"
        };
        let mut stmt = self.conn().prepare(sql)?;

        let rows = stmt.query_map([], row_to_gift)?;

        let mut gifts = Vec::new();
        for row in rows {
            gifts.push(row?);
        }
        Ok(gifts)
    }

    /// Relabel a gift, stamping a fresh `last_updated`.
    pub fn set_gift_label(&self, image_id: Uuid, label: Option<&str>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE gifts SET label = ?2, last_updated = ?3 WHERE image_id = ?1",
            params![image_id.to_string(), label, Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Replace a gift's recipient set with the given ids, stamping a fresh
    /// `last_updated`. Ids without a matching local recipient are dropped.
    pub fn set_gift_recipients(&mut self, image_id: Uuid, recipients: &BTreeSet<Uuid>) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        let affected = tx.execute(
            "UPDATE gifts SET last_updated = ?2 WHERE image_id = ?1",
            params![image_id.to_string(), Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        rewrite_links(&tx, image_id, recipients)?;

        tx.commit()?;
        Ok(())
    }

    /// Archive a gift locally (user action), stamping a fresh `last_updated`
    /// so the tombstone wins over older peer copies. The caller is expected
    /// to delete the photo blob.
    pub fn archive_gift(&self, image_id: Uuid) -> Result<bool> {
        self.archive_gift_at(image_id, Utc::now())
    }

    /// Archive a gift with an explicit stamp; used when a peer's tombstone
    /// propagates here and the remote timestamp should be kept.
    pub fn archive_gift_at(&self, image_id: Uuid, stamp: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE gifts SET is_archived = 1, last_updated = ?2 WHERE image_id = ?1",
            params![image_id.to_string(), stamp.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Changelist summary for every gift; archived rows surface as deletions.
    pub fn gift_changelist(&self) -> Result<Changelist> {
        let mut stmt = self
            .conn()
            .prepare("SELECT image_id, origin_id, last_updated, is_archived FROM gifts")?;

        let rows = stmt.query_map([], |row| {
            let id_str: String = row.get(0)?;
            let origin_str: String = row.get(1)?;
            let updated_str: String = row.get(2)?;
            let archived: i32 = row.get(3)?;
            Ok((id_str, origin_str, updated_str, archived))
        })?;

        let mut changelist = Changelist::new();
        for row in rows {
            let (id_str, origin_str, updated_str, archived) = row?;
            changelist.insert(
                Uuid::parse_str(&id_str)?,
                ChangeSummary {
                    last_updated: parse_timestamp(&updated_str)?,
                    is_deleted: archived != 0,
                    origin_id: Uuid::parse_str(&origin_str)?,
                },
            );
        }
        Ok(changelist)
    }

    /// Merge metadata for every gift, keyed by image id.
    pub fn gift_sync_meta(&self) -> Result<HashMap<Uuid, SyncMeta>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT image_id, origin_id, last_updated, is_archived FROM gifts")?;

        let rows = stmt.query_map([], |row| {
            let id_str: String = row.get(0)?;
            let origin_str: String = row.get(1)?;
            let updated_str: String = row.get(2)?;
            let archived: i32 = row.get(3)?;
            Ok((id_str, origin_str, updated_str, archived))
        })?;

        let mut meta = HashMap::new();
        for row in rows {
            let (id_str, origin_str, updated_str, archived) = row?;
            meta.insert(
                Uuid::parse_str(&id_str)?,
                SyncMeta {
                    origin_id: Uuid::parse_str(&origin_str)?,
                    last_updated: parse_timestamp(&updated_str)?,
                    is_archived: archived != 0,
                },
            );
        }
        Ok(meta)
    }

    /// Apply a remote gift snapshot: insert when absent, overwrite when the
    /// snapshot is origin-verified and strictly newer. Returns whether
    /// anything was written.
    ///
    /// On a write the recipient links are rewritten from the snapshot;
    /// referenced recipients not present locally are dropped (recipients are
    /// fully synced before gifts, so this only trims truly unknown ids).
    /// Photo bytes are not handled here; the blob store is independent.
    pub fn merge_gift(&mut self, record: &GiftRecord) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT origin_id, last_updated FROM gifts WHERE image_id = ?1",
                params![record.image_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let written = match existing {
            None => {
                tx.execute(
                    "INSERT INTO gifts (image_id, origin_id, label, is_archived, last_updated)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        record.image_id.to_string(),
                        record.origin_id.to_string(),
                        record.label,
                        record.is_archived as i32,
                        record.last_updated.to_rfc3339(),
                    ],
                )?;
                true
            }
            Some((origin_str, updated_str)) => {
                let origin = Uuid::parse_str(&origin_str)?;
                let updated = parse_timestamp(&updated_str)?;

                if origin != record.origin_id {
                    tracing::debug!(id = %record.image_id, "origin mismatch, leaving local gift untouched");
                    false
                } else if record.last_updated > updated {
                    tx.execute(
                        "UPDATE gifts SET label = ?2, is_archived = ?3, last_updated = ?4
                         WHERE image_id = ?1",
                        params![
                            record.image_id.to_string(),
                            record.label,
                            record.is_archived as i32,
                            record.last_updated.to_rfc3339(),
                        ],
                    )?;
                    true
                } else {
                    false
                }
            }
        };

        if written {
            rewrite_links(&tx, record.image_id, &record.recipients)?;
        }

        tx.commit()?;
        Ok(written)
    }

    /// Full wire snapshot of one gift. The photo is attached by the caller;
    /// record and blob storage are independent.
    pub fn gift_record(&self, image_id: Uuid) -> Result<GiftRecord> {
        let gift = self.get_gift(image_id)?;
        let recipients = self.recipient_ids_of_gift(image_id)?;

        Ok(GiftRecord {
            image_id: gift.image_id,
            origin_id: gift.origin_id,
            label: gift.label,
            is_archived: gift.is_archived,
            last_updated: gift.last_updated,
            recipients,
            photo: None,
        })
    }

    pub fn recipient_ids_of_gift(&self, image_id: Uuid) -> Result<BTreeSet<Uuid>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT recipient_id FROM gift_recipients WHERE gift_id = ?1")?;

        let rows = stmt.query_map(params![image_id.to_string()], |row| row.get::<_, String>(0))?;

        let mut ids = BTreeSet::new();
        for row in rows {
            ids.insert(Uuid::parse_str(&row?)?);
        }
        Ok(ids)
    }

    /// The recipients a gift is addressed to, ordered by name.
    pub fn recipients_of_gift(&self, image_id: Uuid) -> Result<Vec<Recipient>> {
        let mut stmt = self.conn().prepare(
            "SELECT r.id, r.origin_id, r.name, r.last_updated
             FROM recipients r
             JOIN gift_recipients gr ON gr.recipient_id = r.id
             WHERE gr.gift_id = ?1
             ORDER BY r.name, r.id",
        )?;

        let rows = stmt.query_map(params![image_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let origin_str: String = row.get(1)?;
            let name: String = row.get(2)?;
            let updated_str: String = row.get(3)?;
            Ok((id_str, origin_str, name, updated_str))
        })?;

        let mut recipients = Vec::new();
        for row in rows {
            let (id_str, origin_str, name, updated_str) = row?;
            recipients.push(Recipient {
                id: Uuid::parse_str(&id_str)?,
                origin_id: Uuid::parse_str(&origin_str)?,
                name,
                last_updated: parse_timestamp(&updated_str)?,
            });
        }
        Ok(recipients)
    }
}

/// Archive a gift after a local user action and eagerly delete its photo.
/// The tombstone record keeps syncing; the photo does not.
pub async fn archive_gift_locally(
    store: &crate::StoreHandle,
    photos: &crate::PhotoStore,
    image_id: Uuid,
) -> Result<bool> {
    let archived = store.with(move |db| db.archive_gift(image_id)).await?;
    if archived {
        photos.delete(image_id).await?;
    }
    Ok(archived)
}

/// Replace a gift's join rows inside the given transaction. Only ids with a
/// matching local recipient row are linked.
fn rewrite_links(tx: &Transaction<'_>, gift_id: Uuid, recipients: &BTreeSet<Uuid>) -> Result<()> {
    tx.execute(
        "DELETE FROM gift_recipients WHERE gift_id = ?1",
        params![gift_id.to_string()],
    )?;

    let mut link = tx.prepare(
        "INSERT INTO gift_recipients (gift_id, recipient_id)
         SELECT ?1, id FROM recipients WHERE id = ?2",
    )?;
    for recipient_id in recipients {
        link.execute(params![gift_id.to_string(), recipient_id.to_string()])?;
    }
    Ok(())
}

fn row_to_gift(row: &rusqlite::Row<'_>) -> rusqlite::Result<Gift> {
    let id_str: String = row.get(0)?;
    let origin_str: String = row.get(1)?;
    let label: Option<String> = row.get(2)?;
    let archived: i32 = row.get(3)?;
    let updated_str: String = row.get(4)?;

    let image_id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let origin_id = Uuid::parse_str(&origin_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let last_updated: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Gift {
        image_id,
        origin_id,
        label,
        is_archived: archived != 0,
        last_updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn sample_gift(db: &Database) -> Gift {
        let gift = Gift::new(Uuid::new_v4(), Some("Socks".into()));
        db.insert_gift(&gift).unwrap();
        gift
    }

    #[test]
    fn insert_and_get() {
        let db = test_db();
        let gift = sample_gift(&db);

        let fetched = db.get_gift(gift.image_id).unwrap();
        assert_eq!(fetched.label.as_deref(), Some("Socks"));
        assert!(!fetched.is_archived);
    }

    #[test]
    fn archived_gifts_hidden_from_listing() {
        let db = test_db();
        let keep = sample_gift(&db);
        let hide = sample_gift(&db);

        assert!(db.archive_gift(hide.image_id).unwrap());

        let visible = db.list_gifts(false).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].image_id, keep.image_id);

        let all = db.list_gifts(true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn archived_gift_surfaces_as_deleted_in_changelist() {
        let db = test_db();
        let gift = sample_gift(&db);
        db.archive_gift(gift.image_id).unwrap();

        let changelist = db.gift_changelist().unwrap();
        let entry = changelist.get(&gift.image_id).unwrap();
        assert!(entry.is_deleted);
        assert_eq!(entry.origin_id, gift.origin_id);
    }

    #[test]
    fn set_recipients_links_only_known_ids() {
        let mut db = test_db();
        let gift = sample_gift(&db);
        let alice = Recipient::new("Alice");
        db.insert_recipient(&alice).unwrap();

        let wanted = BTreeSet::from([alice.id, Uuid::new_v4()]);
        db.set_gift_recipients(gift.image_id, &wanted).unwrap();

        let linked = db.recipient_ids_of_gift(gift.image_id).unwrap();
        assert_eq!(linked, BTreeSet::from([alice.id]));
    }

    #[test]
    fn merge_applies_newer_and_links_recipients() {
        let mut db = test_db();
        let gift = sample_gift(&db);
        let alice = Recipient::new("Alice");
        db.insert_recipient(&alice).unwrap();

        let record = GiftRecord {
            image_id: gift.image_id,
            origin_id: gift.origin_id,
            label: Some("Wool socks".into()),
            is_archived: false,
            last_updated: gift.last_updated + Duration::seconds(10),
            recipients: BTreeSet::from([alice.id]),
            photo: None,
        };

        assert!(db.merge_gift(&record).unwrap());

        let merged = db.get_gift(gift.image_id).unwrap();
        assert_eq!(merged.label.as_deref(), Some("Wool socks"));
        assert_eq!(merged.last_updated, record.last_updated);
        assert_eq!(
            db.recipient_ids_of_gift(gift.image_id).unwrap(),
            BTreeSet::from([alice.id])
        );
    }

    #[test]
    fn merge_ignores_stale_and_mismatched_snapshots() {
        let mut db = test_db();
        let gift = sample_gift(&db);

        let stale = GiftRecord {
            image_id: gift.image_id,
            origin_id: gift.origin_id,
            label: Some("Old label".into()),
            is_archived: false,
            last_updated: gift.last_updated - Duration::seconds(10),
            recipients: BTreeSet::new(),
            photo: None,
        };
        assert!(!db.merge_gift(&stale).unwrap());

        let collided = GiftRecord {
            origin_id: Uuid::new_v4(),
            last_updated: gift.last_updated + Duration::days(1),
            ..stale.clone()
        };
        assert!(!db.merge_gift(&collided).unwrap());

        assert_eq!(
            db.get_gift(gift.image_id).unwrap().label.as_deref(),
            Some("Socks")
        );
    }

    #[tokio::test]
    async fn local_archive_tombstones_and_drops_photo() {
        let db = test_db();
        let gift = sample_gift(&db);
        let image_id = gift.image_id;

        let store = crate::StoreHandle::spawn(db);
        let dir = tempfile::tempdir().unwrap();
        let photos = crate::PhotoStore::new(dir.path().to_path_buf())
            .await
            .unwrap();
        photos.write(image_id, b"jpeg").await.unwrap();

        assert!(archive_gift_locally(&store, &photos, image_id)
            .await
            .unwrap());

        assert!(!photos.exists(image_id).await);
        let kept = store.with(move |db| db.get_gift(image_id)).await.unwrap();
        assert!(kept.is_archived);
        assert_eq!(kept.origin_id, gift.origin_id);
    }

    #[test]
    fn remote_archive_keeps_remote_stamp() {
        let db = test_db();
        let gift = sample_gift(&db);
        let stamp = gift.last_updated + Duration::minutes(5);

        assert!(db.archive_gift_at(gift.image_id, stamp).unwrap());

        let archived = db.get_gift(gift.image_id).unwrap();
        assert!(archived.is_archived);
        assert_eq!(archived.last_updated, stamp);
    }
}
