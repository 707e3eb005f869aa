#![forbid(unsafe_code)]

use super::*;
use dm_core::Bitmask;
use dm_core::sql::quote_ident;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublicationLayout {
    pub table: String,
    pub id_column: String,
    pub payload_column: String,
    /// 8-byte big-endian bitmask of matched subscription ids.
    pub mask_column: String,
}

impl Default for PublicationLayout {
    fn default() -> Self {
        Self {
            table: "publications".to_string(),
            id_column: "id".to_string(),
            payload_column: "payload".to_string(),
            mask_column: "matched_subscriptions".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub publication_id: i64,
    pub payload: Option<String>,
    pub matched_subscriptions: Vec<u32>,
}

impl PublicationRecord {
    pub fn mask(&self) -> Result<Bitmask, StoreError> {
        Bitmask::from_ids(self.matched_subscriptions.iter().copied()).map_err(|source| {
            StoreError::Bitmask {
                publication_id: self.publication_id,
                source,
            }
        })
    }
}

impl SqliteDb {
    /// Reads every publication with its decoded set of matched subscriptions.
    /// A NULL mask is an empty set; a malformed one fails the whole export.
    pub fn export_publications(
        &self,
        layout: &PublicationLayout,
    ) -> Result<Vec<PublicationRecord>, StoreError> {
        self.require_columns(
            &layout.table,
            &[
                layout.id_column.as_str(),
                layout.payload_column.as_str(),
                layout.mask_column.as_str(),
            ],
        )?;

        let sql = format!(
            "SELECT {}, {}, {} FROM {} ORDER BY rowid",
            quote_ident(&layout.id_column),
            quote_ident(&layout.payload_column),
            quote_ident(&layout.mask_column),
            quote_ident(&layout.table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let publication_id = row.get::<_, i64>(0)?;
            let payload = row.get::<_, Option<String>>(1)?;
            let mask = row.get::<_, Option<Vec<u8>>>(2)?;
            let matched = dm_core::bitmask::decode(mask.as_deref()).map_err(|source| {
                StoreError::Bitmask {
                    publication_id,
                    source,
                }
            })?;
            out.push(PublicationRecord {
                publication_id,
                payload,
                matched_subscriptions: matched.into_iter().collect(),
            });
        }
        info!(table = %layout.table, records = out.len(), "publications exported");
        Ok(out)
    }
}

/// Writes `records` as a pretty-printed JSON array, replacing any existing file.
pub fn write_json<T: Serialize>(path: &Path, records: &[T]) -> Result<(), StoreError> {
    let file = fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
