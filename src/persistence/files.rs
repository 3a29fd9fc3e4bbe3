use anyhow::{Context, Result};
use duckdb::types::Value;
use duckdb::{params, Row};
use std::path::Path;

use super::{expand_tilde, in_transaction, optional_timestamp_at, qualified, timestamp_at, Persistence};
use crate::config::StorageConfig;
use crate::error::MarketError;
use crate::types::File;

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "webp", "svg", "bmp"];

pub(crate) const FILE_COLUMNS: [&str; 7] = [
    "id",
    "author_id",
    "name",
    "path",
    "is_image",
    "created_at",
    "deleted_at",
];

pub(crate) fn file_from_row(row: &Row<'_>) -> duckdb::Result<File> {
    Ok(File {
        id: row.get(0)?,
        author_id: row.get(1)?,
        name: row.get(2)?,
        path: row.get(3)?,
        is_image: row.get(4)?,
        created_at: timestamp_at(row, 5)?,
        deleted_at: optional_timestamp_at(row, 6)?,
    })
}

/// Whether a file name looks like an image, judged by its extension.
pub fn is_image_name(name: &str) -> bool {
    extension(name)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

impl Persistence {
    /// Record a file without contents, e.g. one kept by an external store.
    pub fn create_file(&self, author_id: Option<i64>, name: &str) -> Result<File> {
        let name = self.check_new_file(author_id, name)?;
        let id: i64 = {
            let conn = self.conn();
            conn.query_row(
                "INSERT INTO files (author_id, name, is_image) VALUES (?, ?, ?) RETURNING id",
                params![author_id, name, is_image_name(name)],
                |row| row.get(0),
            )?
        };
        self.get_file(id)?
            .ok_or_else(|| MarketError::not_found("File", id).into())
    }

    /// Write `data` under the storage directory and record it.
    ///
    /// Contents are stored as `<id>.<ext>`, so the client-supplied name never
    /// reaches the filesystem. A failed write leaves no row behind.
    pub fn store_file(
        &self,
        storage: &StorageConfig,
        author_id: Option<i64>,
        name: &str,
        data: &[u8],
    ) -> Result<File> {
        let name = self.check_new_file(author_id, name)?;
        if data.len() > storage.max_file_size {
            return Err(MarketError::invalid(format!(
                "file is too large: {} bytes, the limit is {}",
                data.len(),
                storage.max_file_size
            ))
            .into());
        }
        if !storage.accepts_extension(name) {
            return Err(MarketError::invalid(format!(
                "extension of '{}' is not allowed, accepted: {}",
                name,
                storage.allowed_extensions.join(", ")
            ))
            .into());
        }

        let directory = expand_tilde(&storage.directory)?;
        std::fs::create_dir_all(&directory)
            .with_context(|| format!("creating storage directory {}", directory.display()))?;

        let id = {
            let conn = self.conn();
            in_transaction(&conn, |tx| {
                let id: i64 = tx.query_row("SELECT nextval('files_id_seq')", [], |row| row.get(0))?;
                let file_name = match extension(name) {
                    Some(ext) => format!("{}.{}", id, ext),
                    None => id.to_string(),
                };
                let path = directory.join(file_name);
                tx.execute(
                    "INSERT INTO files (id, author_id, name, path, is_image) VALUES (?, ?, ?, ?, ?)",
                    params![id, author_id, name, path.to_string_lossy().into_owned(), is_image_name(name)],
                )?;
                std::fs::write(&path, data)
                    .with_context(|| format!("writing file {}", path.display()))?;
                Ok(id)
            })?
        };
        tracing::debug!("Stored file #{} ({} bytes)", id, data.len());
        self.get_file(id)?
            .ok_or_else(|| MarketError::not_found("File", id).into())
    }

    /// Contents of a live file written by [`Self::store_file`].
    pub fn file_contents(&self, id: i64) -> Result<Vec<u8>> {
        let file = self
            .get_file(id)?
            .ok_or_else(|| MarketError::not_found("File", id))?;
        let path = file
            .path
            .ok_or_else(|| MarketError::invalid(format!("file #{} has no stored contents", id)))?;
        std::fs::read(&path).with_context(|| format!("reading file {}", path))
    }

    pub fn get_file(&self, id: i64) -> Result<Option<File>> {
        self.fetch_one(
            self.select("files", "f")
                .columns(qualified("f", &FILE_COLUMNS))
                .filter("f.id = ?", [Value::BigInt(id)]),
            file_from_row,
        )
    }

    fn check_new_file<'a>(&self, author_id: Option<i64>, name: &'a str) -> Result<&'a str> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MarketError::invalid("file name must not be empty").into());
        }
        if let Some(author_id) = author_id {
            if self.get_user(author_id)?.is_none() {
                return Err(MarketError::not_found("User", author_id).into());
            }
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_detection_by_extension() {
        assert!(is_image_name("avatar.PNG"));
        assert!(is_image_name("shots/preview.final.jpeg"));
        assert!(!is_image_name("brief.pdf"));
        assert!(!is_image_name("README"));
    }
}
