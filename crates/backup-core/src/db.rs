//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! The database materializer: replays recorded `SqlStatement` frames into an
//! in-memory SQLite instance inside a single transaction.
//!
//! [`SqlEngine`] is the minimal surface the materializer and the query layer
//! consume; [`RusqliteEngine`] is its only implementation. Swapping the engine
//! underneath the materializer never requires touching replay logic.

use std::io::{Read, Seek};
use std::path::Path;
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;

use crate::error::{BackupError, Result};
use crate::frame::{Frame, SqlParameter};
use crate::locator::AttachmentLocators;
use crate::reader::FrameStream;

/// The SQL execution surface the materializer depends on, so that the core
/// never couples its replay logic directly to `rusqlite`'s full API.
pub trait SqlEngine {
    fn exec(&self, sql: &str) -> Result<()>;
    fn exec_with_params(&self, sql: &str, params: &[SqlParameter]) -> Result<()>;
    fn user_version(&self) -> Result<i64>;
    fn set_user_version(&self, version: i64) -> Result<()>;
    fn backup_to_file(&self, path: &Path) -> Result<()>;
    fn connection(&self) -> &Connection;
}

/// The core's concrete [`SqlEngine`]: a single in-memory SQLite connection.
pub struct RusqliteEngine {
    conn: Connection,
}

impl RusqliteEngine {
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }
}

fn to_sql_value(p: &SqlParameter) -> SqlValue {
    match p {
        SqlParameter::Str(s) => SqlValue::Text(s.clone()),
        SqlParameter::Int64(v) => SqlValue::Integer(*v as i64),
        SqlParameter::Double(d) => SqlValue::Real(*d),
        SqlParameter::Bytes(b) => SqlValue::Blob(b.clone()),
        SqlParameter::Null => SqlValue::Null,
    }
}

impl SqlEngine for RusqliteEngine {
    fn exec(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn exec_with_params(&self, sql: &str, params: &[SqlParameter]) -> Result<()> {
        let values: Vec<SqlValue> = params.iter().map(to_sql_value).collect();
        let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
        self.conn.execute(sql, refs.as_slice())?;
        Ok(())
    }

    fn user_version(&self) -> Result<i64> {
        Ok(self.conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    fn set_user_version(&self, version: i64) -> Result<()> {
        self.conn.pragma_update(None, "user_version", version)?;
        Ok(())
    }

    fn backup_to_file(&self, path: &Path) -> Result<()> {
        let mut dst = Connection::open(path)?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dst)?;
        backup.run_to_completion(100, Duration::from_millis(0), None)?;
        Ok(())
    }

    fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn is_reserved_create_table(statement: &str) -> bool {
    statement.trim_start().to_ascii_lowercase().starts_with("create table sqlite_")
}

/// What a successful materialization pass learned: the schema version recorded
/// by the `DatabaseVersion` frame and the attachment index built along the way.
#[derive(Debug)]
pub struct MaterializeOutcome {
    pub schema_version: i64,
    pub locators: AttachmentLocators,
}

/// Rewinds `stream` and replays every frame into `engine` inside one transaction.
/// Commits on `End`; rolls back and returns the error on any failure, including
/// a stream that runs out before an `End` frame (`Truncated`).
pub fn materialize<R, E>(stream: &mut FrameStream<R>, engine: &E) -> Result<MaterializeOutcome>
where
    R: Read + Seek,
    E: SqlEngine,
{
    stream.rewind()?;
    engine.exec("BEGIN")?;

    let mut locators = AttachmentLocators::new();
    let mut schema_version = 0i64;

    let outcome = (|| -> Result<()> {
        loop {
            let (frame, locator) = stream.next_frame()?;
            match frame {
                Frame::DatabaseVersion(v) => {
                    schema_version = i64::from(v.version);
                    engine.set_user_version(schema_version)?;
                }
                Frame::SqlStatement(s) => {
                    if is_reserved_create_table(&s.statement) {
                        continue;
                    }
                    engine.exec_with_params(&s.statement, &s.parameters)?;
                }
                Frame::Attachment(a) => {
                    if let Some(loc) = locator {
                        locators.insert(a.rowid, a.attachmentid, loc)?;
                    }
                }
                Frame::SharedPreference(_) | Frame::Avatar(_) | Frame::Sticker(_) => {}
                Frame::Header(_) => {
                    return Err(BackupError::InvalidFrame("unexpected Header frame mid-stream".into()));
                }
                Frame::End => return Ok(()),
            }
        }
    })();

    match outcome {
        Ok(()) => {
            engine.exec("COMMIT")?;
            tracing::info!(schema_version, attachments = locators.len(), "database materialized");
            Ok(MaterializeOutcome {
                schema_version,
                locators,
            })
        }
        Err(e) => {
            tracing::warn!(error = %e, "materialization failed, rolling back");
            let _ = engine.exec("ROLLBACK");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;
    use crate::frame::{Attachment, DatabaseVersion, SqlStatement};
    use std::io::Cursor;

    const PASSPHRASE: &[u8] = b"correct horse battery staple";
    const IV: [u8; 16] = *b"0123456789abcdef";

    fn salt() -> Vec<u8> {
        b"0123456789abcdef0123456789abcdef".to_vec()
    }

    fn open_stream(units: &[(Frame, Option<Vec<u8>>)]) -> FrameStream<Cursor<Vec<u8>>> {
        let bytes = encode::backup_stream(PASSPHRASE, IV, Some(salt()), units);
        FrameStream::open(Cursor::new(bytes), PASSPHRASE).unwrap()
    }

    #[test]
    fn header_only_backup_materializes_empty_database() {
        let mut stream = open_stream(&[(Frame::End, None)]);
        let engine = RusqliteEngine::open_in_memory().unwrap();
        let outcome = materialize(&mut stream, &engine).unwrap();
        assert_eq!(outcome.schema_version, 0);
        assert_eq!(engine.user_version().unwrap(), 0);
        assert!(outcome.locators.is_empty());
    }

    #[test]
    fn create_table_and_insert_round_trips() {
        let units = vec![
            (
                Frame::SqlStatement(SqlStatement {
                    statement: "CREATE TABLE t(id INTEGER, name TEXT)".to_string(),
                    parameters: vec![],
                }),
                None,
            ),
            (
                Frame::SqlStatement(SqlStatement {
                    statement: "INSERT INTO t VALUES (?, ?)".to_string(),
                    parameters: vec![SqlParameter::Int64(7), SqlParameter::Str("alice".to_string())],
                }),
                None,
            ),
            (Frame::End, None),
        ];
        let mut stream = open_stream(&units);
        let engine = RusqliteEngine::open_in_memory().unwrap();
        materialize(&mut stream, &engine).unwrap();

        let (id, name): (i64, String) = engine
            .connection()
            .query_row("SELECT id, name FROM t", [], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        assert_eq!(id, 7);
        assert_eq!(name, "alice");
    }

    #[test]
    fn reserved_table_name_is_silently_skipped() {
        let units = vec![
            (
                Frame::SqlStatement(SqlStatement {
                    statement: "CREATE TABLE sqlite_foo(x)".to_string(),
                    parameters: vec![],
                }),
                None,
            ),
            (Frame::End, None),
        ];
        let mut stream = open_stream(&units);
        let engine = RusqliteEngine::open_in_memory().unwrap();
        materialize(&mut stream, &engine).unwrap();

        let exists: bool = engine
            .connection()
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 'sqlite_foo')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(!exists);
    }

    #[test]
    fn attachment_frame_installs_a_locator() {
        let file_bytes = b"attachment plaintext".to_vec();
        let units = vec![
            (
                Frame::DatabaseVersion(DatabaseVersion { version: 42 }),
                None,
            ),
            (
                Frame::SqlStatement(SqlStatement {
                    statement: "CREATE TABLE part(_id INTEGER, unique_id INTEGER, pending_push INTEGER, data_size INTEGER)".to_string(),
                    parameters: vec![],
                }),
                None,
            ),
            (
                Frame::SqlStatement(SqlStatement {
                    statement: "INSERT INTO part VALUES (1, 2, 0, ?)".to_string(),
                    parameters: vec![SqlParameter::Int64(file_bytes.len() as u64)],
                }),
                None,
            ),
            (
                Frame::Attachment(Attachment {
                    rowid: 1,
                    attachmentid: 2,
                    length: file_bytes.len() as u32,
                }),
                Some(file_bytes.clone()),
            ),
            (Frame::End, None),
        ];
        let mut stream = open_stream(&units);
        let engine = RusqliteEngine::open_in_memory().unwrap();
        let outcome = materialize(&mut stream, &engine).unwrap();

        assert_eq!(outcome.schema_version, 42);
        let locator = outcome.locators.get(1, 2).expect("locator for (1, 2)");
        assert_eq!(locator.length, file_bytes.len() as u32);
    }

    #[test]
    fn duplicate_attachment_key_rolls_back_and_fails() {
        let file_bytes = b"attachment plaintext".to_vec();
        let attachment_unit = (
            Frame::Attachment(Attachment {
                rowid: 1,
                attachmentid: 2,
                length: file_bytes.len() as u32,
            }),
            Some(file_bytes.clone()),
        );
        let units = vec![
            (
                Frame::SqlStatement(SqlStatement {
                    statement: "CREATE TABLE part(_id INTEGER, unique_id INTEGER, pending_push INTEGER, data_size INTEGER)".to_string(),
                    parameters: vec![],
                }),
                None,
            ),
            attachment_unit.clone(),
            attachment_unit,
            (Frame::End, None),
        ];
        let mut stream = open_stream(&units);
        let engine = RusqliteEngine::open_in_memory().unwrap();

        let err = materialize(&mut stream, &engine).unwrap_err();
        assert!(matches!(err, BackupError::InvalidFrame(_)));

        let exists: bool = engine
            .connection()
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 'part')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(!exists);
    }

    #[test]
    fn missing_end_frame_rolls_back_and_fails_truncated() {
        let units = vec![(
            Frame::SqlStatement(SqlStatement {
                statement: "CREATE TABLE t(x)".to_string(),
                parameters: vec![],
            }),
            None,
        )];
        let mut bytes = encode::backup_stream(PASSPHRASE, IV, Some(salt()), &units);
        // Drop the trailing MAC byte so the stream ends mid-frame, with no End marker.
        bytes.pop();
        let mut stream = FrameStream::open(Cursor::new(bytes), PASSPHRASE).unwrap();
        let engine = RusqliteEngine::open_in_memory().unwrap();

        let err = materialize(&mut stream, &engine).unwrap_err();
        assert!(matches!(err, BackupError::Truncated(_) | BackupError::Io(_)));

        let exists: bool = engine
            .connection()
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 't')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(!exists);
    }
}
