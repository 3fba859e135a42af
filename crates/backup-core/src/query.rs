//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! Schema-versioned queries over the materialized database.
//!
//! Signal's on-device schema changed shape several times; rather than construct
//! SQL conditionally at runtime, each query keeps its variants side by side and
//! picks one at call time from the recorded `PRAGMA user_version` (spec.md §9
//! Design Notes).

use rusqlite::Connection;

use crate::error::Result;

/// Below this version a recipient is an opaque phone-or-email string; at or
/// above it, recipients are integer-keyed rows with split columns.
pub const RECIPIENT_IDS: i64 = 24;
/// At or above this version, SMS/MMS rows carry a `reactions` blob.
pub const REACTIONS: i64 = 37;
/// At or above this version, the recipient row exposes split profile-name columns.
pub const SPLIT_PROFILE_NAMES: i64 = 43;
/// At or above this version, a `mention` table joins recipients to messages.
pub const MENTIONS: i64 = 68;

/// One recipient row, shaped according to the schema version that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    /// The opaque identifier: a phone/email string pre-24, the stringified
    /// integer primary key at 24+.
    pub id: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub profile_family_name: Option<String>,
    pub profile_joined_name: Option<String>,
}

/// One SMS/MMS row.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub thread_id: i64,
    pub address: String,
    pub body: Option<String>,
    pub date: i64,
    /// Raw `ReactionList` wire bytes, present only at schema >= [`REACTIONS`].
    pub reactions: Option<Vec<u8>>,
}

/// One conversation thread row.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub id: i64,
    pub recipient_id: String,
    pub date: i64,
    pub message_count: i64,
}

/// One `mention` row, only queryable at schema >= [`MENTIONS`].
#[derive(Debug, Clone, PartialEq)]
pub struct Mention {
    pub message_id: i64,
    pub recipient_id: String,
    pub range_start: i64,
    pub range_length: i64,
}

fn optional_string(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    row.get::<_, Option<String>>(idx)
}

/// Lists every recipient, choosing the pre-24, 24-42, or 43+ row shape.
pub fn query_recipients(conn: &Connection, schema_version: i64) -> Result<Vec<Recipient>> {
    let sql = if schema_version < RECIPIENT_IDS {
        "SELECT recipient_ids, NULL, NULL, NULL, NULL FROM recipient_preferences"
    } else if schema_version < SPLIT_PROFILE_NAMES {
        "SELECT _id, phone, email, NULL, NULL FROM recipient"
    } else {
        "SELECT _id, phone, email, profile_family_name, profile_joined_name FROM recipient"
    };

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(Recipient {
            id: row.get::<_, String>(0)?,
            phone: optional_string(row, 1)?,
            email: optional_string(row, 2)?,
            profile_family_name: optional_string(row, 3)?,
            profile_joined_name: optional_string(row, 4)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
}

/// Lists every thread.
pub fn query_threads(conn: &Connection, _schema_version: i64) -> Result<Vec<Thread>> {
    let mut stmt = conn.prepare(
        "SELECT _id, recipient_ids, date, message_count FROM thread ORDER BY date DESC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Thread {
            id: row.get(0)?,
            recipient_id: row.get(1)?,
            date: row.get(2)?,
            message_count: row.get(3)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
}

/// Lists every message in a thread, including the `reactions` blob when the
/// schema is new enough to carry one.
pub fn query_messages(conn: &Connection, schema_version: i64, thread_id: i64) -> Result<Vec<Message>> {
    let sql = if schema_version >= REACTIONS {
        "SELECT _id, thread_id, address, body, date, reactions FROM sms WHERE thread_id = ?1 ORDER BY date"
    } else {
        "SELECT _id, thread_id, address, body, date, NULL FROM sms WHERE thread_id = ?1 ORDER BY date"
    };

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([thread_id], |row| {
        Ok(Message {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            address: row.get(2)?,
            body: row.get(3)?,
            date: row.get(4)?,
            reactions: row.get::<_, Option<Vec<u8>>>(5)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
}

/// Lists mentions for a message. Only meaningful at schema >= [`MENTIONS`];
/// callers are expected to check the version before calling.
pub fn query_mentions(conn: &Connection, message_id: i64) -> Result<Vec<Mention>> {
    let mut stmt = conn.prepare(
        "SELECT message_id, recipient_id, range_start, range_length FROM mention WHERE message_id = ?1",
    )?;
    let rows = stmt.query_map([message_id], |row| {
        Ok(Mention {
            message_id: row.get(0)?,
            recipient_id: row.get(1)?,
            range_start: row.get(2)?,
            range_length: row.get(3)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
}
