//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! The tagged frame union decoded from each unit of the backup stream.
//!
//! `BackupFrame` is a product of eight optional sub-messages in the wire format, but
//! exactly one is ever populated per spec. We model it as a sum type at the parse
//! boundary instead, and reject any frame that populates zero or more than one
//! alternative.

use crate::error::{BackupError, WireError};
use crate::wire::{fixed64_to_f64, Cursor, WIRE_FIXED64, WIRE_LENGTH_DELIMITED, WIRE_VARINT};

/// One decoded unit of the backup stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Header(Header),
    SqlStatement(SqlStatement),
    SharedPreference(SharedPreference),
    Attachment(Attachment),
    DatabaseVersion(DatabaseVersion),
    Avatar(Avatar),
    Sticker(Sticker),
    End,
}

impl Frame {
    /// Does this frame carry an attached file blob in the stream (spec.md §3)?
    pub fn file_length(&self) -> Option<u32> {
        match self {
            Frame::Attachment(a) => Some(a.length),
            Frame::Avatar(a) => Some(a.length),
            Frame::Sticker(s) => Some(s.length),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    pub iv: Vec<u8>,
    pub salt: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlParameter {
    Str(String),
    Int64(u64),
    Double(f64),
    Bytes(Vec<u8>),
    Null,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlStatement {
    pub statement: String,
    pub parameters: Vec<SqlParameter>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SharedPreference {
    pub file: String,
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attachment {
    pub rowid: u64,
    pub attachmentid: u64,
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatabaseVersion {
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Avatar {
    pub name: String,
    pub length: u32,
    pub recipientid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sticker {
    pub rowid: u64,
    pub length: u32,
}

/// A reaction record, one element of the [`ReactionList`] stored as a blob column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reaction {
    pub author: u64,
    pub emoji: String,
    pub senttime: u64,
    pub receivedtime: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReactionList {
    pub reactions: Vec<Reaction>,
}

fn require_len_delim(wire_type: u32, field: &'static str) -> Result<(), WireError> {
    if wire_type != WIRE_LENGTH_DELIMITED {
        return Err(WireError::UnknownWireType(wire_type));
    }
    let _ = field;
    Ok(())
}

fn parse_header(bytes: &[u8]) -> Result<Header, BackupError> {
    let mut c = Cursor::new(bytes);
    let mut iv = None;
    let mut salt = None;
    while let Some((field, wt)) = c.read_tag()? {
        match field {
            1 => {
                require_len_delim(wt, "iv")?;
                if iv.is_some() {
                    return Err(WireError::DuplicateField("Header.iv").into());
                }
                iv = Some(c.read_bytes()?.to_vec());
            }
            2 => {
                require_len_delim(wt, "salt")?;
                if salt.is_some() {
                    return Err(WireError::DuplicateField("Header.salt").into());
                }
                salt = Some(c.read_bytes()?.to_vec());
            }
            n => return Err(WireError::UnknownTag(n).into()),
        }
    }
    let iv = iv.ok_or_else(|| BackupError::InvalidFrame("Header.iv is required".into()))?;
    if iv.len() != 16 {
        return Err(BackupError::InvalidFrame(format!(
            "Header.iv must be 16 bytes, got {}",
            iv.len()
        )));
    }
    Ok(Header { iv, salt })
}

fn parse_sql_parameter(bytes: &[u8]) -> Result<SqlParameter, BackupError> {
    let mut c = Cursor::new(bytes);
    let mut value = None;
    while let Some((field, wt)) = c.read_tag()? {
        if value.is_some() {
            return Err(WireError::DuplicateField("SqlParameter").into());
        }
        value = Some(match field {
            1 => {
                require_len_delim(wt, "string")?;
                SqlParameter::Str(c.read_string()?.to_string())
            }
            2 => {
                if wt != WIRE_VARINT {
                    return Err(WireError::UnknownWireType(wt).into());
                }
                SqlParameter::Int64(c.read_varint()?)
            }
            3 => {
                if wt != WIRE_FIXED64 {
                    return Err(WireError::UnknownWireType(wt).into());
                }
                SqlParameter::Double(fixed64_to_f64(c.read_fixed64()?))
            }
            4 => {
                require_len_delim(wt, "bytes")?;
                SqlParameter::Bytes(c.read_bytes()?.to_vec())
            }
            5 => {
                if wt != WIRE_VARINT {
                    return Err(WireError::UnknownWireType(wt).into());
                }
                let _ = c.read_varint()?;
                SqlParameter::Null
            }
            n => return Err(WireError::UnknownTag(n).into()),
        });
    }
    value.ok_or_else(|| BackupError::InvalidFrame("SqlParameter has no value set".into()))
}

fn parse_sql_statement(bytes: &[u8]) -> Result<SqlStatement, BackupError> {
    let mut c = Cursor::new(bytes);
    let mut statement = None;
    let mut parameters = Vec::new();
    while let Some((field, wt)) = c.read_tag()? {
        match field {
            1 => {
                require_len_delim(wt, "statement")?;
                if statement.is_some() {
                    return Err(WireError::DuplicateField("SqlStatement.statement").into());
                }
                statement = Some(c.read_string()?.to_string());
            }
            2 => {
                require_len_delim(wt, "parameters")?;
                parameters.push(parse_sql_parameter(c.read_bytes()?)?);
            }
            n => return Err(WireError::UnknownTag(n).into()),
        }
    }
    let statement =
        statement.ok_or_else(|| BackupError::InvalidFrame("SqlStatement.statement is required".into()))?;
    Ok(SqlStatement {
        statement,
        parameters,
    })
}

fn parse_shared_preference(bytes: &[u8]) -> Result<SharedPreference, BackupError> {
    let mut c = Cursor::new(bytes);
    let mut file = None;
    let mut key = None;
    let mut value = None;
    while let Some((field, wt)) = c.read_tag()? {
        match field {
            1 => {
                require_len_delim(wt, "file")?;
                file = Some(c.read_string()?.to_string());
            }
            2 => {
                require_len_delim(wt, "key")?;
                key = Some(c.read_string()?.to_string());
            }
            3 => {
                require_len_delim(wt, "value")?;
                value = Some(c.read_string()?.to_string());
            }
            n => return Err(WireError::UnknownTag(n).into()),
        }
    }
    Ok(SharedPreference {
        file: file.ok_or_else(|| BackupError::InvalidFrame("SharedPreference.file is required".into()))?,
        key: key.ok_or_else(|| BackupError::InvalidFrame("SharedPreference.key is required".into()))?,
        value,
    })
}

fn parse_attachment(bytes: &[u8]) -> Result<Attachment, BackupError> {
    let mut c = Cursor::new(bytes);
    let mut rowid = None;
    let mut attachmentid = None;
    let mut length = None;
    while let Some((field, wt)) = c.read_tag()? {
        if wt != WIRE_VARINT {
            return Err(WireError::UnknownWireType(wt).into());
        }
        match field {
            1 => rowid = Some(c.read_varint()?),
            2 => attachmentid = Some(c.read_varint()?),
            3 => length = Some(c.read_varint()? as u32),
            n => return Err(WireError::UnknownTag(n).into()),
        }
    }
    Ok(Attachment {
        rowid: rowid.ok_or_else(|| BackupError::InvalidFrame("Attachment.rowid is required".into()))?,
        attachmentid: attachmentid
            .ok_or_else(|| BackupError::InvalidFrame("Attachment.attachmentid is required".into()))?,
        length: length.ok_or_else(|| BackupError::InvalidFrame("Attachment.length is required".into()))?,
    })
}

fn parse_database_version(bytes: &[u8]) -> Result<DatabaseVersion, BackupError> {
    let mut c = Cursor::new(bytes);
    let mut version = None;
    while let Some((field, wt)) = c.read_tag()? {
        if wt != WIRE_VARINT {
            return Err(WireError::UnknownWireType(wt).into());
        }
        match field {
            1 => version = Some(c.read_varint()? as u32),
            n => return Err(WireError::UnknownTag(n).into()),
        }
    }
    Ok(DatabaseVersion {
        version: version
            .ok_or_else(|| BackupError::InvalidFrame("DatabaseVersion.version is required".into()))?,
    })
}

fn parse_avatar(bytes: &[u8]) -> Result<Avatar, BackupError> {
    let mut c = Cursor::new(bytes);
    let mut name = None;
    let mut length = None;
    let mut recipientid = None;
    while let Some((field, wt)) = c.read_tag()? {
        match field {
            1 => {
                require_len_delim(wt, "name")?;
                name = Some(c.read_string()?.to_string());
            }
            2 => {
                if wt != WIRE_VARINT {
                    return Err(WireError::UnknownWireType(wt).into());
                }
                length = Some(c.read_varint()? as u32);
            }
            3 => {
                require_len_delim(wt, "recipientid")?;
                recipientid = Some(c.read_string()?.to_string());
            }
            n => return Err(WireError::UnknownTag(n).into()),
        }
    }
    Ok(Avatar {
        name: name.ok_or_else(|| BackupError::InvalidFrame("Avatar.name is required".into()))?,
        length: length.ok_or_else(|| BackupError::InvalidFrame("Avatar.length is required".into()))?,
        recipientid,
    })
}

fn parse_sticker(bytes: &[u8]) -> Result<Sticker, BackupError> {
    let mut c = Cursor::new(bytes);
    let mut rowid = None;
    let mut length = None;
    while let Some((field, wt)) = c.read_tag()? {
        if wt != WIRE_VARINT {
            return Err(WireError::UnknownWireType(wt).into());
        }
        match field {
            1 => rowid = Some(c.read_varint()?),
            2 => length = Some(c.read_varint()? as u32),
            n => return Err(WireError::UnknownTag(n).into()),
        }
    }
    Ok(Sticker {
        rowid: rowid.ok_or_else(|| BackupError::InvalidFrame("Sticker.rowid is required".into()))?,
        length: length.ok_or_else(|| BackupError::InvalidFrame("Sticker.length is required".into()))?,
    })
}

fn parse_reaction(bytes: &[u8]) -> Result<Reaction, BackupError> {
    let mut c = Cursor::new(bytes);
    let mut r = Reaction::default();
    while let Some((field, wt)) = c.read_tag()? {
        match field {
            1 => {
                if wt != WIRE_VARINT {
                    return Err(WireError::UnknownWireType(wt).into());
                }
                r.author = c.read_varint()?;
            }
            2 => {
                require_len_delim(wt, "emoji")?;
                r.emoji = c.read_string()?.to_string();
            }
            3 => {
                if wt != WIRE_VARINT {
                    return Err(WireError::UnknownWireType(wt).into());
                }
                r.senttime = c.read_varint()?;
            }
            4 => {
                if wt != WIRE_VARINT {
                    return Err(WireError::UnknownWireType(wt).into());
                }
                r.receivedtime = c.read_varint()?;
            }
            n => return Err(WireError::UnknownTag(n).into()),
        }
    }
    Ok(r)
}

/// Parses a `ReactionList` blob, as stored in the `reactions` column of SMS/MMS rows
/// on schema versions at or above the `REACTIONS` threshold (spec.md §4.6).
pub fn parse_reaction_list(bytes: &[u8]) -> Result<ReactionList, BackupError> {
    let mut c = Cursor::new(bytes);
    let mut reactions = Vec::new();
    while let Some((field, wt)) = c.read_tag()? {
        match field {
            1 => {
                require_len_delim(wt, "reactions")?;
                reactions.push(parse_reaction(c.read_bytes()?)?);
            }
            n => return Err(WireError::UnknownTag(n).into()),
        }
    }
    Ok(ReactionList { reactions })
}

/// Parses one frame's decrypted payload into a [`Frame`]. Exactly one of the eight
/// top-level alternatives must be present.
pub fn parse_frame(bytes: &[u8]) -> Result<Frame, BackupError> {
    let mut c = Cursor::new(bytes);
    let mut frame: Option<Frame> = None;

    let mut set = |frame: &mut Option<Frame>, new: Frame| -> Result<(), BackupError> {
        if frame.is_some() {
            return Err(BackupError::InvalidFrame(
                "frame populates more than one alternative".into(),
            ));
        }
        *frame = Some(new);
        Ok(())
    };

    while let Some((field, wt)) = c.read_tag()? {
        match field {
            1 => {
                require_len_delim(wt, "header")?;
                set(&mut frame, Frame::Header(parse_header(c.read_bytes()?)?))?;
            }
            2 => {
                require_len_delim(wt, "statement")?;
                set(
                    &mut frame,
                    Frame::SqlStatement(parse_sql_statement(c.read_bytes()?)?),
                )?;
            }
            3 => {
                require_len_delim(wt, "preference")?;
                set(
                    &mut frame,
                    Frame::SharedPreference(parse_shared_preference(c.read_bytes()?)?),
                )?;
            }
            4 => {
                require_len_delim(wt, "attachment")?;
                set(
                    &mut frame,
                    Frame::Attachment(parse_attachment(c.read_bytes()?)?),
                )?;
            }
            5 => {
                require_len_delim(wt, "version")?;
                set(
                    &mut frame,
                    Frame::DatabaseVersion(parse_database_version(c.read_bytes()?)?),
                )?;
            }
            6 => {
                if wt != WIRE_VARINT {
                    return Err(WireError::UnknownWireType(wt).into());
                }
                let end = c.read_varint()? != 0;
                if end {
                    set(&mut frame, Frame::End)?;
                }
            }
            7 => {
                require_len_delim(wt, "avatar")?;
                set(&mut frame, Frame::Avatar(parse_avatar(c.read_bytes()?)?))?;
            }
            8 => {
                require_len_delim(wt, "sticker")?;
                set(&mut frame, Frame::Sticker(parse_sticker(c.read_bytes()?)?))?;
            }
            n => return Err(WireError::UnknownTag(n).into()),
        }
    }

    frame.ok_or_else(|| BackupError::InvalidFrame("frame populates no alternative".into()))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_frame_with_no_alternative() {
        assert!(parse_frame(&[]).is_err());
    }

    #[test]
    fn rejects_frame_with_two_alternatives() {
        let mut bytes = encode::frame(&Frame::End);
        bytes.extend(encode::frame(&Frame::DatabaseVersion(DatabaseVersion { version: 1 })));
        assert!(parse_frame(&bytes).is_err());
    }

    #[test]
    fn header_round_trips() {
        let h = Header {
            iv: vec![7u8; 16],
            salt: Some(vec![9u8; 32]),
        };
        let encoded = encode::frame(&Frame::Header(h.clone()));
        assert_eq!(parse_frame(&encoded).unwrap(), Frame::Header(h));
    }

    #[test]
    fn header_requires_16_byte_iv() {
        let h = Header {
            iv: vec![7u8; 4],
            salt: None,
        };
        let encoded = encode::frame(&Frame::Header(h));
        assert!(parse_frame(&encoded).is_err());
    }

    #[test]
    fn sql_statement_round_trips_with_typed_parameters() {
        let s = SqlStatement {
            statement: "INSERT INTO t VALUES (?, ?)".to_string(),
            parameters: vec![SqlParameter::Int64(7), SqlParameter::Str("alice".to_string())],
        };
        let encoded = encode::frame(&Frame::SqlStatement(s.clone()));
        assert_eq!(parse_frame(&encoded).unwrap(), Frame::SqlStatement(s));
    }

    #[test]
    fn attachment_round_trips_and_reports_file_length() {
        let a = Attachment {
            rowid: 1,
            attachmentid: 2,
            length: 42,
        };
        let encoded = encode::frame(&Frame::Attachment(a.clone()));
        let parsed = parse_frame(&encoded).unwrap();
        assert_eq!(parsed, Frame::Attachment(a));
        assert_eq!(parsed.file_length(), Some(42));
    }

    #[test]
    fn end_round_trips() {
        let encoded = encode::frame(&Frame::End);
        assert_eq!(parse_frame(&encoded).unwrap(), Frame::End);
    }

    #[test]
    fn reaction_list_round_trips() {
        let list = ReactionList {
            reactions: vec![Reaction {
                author: 9,
                emoji: "\u{1f600}".to_string(),
                senttime: 100,
                receivedtime: 101,
            }],
        };
        let encoded = encode::reaction_list(&list);
        assert_eq!(parse_reaction_list(&encoded).unwrap(), list);
    }
}
