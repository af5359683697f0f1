// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Save/restore of the round counter, the only state that outlives a call.
//!
//! Text mode writes a one-line JSON object keyed by [`COUNTER_FIELD`];
//! binary mode writes the raw little-endian `u64`.

use serde_json::{Map, Value};
use std::io::{self, ErrorKind, Read, Write};

use crate::{LasError, LasResult};

/// Field name of the persisted round counter.
pub const COUNTER_FIELD: &str = "cb large action space storing example counter";

pub fn save_counter<W: Write>(writer: &mut W, counter: u64, text: bool) -> LasResult<()> {
    if text {
        let mut object = Map::new();
        object.insert(COUNTER_FIELD.to_string(), Value::from(counter));
        serde_json::to_writer(&mut *writer, &Value::Object(object))?;
        writer.write_all(b"\n")?;
    } else {
        writer.write_all(&counter.to_le_bytes())?;
    }
    Ok(())
}

/// Reads a counter written by [`save_counter`]. An exhausted reader means the
/// model carries no reduction state and yields `None`.
pub fn load_counter<R: Read>(reader: &mut R, text: bool) -> LasResult<Option<u64>> {
    if text {
        load_text(reader)
    } else {
        load_binary(reader)
    }
}

fn load_text<R: Read>(reader: &mut R) -> LasResult<Option<u64>> {
    let mut stream = serde_json::Deserializer::from_reader(reader).into_iter::<Value>();
    let Some(value) = stream.next() else {
        return Ok(None);
    };
    value?
        .get(COUNTER_FIELD)
        .and_then(Value::as_u64)
        .map(Some)
        .ok_or(LasError::MissingField {
            field: COUNTER_FIELD,
        })
}

fn load_binary<R: Read>(reader: &mut R) -> LasResult<Option<u64>> {
    let mut bytes = [0u8; 8];
    let mut filled = 0usize;
    while filled < bytes.len() {
        match reader.read(&mut bytes[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    match filled {
        0 => Ok(None),
        8 => Ok(Some(u64::from_le_bytes(bytes))),
        partial => Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("round counter truncated after {partial} bytes"),
        )
        .into()),
    }
}
