//! Backup stream format shared by the reference engines.
//!
//! JSON lines, one record per entry:
//!
//! ```text
//! {"key":"612f31","value":"0000000000000007","expires_at":null,"version":12}
//! ```
//!
//! Keys and values are hex-encoded; `expires_at` is unix milliseconds.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

use crate::error::{Error, Result};

/// One entry in a backup stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BackupRecord {
    #[serde(with = "hex_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
    pub expires_at: Option<u64>,
    pub version: i64,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

/// Write `records` and return the highest version among them, or `since`.
pub(crate) fn write_records(
    writer: &mut (dyn Write + Send),
    records: &[BackupRecord],
    since: i64,
) -> Result<i64> {
    let mut max_version = since;
    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| Error::internal(format!("failed to encode backup record: {e}")))?;
        writeln!(writer, "{line}")?;
        max_version = max_version.max(record.version);
    }
    writer.flush()?;
    Ok(max_version)
}

/// Read every record from a backup stream. Blank lines are skipped.
pub(crate) fn read_records(reader: &mut (dyn BufRead + Send)) -> Result<Vec<BackupRecord>> {
    let mut records = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            Error::invalid_request(format!("malformed backup record on line {}: {e}", number + 1))
        })?;
        records.push(record);
    }
    Ok(records)
}
