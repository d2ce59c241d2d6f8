//! JSON helpers for sketches that load or persist structured data.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::errors::{BridgeError, Result};

/// Reads and deserializes a JSON file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| BridgeError::io(path, e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Serializes `value` into a JSON file, replacing any previous content.
pub fn save_json<T: Serialize + ?Sized>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| BridgeError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush().map_err(|e| BridgeError::io(path, e))?;
    Ok(())
}

/// Deserializes a JSON document held in memory.
pub fn parse_json<T: DeserializeOwned>(serialized: &str) -> Result<T> {
    Ok(serde_json::from_str(serialized)?)
}
