//! JSON document persistence

use std::fs;
use std::path::Path;

use errors::SimResult;
use serde::Serialize;

/// Write `value` as pretty JSON to `path`, creating parent directories
///
/// The document is written to a sibling `.tmp` file first and renamed into place,
/// so readers never observe a partially written file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> SimResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let body = serde_json::to_vec_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    fs::write(tmp, body)?;
    fs::rename(tmp, path)?;
    Ok(())
}

/// Read a JSON document written by [`write_json_atomic`]
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> SimResult<T> {
    let raw = fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("current.json");

        let mut doc = BTreeMap::new();
        doc.insert("poll_period_ms", 1000);
        write_json_atomic(&path, &doc).unwrap();

        let back: BTreeMap<String, i32> = read_json(&path).unwrap();
        assert_eq!(back["poll_period_ms"], 1000);
        assert!(!dir.path().join("nested").join("current.json.tmp").exists());
    }
}
