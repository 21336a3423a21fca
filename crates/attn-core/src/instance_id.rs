use std::path::Path;

use crate::types::DaemonInstanceId;

/// Load the persisted `daemon-id` file if present and parseable, else
/// mint a fresh random instance ID and persist it. The ID changes only
/// when the file is missing or corrupt, not on every restart, so
/// clients can distinguish "my daemon restarted" from "a different
/// daemon is now running" across sessions that reconnect later.
pub fn load_or_create(path: &Path) -> std::io::Result<DaemonInstanceId> {
    if let Ok(contents) = std::fs::read_to_string(path) {
        if let Ok(uuid) = contents.trim().parse::<uuid::Uuid>() {
            return Ok(DaemonInstanceId(uuid));
        }
    }

    let id = DaemonInstanceId::new_random();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, id.0.to_string())?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_persists_a_fresh_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon-id");
        let id = load_or_create(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), id.0.to_string());
    }

    #[test]
    fn reloads_the_same_id_on_second_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon-id");
        let first = load_or_create(&path).unwrap();
        let second = load_or_create(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn corrupt_file_is_replaced_with_a_new_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon-id");
        std::fs::write(&path, "not-a-uuid").unwrap();
        let id = load_or_create(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), id.0.to_string());
    }
}
