use redb::TableDefinition;

/// Upload records: upload id -> Upload (msgpack)
pub const UPLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("uploads");

/// Expiry index: big-endian expire timestamp ++ upload id -> ()
/// The fixed-width timestamp prefix makes lexicographic order chronological,
/// so the expired-upload scan is a range scan bounded to the past.
pub const UPLOAD_EXPIRY: TableDefinition<&[u8], ()> = TableDefinition::new("upload_expiry");

/// Build an expiry index key for an upload.
pub fn expiry_key(expire_at_unix: i64, upload_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + upload_id.len());
    key.extend_from_slice(&(expire_at_unix as u64).to_be_bytes());
    key.extend_from_slice(upload_id.as_bytes());
    key
}

/// Split an expiry index key back into (timestamp, upload id).
/// Returns `None` for malformed keys.
pub fn split_expiry_key(key: &[u8]) -> Option<(i64, &str)> {
    if key.len() < 8 {
        return None;
    }
    let ts = u64::from_be_bytes(key[..8].try_into().ok()?) as i64;
    let id = std::str::from_utf8(&key[8..]).ok()?;
    Some((ts, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_key_orders_chronologically() {
        let early = expiry_key(100, "zzzz");
        let late = expiry_key(200, "aaaa");
        assert!(early < late);

        let (ts, id) = split_expiry_key(&early).unwrap();
        assert_eq!(ts, 100);
        assert_eq!(id, "zzzz");
    }
}
