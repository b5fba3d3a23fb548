pub mod dedup;
pub mod search;
pub mod store;
pub mod types;

/// Encode an embedding as little-endian f32 bytes for the `embedding` BLOB column.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode an `embedding` BLOB. Trailing bytes that do not form a full f32 are ignored.
pub fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_bytes_are_little_endian() {
        let bytes = embedding_to_bytes(&[1.0, -2.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(embedding_from_bytes(&bytes), vec![1.0, -2.5]);
    }

    #[test]
    fn partial_trailing_bytes_are_ignored() {
        let mut bytes = embedding_to_bytes(&[0.5]);
        bytes.push(7);
        assert_eq!(embedding_from_bytes(&bytes), vec![0.5]);
    }
}
