// Merkle root over per-transaction serializations

use crate::core::hash::sha256;

/// Compute the Merkle root of an ordered sequence of byte strings.
///
/// Leaves are the SHA-256 of each item; adjacent nodes are paired
/// left-to-right and hashed as `SHA256(left || right)`. A level with an odd
/// number of nodes duplicates its last node, including the leaf level.
pub fn merkle_root(items: &[Vec<u8>]) -> Vec<u8> {
    if items.is_empty() {
        return vec![0u8; 32];
    }

    let mut level: Vec<Vec<u8>> = items.iter().map(|item| sha256(item)).collect();

    while level.len() > 1 {
        if level.len() % 2 != 0 {
            level.push(level.last().cloned().unwrap_or_default());
        }

        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut combined = Vec::with_capacity(64);
            combined.extend_from_slice(&pair[0]);
            combined.extend_from_slice(&pair[1]);
            next.push(sha256(&combined));
        }
        level = next;
    }

    level.remove(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_item_duplicates_leaf() {
        let item = b"only transaction".to_vec();
        let leaf = sha256(&item);
        let mut pair = leaf.clone();
        pair.extend_from_slice(&leaf);

        assert_eq!(merkle_root(&[item]), sha256(&pair));
    }

    #[test]
    fn two_items_hash_as_pair() {
        let a = b"tx a".to_vec();
        let b = b"tx b".to_vec();
        let mut pair = sha256(&a);
        pair.extend_from_slice(&sha256(&b));

        assert_eq!(merkle_root(&[a, b]), sha256(&pair));
    }

    #[test]
    fn odd_count_duplicates_last() {
        let a = b"tx a".to_vec();
        let b = b"tx b".to_vec();
        let c = b"tx c".to_vec();

        // [a b c] pads to [a b c c]
        let root_padded = merkle_root(&[a.clone(), b.clone(), c.clone(), c.clone()]);
        assert_eq!(merkle_root(&[a, b, c]), root_padded);
    }

    #[test]
    fn root_is_order_sensitive() {
        let a = b"tx a".to_vec();
        let b = b"tx b".to_vec();
        assert_ne!(
            merkle_root(&[a.clone(), b.clone()]),
            merkle_root(&[b, a])
        );
    }

    #[test]
    fn root_is_deterministic() {
        let items: Vec<Vec<u8>> = (0u8..7).map(|i| vec![i; 16]).collect();
        assert_eq!(merkle_root(&items), merkle_root(&items));
        assert_eq!(merkle_root(&items).len(), 32);
    }
}
