//! Resumable scan cursor over a (conceptually resizing) hash table, using the
//! reverse-binary-increment technique so that growing or shrinking the table
//! between calls never causes an already-visited slot to be skipped.

use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Advances `cursor` to the next slot to visit, masked to a power-of-two
/// table of size `mask + 1`. This is the standard `dictScan` trick: treat the
/// cursor as reversed bits, increment, reverse back. `0` both starts and ends
/// an iteration.
pub fn reverse_binary_increment(cursor: u64, mask: u64) -> u64 {
    let mut v = cursor | !mask;
    v = v.reverse_bits();
    v = v.wrapping_add(1);
    v.reverse_bits() & mask
}

fn slot_of(key: &Bytes, mask: u64) -> u64 {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    h.finish() & mask
}

/// Partitions `keys` into virtual slots of a power-of-two table sized to fit
/// them, then walks slots starting at `cursor` until either `count` results
/// are gathered, `10 * count` keys have been inspected, or the cursor wraps
/// back to `0` (iteration complete).
///
/// The caller supplies `alive` to re-check expiry (and delete, if eligible)
/// on each candidate before it's included, and `matches` for the optional
/// `MATCH` glob. Returns `(next_cursor, matched_keys)`.
pub fn step<F, M>(
    keys: impl Iterator<Item = Bytes>,
    cursor: u64,
    count: usize,
    mut alive: F,
    matches: M,
) -> (u64, Vec<Bytes>)
where
    F: FnMut(&Bytes) -> bool,
    M: Fn(&Bytes) -> bool,
{
    let keys: Vec<Bytes> = keys.collect();
    let table_size = keys.len().max(4).next_power_of_two() as u64;
    let mask = table_size - 1;

    let mut by_slot: std::collections::HashMap<u64, Vec<Bytes>> = std::collections::HashMap::new();
    for k in keys {
        by_slot.entry(slot_of(&k, mask)).or_default().push(k);
    }

    let mut cur = cursor & mask;
    let mut out = Vec::new();
    let budget = count.max(1) * 10;
    let mut inspected = 0usize;

    loop {
        if let Some(bucket) = by_slot.get(&cur) {
            for k in bucket {
                inspected += 1;
                if alive(k) && matches(k) {
                    out.push(k.clone());
                }
            }
        }
        cur = reverse_binary_increment(cur, mask);
        if cur == 0 {
            return (0, out);
        }
        if out.len() >= count.max(1) || inspected >= budget {
            return (cur, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_eventually_wraps_to_zero() {
        let mask = 15u64;
        let mut c = 0u64;
        let mut seen = std::collections::HashSet::new();
        loop {
            c = reverse_binary_increment(c, mask);
            if c == 0 {
                break;
            }
            assert!(seen.insert(c), "cursor revisited a slot before completing");
        }
        assert_eq!(seen.len(), mask as usize);
    }

    #[test]
    fn scan_to_completion_covers_all_keys() {
        let keys: Vec<Bytes> = (0..500).map(|i| Bytes::from(format!("k{i}"))).collect();
        let mut collected = std::collections::HashSet::new();
        let mut cursor = 0u64;
        loop {
            let (next, batch) = step(keys.clone().into_iter(), cursor, 10, |_| true, |_| true);
            for k in batch {
                collected.insert(k);
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        let expected: std::collections::HashSet<Bytes> = keys.into_iter().collect();
        assert_eq!(collected, expected);
    }
}
