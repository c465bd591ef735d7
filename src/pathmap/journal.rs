//! Path-map journal wire format.
//!
//! ```text
//! file        = transaction*
//! transaction = chunk+
//! chunk       = header record*
//! header[16]  = order[1] command[1] rcount_lo[1] rcount_hi[1] hash12[12]
//! order       = '1' for first chunk, '0' otherwise
//! command     = 'P' (partial) | 'S' (set+commit) | 'A' (add+commit)
//! record[16]  = tag[1] fingerprint15[15]
//! ```
//!
//! The record's tag byte always has its high bit set on disk (the dirty
//! bit) purely so a header (`'0'`/`'1'`, both < 0x80) can never be mistaken
//! for a record byte while resynchronizing after corruption.

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::pathmap::{FingerprintBody, Tag};

const ORDER_FIRST: u8 = b'1';
const ORDER_CONT: u8 = b'0';
const CMD_PARTIAL: u8 = b'P';
pub(crate) const CMD_SET: u8 = b'S';
pub(crate) const CMD_ADD: u8 = b'A';

/// max records per chunk; purely a write-side choice, large files split
/// into multiple chunks so no single chunk's record list is unbounded.
const CHUNK_MAX_RECORDS: usize = 4096;

pub struct CommittedTransaction {
    pub records: Vec<(FingerprintBody, Tag)>,
    /// `true` for `S` (replace), `false` for `A` (merge).
    pub replace: bool,
}

fn encode_record(key: &FingerprintBody, tag: Tag) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0] = tag.to_byte() | 0x80;
    out[1..].copy_from_slice(key);
    out
}

/// serialize one transaction (possibly split across multiple chunks).
pub fn write_transaction(records: &[(FingerprintBody, Tag)], command: u8) -> Vec<u8> {
    let mut out = Vec::new();
    let mut hasher = Sha256::new();
    let chunks: Vec<&[(FingerprintBody, Tag)]> =
        if records.is_empty() { vec![&[][..]] } else { records.chunks(CHUNK_MAX_RECORDS).collect() };

    for (i, chunk) in chunks.iter().enumerate() {
        let is_last = i + 1 == chunks.len();
        let order = if i == 0 { ORDER_FIRST } else { ORDER_CONT };
        let cmd = if is_last { command } else { CMD_PARTIAL };

        let encoded: Vec<[u8; 16]> = chunk.iter().map(|(k, t)| encode_record(k, *t)).collect();
        for rec in &encoded {
            hasher.update(rec);
        }
        let running = hasher.clone().finalize();

        let rcount = chunk.len() as u16;
        let mut header = [0u8; 16];
        header[0] = order;
        header[1] = cmd;
        header[2] = (rcount & 0xff) as u8;
        header[3] = (rcount >> 8) as u8;
        header[4..16].copy_from_slice(&running[..12]);

        out.extend_from_slice(&header);
        for rec in &encoded {
            out.extend_from_slice(rec);
        }
    }
    out
}

/// replay every committed transaction found in `bytes`, in file order.
/// Corrupt or truncated transactions are silently discarded; the scanner
/// resynchronizes on the next byte offset that looks like a valid `'1'`
/// chunk header.
pub fn replay_all(bytes: &[u8]) -> Vec<CommittedTransaction> {
    let mut results = Vec::new();
    let mut pos = 0usize;

    while pos + 16 <= bytes.len() {
        if bytes[pos] != ORDER_FIRST || !matches!(bytes[pos + 1], CMD_PARTIAL | CMD_SET | CMD_ADD) {
            pos += 1;
            continue;
        }

        match parse_transaction(bytes, pos) {
            Some((txn, consumed)) => {
                results.push(txn);
                pos += consumed;
            }
            None => pos += 1,
        }
    }

    results
}

/// attempts to parse one transaction starting at `start`, which must point
/// at a valid first-chunk header. Returns the transaction and the number of
/// bytes consumed on success.
fn parse_transaction(bytes: &[u8], start: usize) -> Option<(CommittedTransaction, usize)> {
    let mut pos = start;
    let mut hasher = Sha256::new();
    let mut pending = Vec::new();
    let mut first = true;

    loop {
        if pos + 16 > bytes.len() {
            return None;
        }
        let header = &bytes[pos..pos + 16];
        let order = header[0];
        let command = header[1];

        if first {
            if order != ORDER_FIRST {
                return None;
            }
        } else if order != ORDER_CONT {
            // a later chunk claiming to be a new transaction aborts this one
            return None;
        }
        if !matches!(command, CMD_PARTIAL | CMD_SET | CMD_ADD) {
            return None;
        }

        let rcount = header[2] as usize | ((header[3] as usize) << 8);
        let expected_hash = &header[4..16];
        pos += 16;

        if pos + rcount * 16 > bytes.len() {
            return None;
        }

        let mut chunk_records = Vec::with_capacity(rcount);
        for i in 0..rcount {
            let rec = &bytes[pos + i * 16..pos + i * 16 + 16];
            hasher.update(rec);
            let tag = match Tag::from_byte(rec[0] & 0x7f) {
                Ok(t) => t,
                Err(_) => return None,
            };
            let mut body = [0u8; 15];
            body.copy_from_slice(&rec[1..16]);
            chunk_records.push((body, tag));
        }

        let running = hasher.clone().finalize();
        if &running[..12] != expected_hash {
            return None;
        }
        pos += rcount * 16;
        pending.extend(chunk_records);

        match command {
            CMD_PARTIAL => {
                first = false;
                continue;
            }
            CMD_SET => return Some((CommittedTransaction { records: pending, replace: true }, pos - start)),
            CMD_ADD => return Some((CommittedTransaction { records: pending, replace: false }, pos - start)),
            _ => unreachable!(),
        }
    }
}

/// write policy: a compacted snapshot (`S` at offset 0) when the store is
/// fresh or the dirty set is at least half the size of the existing
/// journal; otherwise an incremental `A` append.
pub fn should_compact(existing_journal_len: usize, dirty_record_count: usize) -> bool {
    if existing_journal_len == 0 {
        return true;
    }
    let existing_records = existing_journal_len / 16;
    dirty_record_count * 2 >= existing_records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathmap::fingerprint;

    fn key(path: &str) -> FingerprintBody {
        let full = fingerprint(path);
        let mut body = [0u8; 15];
        body.copy_from_slice(&full[1..]);
        body
    }

    #[test]
    fn round_trips_a_single_chunk_set_transaction() {
        let records = vec![(key("a"), Tag::Layer(1)), (key("b"), Tag::Whiteout)];
        let bytes = write_transaction(&records, CMD_SET);

        let txns = replay_all(&bytes);
        assert_eq!(txns.len(), 1);
        assert!(txns[0].replace);
        assert_eq!(txns[0].records.len(), 2);
    }

    #[test]
    fn add_command_does_not_set_replace_flag() {
        let records = vec![(key("a"), Tag::Layer(0))];
        let bytes = write_transaction(&records, CMD_ADD);
        let txns = replay_all(&bytes);
        assert!(!txns[0].replace);
    }

    #[test]
    fn corrupt_hash_discards_transaction() {
        let records = vec![(key("a"), Tag::Layer(1))];
        let mut bytes = write_transaction(&records, CMD_SET);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(replay_all(&bytes).is_empty());
    }

    #[test]
    fn leading_trash_bytes_are_skipped_until_valid_header() {
        let records = vec![(key("a"), Tag::Layer(1))];
        let mut bytes = vec![0xde, 0xad, 0xbe, 0xef];
        bytes.extend(write_transaction(&records, CMD_SET));
        let txns = replay_all(&bytes);
        assert_eq!(txns.len(), 1);
    }

    #[test]
    fn multiple_transactions_replay_in_order() {
        let mut bytes = write_transaction(&[(key("a"), Tag::Layer(0))], CMD_SET);
        bytes.extend(write_transaction(&[(key("b"), Tag::Whiteout)], CMD_ADD));
        let txns = replay_all(&bytes);
        assert_eq!(txns.len(), 2);
        assert!(txns[0].replace);
        assert!(!txns[1].replace);
    }

    #[test]
    fn multi_chunk_transaction_replays_as_one_committed_unit() {
        let records: Vec<_> = (0..10).map(|i| (key(&format!("path{i}")), Tag::Layer((i % 10) as u8))).collect();
        // force a tiny chunk size for this test only, by writing two manual chunks
        let (first, rest) = records.split_at(5);
        let mut out = Vec::new();
        let mut hasher = Sha256::new();

        let enc: Vec<[u8; 16]> = first.iter().map(|(k, t)| encode_record(k, *t)).collect();
        for r in &enc {
            hasher.update(r);
        }
        let running = hasher.clone().finalize();
        let mut header = [0u8; 16];
        header[0] = ORDER_FIRST;
        header[1] = CMD_PARTIAL;
        header[2] = 5;
        header[4..16].copy_from_slice(&running[..12]);
        out.extend_from_slice(&header);
        for r in &enc {
            out.extend_from_slice(r);
        }

        let enc2: Vec<[u8; 16]> = rest.iter().map(|(k, t)| encode_record(k, *t)).collect();
        for r in &enc2 {
            hasher.update(r);
        }
        let running2 = hasher.clone().finalize();
        let mut header2 = [0u8; 16];
        header2[0] = ORDER_CONT;
        header2[1] = CMD_SET;
        header2[2] = 5;
        header2[4..16].copy_from_slice(&running2[..12]);
        out.extend_from_slice(&header2);
        for r in &enc2 {
            out.extend_from_slice(r);
        }

        let txns = replay_all(&out);
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].records.len(), 10);
    }

    #[test]
    fn compaction_policy_matches_fresh_and_half_rule() {
        assert!(should_compact(0, 0));
        assert!(should_compact(160, 5)); // 10 existing records, 5 dirty >= half
        assert!(!should_compact(320, 1)); // 20 existing records, 1 dirty
    }
}
