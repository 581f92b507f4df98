//! Sort and group key of the shuffle between inference and merge.
//!
//! Keys order by term id (descending), then document id (descending),
//! then priority (`true` first). Groups are formed by `(term, doc)` only,
//! so a group always starts with its priority record, if any, and a
//! reducer can fold it in one pass without buffering.
//!
//! ```text
//! [_ _ _ _][_ _ _ _][_][_ _ _ _]
//!   term     doc    p   branch + 1   (big-endian, 0 = no branch)
//! ```

use crate::error::CvbError;
use std::cmp::Ordering;

/// Length of an encoded key
pub const KEY_BYTES: usize = 13;

const TERM_OFFSET: usize = 0;
const DOC_OFFSET: usize = 4;
const PRIORITY_OFFSET: usize = 8;
const BRANCH_OFFSET: usize = 9;

/// What the payload of a shuffled record means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationBranch {
    /// the frozen model's per-topic likelihood of the group's term
    ModelBroadcast,
    /// one document's share of the group's term, for a block of topics
    DocContribution,
}

impl AggregationBranch {
    pub const ALL: [AggregationBranch; 2] = [
        AggregationBranch::ModelBroadcast,
        AggregationBranch::DocContribution,
    ];

    pub fn ordinal(self) -> usize {
        match self {
            AggregationBranch::ModelBroadcast => 0,
            AggregationBranch::DocContribution => 1,
        }
    }

    pub fn from_ordinal(ordinal: i64) -> Option<Self> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Records of this branch must be seen first within their group
    pub fn is_priority(self) -> bool {
        matches!(self, AggregationBranch::ModelBroadcast)
    }
}

/// `(term, doc, priority, branch)`. Only the first three take part in
/// ordering and equality; `branch` tags the payload.
#[derive(Debug, Clone, Copy)]
pub struct CompositeKey {
    pub term_id: i32,
    pub doc_id: i32,
    pub priority: bool,
    pub branch: Option<AggregationBranch>,
}

impl CompositeKey {
    pub fn new(term_id: i32, doc_id: i32, branch: AggregationBranch) -> Self {
        CompositeKey {
            term_id,
            doc_id,
            priority: branch.is_priority(),
            branch: Some(branch),
        }
    }

    pub fn group(&self) -> (i32, i32) {
        (self.term_id, self.doc_id)
    }

    /// Ordering that ignores priority, deciding group membership
    pub fn cmp_group(&self, other: &Self) -> Ordering {
        other
            .term_id
            .cmp(&self.term_id)
            .then_with(|| other.doc_id.cmp(&self.doc_id))
    }

    pub fn same_group(&self, other: &Self) -> bool {
        self.cmp_group(other) == Ordering::Equal
    }

    pub fn encode(&self) -> [u8; KEY_BYTES] {
        let mut bytes = [0u8; KEY_BYTES];
        bytes[TERM_OFFSET..DOC_OFFSET].copy_from_slice(&self.term_id.to_be_bytes());
        bytes[DOC_OFFSET..PRIORITY_OFFSET].copy_from_slice(&self.doc_id.to_be_bytes());
        bytes[PRIORITY_OFFSET] = self.priority as u8;
        let tag = self.branch.map(|b| b.ordinal() as i32 + 1).unwrap_or(0);
        bytes[BRANCH_OFFSET..].copy_from_slice(&tag.to_be_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CvbError> {
        check_len(bytes)?;
        Ok(CompositeKey {
            term_id: read_i32(bytes, TERM_OFFSET),
            doc_id: read_i32(bytes, DOC_OFFSET),
            priority: bytes[PRIORITY_OFFSET] != 0,
            branch: branch_of(bytes),
        })
    }
}

impl Ord for CompositeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_group(other)
            .then_with(|| other.priority.cmp(&self.priority))
    }
}

impl PartialOrd for CompositeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CompositeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CompositeKey {}

fn check_len(bytes: &[u8]) -> Result<(), CvbError> {
    if bytes.len() != KEY_BYTES {
        return Err(CvbError::MalformedKey {
            expected: KEY_BYTES,
            found: bytes.len(),
        });
    }
    Ok(())
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_be_bytes(word)
}

fn branch_of(bytes: &[u8]) -> Option<AggregationBranch> {
    let tag = read_i32(bytes, BRANCH_OFFSET) as i64;
    AggregationBranch::from_ordinal(tag - 1)
}

/// Full ordering of two encoded keys, without decoding them
pub fn compare_raw(a: &[u8], b: &[u8]) -> Result<Ordering, CvbError> {
    let group = compare_group_raw(a, b)?;
    // priority byte: 1 before 0
    Ok(group.then_with(|| b[PRIORITY_OFFSET].cmp(&a[PRIORITY_OFFSET])))
}

/// Group ordering of two encoded keys; ignores the priority byte
pub fn compare_group_raw(a: &[u8], b: &[u8]) -> Result<Ordering, CvbError> {
    check_len(a)?;
    check_len(b)?;
    let term = read_i32(b, TERM_OFFSET).cmp(&read_i32(a, TERM_OFFSET));
    Ok(term.then_with(|| read_i32(b, DOC_OFFSET).cmp(&read_i32(a, DOC_OFFSET))))
}

/// The branch tag of an encoded key; an unknown tag is `None`
pub fn decode_branch(bytes: &[u8]) -> Result<Option<AggregationBranch>, CvbError> {
    check_len(bytes)?;
    Ok(branch_of(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use AggregationBranch::*;

    fn key(term_id: i32, doc_id: i32, priority: bool, branch: Option<AggregationBranch>) -> CompositeKey {
        CompositeKey {
            term_id,
            doc_id,
            priority,
            branch,
        }
    }

    #[test]
    fn priority_first_within_group_regardless_of_branch() {
        for b1 in [None, Some(ModelBroadcast), Some(DocContribution)] {
            for b2 in [None, Some(ModelBroadcast), Some(DocContribution)] {
                let k1 = key(3, 7, true, b1);
                let k2 = key(3, 7, false, b2);
                assert_eq!(k1.cmp(&k2), Ordering::Less);
                assert_eq!(k2.cmp(&k1), Ordering::Greater);
                assert!(k1.same_group(&k2));
                let raw = compare_raw(&k1.encode(), &k2.encode()).unwrap();
                assert_eq!(raw, Ordering::Less);
            }
        }
    }

    #[test]
    fn term_then_doc_descending() {
        let mut keys = vec![
            key(1, 5, false, None),
            key(2, 0, false, None),
            key(1, 9, true, None),
            key(1, 9, false, None),
            key(-1, 3, true, None),
        ];
        keys.sort();
        let order: Vec<_> = keys.iter().map(|k| (k.term_id, k.doc_id, k.priority)).collect();
        assert_eq!(
            order,
            vec![
                (2, 0, false),
                (1, 9, true),
                (1, 9, false),
                (1, 5, false),
                (-1, 3, true)
            ]
        );
    }

    #[test]
    fn raw_comparison_agrees_with_typed_ordering() {
        let mut all = vec![];
        for t in [-2, 0, 1, i32::MAX] {
            for d in [i32::MIN, 0, 4] {
                for p in [true, false] {
                    all.push(key(t, d, p, Some(DocContribution)));
                }
            }
        }
        for a in &all {
            for b in &all {
                let raw = compare_raw(&a.encode(), &b.encode()).unwrap();
                assert_eq!(raw, a.cmp(b));
                let raw_group = compare_group_raw(&a.encode(), &b.encode()).unwrap();
                assert_eq!(raw_group, a.cmp_group(b));
                assert_eq!(raw_group == Ordering::Equal, a.group() == b.group());
            }
        }
    }

    #[test]
    fn branch_survives_the_codec() {
        for b in [None, Some(ModelBroadcast), Some(DocContribution)] {
            let k = key(11, 12, true, b);
            let bytes = k.encode();
            assert_eq!(decode_branch(&bytes).unwrap(), b);
            let back = CompositeKey::decode(&bytes).unwrap();
            assert_eq!(back.branch, b);
            assert_eq!(back.group(), (11, 12));
            assert!(back.priority);
        }
    }

    #[test]
    fn unknown_branch_tag_is_none() {
        let mut bytes = key(1, 1, false, Some(DocContribution)).encode();
        bytes[BRANCH_OFFSET..].copy_from_slice(&99i32.to_be_bytes());
        assert_eq!(decode_branch(&bytes).unwrap(), None);
        bytes[BRANCH_OFFSET..].copy_from_slice(&(-5i32).to_be_bytes());
        assert_eq!(decode_branch(&bytes).unwrap(), None);
    }

    #[test]
    fn wrong_length_is_malformed() {
        let bytes = key(1, 1, false, None).encode();
        for bad in [&bytes[..12], &[0u8; 14][..], &[][..]] {
            assert!(matches!(
                decode_branch(bad),
                Err(CvbError::MalformedKey { expected: 13, .. })
            ));
            assert!(compare_raw(bad, &bytes).is_err());
            assert!(compare_group_raw(&bytes, bad).is_err());
            assert!(CompositeKey::decode(bad).is_err());
        }
    }
}
