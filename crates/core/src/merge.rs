//! Per-record last-write-wins merge of two progress snapshots.

use std::cmp::Ordering;

use crate::model::{ProgressMap, ProgressRecord};

/// Merge two snapshots key by key.
///
/// A key present on one side only is kept. For a key on both sides the
/// record with the later `last_updated` wins; on a tie the higher
/// `correct_count` wins, then the remaining timestamps decide. Records that
/// tie on every field are identical, so the result does not depend on
/// argument order.
#[must_use]
pub fn merge_progress(local: &ProgressMap, remote: &ProgressMap) -> ProgressMap {
    let mut merged = local.clone();
    for (key, theirs) in remote {
        merged
            .entry(key.clone())
            .and_modify(|ours| {
                if precedence(theirs, ours) == Ordering::Greater {
                    *ours = theirs.clone();
                }
            })
            .or_insert_with(|| theirs.clone());
    }
    merged
}

/// Pick the winning record of two candidates for the same key.
#[must_use]
pub fn newer<'a>(a: &'a ProgressRecord, b: &'a ProgressRecord) -> &'a ProgressRecord {
    if precedence(b, a) == Ordering::Greater { b } else { a }
}

fn precedence(a: &ProgressRecord, b: &ProgressRecord) -> Ordering {
    a.last_updated
        .cmp(&b.last_updated)
        .then(a.correct_count.cmp(&b.correct_count))
        .then(a.next_review_date.cmp(&b.next_review_date))
        .then(a.last_correct.cmp(&b.last_correct))
        .then(a.last_wrong.cmp(&b.last_wrong))
}
