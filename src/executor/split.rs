use crate::membership::cloud::Cloud;
use crate::storage::key::Key;

/// Keys of one task instance, bucketed by home-node index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Split {
    /// Homed on this node.
    pub local: Vec<Key>,
    /// Homed below the midpoint.
    pub low: Vec<Key>,
    /// Homed at or above the midpoint, except on this node.
    pub high: Vec<Key>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.local.len() + self.low.len() + self.high.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bisects `keys` at `mid = (lo + hi) / 2` of their home indices in `cloud`.
///
/// Every key lands in exactly one bucket and buckets keep the input order.
/// `self_idx` is this node's index in `cloud`; `None` sends everything remote.
pub fn split(keys: &[Key], cloud: &Cloud, self_idx: Option<usize>) -> Split {
    let homes: Vec<usize> = keys.iter().map(|k| k.home(cloud)).collect();
    let (Some(&lo), Some(&hi)) = (homes.iter().min(), homes.iter().max()) else {
        return Split::default();
    };
    let mid = (lo + hi) / 2;

    let mut out = Split::default();
    for (key, &home) in keys.iter().zip(&homes) {
        if Some(home) == self_idx {
            out.local.push(key.clone());
        } else if home < mid {
            out.low.push(key.clone());
        } else {
            out.high.push(key.clone());
        }
    }
    out
}
