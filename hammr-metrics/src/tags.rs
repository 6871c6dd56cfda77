use crate::key::KeyId;
use smallvec::SmallVec;

/// Sorted set of interned (key, value) pairs identifying one metric series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // SmallVec to avoid allocation for small tag sets (usually < 4)
    pub(crate) tags: SmallVec<[(KeyId, KeyId); 4]>,
}

impl TagSet {
    pub fn from_sorted_iter(iter: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }

    pub fn contains(&self, key: KeyId, value: KeyId) -> bool {
        self.tags
            .binary_search_by(|(k, v)| (*k, *v).cmp(&(key, value)))
            .is_ok()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        let slice: &[(KeyId, KeyId)] = &self.tags;
        let idx = slice.partition_point(|(k, _)| *k < key);
        slice.get(idx).and_then(|(k, v)| (*k == key).then_some(*v))
    }

    /// Threshold tag filters match a series when every filter pair is present
    /// in the series' tag set (superset semantics).
    pub fn is_superset_of(&self, filter: &TagSet) -> bool {
        filter.iter().all(|(k, v)| self.contains(k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagset_contains_and_get() {
        let a = KeyId::from(1);
        let b = KeyId::from(2);
        let c = KeyId::from(3);

        let set = TagSet::from_sorted_iter([(a, b), (c, a)]);
        assert!(set.contains(a, b));
        assert!(!set.contains(a, a));
        assert_eq!(set.get(a), Some(b));
        assert_eq!(set.get(c), Some(a));
        assert_eq!(set.get(b), None);
    }

    #[test]
    fn superset_matching_is_per_pair() {
        let k1 = KeyId::from(1);
        let k2 = KeyId::from(2);
        let v1 = KeyId::from(10);
        let v2 = KeyId::from(20);

        let series = TagSet::from_sorted_iter([(k1, v1), (k2, v2)]);
        let filter = TagSet::from_sorted_iter([(k1, v1)]);
        let other = TagSet::from_sorted_iter([(k1, v2)]);

        assert!(series.is_superset_of(&filter));
        assert!(series.is_superset_of(&TagSet::default()));
        assert!(!series.is_superset_of(&other));
        assert!(!TagSet::default().is_superset_of(&filter));
    }
}
