// Copyright (C) 2023 Ant Group CO., Ltd. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use alloc::collections::btree_map::BTreeMap;
use alloc::vec::Vec;
use core::ops::Range;

use crate::error::EnclResult;

/// Disjoint half-open ranges keyed by their start, each carrying a value.
#[derive(Debug)]
pub struct IntervalTree<V> {
    tree: BTreeMap<usize, (Range<usize>, V)>,
}

pub fn overlap(left: &Range<usize>, right: &Range<usize>) -> Option<Range<usize>> {
    let overlap_start = left.start.max(right.start);
    let overlap_end = left.end.min(right.end);
    if overlap_start >= overlap_end {
        None
    } else {
        Some(overlap_start..overlap_end)
    }
}

impl<V> IntervalTree<V> {
    pub fn new() -> Self {
        Self {
            tree: BTreeMap::new(),
        }
    }

    /// Insert a value for a given range, which must not overlap any other range.
    pub fn insert(&mut self, range: Range<usize>, value: V) -> EnclResult {
        if range.start >= range.end {
            return encl_result_err!(InvalidSize, format!("Empty range {:#x?}", range));
        }
        // Ranges are disjoint, so only the last one starting before `range.end` can overlap.
        if let Some((_, (node, _))) = self.tree.range(..range.end).last() {
            if overlap(node, &range).is_some() {
                return encl_result_err!(
                    AlreadyOccupied,
                    format!("Insert {:#x?} overlaps {:#x?}", range, node)
                );
            }
        }
        self.tree.insert(range.start, (range, value));
        Ok(())
    }

    /// Remove the entry whose range completely matches `range`.
    pub fn remove(&mut self, range: &Range<usize>) -> EnclResult<V> {
        match self.tree.get(&range.start) {
            Some((var, _)) if var == range => {}
            Some((var, _)) => {
                return encl_result_err!(
                    NotFound,
                    format!("Range {:#x?} does not match {:#x?}", range, var)
                )
            }
            None => {
                return encl_result_err!(NotFound, format!("Range {:#x?} does not exist", range))
            }
        }
        match self.tree.remove(&range.start) {
            Some((_, value)) => Ok(value),
            None => encl_result_err!(NotFound),
        }
    }

    /// Returns the range containing `point` and its value.
    pub fn find(&self, point: usize) -> Option<(&Range<usize>, &V)> {
        let (_, (range, value)) = self.tree.range(..=point).last()?;
        if range.contains(&point) {
            Some((range, value))
        } else {
            None
        }
    }

    /// Returns true if there is a range that contains the point argument.
    pub fn contains(&self, point: usize) -> bool {
        self.find(point).is_some()
    }

    /// Returns true if a single range covers the whole of `range`.
    pub fn contains_range(&self, range: &Range<usize>) -> bool {
        match self.find(range.start) {
            Some((node, _)) => node.end >= range.end,
            None => false,
        }
    }

    /// Returns the parts of the stored ranges which overlap `range`.
    /// For example, if the tree contains [[1000..5000], [8000..11000]], and the given range
    /// is (4000..9000), you'll get back [[4000..5000], [8000..9000]]
    pub fn get_overlap(&self, range: &Range<usize>) -> Vec<Range<usize>> {
        // We might have to look at the element immediately preceeding range.start
        let start = self
            .tree
            .range(..=range.start)
            .last()
            .map_or(range.start, |(start, _)| *start);
        self.tree
            .range(start..range.end)
            .filter_map(|(_, (var, _))| overlap(range, var))
            .collect()
    }
}

impl<V> Default for IntervalTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnclErrorNum;

    #[test]
    fn test_insert_overlap() {
        let mut tree = IntervalTree::new();
        tree.insert(0x1000..0x5000, 1).unwrap();
        tree.insert(0x8000..0xb000, 2).unwrap();
        tree.insert(0x5000..0x8000, 3).unwrap();
        for range in &[0x4000..0x6000, 0x0..0x2000, 0xa000..0xc000, 0x2000..0x3000] {
            let err = tree.insert(range.clone(), 4).unwrap_err();
            assert_eq!(err.num(), EnclErrorNum::AlreadyOccupied);
        }
        assert_eq!(
            tree.insert(0x2000..0x2000, 4).unwrap_err().num(),
            EnclErrorNum::InvalidSize
        );
        assert_eq!(tree.get_overlap(&(0..0xc000)).len(), 3);
    }

    #[test]
    fn test_find_and_remove() {
        let mut tree = IntervalTree::new();
        tree.insert(0x1000..0x5000, 'a').unwrap();
        tree.insert(0x8000..0xb000, 'b').unwrap();
        assert_eq!(tree.find(0x4fff), Some((&(0x1000..0x5000), &'a')));
        assert_eq!(tree.find(0x5000), None);
        assert!(tree.contains(0x8000));
        assert!(tree.contains_range(&(0x2000..0x5000)));
        assert!(!tree.contains_range(&(0x2000..0x9000)));
        assert_eq!(
            tree.get_overlap(&(0x4000..0x9000)),
            vec![0x4000..0x5000, 0x8000..0x9000]
        );

        assert_eq!(
            tree.remove(&(0x1000..0x2000)).unwrap_err().num(),
            EnclErrorNum::NotFound
        );
        assert_eq!(tree.remove(&(0x1000..0x5000)).unwrap(), 'a');
        assert_eq!(
            tree.remove(&(0x1000..0x5000)).unwrap_err().num(),
            EnclErrorNum::NotFound
        );
        assert!(!tree.contains(0x1000));
    }
}
