// Copyright (C) corpuslint contributors
// SPDX-License-Identifier: Apache-2.0

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// 	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The unit of work handed to a single worker.

use serde::{Deserialize, Serialize};

/// An ordered, non-empty set of input files assigned to one worker, at a given retry depth.
///
/// `Batch` is immutable once created: recovery never mutates a batch in place, it produces new
/// batches via [`Batch::bisect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: u64,
    pub files: Vec<String>,
    pub retries: u32,
}

impl Batch {
    pub fn new(id: u64, files: Vec<String>, retries: u32) -> Self {
        debug_assert!(!files.is_empty(), "a batch must carry at least one file");
        Self { id, files, retries }
    }

    /// Splits this batch into two children of roughly equal size, one retry deeper.
    ///
    /// Returns `None` when the batch cannot be split further (a single file can't be bisected;
    /// the caller is expected to treat that as a terminal failure instead).
    ///
    /// `next_id` is called once per child to obtain a fresh, monotonically increasing batch id;
    /// the orchestrator owns id allocation, so bisection itself stays a pure function of its
    /// inputs plus that one side-effecting callback.
    pub fn bisect(&self, mut next_id: impl FnMut() -> u64) -> Option<(Batch, Batch)> {
        if self.files.len() < 2 {
            return None;
        }
        let mid = self.files.len().div_ceil(2);
        let (left_files, right_files) = self.files.split_at(mid);
        let retries = self.retries + 1;
        let left = Batch::new(next_id(), left_files.to_vec(), retries);
        let right = Batch::new(next_id(), right_files.to_vec(), retries);
        Some((left, right))
    }
}

/// Default divisor used by [`initial_partition`] when the caller doesn't override it.
pub const DEFAULT_INITIAL_DIVISOR: usize = 4;

/// Splits a flat file list into consecutive batches of `ceil(len / divisor)` files each (the
/// last batch may be shorter). `divisor` is clamped to at least 1 so a degenerate `0` can't be
/// passed straight through into a division.
pub fn initial_partition(files: &[String], divisor: usize, mut next_id: impl FnMut() -> u64) -> Vec<Batch> {
    if files.is_empty() {
        return Vec::new();
    }
    let divisor = divisor.max(1);
    let size = files.len().div_ceil(divisor).max(1);
    files
        .chunks(size)
        .map(|chunk| Batch::new(next_id(), chunk.to_vec(), 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(start: u64) -> impl FnMut() -> u64 {
        let mut next = start;
        move || {
            let id = next;
            next += 1;
            id
        }
    }

    fn files(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("/src/file{i}.ts")).collect()
    }

    #[test]
    fn initial_partition_produces_expected_sizes_for_s1() {
        let batches = initial_partition(&files(10), 4, ids(0));
        let sizes: Vec<usize> = batches.iter().map(|b| b.files.len()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        assert_eq!(batches.iter().map(|b| b.files.len()).sum::<usize>(), 10);
    }

    #[test]
    fn initial_partition_empty_input_yields_no_batches() {
        assert!(initial_partition(&[], 4, ids(0)).is_empty());
    }

    #[test]
    fn initial_partition_zero_divisor_does_not_panic() {
        let batches = initial_partition(&files(3), 0, ids(0));
        // divisor clamped to 1: one batch holding everything.
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].files.len(), 3);
    }

    #[test]
    fn bisect_splits_evenly_and_preserves_order() {
        let batch = Batch::new(0, files(5), 1);
        let (left, right) = batch.bisect(ids(100)).expect("5 files bisects");
        assert_eq!(left.files, files(5)[..3]);
        assert_eq!(right.files, files(5)[3..]);
        assert_eq!(left.retries, 2);
        assert_eq!(right.retries, 2);
        assert_eq!(left.id, 100);
        assert_eq!(right.id, 101);

        let mut rejoined = left.files.clone();
        rejoined.extend(right.files.clone());
        assert_eq!(rejoined, batch.files);
    }

    #[test]
    fn bisect_singleton_is_terminal() {
        let batch = Batch::new(0, files(1), 2);
        assert!(batch.bisect(ids(0)).is_none());
    }

    #[test]
    fn bisect_two_files_splits_one_each() {
        let batch = Batch::new(0, files(2), 0);
        let (left, right) = batch.bisect(ids(0)).unwrap();
        assert_eq!(left.files.len(), 1);
        assert_eq!(right.files.len(), 1);
    }
}
