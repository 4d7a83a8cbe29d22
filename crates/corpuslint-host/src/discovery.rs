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

//! File discovery (supplemented, SPEC_FULL.md §2B): a thin wrapper over the `glob` crate that
//! turns `--target`/`--glob` into the absolute path list `initial_partition` consumes.

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("invalid glob pattern {pattern:?}: {err}")]
    Pattern { pattern: String, err: String },
    #[error("failed to read a matched path: {0}")]
    Io(#[from] std::io::Error),
}

/// Expands `pattern` relative to `target` into a sorted list of absolute path strings. Sorting
/// makes the resulting batches (and hence worker assignment) reproducible across runs regardless
/// of the OS's directory-iteration order; `initial_partition` is a pure function of this list.
pub fn discover_files(target: &Path, pattern: &str) -> Result<Vec<String>, DiscoveryError> {
    let full_pattern = target.join(pattern).to_string_lossy().into_owned();
    let paths = glob::glob(&full_pattern)
        .map_err(|err| DiscoveryError::Pattern { pattern: full_pattern.clone(), err: err.to_string() })?;

    let mut files = Vec::new();
    for entry in paths {
        let path = entry.map_err(|err| DiscoveryError::Io(err.into_error()))?;
        if !path.is_file() {
            continue;
        }
        let absolute = path.canonicalize().unwrap_or(path);
        files.push(absolute.to_string_lossy().into_owned());
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discovers_matching_files_sorted_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/b.ts"), "").unwrap();
        fs::write(dir.path().join("src/a.ts"), "").unwrap();
        fs::write(dir.path().join("src/nested/c.ts"), "").unwrap();
        fs::write(dir.path().join("src/notes.md"), "").unwrap();

        let files = discover_files(dir.path(), "src/**/*.ts").unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| f.ends_with(".ts")));
        assert!(files.windows(2).all(|w| w[0] <= w[1]), "result must be sorted");
    }

    #[test]
    fn empty_directory_yields_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = discover_files(dir.path(), "**/*.ts").unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn invalid_pattern_is_reported_as_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_files(dir.path(), "[").unwrap_err();
        assert!(matches!(err, DiscoveryError::Pattern { .. }));
    }
}
