// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Unified diff line detection.

Verification scopes itself to rules touched by a change, so the diff is
reduced to a map of file path to the line numbers present in the
post-change file.
*/

use std::collections::{BTreeMap, BTreeSet};

/// Line numbers in the target (post-change) version of each file
/// mentioned by a unified diff.
pub fn detect_lines(diff: &str) -> BTreeMap<String, BTreeSet<usize>> {
    let mut lines_by_file: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
    let mut current_file: Option<String> = None;

    for line in diff.lines() {
        if let Some(target) = line.strip_prefix("+++ ") {
            let target = target
                .split('\t')
                .next()
                .unwrap_or(target);
            let target = target.strip_prefix("b/").unwrap_or(target);

            if target == "/dev/null" {
                current_file = None;
            } else {
                current_file = Some(target.to_string());
                lines_by_file.entry(target.to_string()).or_default();
            }

            continue;
        }

        let file = match &current_file {
            Some(file) => file,
            None => continue,
        };

        // Hunk headers look like `@@ -12,3 +14,6 @@`; the `+` side is
        // `start[,count]` with count defaulting to 1.
        if let Some(rest) = line.strip_prefix("@@ ") {
            let target_range = rest
                .split_whitespace()
                .find(|part| part.starts_with('+'))
                .map(|part| part.trim_start_matches('+'));

            let target_range = match target_range {
                Some(range) => range,
                None => continue,
            };

            let (start, count) = match target_range.split_once(',') {
                Some((start, count)) => (start, count),
                None => (target_range, "1"),
            };

            if let (Ok(start), Ok(count)) = (start.parse::<usize>(), count.parse::<usize>()) {
                if let Some(lines) = lines_by_file.get_mut(file.as_str()) {
                    lines.extend(start..start + count);
                }
            }
        }
    }

    lines_by_file.retain(|_, lines| !lines.is_empty());

    lines_by_file
}
