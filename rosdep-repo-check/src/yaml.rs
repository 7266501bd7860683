// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Line-annotated YAML loading.

rosdep rule files are verified selectively: a diff names the changed
lines, and only the rules whose definitions start at or before those
lines are re-checked. That requires knowing the source line of every
parsed node, which a plain deserializer discards, so rule documents are
loaded through a low-level event parser that records the line of each
node as it is composed.
*/

use {
    crate::error::Result,
    std::collections::BTreeSet,
    yaml_rust::{
        parser::{MarkedEventReceiver, Parser},
        scanner::{Marker, TScalarStyle},
        Event,
    },
};

/// A parsed YAML node along with the line it starts on (1-based).
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedValue {
    pub line: usize,
    pub node: YamlNode,
}

/// The node variants a rules document can contain.
#[derive(Clone, Debug, PartialEq)]
pub enum YamlNode {
    /// Key/value pairs in document order.
    Mapping(Vec<(AnnotatedValue, AnnotatedValue)>),
    Sequence(Vec<AnnotatedValue>),
    Scalar(String),
    Null,
}

impl AnnotatedValue {
    pub fn as_str(&self) -> Option<&str> {
        match &self.node {
            YamlNode::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&[(AnnotatedValue, AnnotatedValue)]> {
        match &self.node {
            YamlNode::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[AnnotatedValue]> {
        match &self.node {
            YamlNode::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a mapping value by scalar key.
    pub fn get(&self, key: &str) -> Option<&AnnotatedValue> {
        self.as_mapping()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

enum Frame {
    Mapping {
        line: usize,
        entries: Vec<(AnnotatedValue, AnnotatedValue)>,
        pending_key: Option<AnnotatedValue>,
    },
    Sequence {
        line: usize,
        items: Vec<AnnotatedValue>,
    },
}

#[derive(Default)]
struct AnnotatingReceiver {
    stack: Vec<Frame>,
    root: Option<AnnotatedValue>,
}

impl AnnotatingReceiver {
    fn push_value(&mut self, value: AnnotatedValue) {
        match self.stack.last_mut() {
            Some(Frame::Mapping {
                entries,
                pending_key,
                ..
            }) => match pending_key.take() {
                Some(key) => entries.push((key, value)),
                None => *pending_key = Some(value),
            },
            Some(Frame::Sequence { items, .. }) => items.push(value),
            None => {
                if self.root.is_none() {
                    self.root = Some(value);
                }
            }
        }
    }
}

impl MarkedEventReceiver for AnnotatingReceiver {
    fn on_event(&mut self, event: Event, marker: Marker) {
        let line = marker.line();

        match event {
            Event::Scalar(value, style, _, _) => {
                let node = if style == TScalarStyle::Plain
                    && matches!(value.as_str(), "" | "~" | "null" | "Null" | "NULL")
                {
                    YamlNode::Null
                } else {
                    YamlNode::Scalar(value)
                };

                self.push_value(AnnotatedValue { line, node });
            }
            Event::SequenceStart(_) => {
                self.stack.push(Frame::Sequence {
                    line,
                    items: Vec::new(),
                });
            }
            Event::SequenceEnd => {
                if let Some(Frame::Sequence { line, items }) = self.stack.pop() {
                    self.push_value(AnnotatedValue {
                        line,
                        node: YamlNode::Sequence(items),
                    });
                }
            }
            Event::MappingStart(_) => {
                self.stack.push(Frame::Mapping {
                    line,
                    entries: Vec::new(),
                    pending_key: None,
                });
            }
            Event::MappingEnd => {
                if let Some(Frame::Mapping { line, entries, .. }) = self.stack.pop() {
                    self.push_value(AnnotatedValue {
                        line,
                        node: YamlNode::Mapping(entries),
                    });
                }
            }
            Event::Alias(_) => {
                self.push_value(AnnotatedValue {
                    line,
                    node: YamlNode::Null,
                });
            }
            Event::Nothing
            | Event::StreamStart
            | Event::StreamEnd
            | Event::DocumentStart
            | Event::DocumentEnd => {}
        }
    }
}

/// Parse a YAML document, annotating every node with its source line.
pub fn load_annotated(text: &str) -> Result<AnnotatedValue> {
    let mut receiver = AnnotatingReceiver::default();
    let mut parser = Parser::new(text.chars());

    parser.load(&mut receiver, false)?;

    Ok(receiver.root.unwrap_or(AnnotatedValue {
        line: 1,
        node: YamlNode::Null,
    }))
}

fn merge_mapping(
    base: &mut Vec<(AnnotatedValue, AnnotatedValue)>,
    addition: Vec<(AnnotatedValue, AnnotatedValue)>,
) {
    for (key, value) in addition {
        let existing = base
            .iter_mut()
            .find(|(k, _)| k.as_str() == key.as_str())
            .map(|(_, v)| v);

        match (existing, value) {
            (
                Some(AnnotatedValue {
                    node: YamlNode::Mapping(base_entries),
                    ..
                }),
                AnnotatedValue {
                    node: YamlNode::Mapping(add_entries),
                    ..
                },
            ) => merge_mapping(base_entries, add_entries),
            (Some(existing), value) => *existing = value,
            (None, value) => base.push((key, value)),
        }
    }
}

/// Reconstruct the sub-tree of a rules document touched by a set of
/// lines.
///
/// For each requested line, the nearest mapping or sequence entry
/// starting at or before it is kept, recursing into mappings so that
/// nesting and ancestry are preserved. Entries are scanned latest-first
/// so the requested line lands in the entry that actually spans it.
pub fn isolate_snippets_by_lines(
    document: &AnnotatedValue,
    line_numbers: &BTreeSet<usize>,
) -> AnnotatedValue {
    let mut matches: Vec<(AnnotatedValue, AnnotatedValue)> = Vec::new();

    let entries = document.as_mapping().unwrap_or_default();

    for &line_number in line_numbers {
        for (key, value) in entries.iter().rev() {
            match &value.node {
                YamlNode::Mapping(_) if value.line <= line_number => {
                    let isolated = isolate_snippets_by_lines(
                        value,
                        &BTreeSet::from([line_number]),
                    );

                    merge_mapping(&mut matches, vec![(key.clone(), isolated)]);
                    break;
                }
                YamlNode::Sequence(_) if value.line <= line_number => {
                    merge_mapping(&mut matches, vec![(key.clone(), value.clone())]);
                    break;
                }
                _ => {}
            }
        }
    }

    AnnotatedValue {
        line: document.line,
        node: YamlNode::Mapping(matches),
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const RULES_YAML: &str = indoc! {"
        first_key:
          ubuntu: [libfirst-dev]
        second_key:
          ubuntu:
            focal: [libsecond-focal]
            jammy: [libsecond-jammy]
          fedora: [second-devel]
        third_key:
          alpine: [third]
    "};

    fn keys_of(value: &AnnotatedValue) -> Vec<&str> {
        value
            .as_mapping()
            .unwrap()
            .iter()
            .filter_map(|(k, _)| k.as_str())
            .collect()
    }

    #[test]
    fn nodes_carry_their_source_lines() -> Result<()> {
        let document = load_annotated(RULES_YAML)?;

        assert_eq!(document.get("first_key").unwrap().line, 2);
        assert_eq!(document.get("second_key").unwrap().line, 4);

        let second = document.get("second_key").unwrap();
        assert_eq!(second.get("ubuntu").unwrap().line, 5);
        assert_eq!(second.get("ubuntu").unwrap().get("jammy").unwrap().line, 6);

        Ok(())
    }

    #[test]
    fn scalars_sequences_and_nulls_parse() -> Result<()> {
        let document = load_annotated("key:\nother: [a, b]\n")?;

        assert_eq!(document.get("key").unwrap().node, YamlNode::Null);

        let items = document.get("other").unwrap().as_sequence().unwrap();
        assert_eq!(items[0].as_str(), Some("a"));
        assert_eq!(items[1].as_str(), Some("b"));

        Ok(())
    }

    #[test]
    fn isolation_keeps_only_touched_keys() -> Result<()> {
        let document = load_annotated(RULES_YAML)?;

        // Line 5 is inside second_key's ubuntu mapping.
        let isolated = isolate_snippets_by_lines(&document, &BTreeSet::from([5]));

        assert_eq!(keys_of(&isolated), ["second_key"]);

        let second = isolated.get("second_key").unwrap();
        assert_eq!(keys_of(second), ["ubuntu"]);
        assert_eq!(
            keys_of(second.get("ubuntu").unwrap()),
            ["focal"]
        );

        Ok(())
    }

    #[test]
    fn isolation_merges_multiple_lines() -> Result<()> {
        let document = load_annotated(RULES_YAML)?;

        let isolated = isolate_snippets_by_lines(&document, &BTreeSet::from([2, 5, 6]));

        assert_eq!(keys_of(&isolated), ["first_key", "second_key"]);

        let ubuntu = isolated.get("second_key").unwrap().get("ubuntu").unwrap();
        assert_eq!(keys_of(ubuntu), ["focal", "jammy"]);

        Ok(())
    }

    #[test]
    fn isolation_of_untouched_lines_is_empty() -> Result<()> {
        let document = load_annotated(RULES_YAML)?;

        let isolated = isolate_snippets_by_lines(&document, &BTreeSet::new());

        assert!(isolated.as_mapping().unwrap().is_empty());

        Ok(())
    }
}
