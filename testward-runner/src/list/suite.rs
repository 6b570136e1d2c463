// Copyright (c) The testward Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{SuiteParseError, SuiteParseErrorKind};
use camino::Utf8Path;
use indexmap::IndexMap;
use quick_xml::{Reader, events::Event};
use std::fs;

/// A parsed suite definition: the `<testsuite>` trees of an XML
/// configuration file.
///
/// Only `<testsuite>` nodes and their direct `<directory>`, `<file>` and
/// `<exclude>` children are modeled. Everything else in the document
/// (engine settings, logging targets, filters) belongs to other
/// collaborators and is ignored here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SuiteDefinition {
    /// The declared sub-suites, in document order.
    pub suites: Vec<SuiteEntry>,
}

/// A single `<testsuite>` node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SuiteEntry {
    /// The `name` attribute, or empty if unnamed.
    pub name: String,
    /// Direct children, in document order.
    pub members: Vec<SuiteMember>,
}

/// A direct child of a `<testsuite>` node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SuiteMember {
    /// `<directory attr="...">path</directory>`: recursively expanded into
    /// files matching a suffix. Attributes other than `suffix` propagate to
    /// every yielded file as metadata.
    Directory {
        /// The directory path, as written in the document.
        path: String,
        /// Raw attributes, including any `suffix` directive.
        attributes: IndexMap<String, String>,
    },

    /// `<file attr="...">path</file>`: a single declared file.
    File {
        /// The file path, as written in the document.
        path: String,
        /// Raw attributes.
        attributes: IndexMap<String, String>,
    },

    /// `<exclude>pattern</exclude>`: exact path, directory prefix, or
    /// glob pattern to exclude.
    Exclude {
        /// The pattern, as written in the document.
        pattern: String,
    },
}

impl SuiteDefinition {
    /// Reads and parses the suite definition at `path`.
    pub fn from_file(path: &Utf8Path) -> Result<Self, SuiteParseError> {
        let contents = fs::read_to_string(path)
            .map_err(|error| SuiteParseError::new(path, SuiteParseErrorKind::Read(error)))?;
        Self::parse(&contents)
            .map_err(|error| SuiteParseError::new(path, SuiteParseErrorKind::Xml(error)))
    }

    /// Parses a suite definition from an XML string.
    pub fn parse(xml: &str) -> Result<Self, quick_xml::Error> {
        let mut reader = Reader::from_str(xml);
        let mut definition = SuiteDefinition::default();

        // Element nesting depth; each open <testsuite> remembers the depth
        // it was opened at so members are only captured from its *direct*
        // children.
        let mut depth = 0usize;
        let mut open_suites: Vec<(usize, SuiteEntry)> = Vec::new();
        // (element name, attributes, accumulated text) of an open member
        // element.
        let mut open_member: Option<(Vec<u8>, IndexMap<String, String>, String)> = None;

        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Start(start) => {
                    depth += 1;
                    match start.name().as_ref() {
                        b"testsuite" if open_member.is_none() => {
                            open_suites.push((depth, suite_entry(&start)?));
                        }
                        tag @ (b"directory" | b"file" | b"exclude")
                            if open_member.is_none() && child_of_suite(depth, &open_suites) =>
                        {
                            open_member =
                                Some((tag.to_owned(), attributes_of(&start)?, String::new()));
                        }
                        _ => {}
                    }
                }
                Event::Empty(start) => match start.name().as_ref() {
                    b"testsuite" if open_member.is_none() => {
                        definition.suites.push(suite_entry(&start)?);
                    }
                    // A self-closing member has no text content; record it
                    // with an empty path so enumeration can warn about it.
                    tag @ (b"directory" | b"file" | b"exclude")
                        if open_member.is_none() && child_of_suite(depth + 1, &open_suites) =>
                    {
                        if let Some((_, suite)) = open_suites.last_mut() {
                            suite
                                .members
                                .push(member_from(tag, attributes_of(&start)?, String::new()));
                        }
                    }
                    _ => {}
                },
                Event::Text(text) => {
                    if let Some((_, _, content)) = open_member.as_mut() {
                        content.push_str(&text.unescape()?);
                    }
                }
                Event::CData(cdata) => {
                    if let Some((_, _, content)) = open_member.as_mut() {
                        content.push_str(&String::from_utf8_lossy(&cdata.into_inner()));
                    }
                }
                Event::End(end) => {
                    let tag = end.name().as_ref().to_owned();
                    if open_member.as_ref().is_some_and(|(open_tag, _, _)| *open_tag == tag) {
                        if let Some((_, attributes, content)) = open_member.take()
                            && let Some((_, suite)) = open_suites.last_mut()
                        {
                            suite.members.push(member_from(&tag, attributes, content));
                        }
                    } else if tag == b"testsuite"
                        && open_suites.last().is_some_and(|(d, _)| *d == depth)
                        && let Some((_, suite)) = open_suites.pop()
                    {
                        definition.suites.push(suite);
                    }
                    depth = depth.saturating_sub(1);
                }
                _ => {}
            }
        }

        Ok(definition)
    }
}

/// True if an element opened at `element_depth` is a direct child of the
/// innermost open `<testsuite>`.
fn child_of_suite(element_depth: usize, open_suites: &[(usize, SuiteEntry)]) -> bool {
    open_suites.last().is_some_and(|(suite_depth, _)| element_depth == suite_depth + 1)
}

fn suite_entry(
    start: &quick_xml::events::BytesStart<'_>,
) -> Result<SuiteEntry, quick_xml::Error> {
    let mut suite = SuiteEntry::default();
    if let Some(name) = attributes_of(start)?.shift_remove("name") {
        suite.name = name;
    }
    Ok(suite)
}

fn member_from(tag: &[u8], attributes: IndexMap<String, String>, content: String) -> SuiteMember {
    let content = content.trim().to_owned();
    match tag {
        b"directory" => SuiteMember::Directory { path: content, attributes },
        b"file" => SuiteMember::File { path: content, attributes },
        _ => SuiteMember::Exclude { pattern: content },
    }
}

fn attributes_of(
    start: &quick_xml::events::BytesStart<'_>,
) -> Result<IndexMap<String, String>, quick_xml::Error> {
    let mut attributes = IndexMap::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value()?.into_owned();
        attributes.insert(key, value);
    }
    Ok(attributes)
}
