//! Sectioned `key = value` documents.
//!
//! Both the global deployment config and the domain registry use this format.
//! The document keeps every original line so that saving after an edit only
//! changes the lines that were touched.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::warn;

use crate::error::ConfigError;

/// A single line inside a section body.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// A `key = value` pair.
    Entry { key: String, value: String },
    /// A comment, blank line or unparseable line, kept verbatim.
    Verbatim(String),
}

/// A named `[section]` with its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    name: String,
    lines: Vec<Line>,
}

impl Section {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lines: Vec::new(),
        }
    }

    /// Returns the section name as written in its header.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value for `key`; when a key repeats, the last one wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|line| match line {
            Line::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Iterates over entries in file order, duplicates included.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry { key, value } => Some((key.as_str(), value.as_str())),
            Line::Verbatim(_) => None,
        })
    }

    /// Collapses the entries into a map, applying last-wins for duplicates.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Returns true if the section has no `key = value` lines.
    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Sets `key`, rewriting the last existing entry in place or appending
    /// a new one after the last entry.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();

        if let Some(Line::Entry { value: slot, .. }) = self
            .lines
            .iter_mut()
            .rev()
            .find(|line| matches!(line, Line::Entry { key: k, .. } if k == key))
        {
            *slot = value;
            return;
        }

        let insert_at = self
            .lines
            .iter()
            .rposition(|line| matches!(line, Line::Entry { .. }))
            .map(|i| i + 1)
            .unwrap_or(self.lines.len());

        self.lines.insert(
            insert_at,
            Line::Entry {
                key: key.to_string(),
                value,
            },
        );
    }
}

/// An ordered collection of sections parsed from text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    /// Lines before the first section header.
    preamble: Vec<String>,
    sections: Vec<Section>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses document text. `origin` is only used in error messages.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let mut doc = Document::new();
        let mut current: Option<usize> = None;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let trimmed = raw.trim();

            if let Some(header) = trimmed
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                let name = header.trim();
                if name.is_empty() {
                    return Err(ConfigError::ParseFailed {
                        path: origin.to_path_buf(),
                        line: line_no,
                        message: "section header has no name".to_string(),
                    });
                }

                // Repeated headers continue the first occurrence.
                current = match doc.position(name) {
                    Some(pos) => Some(pos),
                    None => {
                        doc.sections.push(Section::new(name));
                        Some(doc.sections.len() - 1)
                    }
                };
                continue;
            }

            let is_comment = trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';');

            let entry = if is_comment {
                None
            } else {
                trimmed.split_once('=').map(|(k, v)| Line::Entry {
                    key: k.trim().to_string(),
                    value: v.trim().to_string(),
                })
            };

            match (current, entry) {
                (Some(pos), Some(Line::Entry { key, value })) if !key.is_empty() => {
                    doc.sections[pos].lines.push(Line::Entry { key, value });
                }
                (Some(pos), _) => {
                    if !is_comment {
                        warn!(path = %origin.display(), line = line_no, "Ignoring line without 'key = value'");
                    }
                    doc.sections[pos].lines.push(Line::Verbatim(raw.to_string()));
                }
                (None, _) => {
                    if !is_comment {
                        warn!(path = %origin.display(), line = line_no, "Ignoring entry outside of any section");
                    }
                    doc.preamble.push(raw.to_string());
                }
            }
        }

        Ok(doc)
    }

    /// Renders the document back to text.
    pub fn render(&self) -> String {
        let mut out = String::new();

        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }

        for section in &self.sections {
            out.push_str(&format!("[{}]\n", section.name));
            for line in &section.lines {
                match line {
                    Line::Entry { key, value } => out.push_str(&format!("{} = {}\n", key, value)),
                    Line::Verbatim(text) => {
                        out.push_str(text);
                        out.push('\n');
                    }
                }
            }
        }

        out
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }

    /// Section names in order of first appearance.
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    /// Returns the named section.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Returns the named section mutably, creating it at the end if absent.
    pub fn section_mut(&mut self, name: &str) -> &mut Section {
        let pos = match self.position(name) {
            Some(pos) => pos,
            None => {
                self.push_section(Section::new(name));
                self.sections.len() - 1
            }
        };
        &mut self.sections[pos]
    }

    /// Returns the named section, failing if it is absent or has no entries.
    pub fn require_section(&self, name: &str) -> Result<&Section, ConfigError> {
        match self.section(name) {
            Some(section) if !section.is_empty() => Ok(section),
            _ => Err(ConfigError::EmptySection {
                section: name.to_string(),
            }),
        }
    }

    /// Shorthand for a value lookup in a section.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section).and_then(|s| s.get(key))
    }

    /// Shorthand for setting a value, creating the section if needed.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.section_mut(section).set(key, value);
    }

    /// Appends a section, separated from the previous one by a blank line.
    fn push_section(&mut self, section: Section) {
        let previous_ends_blank = match self.sections.last() {
            Some(prev) => matches!(prev.lines.last(), Some(Line::Verbatim(t)) if t.trim().is_empty()),
            None => self.preamble.is_empty() || self.preamble.last().is_some_and(|l| l.trim().is_empty()),
        };

        if !previous_ends_blank {
            match self.sections.last_mut() {
                Some(prev) => prev.lines.push(Line::Verbatim(String::new())),
                None => self.preamble.push(String::new()),
            }
        }

        self.sections.push(section);
    }

    /// Removes a section with its whole body. Returns true if it existed.
    pub fn remove_section(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(pos) => {
                self.sections.remove(pos);
                true
            }
            None => false,
        }
    }
}
