//! Minimal INI document model for `config.txt`
//!
//! Sections and keys keep their file order so a load/save cycle only touches
//! the values that were changed.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: key/value pair found before any [section] header")]
    MissingSectionHeader { line: usize },

    #[error("line {line}: expected `key = value`, got {content:?}")]
    MalformedEntry { line: usize, content: String },

    #[error("line {line}: unterminated section header {content:?}")]
    MalformedSection { line: usize, content: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = normalize_key(key);
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let key = normalize_key(key);
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let key = normalize_key(key);
        let pos = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(pos).1)
    }
}

/// An ordered section -> key -> value mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ini {
    sections: Vec<Section>,
}

impl Ini {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse INI text.
    ///
    /// Accepts `key = value` and `key: value`, skips `#` and `;` comment
    /// lines, lower-cases keys, and folds indented lines into the value of
    /// the preceding key, blank lines in between included. Repeated sections
    /// are merged; repeated keys keep the last value.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let mut ini = Self::new();
        let mut current: Option<usize> = None;
        let mut last_key: Option<String> = None;
        let mut blank_run = 0;

        for (idx, raw) in input.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end();
            let trimmed = line.trim_start();

            if trimmed.is_empty() {
                blank_run += 1;
                continue;
            }
            let blanks = std::mem::take(&mut blank_run);
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            // Indented line continues the previous value
            if line.len() != trimmed.len() {
                if let (Some(section), Some(key)) = (current, last_key.as_deref()) {
                    let section = &mut ini.sections[section];
                    let mut value = section.get(key).unwrap_or_default().to_string();
                    value.push_str(&"\n".repeat(blanks + 1));
                    value.push_str(trimmed);
                    section.set(key, value);
                    continue;
                }
            }

            if let Some(rest) = trimmed.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .ok_or_else(|| ParseError::MalformedSection {
                        line: line_no,
                        content: trimmed.to_string(),
                    })?
                    .trim();
                current = Some(ini.section_index_or_insert(name));
                last_key = None;
                continue;
            }

            let section = current.ok_or(ParseError::MissingSectionHeader { line: line_no })?;
            let delim = trimmed
                .find(|c: char| c == '=' || c == ':')
                .ok_or_else(|| ParseError::MalformedEntry {
                    line: line_no,
                    content: trimmed.to_string(),
                })?;
            let key = trimmed[..delim].trim();
            if key.is_empty() {
                return Err(ParseError::MalformedEntry {
                    line: line_no,
                    content: trimmed.to_string(),
                });
            }
            let value = trimmed[delim + 1..].trim();
            ini.sections[section].set(key, value);
            last_key = Some(normalize_key(key));
        }

        Ok(ini)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Mutable access to a section, creating it at the end if absent.
    pub fn section_mut(&mut self, name: &str) -> &mut Section {
        let idx = self.section_index_or_insert(name);
        &mut self.sections[idx]
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?.get(key)
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.section_mut(section).set(key, value);
    }

    fn section_index_or_insert(&mut self, name: &str) -> usize {
        match self.sections.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.sections.push(Section::new(name));
                self.sections.len() - 1
            }
        }
    }
}

impl fmt::Display for Ini {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in &self.sections {
            writeln!(f, "[{}]", section.name)?;
            for (key, value) in &section.entries {
                writeln!(f, "{} = {}", key, value.replace('\n', "\n\t"))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}
