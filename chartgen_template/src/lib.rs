//! Macro templates for metric names
//!
//! A [`MacroTemplate`] is a string in which `$name$` denotes a macro and `$$`
//! denotes a literal `$`. Templates resolve to concrete strings given a set of
//! variables and, in the other direction, reverse-resolve a concrete string
//! into the variables that would have produced it.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    borrow::Cow,
    collections::{BTreeMap, btree_map::Entry},
    fmt,
};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Opens and closes a macro. Doubled, it is a literal.
pub const DELIMITER: char = '$';

/// Macro name to bound value.
pub type Bindings = BTreeMap<String, String>;

/// Errors produced by [`MacroTemplate`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The template ends inside a macro.
    #[error("Unclosed macro starting at position {position}")]
    UnclosedMacro {
        /// Byte offset of the opening delimiter
        position: usize,
    },
    /// Macros had no value and no default was given.
    #[error("Can't resolve macros: {}", .macros.join(", "))]
    Unresolved {
        /// Names of every macro left without a value
        macros: Vec<String>,
    },
    /// The reverse-resolution expression could not be compiled.
    #[error("Failed to compile template expression: {0}")]
    Regex(#[from] regex::Error),
}

/// A piece of a parsed template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Text taken as is, with `$$` already collapsed to `$`.
    Literal(&'a str),
    /// The name of a macro.
    Macro(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Macro(String),
}

/// A template string with `$name$` macros
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacroTemplate {
    text: String,
    parts: Vec<Part>,
    macros: Vec<String>,
    regex: Regex,
}

impl MacroTemplate {
    /// Parse `text` into a template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnclosedMacro`] if a macro is opened but never closed,
    /// or [`Error::Regex`] if the template is too large to compile.
    pub fn new(text: impl Into<String>) -> Result<Self, Error> {
        let text = text.into();
        let parts = parse(&text)?;

        let mut macros: Vec<String> = Vec::new();
        let mut expression = String::from(r"(?s)\A");
        for part in &parts {
            match part {
                Part::Literal(literal) => expression.push_str(&regex::escape(literal)),
                Part::Macro(name) => {
                    expression.push_str("(.*)");
                    if !macros.contains(name) {
                        macros.push(name.clone());
                    }
                }
            }
        }
        expression.push_str(r"\z");
        let regex = Regex::new(&expression)?;

        Ok(Self {
            text,
            parts,
            macros,
            regex,
        })
    }

    /// The template text as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Unique macro names, in order of first appearance.
    #[must_use]
    pub fn macros(&self) -> &[String] {
        &self.macros
    }

    /// Whether `name` is one of this template's macros.
    #[must_use]
    pub fn has_macro(&self, name: &str) -> bool {
        self.macros.iter().any(|m| m == name)
    }

    /// The parsed segments of this template, in order.
    pub fn segments(&self) -> impl Iterator<Item = Segment<'_>> {
        self.parts.iter().map(|part| match part {
            Part::Literal(literal) => Segment::Literal(literal),
            Part::Macro(name) => Segment::Macro(name),
        })
    }

    /// Substitute every macro with the value `lookup` returns for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unresolved`] naming every macro `lookup` had no value
    /// for.
    pub fn resolve_with<'a, F>(&self, mut lookup: F) -> Result<String, Error>
    where
        F: FnMut(&str) -> Option<Cow<'a, str>>,
    {
        let mut resolved = String::with_capacity(self.text.len());
        let mut missing: Vec<String> = Vec::new();

        for part in &self.parts {
            match part {
                Part::Literal(literal) => resolved.push_str(literal),
                Part::Macro(name) => match lookup(name) {
                    Some(value) => resolved.push_str(&value),
                    None => {
                        if !missing.contains(name) {
                            missing.push(name.clone());
                        }
                    }
                },
            }
        }

        if missing.is_empty() {
            Ok(resolved)
        } else {
            Err(Error::Unresolved { macros: missing })
        }
    }

    /// Substitute every macro with its value in `variables`, falling back to
    /// `default` when given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unresolved`] if a macro has no value and `default` is
    /// `None`.
    pub fn resolve(&self, variables: &Bindings, default: Option<&str>) -> Result<String, Error> {
        self.resolve_with(|name| {
            variables
                .get(name)
                .map(String::as_str)
                .or(default)
                .map(Cow::Borrowed)
        })
    }

    /// Recover the macro values that resolve this template to `concrete`.
    ///
    /// Returns `None` if `concrete` does not have the template's shape, or if
    /// a macro that occurs more than once would be bound to differing values.
    #[must_use]
    pub fn reverse_resolve(&self, concrete: &str) -> Option<Bindings> {
        let captures = self.regex.captures(concrete)?;

        let occurrences = self.parts.iter().filter_map(|part| match part {
            Part::Macro(name) => Some(name),
            Part::Literal(_) => None,
        });

        let mut bindings = Bindings::new();
        for (index, name) in occurrences.enumerate() {
            let value = captures.get(index + 1).map_or("", |m| m.as_str());
            match bindings.entry(name.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(value.to_string());
                }
                Entry::Occupied(entry) => {
                    if entry.get() != value {
                        return None;
                    }
                }
            }
        }

        Some(bindings)
    }
}

fn parse(text: &str) -> Result<Vec<Part>, Error> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = text;
    let mut offset = 0;

    while let Some(open) = rest.find(DELIMITER) {
        literal.push_str(&rest[..open]);
        let inner = &rest[open + 1..];
        let Some(close) = inner.find(DELIMITER) else {
            return Err(Error::UnclosedMacro {
                position: offset + open,
            });
        };

        let name = &inner[..close];
        if name.is_empty() {
            literal.push(DELIMITER);
        } else {
            if !literal.is_empty() {
                parts.push(Part::Literal(std::mem::take(&mut literal)));
            }
            parts.push(Part::Macro(name.to_string()));
        }

        let consumed = open + close + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }

    Ok(parts)
}

impl PartialEq for MacroTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for MacroTemplate {}

impl fmt::Display for MacroTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl TryFrom<String> for MacroTemplate {
    type Error = Error;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::new(text)
    }
}

impl TryFrom<&str> for MacroTemplate {
    type Error = Error;

    fn try_from(text: &str) -> Result<Self, Self::Error> {
        Self::new(text)
    }
}

impl From<MacroTemplate> for String {
    fn from(template: MacroTemplate) -> Self {
        template.text
    }
}
