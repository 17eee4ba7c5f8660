//! The metrics catalog
//!
//! A [`Catalog`] answers one question: which metric names fit a curve's
//! metric template once some of its macros are pinned to fixed values. The
//! macros left free are wildcards. [`StaticCatalog`] answers from an
//! in-memory list of names, matching them the way Graphite expands a metric
//! path glob in which only the free macros are wildcards.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chartgen_template::{MacroTemplate, Segment};
use regex::Regex;
use rustc_hash::FxHashSet;
use tracing::debug;

/// Stands in for every macro a query does not pin.
pub const WILDCARD: &str = "*";

/// Errors produced by [`StaticCatalog`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error reading a metric name list
    #[error("Failed to read metric names from {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The query could not be compiled into a matcher
    #[error("Invalid metric path glob: {0}")]
    Glob(#[from] regex::Error),
}

/// A source of metric names
///
/// The literal text of a query's pattern is matched as is, the same way
/// [`MacroTemplate::reverse_resolve`] matches it. A catalog must not read
/// glob syntax into it, or it will return names that no curve can match.
pub trait Catalog {
    /// Error produced when the catalog cannot answer a query.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Return, in the catalog's order, every metric name that `query`
    /// selects.
    ///
    /// # Errors
    ///
    /// Implementation specific. Errors are passed through to callers as is.
    fn fetch_names(&self, query: &Query<'_>) -> Result<Vec<String>, Self::Error>;

    /// Start a query for metrics shaped like `pattern`.
    fn select<'a>(&'a self, pattern: &'a MacroTemplate) -> Select<'a, Self>
    where
        Self: Sized,
    {
        Select {
            catalog: self,
            query: Query::new(pattern),
        }
    }
}

/// A metric template plus equality predicates on its macros
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query<'a> {
    pattern: &'a MacroTemplate,
    predicates: Vec<(&'a str, &'a str)>,
}

impl<'a> Query<'a> {
    /// Query for every metric shaped like `pattern`.
    #[must_use]
    pub fn new(pattern: &'a MacroTemplate) -> Self {
        Self {
            pattern,
            predicates: Vec::new(),
        }
    }

    /// Pin macro `key` to `value`.
    ///
    /// Keys that are not macros of the pattern are carried but have no
    /// effect. When a key is given twice the later value wins.
    #[must_use]
    pub fn filter(mut self, key: &'a str, value: &'a str) -> Self {
        self.predicates.push((key, value));
        self
    }

    /// The metric template this query is shaped by.
    #[must_use]
    pub fn pattern(&self) -> &'a MacroTemplate {
        self.pattern
    }

    /// The value pinned for macro `key`, if any.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&'a str> {
        self.predicates
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    /// The Graphite metric path glob for this query: pinned macros take
    /// their value, the rest become [`WILDCARD`].
    #[must_use]
    pub fn glob(&self) -> String {
        let mut glob = String::new();
        for segment in self.pattern.segments() {
            match segment {
                Segment::Literal(literal) => glob.push_str(literal),
                Segment::Macro(name) => glob.push_str(self.value(name).unwrap_or(WILDCARD)),
            }
        }
        glob
    }
}

/// A [`Query`] bound to the catalog that will answer it
#[derive(Debug)]
pub struct Select<'a, C> {
    catalog: &'a C,
    query: Query<'a>,
}

impl<'a, C> Select<'a, C>
where
    C: Catalog,
{
    /// See [`Query::filter`].
    #[must_use]
    pub fn filter(mut self, key: &'a str, value: &'a str) -> Self {
        self.query = self.query.filter(key, value);
        self
    }

    /// Run the query.
    ///
    /// # Errors
    ///
    /// Whatever the catalog returns.
    pub fn fetch_names(&self) -> Result<Vec<String>, C::Error> {
        self.catalog.fetch_names(&self.query)
    }
}

/// A catalog over a fixed list of metric names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticCatalog {
    names: Vec<String>,
}

impl StaticCatalog {
    /// Create a catalog from `names`. Repeated names are kept once, at their
    /// first position.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = FxHashSet::default();
        let names = names
            .into_iter()
            .map(Into::into)
            .filter(|name: &String| seen.insert(name.clone()))
            .collect();
        Self { names }
    }

    /// Parse a metric name list: one name per line, surrounding whitespace
    /// trimmed, blank lines and lines starting with `#` skipped.
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        Self::new(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    /// Load a metric name list from `path`. See [`StaticCatalog::parse`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        let catalog = Self::parse(&contents);
        debug!(
            "Loaded {} metric names from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Every name in this catalog, in order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of names in this catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether this catalog holds no names.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S> FromIterator<S> for StaticCatalog
where
    S: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl Catalog for StaticCatalog {
    type Error = Error;

    fn fetch_names(&self, query: &Query<'_>) -> Result<Vec<String>, Self::Error> {
        let matcher = glob_matcher(query)?;
        Ok(self
            .names
            .iter()
            .filter(|name| matcher.is_match(name))
            .cloned()
            .collect())
    }
}

/// Compile `query` into an anchored expression. Template text and pinned
/// values are literal. A free macro matches one path component: it never
/// crosses a `.`.
fn glob_matcher(query: &Query<'_>) -> Result<Regex, regex::Error> {
    let mut expression = String::from(r"(?s)\A");
    for segment in query.pattern().segments() {
        match segment {
            Segment::Literal(literal) => expression.push_str(&regex::escape(literal)),
            Segment::Macro(name) => match query.value(name) {
                Some(value) => expression.push_str(&regex::escape(value)),
                None => expression.push_str("[^.]*"),
            },
        }
    }
    expression.push_str(r"\z");
    Regex::new(&expression)
}
