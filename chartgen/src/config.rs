//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.
use std::{
    collections::BTreeMap,
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use chartgen_template::MacroTemplate;
use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::template::{self, Template};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error for IO operations when reading config directory
    #[error("Failed to read config directory: {0}")]
    Io(#[from] std::io::Error),
    /// Error for duplicate template names
    #[error("Duplicate template name found: {0}")]
    DuplicateTemplate(String),
    /// Error for an invalid template definition
    #[error(transparent)]
    Template(#[from] template::Error),
    /// Error when no config files found in directory
    #[error("No .yaml config files found in directory: {0}")]
    NoConfigFiles(PathBuf),
    /// Error getting metadata for config path
    #[error("Failed to get metadata for config path {path:?}: {source}")]
    Metadata {
        /// Config path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// Error reading directory entries
    #[error("Failed to read directory entries from {path:?}: {source}")]
    ReadDir {
        /// Directory path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// Error reading directory entry
    #[error("Failed to read directory entry in {dir:?}: {source}")]
    ReadDirEntry {
        /// Directory path
        dir: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
}

fn default_function() -> MacroTemplate {
    MacroTemplate::new("$metric$").expect("Not possible to parse default function")
}

/// Main configuration struct for this program
#[derive(Debug, Default, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The chart templates, in configured order
    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
}

/// Configuration of one [`Template`]
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfig {
    /// Name of the template, unique across the configuration
    pub name: String,
    /// The curves to plot, in order
    pub curves: Vec<CurveConfig>,
    /// Additional render parameters
    #[serde(default)]
    pub url_params: BTreeMap<String, MacroTemplate>,
}

/// Configuration of one curve of a [`TemplateConfig`]
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct CurveConfig {
    /// Name of the curve, unique within its template
    pub name: String,
    /// Metric template: selects catalog metrics and binds their macros
    pub metric: MacroTemplate,
    /// Function template rendering the curve, `$metric$` by default
    #[serde(default = "default_function")]
    pub function: MacroTemplate,
}

impl TemplateConfig {
    /// Build the immutable [`Template`] this configuration describes.
    ///
    /// # Errors
    ///
    /// Returns an error if two curves share a name.
    pub fn build(&self) -> Result<Template, template::Error> {
        let builder = self
            .curves
            .iter()
            .fold(Template::builder(self.name.clone()), |builder, curve| {
                builder.curve(curve.name.clone(), curve.metric.clone(), curve.function.clone())
            });
        self.url_params
            .iter()
            .fold(builder, |builder, (name, value)| {
                builder.url_param(name.clone(), value.clone())
            })
            .build()
    }
}

impl Config {
    /// The template configuration called `name`.
    #[must_use]
    pub fn template(&self, name: &str) -> Option<&TemplateConfig> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Build every configured template, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if any template is invalid.
    pub fn build_templates(&self) -> Result<Vec<Template>, Error> {
        self.templates
            .iter()
            .map(|t| t.build().map_err(Error::from))
            .collect()
    }

    /// Check that template names are unique and every template builds.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        check_duplicate_template_names(&self.templates)?;
        for template in &self.templates {
            template.build()?;
        }
        Ok(())
    }

    /// Merge two `Config` instances together
    ///
    /// Templates are appended. Duplicate names are an error, so the order in
    /// which config files are read only affects template order.
    ///
    /// # Errors
    ///
    /// Returns an error if a template name appears in both.
    fn merge(mut base: Config, overlay: Config) -> Result<Config, Error> {
        base.templates.extend(overlay.templates);
        check_duplicate_template_names(&base.templates)?;
        Ok(base)
    }
}

/// Check for duplicate names in template configs
fn check_duplicate_template_names(templates: &[TemplateConfig]) -> Result<(), Error> {
    let mut seen_names = FxHashSet::default();
    for template in templates {
        if !seen_names.insert(template.name.as_str()) {
            return Err(Error::DuplicateTemplate(template.name.clone()));
        }
    }
    Ok(())
}

/// Parse and validate a single YAML configuration document
///
/// # Errors
///
/// Returns an error if the YAML is invalid or the configuration does not
/// validate, see [`Config::validate`].
pub fn parse_config(contents: &str) -> Result<Config, Error> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a path (file or directory)
///
/// If the path points to a file, loads and parses that single config. If the
/// path points to a directory, composes all .yaml files by combining
/// them. Template names must be unique across all files. Files are read in
/// name order, which fixes the order of templates.
///
/// # Errors
///
/// Returns an error if:
///
/// * Path does not exist or cannot be read
/// * No .yaml files found in directory
/// * Config files contain invalid YAML
/// * Duplicate template names found
/// * A template has duplicate curve names
pub fn load_config_from_path(path: &Path) -> Result<Config, Error> {
    let metadata = fs::metadata(path).map_err(|source| Error::Metadata {
        path: path.to_path_buf(),
        source: Box::new(source),
    })?;

    if metadata.is_file() {
        // Single file, read only the yaml file and nothing else
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        parse_config(&contents)
    } else if metadata.is_dir() {
        // Directory, merge all configs found in this directory
        load_directory_configs(path)
    } else {
        Err(Error::Io(io::Error::new(
            ErrorKind::InvalidInput,
            "Path is neither a file nor a directory",
        )))
    }
}

/// Load and compose all .yaml config files from a directory
///
/// # Errors
///
/// Returns an error if:
///
/// * Directory cannot be read
/// * No .yaml files found
/// * Any config file is invalid
/// * Duplicate template names found
fn load_directory_configs(dir: &Path) -> Result<Config, Error> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|source| Error::ReadDir {
        path: dir.to_path_buf(),
        source: Box::new(source),
    })? {
        let entry = entry.map_err(|source| Error::ReadDirEntry {
            dir: dir.to_path_buf(),
            source: Box::new(source),
        })?;
        let path = entry.path();

        let is_yaml_file = path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yaml")
            && !path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with('.'));

        if is_yaml_file {
            paths.push(path);
        }
    }

    if paths.is_empty() {
        return Err(Error::NoConfigFiles(dir.to_path_buf()));
    }
    paths.sort();

    let mut merged = Config::default();
    for path in paths {
        let contents = fs::read_to_string(&path).map_err(|source| Error::ReadFile {
            path: path.clone(),
            source: Box::new(source),
        })?;
        let partial: Config = serde_yaml::from_str(&contents)?;
        merged = Config::merge(merged, partial)?;
    }

    merged.validate()?;
    Ok(merged)
}
