//! Chart templates
//!
//! A [`Template`] names the curves that belong on one chart. Each curve has a
//! metric template, which selects and matches metrics from a catalog, and a
//! function template, which renders the matched metric. A template is
//! immutable once built; [`Template::charts`] derives every consistent chart
//! from a catalog without touching it.

use std::collections::BTreeMap;

use chartgen_template::MacroTemplate;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::{
    catalog::{Catalog, Query},
    chart::Chart,
    combination::{Combinations, CurveMatches},
};

/// Errors produced by [`Builder`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Two curves of one template share a name
    #[error("Duplicate curve {curve:?} in template {template:?}")]
    DuplicateCurve {
        /// Template name
        template: String,
        /// Curve name
        curve: String,
    },
}

/// One series of a chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Curve {
    name: String,
    metric: MacroTemplate,
    function: MacroTemplate,
}

impl Curve {
    /// Create a curve.
    #[must_use]
    pub fn new(name: impl Into<String>, metric: MacroTemplate, function: MacroTemplate) -> Self {
        Self {
            name: name.into(),
            metric,
            function,
        }
    }

    /// The curve's name, unique within its template.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The template that selects and matches this curve's metrics.
    #[must_use]
    pub fn metric(&self) -> &MacroTemplate {
        &self.metric
    }

    /// The template that renders this curve for one metric.
    #[must_use]
    pub fn function(&self) -> &MacroTemplate {
        &self.function
    }
}

/// The curves and render parameters of one kind of chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    curves: Vec<Curve>,
    url_params: BTreeMap<String, MacroTemplate>,
}

impl Template {
    /// Start building a template called `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> Builder {
        Builder {
            name: name.into(),
            curves: Vec::new(),
            url_params: BTreeMap::new(),
        }
    }

    /// The template's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every curve, in configured order.
    #[must_use]
    pub fn curves(&self) -> &[Curve] {
        &self.curves
    }

    /// The curve called `name`.
    #[must_use]
    pub fn curve(&self, name: &str) -> Option<&Curve> {
        self.curves.iter().find(|curve| curve.name == name)
    }

    /// Additional render parameters by name.
    #[must_use]
    pub fn url_params(&self) -> &BTreeMap<String, MacroTemplate> {
        &self.url_params
    }

    /// Every chart this template yields for the metrics `catalog` holds,
    /// restricted by `filter`.
    ///
    /// `filter` pins macros to values and is applied to every curve's query
    /// alike. Each curve's candidates are reverse-resolved against its metric
    /// template and kept if they match; a name the catalog returns more than
    /// once is kept at its first position. Curves left without matches take no
    /// part in any chart. The charts are then produced lazily, one per
    /// consistent combination, in lexicographic order over the curves'
    /// matches with the last curve turning fastest.
    ///
    /// # Errors
    ///
    /// Returns the catalog's error, unchanged, if any query fails.
    pub fn charts<'a, C>(
        &'a self,
        catalog: &'a C,
        filter: &[(String, String)],
    ) -> Result<Charts<'a, C>, C::Error>
    where
        C: Catalog,
    {
        let mut matches = Vec::with_capacity(self.curves.len());
        for curve in &self.curves {
            let query = filter
                .iter()
                .fold(Query::new(&curve.metric), |query, (key, value)| {
                    query.filter(key, value)
                });
            let candidates = catalog.fetch_names(&query)?;
            let candidate_count = candidates.len();

            let mut seen = FxHashSet::default();
            let metrics: Vec<_> = candidates
                .into_iter()
                .filter(|name| seen.insert(name.clone()))
                .filter_map(|name| {
                    let bindings = curve.metric.reverse_resolve(&name)?;
                    Some((name, bindings))
                })
                .collect();
            debug!(
                "Template {}: curve {} matched {} of {} candidates for {}",
                self.name,
                curve.name,
                metrics.len(),
                candidate_count,
                query.glob(),
            );

            if !metrics.is_empty() {
                matches.push(CurveMatches { curve, metrics });
            }
        }

        Ok(Charts {
            catalog,
            template: self,
            combinations: Combinations::new(&self.name, matches),
        })
    }
}

/// Builder for [`Template`]
#[derive(Debug, Clone)]
pub struct Builder {
    name: String,
    curves: Vec<Curve>,
    url_params: BTreeMap<String, MacroTemplate>,
}

impl Builder {
    /// Append a curve. Curves keep the order they are added in.
    #[must_use]
    pub fn curve(
        mut self,
        name: impl Into<String>,
        metric: MacroTemplate,
        function: MacroTemplate,
    ) -> Self {
        self.curves.push(Curve::new(name, metric, function));
        self
    }

    /// Set a render parameter, replacing any earlier one of the same name.
    #[must_use]
    pub fn url_param(mut self, name: impl Into<String>, value: MacroTemplate) -> Self {
        self.url_params.insert(name.into(), value);
        self
    }

    /// Finish the template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateCurve`] if two curves share a name.
    pub fn build(self) -> Result<Template, Error> {
        for (index, curve) in self.curves.iter().enumerate() {
            if self.curves[..index].iter().any(|c| c.name == curve.name) {
                return Err(Error::DuplicateCurve {
                    template: self.name,
                    curve: curve.name.clone(),
                });
            }
        }

        Ok(Template {
            name: self.name,
            curves: self.curves,
            url_params: self.url_params,
        })
    }
}

/// The charts of one [`Template::charts`] call, produced lazily
#[derive(Debug, Clone)]
pub struct Charts<'a, C> {
    catalog: &'a C,
    template: &'a Template,
    combinations: Combinations<'a>,
}

impl<'a, C> Iterator for Charts<'a, C> {
    type Item = Chart<'a, C>;

    fn next(&mut self) -> Option<Self::Item> {
        let combination = self.combinations.next()?;
        Some(Chart::new(self.catalog, self.template, combination))
    }
}
