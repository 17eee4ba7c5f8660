//! Charts
//!
//! A [`Chart`] is one consistent combination of metrics together with the
//! template and catalog it came from. Rendering resolves each curve's
//! function template against its picked metric.

use std::{borrow::Cow, collections::BTreeMap};

use chartgen_template::{Bindings, Error};
use serde::Serialize;

use crate::{combination::Combination, template::Template};

/// The macro every curve function may use for its picked metric name.
pub const METRIC_MACRO: &str = "metric";

/// One chart derived from a [`Template`]
#[derive(Debug, Clone)]
pub struct Chart<'a, C> {
    catalog: &'a C,
    template: &'a Template,
    combination: Combination<'a>,
}

/// A chart resolved into plain strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedChart {
    /// Name of the template the chart came from
    pub template: String,
    /// Curve name to picked metric name
    pub metrics: BTreeMap<String, String>,
    /// One resolved function per curve, in curve order
    pub targets: Vec<String>,
    /// Resolved render parameters
    pub url_params: BTreeMap<String, String>,
}

impl<'a, C> Chart<'a, C> {
    pub(crate) fn new(catalog: &'a C, template: &'a Template, combination: Combination<'a>) -> Self {
        Self {
            catalog,
            template,
            combination,
        }
    }

    /// The catalog this chart's metrics were found in.
    #[must_use]
    pub fn catalog(&self) -> &'a C {
        self.catalog
    }

    /// The template this chart was derived from.
    #[must_use]
    pub fn template(&self) -> &'a Template {
        self.template
    }

    /// The metrics picked for this chart.
    #[must_use]
    pub fn combination(&self) -> &Combination<'a> {
        &self.combination
    }

    /// Curve name to picked metric name.
    #[must_use]
    pub fn metrics(&self) -> BTreeMap<&str, &str> {
        self.combination.metrics()
    }

    /// Resolve each curve's function template, in curve order.
    ///
    /// A function sees the macros its metric template bound plus
    /// [`METRIC_MACRO`], which is the picked metric name and takes precedence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unresolved`] if a function uses a macro it is not
    /// given.
    pub fn targets(&self) -> Result<Vec<String>, Error> {
        self.combination
            .iter()
            .map(|selection| {
                let bindings = selection.bindings();
                selection.curve().function().resolve_with(|name| {
                    if name == METRIC_MACRO {
                        Some(Cow::Borrowed(selection.metric()))
                    } else {
                        bindings.get(name).map(|v| Cow::Borrowed(v.as_str()))
                    }
                })
            })
            .collect()
    }

    /// Resolve the template's render parameters against the macros bound by
    /// every curve of this chart.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unresolved`] if a parameter uses a macro no curve
    /// bound.
    pub fn url_params(&self) -> Result<BTreeMap<String, String>, Error> {
        let bindings: Bindings = self.combination.bindings();
        self.template
            .url_params()
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.resolve(&bindings, None)?)))
            .collect()
    }

    /// Resolve this chart into plain strings.
    ///
    /// # Errors
    ///
    /// See [`Chart::targets`] and [`Chart::url_params`].
    pub fn render(&self) -> Result<RenderedChart, Error> {
        Ok(RenderedChart {
            template: self.template.name().to_string(),
            metrics: self
                .metrics()
                .into_iter()
                .map(|(curve, metric)| (curve.to_string(), metric.to_string()))
                .collect(),
            targets: self.targets()?,
            url_params: self.url_params()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chartgen_template::MacroTemplate;

    use super::*;
    use crate::catalog::StaticCatalog;

    fn template(text: &str) -> MacroTemplate {
        MacroTemplate::new(text).expect("valid template")
    }

    fn load_template() -> Template {
        Template::builder("load")
            .curve(
                "load1",
                template("icinga2.$host$.services.load.perfdata.load1.value"),
                template("alias(color($metric$, '#1a7dd7'), '$host$ load 1')"),
            )
            .curve(
                "load15",
                template("icinga2.$host$.services.load.perfdata.load15.value"),
                template("alias($metric$, 'load 15')"),
            )
            .url_param("areaMode", template("all"))
            .url_param("title", template("Load on $host$"))
            .build()
            .expect("valid template")
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::new([
            "icinga2.web1.services.load.perfdata.load1.value",
            "icinga2.web1.services.load.perfdata.load15.value",
            "icinga2.web2.services.load.perfdata.load1.value",
        ])
    }

    #[test]
    fn renders_targets_and_params() {
        let template = load_template();
        let catalog = catalog();
        let rendered: Vec<RenderedChart> = template
            .charts(&catalog, &[])
            .expect("queries succeed")
            .map(|chart| chart.render().expect("renderable"))
            .collect();

        assert_eq!(rendered.len(), 1);
        let chart = &rendered[0];
        assert_eq!(chart.template, "load");
        assert_eq!(
            chart.metrics.get("load15").map(String::as_str),
            Some("icinga2.web1.services.load.perfdata.load15.value")
        );
        assert_eq!(
            chart.targets,
            [
                "alias(color(icinga2.web1.services.load.perfdata.load1.value, '#1a7dd7'), 'web1 load 1')",
                "alias(icinga2.web1.services.load.perfdata.load15.value, 'load 15')",
            ]
        );
        assert_eq!(
            chart.url_params.get("title").map(String::as_str),
            Some("Load on web1")
        );
        assert_eq!(
            chart.url_params.get("areaMode").map(String::as_str),
            Some("all")
        );
    }

    #[test]
    fn chart_refers_back_to_its_sources() {
        let template = load_template();
        let catalog = catalog();
        let chart = template
            .charts(&catalog, &[("host".to_string(), "web1".to_string())])
            .expect("queries succeed")
            .next()
            .expect("one chart");
        assert!(std::ptr::eq(chart.template(), &template));
        assert!(std::ptr::eq(chart.catalog(), &catalog));
        assert_eq!(chart.combination().len(), 2);
    }

    #[test]
    fn metric_macro_wins_over_bindings() {
        let template = Template::builder("odd")
            .curve("m", template("servers.$metric$.load"), template("$metric$"))
            .build()
            .expect("valid template");
        let catalog = StaticCatalog::new(["servers.web1.load"]);
        let chart = template
            .charts(&catalog, &[])
            .expect("queries succeed")
            .next()
            .expect("one chart");
        assert_eq!(
            chart.targets().expect("renderable"),
            ["servers.web1.load"]
        );
    }

    #[test]
    fn unknown_macros_fail_rendering() {
        let template = Template::builder("broken")
            .curve(
                "load",
                template("servers.$host$.load"),
                template("alias($metric$, '$service$')"),
            )
            .url_param("title", template("$datacenter$"))
            .build()
            .expect("valid template");
        let catalog = StaticCatalog::new(["servers.web1.load"]);
        let chart = template
            .charts(&catalog, &[])
            .expect("queries succeed")
            .next()
            .expect("one chart");

        assert_eq!(
            chart.targets(),
            Err(Error::Unresolved {
                macros: vec!["service".to_string()]
            })
        );
        assert_eq!(
            chart.url_params(),
            Err(Error::Unresolved {
                macros: vec!["datacenter".to_string()]
            })
        );
        assert!(chart.render().is_err());
    }
}
