//! Combinations of matched metrics
//!
//! Each curve of a template matches some number of metrics. A combination
//! picks one metric per curve; it is consistent when every pair of curves
//! whose metric templates share a macro picked metrics that bind the shared
//! macros to the same values.

use std::{collections::BTreeMap, iter::FusedIterator, slice};

use chartgen_template::{Bindings, MacroTemplate};
use metrics::counter;
use tracing::{debug, trace};

use crate::template::Curve;

/// Every metric that matched one curve, with the macro values each bound.
#[derive(Debug, Clone)]
pub(crate) struct CurveMatches<'a> {
    pub(crate) curve: &'a Curve,
    pub(crate) metrics: Vec<(String, Bindings)>,
}

/// One curve's pick within a [`Combination`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<'a> {
    curve: &'a Curve,
    metric: String,
    bindings: Bindings,
}

impl<'a> Selection<'a> {
    /// The curve this pick is for.
    #[must_use]
    pub fn curve(&self) -> &'a Curve {
        self.curve
    }

    /// The concrete metric name picked.
    #[must_use]
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// The values the curve's metric template bound against the metric.
    #[must_use]
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }
}

/// A consistent pick of one metric per matching curve, in curve order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination<'a> {
    selections: Vec<Selection<'a>>,
}

impl<'a> Combination<'a> {
    /// Every pick, in the template's curve order.
    pub fn iter(&self) -> slice::Iter<'_, Selection<'a>> {
        self.selections.iter()
    }

    /// Number of curves in this combination.
    #[must_use]
    pub fn len(&self) -> usize {
        self.selections.len()
    }

    /// Whether this combination picks nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    /// The pick for the curve named `curve`.
    #[must_use]
    pub fn get(&self, curve: &str) -> Option<&Selection<'a>> {
        self.selections.iter().find(|s| s.curve.name() == curve)
    }

    /// The metric picked for the curve named `curve`.
    #[must_use]
    pub fn metric(&self, curve: &str) -> Option<&str> {
        self.get(curve).map(Selection::metric)
    }

    /// Curve name to picked metric name.
    #[must_use]
    pub fn metrics(&self) -> BTreeMap<&str, &str> {
        self.selections
            .iter()
            .map(|s| (s.curve.name(), s.metric.as_str()))
            .collect()
    }

    /// The union of every pick's bindings. Shared macros agree, so the union
    /// is well defined.
    #[must_use]
    pub fn bindings(&self) -> Bindings {
        let mut bindings = Bindings::new();
        for selection in &self.selections {
            bindings.extend(
                selection
                    .bindings
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        bindings
    }
}

impl<'c, 'a> IntoIterator for &'c Combination<'a> {
    type Item = &'c Selection<'a>;
    type IntoIter = slice::Iter<'c, Selection<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.selections.iter()
    }
}

/// The macros shared between pairs of metric templates
///
/// Pairs are keyed `(lower index, higher index)` so that each unordered pair
/// is held once. Pairs sharing nothing are not held.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overlaps {
    pairs: BTreeMap<(usize, usize), Vec<String>>,
}

impl Overlaps {
    /// Compute the overlaps between every pair of `patterns`.
    #[must_use]
    pub fn new(patterns: &[&MacroTemplate]) -> Self {
        let mut pairs = BTreeMap::new();
        for (i, lhs) in patterns.iter().enumerate() {
            for (j, rhs) in patterns.iter().enumerate().skip(i + 1) {
                let shared: Vec<String> = lhs
                    .macros()
                    .iter()
                    .filter(|name| rhs.has_macro(name))
                    .cloned()
                    .collect();
                if !shared.is_empty() {
                    pairs.insert((i, j), shared);
                }
            }
        }
        Self { pairs }
    }

    /// The macros shared by patterns `a` and `b`, in either order.
    #[must_use]
    pub fn get(&self, a: usize, b: usize) -> Option<&[String]> {
        self.pairs.get(&(a.min(b), a.max(b))).map(Vec::as_slice)
    }

    /// Number of overlapping pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether no pair overlaps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Whether the bindings picked for each pattern agree on every shared
    /// macro. `picked(i)` returns the bindings chosen for pattern `i`.
    #[must_use]
    pub fn admits<'b, F>(&self, picked: F) -> bool
    where
        F: Fn(usize) -> &'b Bindings,
    {
        self.pairs.iter().all(|(&(i, j), shared)| {
            let (lhs, rhs) = (picked(i), picked(j));
            shared.iter().all(|name| lhs.get(name) == rhs.get(name))
        })
    }
}

/// A lazy cartesian product over index ranges
///
/// Yields every vector `v` with `v[p] < radices[p]`, in lexicographic order:
/// the last position turns fastest. Yields nothing when there are no
/// positions or any radix is zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Odometer {
    radices: Vec<usize>,
    next: Option<Vec<usize>>,
}

impl Odometer {
    /// Create an odometer with one position per entry of `radices`.
    #[must_use]
    pub fn new(radices: Vec<usize>) -> Self {
        let next = if radices.is_empty() || radices.contains(&0) {
            None
        } else {
            Some(vec![0; radices.len()])
        };
        Self { radices, next }
    }

    /// Total number of vectors this odometer yields from the start,
    /// saturating at `usize::MAX`.
    #[must_use]
    pub fn total(&self) -> usize {
        if self.radices.is_empty() {
            return 0;
        }
        self.radices
            .iter()
            .try_fold(1_usize, |acc, r| acc.checked_mul(*r))
            .unwrap_or(usize::MAX)
    }
}

impl Iterator for Odometer {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;

        let mut successor = current.clone();
        for position in (0..successor.len()).rev() {
            successor[position] += 1;
            if successor[position] < self.radices[position] {
                self.next = Some(successor);
                break;
            }
            successor[position] = 0;
        }

        Some(current)
    }
}

impl FusedIterator for Odometer {}

/// The consistent combinations of a set of curve matches, produced lazily
#[derive(Debug, Clone)]
pub struct Combinations<'a> {
    matches: Vec<CurveMatches<'a>>,
    overlaps: Overlaps,
    odometer: Odometer,
    metric_labels: Vec<(String, String)>,
}

impl<'a> Combinations<'a> {
    /// Curves without matches must already be left out of `matches`.
    pub(crate) fn new(template: &str, matches: Vec<CurveMatches<'a>>) -> Self {
        let patterns: Vec<&MacroTemplate> = matches.iter().map(|m| m.curve.metric()).collect();
        let overlaps = Overlaps::new(&patterns);
        let odometer = Odometer::new(matches.iter().map(|m| m.metrics.len()).collect());
        debug!(
            "Template {template}: {} matching curves, {} overlapping pairs, {} candidate combinations",
            matches.len(),
            overlaps.len(),
            odometer.total(),
        );

        Self {
            matches,
            overlaps,
            odometer,
            metric_labels: vec![("template".to_string(), template.to_string())],
        }
    }

    fn admits(&self, digits: &[usize]) -> bool {
        self.overlaps
            .admits(|i| &self.matches[i].metrics[digits[i]].1)
    }

    fn combination(&self, digits: &[usize]) -> Combination<'a> {
        let selections = self
            .matches
            .iter()
            .zip(digits)
            .map(|(curve_matches, &digit)| {
                let (metric, bindings) = &curve_matches.metrics[digit];
                Selection {
                    curve: curve_matches.curve,
                    metric: metric.clone(),
                    bindings: bindings.clone(),
                }
            })
            .collect();
        Combination { selections }
    }
}

impl<'a> Iterator for Combinations<'a> {
    type Item = Combination<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let digits = self.odometer.next()?;
            if self.admits(&digits) {
                counter!("chart_combinations_accepted", &self.metric_labels).increment(1);
                return Some(self.combination(&digits));
            }
            trace!("Rejected inconsistent combination {digits:?}");
            counter!("chart_combinations_rejected", &self.metric_labels).increment(1);
        }
    }
}

impl FusedIterator for Combinations<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn template(text: &str) -> MacroTemplate {
        MacroTemplate::new(text).expect("valid template")
    }

    #[test]
    fn odometer_turns_last_position_fastest() {
        let vectors: Vec<Vec<usize>> = Odometer::new(vec![2, 3]).collect();
        assert_eq!(
            vectors,
            [
                vec![0, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2],
            ]
        );
    }

    #[test]
    fn odometer_without_positions_or_with_zero_radix_is_empty() {
        assert_eq!(Odometer::new(Vec::new()).count(), 0);
        assert_eq!(Odometer::new(vec![3, 0, 2]).count(), 0);
        assert_eq!(Odometer::new(vec![3, 0, 2]).total(), 0);
    }

    #[test]
    fn odometer_stays_exhausted() {
        let mut odometer = Odometer::new(vec![1]);
        assert_eq!(odometer.next(), Some(vec![0]));
        assert_eq!(odometer.next(), None);
        assert_eq!(odometer.next(), None);
    }

    #[test]
    fn overlaps_hold_each_unordered_pair_once() {
        let a = template("a.$host$.$service$");
        let b = template("b.$service$.$host$");
        let c = template("c.$disk$");
        let d = template("d.$host$.$disk$");
        let overlaps = Overlaps::new(&[&a, &b, &c, &d]);

        assert_eq!(overlaps.len(), 4);
        assert_eq!(
            overlaps.get(1, 0),
            Some(["host".to_string(), "service".to_string()].as_slice())
        );
        assert_eq!(overlaps.get(0, 1), overlaps.get(1, 0));
        assert_eq!(overlaps.get(0, 2), None);
        assert_eq!(overlaps.get(2, 3), Some(["disk".to_string()].as_slice()));
        assert_eq!(overlaps.get(0, 3), Some(["host".to_string()].as_slice()));
        assert_eq!(overlaps.get(1, 3), Some(["host".to_string()].as_slice()));
    }

    #[test]
    fn admits_requires_agreement_on_shared_macros_only() {
        let a = template("a.$host$.$x$");
        let b = template("b.$host$.$y$");
        let overlaps = Overlaps::new(&[&a, &b]);

        let lhs = a.reverse_resolve("a.web1.1").expect("matches");
        let same_host = b.reverse_resolve("b.web1.2").expect("matches");
        let other_host = b.reverse_resolve("b.web2.1").expect("matches");

        let picks = [&lhs, &same_host];
        assert!(overlaps.admits(|i| picks[i]));
        let picks = [&lhs, &other_host];
        assert!(!overlaps.admits(|i| picks[i]));
    }

    proptest! {
        #[test]
        fn odometer_yields_every_vector_once_in_order(radices in prop::collection::vec(1_usize..5, 1..5)) {
            let odometer = Odometer::new(radices.clone());
            let total = odometer.total();
            let vectors: Vec<Vec<usize>> = odometer.collect();

            prop_assert_eq!(vectors.len(), total);
            prop_assert_eq!(total, radices.iter().product::<usize>());
            for vector in &vectors {
                prop_assert!(vector.iter().zip(&radices).all(|(d, r)| d < r));
            }
            prop_assert!(vectors.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
