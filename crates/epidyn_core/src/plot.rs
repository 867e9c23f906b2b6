//! Backend-independent layout of the plot document.
//!
//! The document has one page per state variable followed by an overlay page
//! carrying every variable. Rendering lives in the CLI.

use crate::trajectory::Samples;

/// Axis labels shared by every page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisLabels {
    pub x: String,
    pub y: String,
}

impl Default for AxisLabels {
    fn default() -> Self {
        Self {
            x: "time (days)".to_string(),
            y: "conc/ml".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub points: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotPage {
    pub title: String,
    pub labels: AxisLabels,
    pub series: Vec<Series>,
    /// Whether the page lists its series in a legend.
    pub legend: bool,
}

impl PlotPage {
    /// Bounds `(x_min, x_max, y_min, y_max)` over every series, padded so a
    /// flat line still gets a non-empty range.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let mut x = (f64::INFINITY, f64::NEG_INFINITY);
        let mut y = (f64::INFINITY, f64::NEG_INFINITY);
        for &(px, py) in self.series.iter().flat_map(|s| &s.points) {
            x = (x.0.min(px), x.1.max(px));
            y = (y.0.min(py), y.1.max(py));
        }
        if !x.0.is_finite() {
            return (0.0, 1.0, 0.0, 1.0);
        }
        if x.1 <= x.0 {
            x.1 = x.0 + 1.0;
        }
        if y.1 <= y.0 {
            let pad = if y.0 == 0.0 { 1.0 } else { y.0.abs() * 0.1 };
            y = (y.0 - pad, y.1 + pad);
        }
        (x.0, x.1, y.0, y.1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotDocument {
    pub pages: Vec<PlotPage>,
}

impl PlotDocument {
    pub fn from_samples(samples: &Samples, labels: &AxisLabels) -> Self {
        let series: Vec<Series> = samples
            .variables
            .iter()
            .enumerate()
            .map(|(idx, name)| Series {
                name: name.clone(),
                points: samples
                    .times
                    .iter()
                    .zip(samples.states.iter())
                    .map(|(&t, state)| (t, state[idx]))
                    .collect(),
            })
            .collect();

        let mut pages: Vec<PlotPage> = series
            .iter()
            .map(|s| PlotPage {
                title: s.name.clone(),
                labels: labels.clone(),
                series: vec![s.clone()],
                legend: false,
            })
            .collect();
        pages.push(PlotPage {
            title: "all".to_string(),
            labels: labels.clone(),
            series,
            legend: true,
        });

        Self { pages }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::IntegrationStats;
    use nalgebra::DVector;

    fn samples() -> Samples {
        Samples {
            variables: vec!["S".into(), "I".into()],
            times: vec![0.0, 1.0, 2.0],
            states: vec![
                DVector::from_vec(vec![10.0, 1.0]),
                DVector::from_vec(vec![9.0, 2.0]),
                DVector::from_vec(vec![8.0, 2.0]),
            ],
            stats: IntegrationStats::default(),
        }
    }

    #[test]
    fn one_page_per_variable_then_overlay() {
        let doc = PlotDocument::from_samples(&samples(), &AxisLabels::default());
        assert_eq!(doc.len(), 3);
        assert_eq!(doc.pages[0].title, "S");
        assert_eq!(doc.pages[1].title, "I");
        assert_eq!(doc.pages[1].series[0].points, vec![(0.0, 1.0), (1.0, 2.0), (2.0, 2.0)]);
        assert!(!doc.pages[0].legend);

        let overlay = &doc.pages[2];
        assert_eq!(overlay.title, "all");
        assert!(overlay.legend);
        let names: Vec<_> = overlay.series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["S", "I"]);
        assert!(doc.pages.iter().all(|p| p.labels.x == "time (days)" && p.labels.y == "conc/ml"));
    }

    #[test]
    fn bounds_cover_all_series_and_pad_flat_lines() {
        let doc = PlotDocument::from_samples(&samples(), &AxisLabels::default());
        assert_eq!(doc.pages[2].bounds(), (0.0, 2.0, 1.0, 10.0));

        let flat = PlotPage {
            title: "flat".into(),
            labels: AxisLabels::default(),
            series: vec![Series {
                name: "x".into(),
                points: vec![(0.0, 0.0), (1.0, 0.0)],
            }],
            legend: false,
        };
        assert_eq!(flat.bounds(), (0.0, 1.0, -1.0, 1.0));
    }
}
