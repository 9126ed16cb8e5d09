// Biplot rendering for canonical/component loadings

use log::{debug, info};
use ndarray::{s, Array2, ArrayView2};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::full_palette::{ORANGE, PURPLE};
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::cmp::Ordering;
use std::path::Path;

use crate::cca::center_rows;
use crate::error::{CcaError, Result};

/// Arrows stop at this fraction of the unit-normalized variable direction,
/// leaving room for the label at the tip.
const ARROW_SCALE: f64 = 0.6;

/// A fully computed 2D biplot: standardized case points, standardized
/// variable arrows, and the top-N arrow selection.
///
/// Construction does all the geometry; the value owns its scene and can be
/// drawn any number of times onto caller-owned drawing areas. No process-
/// global canvas is involved, so repeated or interleaved renders cannot
/// interfere with each other.
#[derive(Debug, Clone)]
pub struct Biplot {
    /// Standardized case coordinates. Shape: (n_cases, 2), each column has
    /// unit L2 norm across cases.
    points: Array2<f64>,
    /// Standardized variable coordinates. Shape: (n_variables, 2), each
    /// column has unit L2 norm across variables.
    arrows: Array2<f64>,
    /// True for the `n_arrows` variables with the largest squared magnitude
    /// in the first two loading columns.
    selected: Vec<bool>,
    arrow_labels: Vec<String>,
    point_labels: Option<Vec<String>>,
}

impl Biplot {
    /// Computes the biplot geometry for a data matrix and its loadings.
    ///
    /// `data` is the original matrix (variables × cases, the same
    /// orientation the correlation engine consumes); `loadings` maps the
    /// same variables into component space (variables × components, at
    /// least 2 columns — only the first two are used). `n_arrows` picks how
    /// many variable arrows to draw, chosen by largest squared magnitude in
    /// the first two loading columns; ties at the selection boundary are
    /// resolved toward the lower variable index, so the selection is
    /// deterministic. `arrow_labels` annotate the selected variables and are
    /// required; `point_labels` annotate cases and are optional.
    ///
    /// # Errors
    ///
    /// * [`CcaError::ShapeMismatch`] if `loadings` and `data` disagree on
    ///   the variable count, `loadings` has fewer than 2 columns, or a
    ///   label slice has the wrong length.
    /// * [`CcaError::TooFewCases`] if `data` has fewer than 2 cases.
    /// * [`CcaError::InvalidSelectionSize`] if `n_arrows` is outside
    ///   `[1, n_variables]`.
    /// * [`CcaError::MissingLabels`] if `arrow_labels` is `None`.
    pub fn new(
        data: ArrayView2<f64>,
        loadings: ArrayView2<f64>,
        n_arrows: usize,
        arrow_labels: Option<&[String]>,
        point_labels: Option<&[String]>,
    ) -> Result<Self> {
        let n_variables = data.nrows();
        let n_cases = data.ncols();

        if loadings.nrows() != n_variables {
            return Err(CcaError::ShapeMismatch {
                context: "loadings must be indexed by the same variables (rows) as the data",
                expected: n_variables,
                actual: loadings.nrows(),
            });
        }
        if loadings.ncols() < 2 {
            return Err(CcaError::ShapeMismatch {
                context: "a 2D biplot needs at least two loading columns",
                expected: 2,
                actual: loadings.ncols(),
            });
        }
        if n_cases < 2 {
            return Err(CcaError::TooFewCases { n: n_cases });
        }
        if n_arrows == 0 || n_arrows > n_variables {
            return Err(CcaError::InvalidSelectionSize {
                n_arrows,
                n_variables,
            });
        }
        let arrow_labels = arrow_labels.ok_or(CcaError::MissingLabels)?;
        if arrow_labels.len() != n_variables {
            return Err(CcaError::ShapeMismatch {
                context: "one arrow label per variable",
                expected: n_variables,
                actual: arrow_labels.len(),
            });
        }
        if let Some(labels) = point_labels {
            if labels.len() != n_cases {
                return Err(CcaError::ShapeMismatch {
                    context: "one point label per case",
                    expected: n_cases,
                    actual: labels.len(),
                });
            }
        }

        info!(
            "building biplot: {} variables, {} cases, {} arrows",
            n_variables, n_cases, n_arrows
        );

        let leading = loadings.slice(s![.., ..2]);

        // Standardized coordinates of the case points.
        let centered = center_rows(data);
        let mut points = centered.t().dot(&leading);
        normalize_columns(&mut points)?;

        // Standardized coordinates of the arrows.
        let mut arrows = leading.to_owned();
        normalize_columns(&mut arrows)?;

        let selected = select_top_arrows(leading, n_arrows);
        debug!(
            "selected arrow indices: {:?}",
            selected
                .iter()
                .enumerate()
                .filter(|&(_, &keep)| keep)
                .map(|(i, _)| i)
                .collect::<Vec<_>>()
        );

        Ok(Self {
            points,
            arrows,
            selected,
            arrow_labels: arrow_labels.to_vec(),
            point_labels: point_labels.map(<[String]>::to_vec),
        })
    }

    /// Standardized case coordinates, shape (n_cases, 2).
    pub fn points(&self) -> &Array2<f64> {
        &self.points
    }

    /// Standardized variable coordinates, shape (n_variables, 2).
    pub fn arrows(&self) -> &Array2<f64> {
        &self.arrows
    }

    /// Per-variable selection flags; exactly `n_arrows` entries are true.
    pub fn selected(&self) -> &[bool] {
        &self.selected
    }

    /// Draws the biplot onto a caller-owned drawing area.
    ///
    /// The area is cleared to white, a cartesian chart spanning all drawn
    /// geometry is built, case points are plotted as filled circles
    /// (annotated below the point when case labels were supplied), and each
    /// selected variable is drawn as an arrow from the origin with its label
    /// at the tip. Labels on the right half-plane anchor to the left of the
    /// tip and vice versa, so text never overlaps its arrow.
    pub fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> Result<()> {
        root.fill(&WHITE).map_err(render_error)?;

        let (x_range, y_range) = self.axis_ranges();
        let mut chart = ChartBuilder::on(root)
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(40)
            .build_cartesian_2d(x_range, y_range)
            .map_err(render_error)?;
        chart
            .configure_mesh()
            .x_labels(5)
            .y_labels(5)
            .draw()
            .map_err(render_error)?;

        chart
            .draw_series(
                self.points
                    .rows()
                    .into_iter()
                    .map(|row| Circle::new((row[0], row[1]), 3, ORANGE.filled())),
            )
            .map_err(render_error)?;

        if let Some(labels) = &self.point_labels {
            let style = ("sans-serif", 12)
                .into_font()
                .color(&ORANGE)
                .pos(Pos::new(HPos::Center, VPos::Top));
            chart
                .draw_series(
                    self.points
                        .rows()
                        .into_iter()
                        .zip(labels)
                        .map(|(row, label)| {
                            Text::new(label.clone(), (row[0], row[1]), style.clone())
                        }),
                )
                .map_err(render_error)?;
        }

        let stroke = PURPLE.stroke_width(2);
        for (i, &keep) in self.selected.iter().enumerate() {
            if !keep {
                continue;
            }
            let tip = (
                ARROW_SCALE * self.arrows[[i, 0]],
                ARROW_SCALE * self.arrows[[i, 1]],
            );
            chart
                .draw_series(LineSeries::new(vec![(0.0, 0.0), tip], stroke.clone()))
                .map_err(render_error)?;

            // Arrowhead: two short strokes swept back from the tip.
            let angle = tip.1.atan2(tip.0);
            for sweep in [angle + 2.6, angle - 2.6] {
                let wing = (tip.0 + 0.025 * sweep.cos(), tip.1 + 0.025 * sweep.sin());
                chart
                    .draw_series(LineSeries::new(vec![tip, wing], stroke.clone()))
                    .map_err(render_error)?;
            }

            let anchor = if tip.0 > 0.0 { HPos::Left } else { HPos::Right };
            let style = ("sans-serif", 13)
                .into_font()
                .color(&PURPLE)
                .pos(Pos::new(anchor, VPos::Center));
            chart
                .draw_series(std::iter::once(Text::new(
                    self.arrow_labels[i].clone(),
                    tip,
                    style,
                )))
                .map_err(render_error)?;
        }

        Ok(())
    }

    /// Renders to an SVG file at `path`. Any other backend or format goes
    /// through [`Biplot::draw`].
    pub fn save_svg<P: AsRef<Path>>(&self, path: P, size: (u32, u32)) -> Result<()> {
        let root = SVGBackend::new(path.as_ref(), size).into_drawing_area();
        self.draw(&root)?;
        root.present().map_err(render_error)?;
        Ok(())
    }

    /// Axis ranges covering the origin, every case point, and every selected
    /// arrow tip, padded by 10% of the span.
    fn axis_ranges(&self) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
        let mut x_min = 0.0f64;
        let mut x_max = 0.0f64;
        let mut y_min = 0.0f64;
        let mut y_max = 0.0f64;

        for row in self.points.rows() {
            x_min = x_min.min(row[0]);
            x_max = x_max.max(row[0]);
            y_min = y_min.min(row[1]);
            y_max = y_max.max(row[1]);
        }
        for (i, &keep) in self.selected.iter().enumerate() {
            if keep {
                x_min = x_min.min(ARROW_SCALE * self.arrows[[i, 0]]);
                x_max = x_max.max(ARROW_SCALE * self.arrows[[i, 0]]);
                y_min = y_min.min(ARROW_SCALE * self.arrows[[i, 1]]);
                y_max = y_max.max(ARROW_SCALE * self.arrows[[i, 1]]);
            }
        }

        let x_pad = (0.1 * (x_max - x_min)).max(0.05);
        let y_pad = (0.1 * (y_max - y_min)).max(0.05);
        (
            x_min - x_pad..x_max + x_pad,
            y_min - y_pad..y_max + y_pad,
        )
    }
}

/// Divides each column by its L2 norm.
fn normalize_columns(matrix: &mut Array2<f64>) -> Result<()> {
    for mut column in matrix.columns_mut() {
        let norm = column.dot(&column).sqrt();
        if norm <= f64::EPSILON {
            return Err(CcaError::Numerical(
                "a biplot axis has zero magnitude; the loadings are degenerate".into(),
            ));
        }
        column.mapv_inplace(|v| v / norm);
    }
    Ok(())
}

/// Flags the `n_arrows` variables with the largest squared magnitude in the
/// first two loading columns. Partial selection, no full sort; ties at the
/// boundary go to the lower index.
fn select_top_arrows(leading: ArrayView2<f64>, n_arrows: usize) -> Vec<bool> {
    let n_variables = leading.nrows();
    let magnitude: Vec<f64> = (0..n_variables)
        .map(|i| leading[[i, 0]].powi(2) + leading[[i, 1]].powi(2))
        .collect();

    let mut order: Vec<usize> = (0..n_variables).collect();
    let cut = n_variables - n_arrows;
    order.select_nth_unstable_by(cut, |&i, &j| {
        magnitude[i]
            .partial_cmp(&magnitude[j])
            .unwrap_or(Ordering::Equal)
            .then_with(|| j.cmp(&i))
    });

    let mut selected = vec![false; n_variables];
    for &i in &order[cut..] {
        selected[i] = true;
    }
    selected
}

fn render_error<E: std::error::Error>(e: E) -> CcaError {
    CcaError::Render(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn gaussian_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        Array2::from_shape_fn((rows, cols), |_| normal.sample(&mut rng))
    }

    fn labels(prefix: &str, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn all_variables_selected_when_n_arrows_equals_p() {
        let data = gaussian_matrix(6, 10, 1);
        let loadings = gaussian_matrix(6, 3, 2);
        let arr = labels("v", 6);

        let biplot = Biplot::new(data.view(), loadings.view(), 6, Some(&arr), None).unwrap();
        assert!(biplot.selected().iter().all(|&keep| keep));
    }

    #[test]
    fn exactly_k_selected_and_dominant() {
        let data = gaussian_matrix(8, 12, 3);
        let loadings = gaussian_matrix(8, 2, 4);
        let arr = labels("v", 8);

        let biplot = Biplot::new(data.view(), loadings.view(), 3, Some(&arr), None).unwrap();
        let selected = biplot.selected();
        assert_eq!(selected.iter().filter(|&&keep| keep).count(), 3);

        let magnitude: Vec<f64> = (0..8)
            .map(|i| loadings[[i, 0]].powi(2) + loadings[[i, 1]].powi(2))
            .collect();
        let mut min_selected = f64::INFINITY;
        let mut max_unselected = f64::NEG_INFINITY;
        for (i, &keep) in selected.iter().enumerate() {
            if keep {
                min_selected = min_selected.min(magnitude[i]);
            } else {
                max_unselected = max_unselected.max(magnitude[i]);
            }
        }
        assert!(min_selected >= max_unselected);
    }

    #[test]
    fn ties_resolve_to_lowest_indices() {
        let data = gaussian_matrix(4, 6, 5);
        let loadings = array![[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0], [0.0, -1.0]];
        let arr = labels("v", 4);

        let biplot = Biplot::new(data.view(), loadings.view(), 2, Some(&arr), None).unwrap();
        assert_eq!(biplot.selected().to_vec(), vec![true, true, false, false]);
    }

    #[test]
    fn point_and_arrow_columns_are_unit_norm() {
        let data = gaussian_matrix(7, 15, 6);
        let loadings = gaussian_matrix(7, 4, 7);
        let arr = labels("v", 7);

        let biplot = Biplot::new(data.view(), loadings.view(), 4, Some(&arr), None).unwrap();
        for column in biplot.points().columns() {
            assert_abs_diff_eq!(column.dot(&column).sqrt(), 1.0, epsilon = 1e-10);
        }
        for column in biplot.arrows().columns() {
            assert_abs_diff_eq!(column.dot(&column).sqrt(), 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn missing_arrow_labels_are_rejected() {
        let data = gaussian_matrix(5, 10, 8);
        let loadings = gaussian_matrix(5, 2, 9);
        let err = Biplot::new(data.view(), loadings.view(), 2, None, None).unwrap_err();
        assert!(matches!(err, CcaError::MissingLabels));
    }

    #[test]
    fn selection_size_bounds_are_enforced() {
        let data = gaussian_matrix(5, 10, 10);
        let loadings = gaussian_matrix(5, 2, 11);
        let arr = labels("v", 5);

        let err = Biplot::new(data.view(), loadings.view(), 0, Some(&arr), None).unwrap_err();
        assert!(matches!(err, CcaError::InvalidSelectionSize { n_arrows: 0, .. }));

        let err = Biplot::new(data.view(), loadings.view(), 6, Some(&arr), None).unwrap_err();
        assert!(matches!(err, CcaError::InvalidSelectionSize { n_arrows: 6, .. }));
    }

    #[test]
    fn mismatched_loadings_are_rejected() {
        let data = gaussian_matrix(5, 10, 12);
        let loadings = gaussian_matrix(4, 2, 13);
        let arr = labels("v", 5);

        let err = Biplot::new(data.view(), loadings.view(), 2, Some(&arr), None).unwrap_err();
        assert!(matches!(err, CcaError::ShapeMismatch { .. }));
    }

    #[test]
    fn wrong_label_lengths_are_rejected() {
        let data = gaussian_matrix(5, 10, 14);
        let loadings = gaussian_matrix(5, 2, 15);

        let short = labels("v", 4);
        let err = Biplot::new(data.view(), loadings.view(), 2, Some(&short), None).unwrap_err();
        assert!(matches!(err, CcaError::ShapeMismatch { .. }));

        let arr = labels("v", 5);
        let bad_points = labels("c", 9);
        let err = Biplot::new(
            data.view(),
            loadings.view(),
            2,
            Some(&arr),
            Some(&bad_points),
        )
        .unwrap_err();
        assert!(matches!(err, CcaError::ShapeMismatch { .. }));
    }

    #[test]
    fn single_loading_column_is_rejected() {
        let data = gaussian_matrix(5, 10, 16);
        let loadings = gaussian_matrix(5, 1, 17);
        let arr = labels("v", 5);

        let err = Biplot::new(data.view(), loadings.view(), 2, Some(&arr), None).unwrap_err();
        assert!(matches!(err, CcaError::ShapeMismatch { .. }));
    }
}
