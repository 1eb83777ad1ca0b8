//! Citation trajectory forecasting.
//!
//! Derives the forward citation slope of one article: the projected
//! next-year change in its annual citation count. Pure functions only;
//! the cluster manager and the scorer feed in series read from the store.

/// Forward citation slope of a yearly citation series.
///
/// The series is densified over its year span (missing years count 0) and
/// differenced; an AR(1) model on the differences, fitted by least
/// squares, forecasts the next annual delta. Short series fall back to
/// the arithmetic mean delta; fewer than two points give 0.
pub fn forward_citation_slope(series: &[(i32, i64)]) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }

    let counts = densify(series);
    let diffs: Vec<f64> = counts.windows(2).map(|w| w[1] - w[0]).collect();
    if diffs.is_empty() {
        return 0.0;
    }
    if diffs.len() < 3 {
        return mean(&diffs);
    }

    // AR(1) on differences: d_{t+1} = c + phi * d_t.
    let x = &diffs[..diffs.len() - 1];
    let y = &diffs[1..];
    let mean_x = mean(x);
    let mean_y = mean(y);

    let var_x: f64 = x.iter().map(|v| (v - mean_x).powi(2)).sum();
    if var_x < f64::EPSILON {
        return mean(&diffs);
    }
    let cov_xy: f64 = x
        .iter()
        .zip(y.iter())
        .map(|(a, b)| (a - mean_x) * (b - mean_y))
        .sum();

    // Clamp phi to the stationary region; tiny samples can otherwise
    // produce explosive fits.
    let phi = (cov_xy / var_x).clamp(-1.0, 1.0);
    let intercept = mean_y - phi * mean_x;
    let last = *diffs.last().expect("diffs checked non-empty");

    intercept + phi * last
}

/// Annual counts over the full [min_year, max_year] span, zeros filled in.
/// Duplicate years keep the last value.
fn densify(series: &[(i32, i64)]) -> Vec<f64> {
    let mut sorted = series.to_vec();
    sorted.sort_by_key(|&(year, _)| year);

    let min_year = sorted.first().map(|&(y, _)| y).unwrap_or(0);
    let max_year = sorted.last().map(|&(y, _)| y).unwrap_or(0);

    let mut counts = vec![0.0; (max_year - min_year + 1) as usize];
    for (year, count) in sorted {
        counts[(year - min_year) as usize] = count as f64;
    }
    counts
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_series_has_zero_slope() {
        assert_eq!(forward_citation_slope(&[]), 0.0);
        assert_eq!(forward_citation_slope(&[(2023, 1)]), 0.0);
    }

    #[test]
    fn two_point_series_uses_the_single_delta() {
        assert_eq!(forward_citation_slope(&[(2022, 5), (2023, 10)]), 5.0);
    }

    #[test]
    fn three_point_growth_uses_mean_delta() {
        // Diffs [5, 8]: too short for an AR fit, mean delta applies.
        let slope = forward_citation_slope(&[(2022, 5), (2023, 10), (2024, 18)]);
        assert!((slope - 6.5).abs() < 1e-9);
    }

    #[test]
    fn constant_series_is_flat() {
        let slope = forward_citation_slope(&[(2020, 4), (2021, 4), (2022, 4), (2023, 4)]);
        assert_eq!(slope, 0.0);
    }

    #[test]
    fn missing_years_count_as_zero() {
        // Densified counts [2, 0, 4] give diffs [-2, 4], mean 1.
        let slope = forward_citation_slope(&[(2020, 2), (2022, 4)]);
        assert!((slope - 1.0).abs() < 1e-9);
    }

    #[test]
    fn linear_growth_forecasts_constant_delta() {
        // Diffs all 1: degenerate variance, mean-delta fallback.
        let series = [(2019, 1), (2020, 2), (2021, 3), (2022, 4), (2023, 5)];
        assert!((forward_citation_slope(&series) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn accelerating_growth_projects_forward() {
        // Counts 0,1,3,6,10 diff to 1,2,3,4; AR(1) fits phi=1, c=1,
        // forecasting a delta of 5.
        let series = [(2019, 0), (2020, 1), (2021, 3), (2022, 6), (2023, 10)];
        assert!((forward_citation_slope(&series) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn decline_yields_negative_slope() {
        let series = [(2020, 30), (2021, 20), (2022, 10)];
        assert!(forward_citation_slope(&series) < 0.0);
    }
}
