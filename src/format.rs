// Metric-prefix formatting of physical quantities
//
// Values are rendered with an SI prefix chosen from the value's magnitude,
// clamped to a per-quantity prefix range (a frequency axis may allow "M" but
// not "p", a dBFS axis allows no prefix at all). The precision string has
// the form "<width>.<decimals>".

const LIMITS: [(f64, &str); 9] = [
    (1e12, "T"),
    (1e9, "G"),
    (1e6, "M"),
    (1e3, "k"),
    (1.0, ""),
    (1e-3, "m"),
    (1e-6, "u"),
    (1e-9, "n"),
    (1e-12, "p"),
];

fn parse_precision(precision: &str) -> (usize, usize) {
    let mut parts = precision.splitn(2, '.');
    let width = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let decimals = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (width, decimals)
}

fn render(value: f64, prefix: &str, precision: &str, unit: &str, show_sign: bool) -> String {
    let (width, decimals) = parse_precision(precision);
    if show_sign {
        format!(
            "{:>+width$.decimals$} {}{}",
            value,
            prefix,
            unit,
            width = width,
            decimals = decimals
        )
    } else {
        format!(
            "{:>width$.decimals$} {}{}",
            value,
            prefix,
            unit,
            width = width,
            decimals = decimals
        )
    }
}

/// Format `value` with a metric prefix selected from its magnitude, bounded
/// by `[lowest_prefix, highest_prefix]`.
pub fn metric(
    value: f64,
    precision: &str,
    unit: &str,
    show_sign: bool,
    highest_prefix: f64,
    lowest_prefix: f64,
) -> String {
    if value == 0.0 {
        return render(0.0, "", precision, unit, show_sign);
    }

    for (i, (limit, prefix)) in LIMITS.iter().enumerate() {
        if *limit > highest_prefix {
            continue;
        }

        let next_is_not_allowed = i < LIMITS.len() - 1 && LIMITS[i + 1].0 < lowest_prefix;
        let is_larger_than_limit = value.abs() >= *limit;

        if next_is_not_allowed || is_larger_than_limit {
            return render(value / limit, prefix, precision, unit, show_sign);
        }
    }

    let (limit, prefix) = LIMITS[LIMITS.len() - 1];
    render(value / limit, prefix, precision, unit, show_sign)
}

/// Placeholder for an invalid value, padded to the width a valid rendering
/// would occupy so table columns stay aligned.
pub fn invalid(precision: &str, unit: &str) -> String {
    match precision.chars().next().and_then(|c| c.to_digit(10)) {
        Some(width) => {
            let width = width as usize + unit.len() + 1;
            format!("{:<width$}", "Invalid", width = width)
        }
        None => "Invalid".to_string(),
    }
}
