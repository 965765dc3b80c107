use crate::descriptor::Perspective;
use crate::game::BettingLine;

pub const LINE_FEATURE_NAMES: [&str; 4] = ["vegas_ml", "vegas_spread", "vegas_total", "vegas_implied_prob"];

/// American moneyline to decimal odds (`-150` -> 1.667, `+130` -> 2.3).
pub fn american_to_decimal(ml: f64) -> Option<f64> {
    if !ml.is_finite() || ml.abs() < 100.0 {
        return None;
    }
    if ml > 0.0 {
        Some(1.0 + ml / 100.0)
    } else {
        Some(1.0 + 100.0 / -ml)
    }
}

/// `(home, away)` win probabilities with the bookmaker margin removed.
pub fn no_vig_from_moneylines(home_ml: f64, away_ml: f64) -> Option<(f64, f64)> {
    let home = american_to_decimal(home_ml)?;
    let away = american_to_decimal(away_ml)?;
    if home <= 1.0 || away <= 1.0 {
        return None;
    }
    let ih = 1.0 / home;
    let ia = 1.0 / away;
    let sum = ih + ia;
    if sum <= 0.0 {
        return None;
    }
    Some((ih / sum, ia / sum))
}

/// Value of one line feature, or `None` when the name isn't a line feature or the line lacks
/// the field.
pub fn line_feature(name: &str, line: &BettingLine, perspective: Perspective) -> Option<f64> {
    match name {
        "vegas_ml" => match perspective {
            Perspective::Home => line.home_moneyline,
            Perspective::Away => line.away_moneyline,
            Perspective::Diff | Perspective::None => {
                Some(line.home_moneyline? - line.away_moneyline?)
            }
        },
        "vegas_spread" => {
            let spread = line.spread?;
            match perspective {
                Perspective::Away => Some(-spread),
                _ => Some(spread),
            }
        }
        "vegas_total" => line.total,
        "vegas_implied_prob" => {
            let (home, away) = no_vig_from_moneylines(line.home_moneyline?, line.away_moneyline?)?;
            Some(perspective.combine(home, away))
        }
        _ => None,
    }
}
