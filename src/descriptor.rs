//! Feature descriptors: `stat|time_period|calc_weight|perspective`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const BLEND_PREFIX: &str = "blend:";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("expected 4 '|' separated parts, found {0}")]
    Arity(usize),
    #[error("empty stat name")]
    EmptyStat,
    #[error("unknown time period {0:?}")]
    TimePeriod(String),
    #[error("unknown calc weight {0:?}")]
    CalcWeight(String),
    #[error("unknown perspective {0:?}")]
    Perspective(String),
    #[error("malformed blend spec {0:?}")]
    Blend(String),
    #[error("stat {0:?} is marked _blend but carries no blend spec")]
    MissingBlend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Perspective {
    Home,
    Away,
    Diff,
    None,
}

impl Perspective {
    /// Combines the two side values. `None` on a per-side stat reads as the difference.
    pub fn combine(self, home: f64, away: f64) -> f64 {
        match self {
            Perspective::Home => home,
            Perspective::Away => away,
            Perspective::Diff | Perspective::None => home - away,
        }
    }

    pub fn needs_home(self) -> bool {
        !matches!(self, Perspective::Away)
    }

    pub fn needs_away(self) -> bool {
        !matches!(self, Perspective::Home)
    }
}

impl FromStr for Perspective {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "home" => Ok(Perspective::Home),
            "away" => Ok(Perspective::Away),
            "diff" => Ok(Perspective::Diff),
            "none" | "" => Ok(Perspective::None),
            other => Err(DescriptorError::Perspective(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalcWeight {
    Raw,
    Avg,
    Std,
    Beta,
    EmpiricalBayes,
    LogWeighted,
    /// Average with per-game weight `exp(-lambda * days_since_game)`.
    Decay(f64),
}

impl FromStr for CalcWeight {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        match key.as_str() {
            "raw" | "none" | "" => Ok(CalcWeight::Raw),
            "avg" => Ok(CalcWeight::Avg),
            "std" => Ok(CalcWeight::Std),
            "beta" => Ok(CalcWeight::Beta),
            "eb" => Ok(CalcWeight::EmpiricalBayes),
            "logw" => Ok(CalcWeight::LogWeighted),
            _ => key
                .strip_prefix("decay_")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(CalcWeight::Decay)
                .ok_or_else(|| DescriptorError::CalcWeight(key.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimePeriod {
    None,
    Season,
    Months(u32),
    Days(u32),
    Games(u32),
    H2hLast(u32),
    H2hSeason,
}

impl FromStr for TimePeriod {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        let bad = || DescriptorError::TimePeriod(key.clone());
        let count = |raw: &str| raw.parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(bad);

        match key.as_str() {
            "none" | "" => return Ok(TimePeriod::None),
            "season" => return Ok(TimePeriod::Season),
            "h2h_season" => return Ok(TimePeriod::H2hSeason),
            _ => {}
        }
        if let Some(n) = key.strip_prefix("months_") {
            return count(n).map(TimePeriod::Months);
        }
        if let Some(n) = key.strip_prefix("days_") {
            return count(n).map(TimePeriod::Days);
        }
        if let Some(n) = key.strip_prefix("games_") {
            return count(n).map(TimePeriod::Games);
        }
        if let Some(n) = key.strip_prefix("h2h_last") {
            return count(n.trim_start_matches('_')).map(TimePeriod::H2hLast);
        }
        Err(bad())
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimePeriod::None => write!(f, "none"),
            TimePeriod::Season => write!(f, "season"),
            TimePeriod::Months(n) => write!(f, "months_{n}"),
            TimePeriod::Days(n) => write!(f, "days_{n}"),
            TimePeriod::Games(n) => write!(f, "games_{n}"),
            TimePeriod::H2hLast(n) => write!(f, "h2h_last{n}"),
            TimePeriod::H2hSeason => write!(f, "h2h_season"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlendComponent {
    pub key: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlendSpec {
    components: Vec<BlendComponent>,
}

impl BlendSpec {
    pub fn components(&self) -> &[BlendComponent] {
        &self.components
    }

    pub fn weight_of(&self, key: &str) -> Option<f64> {
        self.components
            .iter()
            .find(|c| c.key == key)
            .map(|c| c.weight)
    }

    pub fn from_weights<I, K>(weights: I) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let mut components: Vec<BlendComponent> = weights
            .into_iter()
            .map(|(key, weight)| BlendComponent {
                key: key.into(),
                weight,
            })
            .collect();
        let total: f64 = components.iter().map(|c| c.weight).sum();
        if components.is_empty()
            || !total.is_finite()
            || total <= 0.0
            || components.iter().any(|c| c.weight < 0.0 || c.key.is_empty())
        {
            let text = components
                .iter()
                .map(|c| format!("{}:{}", c.key, c.weight))
                .collect::<Vec<_>>()
                .join("/");
            return Err(DescriptorError::Blend(text));
        }
        for c in &mut components {
            c.weight /= total;
        }
        Ok(Self { components })
    }
}

impl FromStr for BlendSpec {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let body = lowered.strip_prefix(BLEND_PREFIX).unwrap_or(&lowered);
        let bad = || DescriptorError::Blend(s.to_string());
        let mut weights = Vec::new();
        for part in body.split('/').filter(|p| !p.trim().is_empty()) {
            let (key, weight) = part.rsplit_once(':').ok_or_else(bad)?;
            let weight = weight.trim().parse::<f64>().map_err(|_| bad())?;
            weights.push((key.trim().to_string(), weight));
        }
        BlendSpec::from_weights(weights).map_err(|_| bad())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDescriptor {
    pub raw: String,
    pub stat: String,
    pub period: TimePeriod,
    pub calc: CalcWeight,
    pub perspective: Perspective,
    pub net: bool,
    pub side_split: bool,
    pub blend: Option<BlendSpec>,
}

impl FeatureDescriptor {
    pub fn parse(raw: &str) -> Result<Self, DescriptorError> {
        let parts: Vec<&str> = raw.split('|').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(DescriptorError::Arity(parts.len()));
        }
        let (mut stat, net, side_split, blend_marker) = strip_markers(parts[0]);
        if stat.is_empty() {
            return Err(DescriptorError::EmptyStat);
        }
        stat.make_ascii_lowercase();

        let mut blend = None;
        let period = if is_blend(parts[1]) {
            blend = Some(parts[1].parse::<BlendSpec>()?);
            TimePeriod::None
        } else {
            parts[1].parse::<TimePeriod>()?
        };
        let calc = if is_blend(parts[2]) {
            blend = Some(parts[2].parse::<BlendSpec>()?);
            CalcWeight::Avg
        } else {
            parts[2].parse::<CalcWeight>()?
        };
        let perspective = parts[3].parse::<Perspective>()?;

        if blend_marker && blend.is_none() {
            return Err(DescriptorError::MissingBlend(stat));
        }

        Ok(Self {
            raw: raw.to_string(),
            stat,
            period,
            calc,
            perspective,
            net,
            side_split,
            blend,
        })
    }

    pub fn with_period(&self, period: TimePeriod) -> Self {
        Self {
            period,
            blend: None,
            ..self.clone()
        }
    }
}

impl FromStr for FeatureDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureDescriptor::parse(s)
    }
}

fn is_blend(slot: &str) -> bool {
    slot.trim().to_ascii_lowercase().starts_with(BLEND_PREFIX)
}

fn strip_markers(raw: &str) -> (String, bool, bool, bool) {
    let mut stat = raw.trim().to_ascii_lowercase();
    let (mut net, mut side, mut blend) = (false, false, false);
    loop {
        if let Some(rest) = stat.strip_suffix("_net") {
            stat = rest.to_string();
            net = true;
        } else if let Some(rest) = stat.strip_suffix("_blend") {
            stat = rest.to_string();
            blend = true;
        } else if let Some(rest) = stat.strip_suffix("_side") {
            stat = rest.to_string();
            side = true;
        } else if let Some(pos) = stat.find("_side_") {
            stat = format!("{}{}", &stat[..pos], &stat[pos + "_side".len()..]);
            side = true;
        } else {
            break;
        }
    }
    (stat, net, side, blend)
}

/// Lenient view for the special-feature handler: the stat name plus whichever slots parse.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialRequest {
    pub name: String,
    pub period: TimePeriod,
    pub calc: CalcWeight,
    pub perspective: Perspective,
    pub blend: Option<BlendSpec>,
}

impl SpecialRequest {
    pub fn lenient(raw: &str) -> Self {
        let parts: Vec<&str> = raw.split('|').map(str::trim).collect();
        let name = parts
            .first()
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        let slot = |i: usize| parts.get(i).copied().unwrap_or("");
        let blend = [slot(1), slot(2)]
            .into_iter()
            .filter(|s| is_blend(s))
            .find_map(|s| s.parse::<BlendSpec>().ok());
        let perspective = if parts.len() > 1 {
            parts
                .last()
                .and_then(|s| s.parse::<Perspective>().ok())
                .unwrap_or(Perspective::Diff)
        } else {
            Perspective::Diff
        };
        Self {
            name,
            period: slot(1).parse().unwrap_or(TimePeriod::None),
            calc: slot(2).parse().unwrap_or(CalcWeight::Raw),
            perspective,
            blend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_descriptor() {
        let d = FeatureDescriptor::parse("effective_fg_perc|games_10|raw|home").unwrap();
        assert_eq!(d.stat, "effective_fg_perc");
        assert_eq!(d.period, TimePeriod::Games(10));
        assert_eq!(d.calc, CalcWeight::Raw);
        assert_eq!(d.perspective, Perspective::Home);
        assert!(!d.net && !d.side_split && d.blend.is_none());
    }

    #[test]
    fn strips_markers_in_any_order() {
        let d = FeatureDescriptor::parse("points_side_net|season|avg|diff").unwrap();
        assert_eq!(d.stat, "points");
        assert!(d.net && d.side_split);

        let d = FeatureDescriptor::parse("off_rtg_net_side|days_30|raw|away").unwrap();
        assert_eq!(d.stat, "off_rtg");
        assert!(d.net && d.side_split);
        assert_eq!(d.period, TimePeriod::Days(30));
    }

    #[test]
    fn blend_found_in_either_slot() {
        let d = FeatureDescriptor::parse(
            "effective_fg_perc_net_blend|blend:season:3/games_10:1|avg|diff",
        )
        .unwrap();
        let blend = d.blend.as_ref().unwrap();
        assert_eq!(d.calc, CalcWeight::Avg);
        assert_eq!(blend.components().len(), 2);
        assert!((blend.weight_of("season").unwrap() - 0.75).abs() < 1e-12);

        let d = FeatureDescriptor::parse(
            "inj_impact|none|blend:severity:45/top1_per:35/rotation:20|diff",
        )
        .unwrap();
        assert_eq!(d.period, TimePeriod::None);
        assert!((d.blend.unwrap().weight_of("rotation").unwrap() - 0.20).abs() < 1e-12);
    }

    #[test]
    fn calc_slot_blend_averages_like_period_slot() {
        let in_period = FeatureDescriptor::parse("points_blend|blend:games_1:1/season:1|avg|home").unwrap();
        let in_calc = FeatureDescriptor::parse("points_blend|season|blend:games_1:1/season:1|home").unwrap();
        assert_eq!(in_calc.calc, CalcWeight::Avg);
        assert_eq!(in_calc.calc, in_period.calc);
        assert_eq!(in_calc.blend, in_period.blend);
    }

    #[test]
    fn blend_weights_sum_to_one() {
        for raw in [
            "blend:season:1/games_5:1",
            "blend:season:0.2/days_30:0.7/games_3:0.4",
            "blend:months_2:7",
        ] {
            let spec: BlendSpec = raw.parse().unwrap();
            let sum: f64 = spec.components().iter().map(|c| c.weight).sum();
            assert!((sum - 1.0).abs() < 1e-12, "{raw}");
        }
        assert!("blend:season:0/games_5:0".parse::<BlendSpec>().is_err());
        assert!("blend:season".parse::<BlendSpec>().is_err());
    }

    #[test]
    fn period_grammar() {
        assert_eq!("h2h_last5".parse::<TimePeriod>(), Ok(TimePeriod::H2hLast(5)));
        assert_eq!("h2h_season".parse::<TimePeriod>(), Ok(TimePeriod::H2hSeason));
        assert_eq!("months_2".parse::<TimePeriod>(), Ok(TimePeriod::Months(2)));
        assert!("games_0".parse::<TimePeriod>().is_err());
        assert!("weeks_2".parse::<TimePeriod>().is_err());
        assert_eq!(TimePeriod::H2hLast(3).to_string(), "h2h_last3");
    }

    #[test]
    fn calc_weight_grammar() {
        assert_eq!("eb".parse::<CalcWeight>(), Ok(CalcWeight::EmpiricalBayes));
        assert_eq!("decay_0.05".parse::<CalcWeight>(), Ok(CalcWeight::Decay(0.05)));
        assert!("median".parse::<CalcWeight>().is_err());
    }

    #[test]
    fn malformed_descriptors_report_why() {
        assert_eq!(
            FeatureDescriptor::parse("elo"),
            Err(DescriptorError::Arity(1))
        );
        assert!(matches!(
            FeatureDescriptor::parse("points|season|avg|both"),
            Err(DescriptorError::Perspective(_))
        ));
        assert!(matches!(
            FeatureDescriptor::parse("points_blend|season|avg|home"),
            Err(DescriptorError::MissingBlend(_))
        ));
    }

    #[test]
    fn lenient_request_keeps_what_parses() {
        let req = SpecialRequest::lenient("elo_prob");
        assert_eq!(req.name, "elo_prob");
        assert_eq!(req.perspective, Perspective::Diff);

        let req = SpecialRequest::lenient("vegas_spread|whatever|raw|away");
        assert_eq!(req.period, TimePeriod::None);
        assert_eq!(req.perspective, Perspective::Away);
    }

    #[test]
    fn perspective_combination() {
        assert_eq!(Perspective::Home.combine(3.0, 1.0), 3.0);
        assert_eq!(Perspective::Away.combine(3.0, 1.0), 1.0);
        assert_eq!(Perspective::Diff.combine(3.0, 1.0), 2.0);
        assert!(!Perspective::Home.needs_away());
    }
}
