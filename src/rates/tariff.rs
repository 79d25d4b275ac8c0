use serde::{Deserialize, Serialize};

/// Combined duty rate applied when a product carries no usable HS code.
pub const DEFAULT_DUTY_RATE: f64 = 0.065;

const PREFIX_LENGTHS: [usize; 4] = [8, 6, 4, 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DutySource {
    Exact { code: String },
    Prefix { prefix: String },
    Zone { zone: String },
    Supplied,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutyRates {
    pub hs_rate: f64,
    pub origin_rate: f64,
    #[serde(default = "supplied_source")]
    pub source: DutySource,
}

fn supplied_source() -> DutySource {
    DutySource::Supplied
}

impl DutyRates {
    pub fn new(hs_rate: f64, origin_rate: f64) -> Self {
        Self {
            hs_rate,
            origin_rate,
            source: DutySource::Supplied,
        }
    }

    pub fn fallback() -> Self {
        Self {
            hs_rate: DEFAULT_DUTY_RATE,
            origin_rate: 0.0,
            source: DutySource::Default,
        }
    }

    pub fn combined(&self) -> f64 {
        self.hs_rate + self.origin_rate
    }

    pub fn is_valid(&self) -> bool {
        self.hs_rate.is_finite()
            && self.origin_rate.is_finite()
            && self.hs_rate >= 0.0
            && self.origin_rate >= 0.0
    }
}

/// Keeps only the digits of an HS/HTS code. `None` when nothing is left.
pub fn normalize_hs_code(code: &str) -> Option<String> {
    let digits: String = code.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() { None } else { Some(digits) }
}

/// Exact code first, then the shorter chapter/heading prefixes.
pub fn hs_lookup_keys(normalized: &str) -> Vec<String> {
    let mut keys = vec![normalized.to_string()];
    for len in PREFIX_LENGTHS {
        if normalized.len() > len {
            keys.push(normalized[..len].to_string());
        }
    }
    keys
}

/// `950440` -> `9504.40`, `9504400000` -> `9504.40.00.00`.
pub fn dotted_hs_code(normalized: &str) -> String {
    if normalized.len() <= 4 {
        return normalized.to_string();
    }
    let (heading, rest) = normalized.split_at(4);
    let mut out = heading.to_string();
    for chunk in rest.as_bytes().chunks(2) {
        out.push('.');
        out.push_str(&String::from_utf8_lossy(chunk));
    }
    out
}

/// Parses tariff schedule text such as `Free`, `5.3%` or `2.5`.
pub fn parse_rate_text(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("free") {
        return Some(0.0);
    }
    let number: String = trimmed
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dotted_codes() {
        assert_eq!(normalize_hs_code("9504.40.00.00"), Some("9504400000".into()));
        assert_eq!(normalize_hs_code(" 8471 30 "), Some("847130".into()));
        assert_eq!(normalize_hs_code("n/a"), None);
        assert_eq!(normalize_hs_code(""), None);
    }

    #[test]
    fn lookup_keys_walk_prefixes() {
        assert_eq!(
            hs_lookup_keys("9504400000"),
            vec!["9504400000", "95044000", "950440", "9504", "95"]
        );
        assert_eq!(hs_lookup_keys("9504"), vec!["9504", "95"]);
        assert_eq!(hs_lookup_keys("95"), vec!["95"]);
    }

    #[test]
    fn dotted_format() {
        assert_eq!(dotted_hs_code("950440"), "9504.40");
        assert_eq!(dotted_hs_code("9504400000"), "9504.40.00.00");
        assert_eq!(dotted_hs_code("9504"), "9504");
    }

    #[test]
    fn parses_schedule_text() {
        assert_eq!(parse_rate_text("Free"), Some(0.0));
        let parsed = parse_rate_text("5.3%").expect("percent text");
        assert!((parsed - 0.053).abs() < 1e-12);
        assert_eq!(parse_rate_text("  25 "), Some(0.25));
        assert_eq!(parse_rate_text("see note"), None);
    }

    #[test]
    fn zero_rates_are_valid() {
        let rates = DutyRates::new(0.0, 0.0);
        assert!(rates.is_valid());
        assert_eq!(rates.combined(), 0.0);
        assert!(!DutyRates::new(-0.1, 0.0).is_valid());
    }
}
