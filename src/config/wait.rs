use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Min/max quiescence bounds applied between a change burst and the
/// render it triggers. The render fires at `min(t_last + min, t0 + max)`
/// where `t0` is the first pending change and `t_last` the most recent.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitConfig {
    #[serde(default, deserialize_with = "de_duration")]
    pub min: Duration,
    #[serde(default, deserialize_with = "de_duration")]
    pub max: Duration,
}

impl WaitConfig {
    pub fn is_active(&self) -> bool {
        self.min > Duration::ZERO
    }
}

impl FromStr for WaitConfig {
    type Err = String;

    /// Parses `"<min>"` or `"<min>:<max>"`. With only a minimum, the
    /// maximum defaults to four times it.
    fn from_str(s: &str) -> Result<Self, String> {
        if s.trim().is_empty() {
            return Err("cannot specify empty wait interval".to_string());
        }
        let parts: Vec<&str> = s.split(':').collect();
        let (min, max) = match parts.as_slice() {
            [min] => {
                let min = parse_duration(min.trim())?;
                (min, min * 4)
            }
            [min, max] => (parse_duration(min.trim())?, parse_duration(max.trim())?),
            _ => return Err("invalid wait interval format".to_string()),
        };
        if max < min {
            return Err("wait interval max must be larger than min".to_string());
        }
        Ok(WaitConfig { min, max })
    }
}

fn de_duration<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let s = String::deserialize(d)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Go-style duration strings: a sequence of `<decimal><unit>` terms
/// where unit is one of `ns`, `us`, `ms`, `s`, `m`, `h`. Negative
/// durations are rejected, there is nothing to wait backwards for.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.starts_with('-') {
        return Err(format!("cannot specify a negative duration: {:?}", s));
    }
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("missing unit in duration {:?}", s))?;
        if digits_end == 0 {
            return Err(format!("invalid duration {:?}", s));
        }
        let number: f64 = rest[..digits_end]
            .parse()
            .map_err(|_| format!("invalid duration {:?}", s))?;
        let unit_end = rest[digits_end..]
            .find(|c: char| c.is_ascii_digit())
            .map(|i| digits_end + i)
            .unwrap_or(rest.len());
        let unit = &rest[digits_end..unit_end];
        let scale = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(format!("unknown unit {:?} in duration {:?}", unit, s)),
        };
        total += Duration::from_secs_f64(number * scale);
        rest = &rest[unit_end..];
    }
    Ok(total)
}

#[cfg(test)]
mod wait_test {
    use super::*;

    #[test]
    fn test_parse_min_and_max() {
        let w: WaitConfig = "10s:20s".parse().unwrap();
        assert_eq!(w.min, Duration::from_secs(10));
        assert_eq!(w.max, Duration::from_secs(20));
    }

    #[test]
    fn test_parse_min_only_defaults_max() {
        let w: WaitConfig = "10s".parse().unwrap();
        assert_eq!(w.min, Duration::from_secs(10));
        assert_eq!(w.max, Duration::from_secs(40));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("".parse::<WaitConfig>().is_err());
        assert!("  ".parse::<WaitConfig>().is_err());
        assert!("10s:5s".parse::<WaitConfig>().is_err());
        assert!("-10s".parse::<WaitConfig>().is_err());
        assert!("1s:2s:3s".parse::<WaitConfig>().is_err());
        assert!("banana".parse::<WaitConfig>().is_err());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("5parsecs").is_err());
    }
}
