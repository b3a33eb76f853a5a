//! 과거 시세 조회를 위한 봉(bucket) 간격 정의.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Kline 봉 간격.
///
/// 각 프로바이더는 이 값을 자신의 API 파라미터로 변환합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KlineInterval {
    /// 1분봉
    #[serde(rename = "1m")]
    M1,
    /// 5분봉
    #[serde(rename = "5m")]
    M5,
    /// 15분봉
    #[serde(rename = "15m")]
    M15,
    /// 30분봉
    #[serde(rename = "30m")]
    M30,
    /// 1시간봉
    #[serde(rename = "1h")]
    H1,
    /// 4시간봉
    #[serde(rename = "4h")]
    H4,
    /// 일봉
    #[serde(rename = "1d")]
    D1,
    /// 주봉
    #[serde(rename = "1w")]
    W1,
}

impl KlineInterval {
    /// 지원하는 모든 간격.
    pub const ALL: [KlineInterval; 8] = [
        KlineInterval::M1,
        KlineInterval::M5,
        KlineInterval::M15,
        KlineInterval::M30,
        KlineInterval::H1,
        KlineInterval::H4,
        KlineInterval::D1,
        KlineInterval::W1,
    ];

    /// 이 간격의 기간을 반환합니다.
    pub fn duration(&self) -> Duration {
        match self {
            KlineInterval::M1 => Duration::from_secs(60),
            KlineInterval::M5 => Duration::from_secs(5 * 60),
            KlineInterval::M15 => Duration::from_secs(15 * 60),
            KlineInterval::M30 => Duration::from_secs(30 * 60),
            KlineInterval::H1 => Duration::from_secs(60 * 60),
            KlineInterval::H4 => Duration::from_secs(4 * 60 * 60),
            KlineInterval::D1 => Duration::from_secs(24 * 60 * 60),
            KlineInterval::W1 => Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    /// 초 단위 값.
    pub fn as_secs(&self) -> u64 {
        self.duration().as_secs()
    }

    /// 정규 문자열 표현 ("1m", "1h", "1d" 등).
    pub fn as_str(&self) -> &'static str {
        match self {
            KlineInterval::M1 => "1m",
            KlineInterval::M5 => "5m",
            KlineInterval::M15 => "15m",
            KlineInterval::M30 => "30m",
            KlineInterval::H1 => "1h",
            KlineInterval::H4 => "4h",
            KlineInterval::D1 => "1d",
            KlineInterval::W1 => "1w",
        }
    }

    /// 주어진 구간에 들어가는 봉 개수 (올림).
    pub fn buckets_between(&self, start_ms: i64, end_ms: i64) -> u64 {
        if end_ms <= start_ms {
            return 0;
        }
        let step = self.as_secs() as i64 * 1000;
        ((end_ms - start_ms + step - 1) / step) as u64
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KlineInterval::ALL
            .iter()
            .copied()
            .find(|interval| interval.as_str() == s.trim())
            .ok_or_else(|| format!("Invalid interval: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_parse() {
        assert_eq!("1h".parse::<KlineInterval>().unwrap(), KlineInterval::H1);
        assert_eq!("15m".parse::<KlineInterval>().unwrap(), KlineInterval::M15);
        assert!("2h".parse::<KlineInterval>().is_err());
        assert!("".parse::<KlineInterval>().is_err());
    }

    #[test]
    fn test_interval_duration() {
        assert_eq!(KlineInterval::M1.as_secs(), 60);
        assert_eq!(KlineInterval::D1.as_secs(), 86_400);
        assert_eq!(KlineInterval::W1.to_string(), "1w");
    }

    #[test]
    fn test_buckets_between() {
        let hour = 3_600_000;
        assert_eq!(KlineInterval::H1.buckets_between(0, 7 * 24 * hour), 168);
        assert_eq!(KlineInterval::H1.buckets_between(0, hour + 1), 2);
        assert_eq!(KlineInterval::H1.buckets_between(10, 10), 0);
    }

    proptest::proptest! {
        #[test]
        fn prop_buckets_cover_range(
            start in 0i64..1_000_000_000_000,
            len in 1i64..100_000_000,
            idx in 0usize..KlineInterval::ALL.len(),
        ) {
            let interval = KlineInterval::ALL[idx];
            let step = interval.as_secs() as i64 * 1000;
            let buckets = interval.buckets_between(start, start + len) as i64;

            proptest::prop_assert!(buckets * step >= len);
            proptest::prop_assert!((buckets - 1) * step < len);
        }
    }
}
