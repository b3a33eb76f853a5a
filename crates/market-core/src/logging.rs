//! tracing 기반 로깅 초기화.
//!
//! 로그 레벨 필터에는 WebSocket/HTTP/DB 클라이언트 크레이트의 소음을 줄이는 지시어가
//! 기본으로 덧붙습니다. 같은 크레이트를 직접 지정한 경우에는 그 값을 따릅니다.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 기본적으로 warn 이상만 남기는 의존 크레이트.
const QUIET_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "hyper", "reqwest", "sqlx"];

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// 로그 수집기용 JSON 한 줄
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// 로그 레벨 필터 (예: "info", "market_feed=debug")
    pub level: String,
    pub format: LogFormat,
}

impl LogConfig {
    /// 설정 파일의 logging 섹션에서 생성합니다. 알 수 없는 형식은 pretty로 대체됩니다.
    pub fn from_settings(settings: &crate::config::LoggingConfig) -> Self {
        Self {
            level: settings.level.clone(),
            format: settings.format.parse().unwrap_or_default(),
        }
    }

    /// 레벨 필터에 의존 크레이트 지시어를 덧붙인 최종 필터 문자열.
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![self.level.clone()];
        for target in QUIET_TARGETS {
            let named = self
                .level
                .split(',')
                .any(|d| d.trim().split('=').next() == Some(*target));
            if !named {
                directives.push(format!("{}=warn", target));
            }
        }
        directives.join(",")
    }
}

/// 주어진 설정으로 전역 subscriber를 설치합니다.
///
/// `RUST_LOG`가 설정되어 있으면 설정 파일의 레벨보다 우선합니다.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directives()))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    match config.format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true))
            .try_init()?,
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init()?,
    }

    tracing::info!(format = ?config.format, level = %config.level, "Logging initialized");
    Ok(())
}

/// 프로바이더/심볼 필드가 붙은 span.
#[macro_export]
macro_rules! feed_span {
    ($name:expr, $provider:expr) => {
        tracing::info_span!($name, provider = %$provider)
    };
    ($name:expr, $provider:expr, $symbol:expr) => {
        tracing::info_span!($name, provider = %$provider, symbol = %$symbol)
    };
}
