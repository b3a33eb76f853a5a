//! 과거 시세 프로바이더 폴백.

use std::sync::Arc;

use futures::future::BoxFuture;
use market_core::KlineSeries;
use market_feed::{Driver, FeedResult};
use tracing::debug;

use crate::error::{AggregatorError, AggregatorResult};

/// 드라이버를 우선순위 이름 순서로 정렬합니다. 목록에 없는 드라이버는 원래 순서대로 뒤에 붙습니다.
pub fn order_by_priority(drivers: &[Arc<dyn Driver>], priority: &[String]) -> Vec<Arc<dyn Driver>> {
    let rank = |driver: &Arc<dyn Driver>| {
        priority
            .iter()
            .position(|name| name.eq_ignore_ascii_case(driver.name()))
            .unwrap_or(priority.len())
    };

    let mut ordered: Vec<Arc<dyn Driver>> = drivers.to_vec();
    // 안정 정렬이므로 같은 순위는 원래 순서 유지
    ordered.sort_by_key(|driver| rank(driver));
    ordered
}

/// `UnsupportedAsset`이 아닌 첫 결과를 반환합니다.
///
/// 다른 에러는 폴백하지 않고 그대로 반환합니다. 모든 드라이버가 지원하지 않으면
/// `AggregatorError::UnsupportedAsset`.
pub async fn first_supported<F>(
    drivers: &[Arc<dyn Driver>],
    symbol: &str,
    fetch: F,
) -> AggregatorResult<(String, KlineSeries)>
where
    F: Fn(Arc<dyn Driver>) -> BoxFuture<'static, FeedResult<KlineSeries>>,
{
    for driver in drivers {
        match fetch(driver.clone()).await {
            Ok(series) => return Ok((driver.name().to_string(), series)),
            Err(e) if e.is_unsupported() => {
                debug!(provider = driver.name(), symbol, "Provider does not support asset");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AggregatorError::UnsupportedAsset(format!(
        "no provider has history for '{}'",
        symbol
    )))
}
