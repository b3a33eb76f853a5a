//! 차트 재생성 통계.

use std::time::Duration;

use serde::Serialize;

/// 한 번의 차트 재생성 결과.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChartRefreshStats {
    /// 대상 자산 수 (심볼이 있는 자산)
    pub total: usize,
    /// 차트 URL 갱신 성공
    pub success: usize,
    /// 렌더링/업로드/조회 실패
    pub errors: usize,
    /// 모든 프로바이더가 지원하지 않음
    pub unsupported: usize,
    /// 다른 재생성이 진행 중이라 건너뜀
    pub skipped: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl ChartRefreshStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 성공률 (%).
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.success as f64 / self.total as f64) * 100.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!(
            total = self.total,
            success = self.success,
            errors = self.errors,
            unsupported = self.unsupported,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "Chart refresh completed"
        );
    }
}
