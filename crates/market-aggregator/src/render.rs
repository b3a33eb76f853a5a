//! SVG 스파크라인 차트 렌더러.

use market_core::{ChartRenderer, KlineSeries, MarketError, MarketResult, RenderedChart};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

const RISING_COLOR: &str = "#16c784";
const FALLING_COLOR: &str = "#ea3943";

/// 가격 시계열을 단일 polyline SVG로 그립니다.
///
/// 마지막 가격이 첫 가격 이상이면 녹색, 아니면 적색입니다.
#[derive(Debug, Clone)]
pub struct SvgChartRenderer {
    width: u32,
    height: u32,
    stroke_width: f64,
}

impl Default for SvgChartRenderer {
    fn default() -> Self {
        Self {
            width: 164,
            height: 48,
            stroke_width: 1.5,
        }
    }
}

impl SvgChartRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(2),
            height: height.max(2),
            ..Default::default()
        }
    }

    fn points(&self, series: &KlineSeries, low: Decimal, high: Decimal) -> String {
        let n = series.len();
        let width = f64::from(self.width);
        let height = f64::from(self.height);
        let pad = self.stroke_width;
        let span = (high - low).to_f64().unwrap_or(0.0);

        series
            .prices
            .iter()
            .enumerate()
            .map(|(i, price)| {
                let x = if n > 1 {
                    width * i as f64 / (n - 1) as f64
                } else {
                    width / 2.0
                };
                let ratio = if span > 0.0 {
                    (*price - low).to_f64().unwrap_or(0.0) / span
                } else {
                    0.5
                };
                let y = pad + (height - 2.0 * pad) * (1.0 - ratio);
                format!("{:.2},{:.2}", x, y)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl ChartRenderer for SvgChartRenderer {
    fn render(&self, series: &KlineSeries) -> MarketResult<RenderedChart> {
        let (low, high) = series
            .price_range()
            .ok_or_else(|| MarketError::Render("empty price series".to_string()))?;

        let first = series.prices.first().copied().unwrap_or(Decimal::ZERO);
        let last = series.last_price().unwrap_or(Decimal::ZERO);
        let color = if last >= first {
            RISING_COLOR
        } else {
            FALLING_COLOR
        };

        let svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><polyline fill="none" stroke="{color}" stroke-width="{sw}" points="{points}"/></svg>"#,
            w = self.width,
            h = self.height,
            color = color,
            sw = self.stroke_width,
            points = self.points(series, low, high),
        );

        Ok(RenderedChart {
            bytes: svg.into_bytes(),
            extension: "svg".to_string(),
            content_type: "image/svg+xml".to_string(),
        })
    }
}
