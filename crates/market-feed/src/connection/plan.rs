//! 구독 계획 수립.
//!
//! 연결별 심볼 그룹은 용량 제한을 가지며, 재구독은 항상 추가만 합니다. 새 심볼은
//! 가장 최근에 연 연결을 먼저 채우고, 남는 심볼은 용량 단위로 잘라 새 연결에
//! 배정합니다.

use std::collections::HashSet;

/// 구독 변경 계획.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPlan {
    /// (연결 인덱스, 추가할 심볼). 마지막 연결에만 적용됩니다.
    pub top_off: Option<(usize, Vec<String>)>,
    /// 새 연결마다 배정할 심볼 묶음
    pub new_batches: Vec<Vec<String>>,
}

impl SubscriptionPlan {
    /// 변경 사항이 없는지.
    pub fn is_empty(&self) -> bool {
        self.top_off.is_none() && self.new_batches.is_empty()
    }

    /// 추가되는 심볼 수.
    pub fn added_count(&self) -> usize {
        self.top_off.as_ref().map_or(0, |(_, s)| s.len())
            + self.new_batches.iter().map(Vec::len).sum::<usize>()
    }

    /// 계획을 현재 그룹 목록에 적용한 결과.
    pub fn apply(&self, current: &[Vec<String>]) -> Vec<Vec<String>> {
        let mut groups = current.to_vec();
        if let Some((index, symbols)) = &self.top_off {
            groups[*index].extend(symbols.iter().cloned());
        }
        groups.extend(self.new_batches.iter().cloned());
        groups
    }
}

/// 현재 연결 그룹과 목표 심볼 집합으로 구독 계획을 만듭니다.
///
/// `target`의 중복은 제거되고 순서는 유지됩니다. `capacity`가 0이면 1로 취급합니다.
pub fn plan_subscription(
    current: &[Vec<String>],
    target: &[String],
    capacity: usize,
) -> SubscriptionPlan {
    let capacity = capacity.max(1);

    let subscribed: HashSet<&str> = current.iter().flatten().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut pending = Vec::new();
    for symbol in target {
        if !subscribed.contains(symbol.as_str()) && seen.insert(symbol.as_str()) {
            pending.push(symbol.clone());
        }
    }

    let mut plan = SubscriptionPlan::default();
    if pending.is_empty() {
        return plan;
    }

    if let Some(last) = current.len().checked_sub(1) {
        let free = capacity.saturating_sub(current[last].len());
        if free > 0 {
            let take = free.min(pending.len());
            let rest = pending.split_off(take);
            plan.top_off = Some((last, pending));
            pending = rest;
        }
    }

    plan.new_batches = pending.chunks(capacity).map(<[String]>::to_vec).collect();
    plan
}
