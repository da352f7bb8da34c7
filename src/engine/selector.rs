//! Region selection
//!
//! Cheap gates (enabled flag, runtime switch, schedule, condition) are
//! applied first; survivors are ordered by priority, and perception
//! triggers are checked lazily by the caller in that order.

use chrono::NaiveTime;

use crate::graph::{EngineRuntimeState, ExecutionHistory, Region, Schedule, ScheduleMode};

/// Why a region was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    /// `enabled: false` in the script
    Disabled,
    /// `enable_<label>` variable is zero or negative
    SwitchedOff,
    /// INTERVAL not yet elapsed
    Cooldown,
    /// COUNT reached
    Exhausted,
    /// TIME not yet reached
    TooEarly,
    /// Condition variable is zero or negative
    ConditionUnmet,
}

/// Inputs for schedule checks
#[derive(Debug, Clone, Copy)]
pub struct ScheduleClock {
    pub now_ms: u64,
    pub time_of_day: NaiveTime,
}

/// Check a region's schedule against its execution history
pub fn check_schedule(
    schedule: &Schedule,
    region_id: &str,
    history: &ExecutionHistory,
    clock: ScheduleClock,
) -> Result<(), Ineligible> {
    match schedule.mode {
        ScheduleMode::None => Ok(()),
        ScheduleMode::Interval => {
            let (Some(interval), Some(record)) = (schedule.interval, history.get(region_id)) else {
                return Ok(());
            };
            if clock.now_ms.saturating_sub(record.last_run_time) < interval {
                Err(Ineligible::Cooldown)
            } else {
                Ok(())
            }
        }
        ScheduleMode::Count => match schedule.max_times {
            Some(max) if history.run_count(region_id) >= max => Err(Ineligible::Exhausted),
            _ => Ok(()),
        },
        ScheduleMode::Time => match schedule.time {
            Some(time) if clock.time_of_day < time.0 => Err(Ineligible::TooEarly),
            _ => Ok(()),
        },
    }
}

/// Apply every gate except perception triggers
pub fn check_gates(
    region: &Region,
    state: &EngineRuntimeState,
    history: &ExecutionHistory,
    clock: ScheduleClock,
) -> Result<(), Ineligible> {
    if !region.enabled {
        return Err(Ineligible::Disabled);
    }
    if !region.label.is_empty() && state.enable_override(&region.enable_variable()) == Some(false) {
        return Err(Ineligible::SwitchedOff);
    }
    check_schedule(&region.schedule, &region.id, history, clock)?;
    if let Some(condition) = &region.condition {
        if state.variable(&condition.variable) <= 0 {
            return Err(Ineligible::ConditionUnmet);
        }
    }
    Ok(())
}

/// Regions passing the cheap gates, by ascending priority.
///
/// The sort is stable, so equal priorities keep declaration order.
pub fn candidates<'a>(
    regions: &'a [Region],
    state: &EngineRuntimeState,
    history: &ExecutionHistory,
    clock: ScheduleClock,
) -> Vec<&'a Region> {
    let mut eligible: Vec<&Region> = regions
        .iter()
        .filter(|region| match check_gates(region, state, history, clock) {
            Ok(()) => true,
            Err(reason) => {
                log::trace!("Region '{}' skipped: {:?}", region.id, reason);
                false
            }
        })
        .collect();
    eligible.sort_by_key(|region| region.schedule.priority);
    eligible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ScriptGraph;

    fn graph(regions: &str) -> ScriptGraph {
        ScriptGraph::from_json(&format!(
            r#"{{ "variables": {{ "tickets": 0, "enable_Bonus": 0 }},
                  "nodes": [ {{ "id": "home", "regions": [ {} ] }} ] }}"#,
            regions
        ))
        .unwrap()
    }

    fn clock(now_ms: u64) -> ScheduleClock {
        ScheduleClock {
            now_ms,
            time_of_day: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        }
    }

    const CLICK: &str = r#""action": { "type": "CLICK" }, "x": 10, "y": 10, "w": 10, "h": 10"#;

    #[test]
    fn test_priority_order_and_ties() {
        let g = graph(&format!(
            r#"{{ "id": "p7", {c}, "schedule": {{ "priority": 7 }} }},
               {{ "id": "p3", {c}, "schedule": {{ "priority": 3 }} }},
               {{ "id": "p5", {c}, "schedule": {{ "priority": 5 }} }},
               {{ "id": "p3b", {c}, "schedule": {{ "priority": 3 }} }}"#,
            c = CLICK
        ));
        let state = EngineRuntimeState::new(&g);
        let history = ExecutionHistory::new();
        let ids: Vec<&str> = candidates(&g.root().regions, &state, &history, clock(0))
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["p3", "p3b", "p5", "p7"]);
    }

    #[test]
    fn test_default_priority_is_five() {
        let g = graph(&format!(
            r#"{{ "id": "plain", {c} }}, {{ "id": "urgent", {c}, "schedule": {{ "priority": 4 }} }}"#,
            c = CLICK
        ));
        let state = EngineRuntimeState::new(&g);
        let picked = candidates(&g.root().regions, &state, &ExecutionHistory::new(), clock(0));
        assert_eq!(picked[0].id, "urgent");
    }

    #[test]
    fn test_count_schedule() {
        let g = graph(&format!(
            r#"{{ "id": "twice", {c}, "schedule": {{ "mode": "COUNT", "maxTimes": 2 }} }}"#,
            c = CLICK
        ));
        let region = &g.root().regions[0];
        let mut history = ExecutionHistory::new();

        assert!(check_schedule(&region.schedule, "twice", &history, clock(0)).is_ok());
        history.record("twice", 0);
        assert!(check_schedule(&region.schedule, "twice", &history, clock(0)).is_ok());
        history.record("twice", 0);
        assert_eq!(
            check_schedule(&region.schedule, "twice", &history, clock(0)),
            Err(Ineligible::Exhausted)
        );
        history.clear();
        assert!(check_schedule(&region.schedule, "twice", &history, clock(0)).is_ok());
    }

    #[test]
    fn test_interval_schedule() {
        let g = graph(&format!(
            r#"{{ "id": "every5s", {c}, "schedule": {{ "mode": "INTERVAL", "interval": 5000 }} }}"#,
            c = CLICK
        ));
        let schedule = &g.root().regions[0].schedule;
        let mut history = ExecutionHistory::new();
        history.record("every5s", 1000);

        assert_eq!(
            check_schedule(schedule, "every5s", &history, clock(1000)),
            Err(Ineligible::Cooldown)
        );
        assert_eq!(
            check_schedule(schedule, "every5s", &history, clock(5999)),
            Err(Ineligible::Cooldown)
        );
        assert!(check_schedule(schedule, "every5s", &history, clock(6000)).is_ok());
    }

    #[test]
    fn test_time_schedule() {
        let g = graph(&format!(
            r#"{{ "id": "evening", {c}, "schedule": {{ "mode": "TIME", "time": "18:30" }} }}"#,
            c = CLICK
        ));
        let schedule = &g.root().regions[0].schedule;
        let history = ExecutionHistory::new();
        let at = |h, m| ScheduleClock {
            now_ms: 0,
            time_of_day: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
        };
        assert_eq!(check_schedule(schedule, "evening", &history, at(18, 29)), Err(Ineligible::TooEarly));
        assert!(check_schedule(schedule, "evening", &history, at(18, 30)).is_ok());
    }

    #[test]
    fn test_gates() {
        let g = graph(&format!(
            r#"{{ "id": "off", {c}, "enabled": false }},
               {{ "id": "switched", "label": "Bonus", {c} }},
               {{ "id": "gated", {c}, "condition": {{ "variable": "tickets" }} }},
               {{ "id": "open", "label": "Open", {c} }}"#,
            c = CLICK
        ));
        let mut state = EngineRuntimeState::new(&g);
        let history = ExecutionHistory::new();
        let regions = &g.root().regions;

        assert_eq!(check_gates(&regions[0], &state, &history, clock(0)), Err(Ineligible::Disabled));
        assert_eq!(check_gates(&regions[1], &state, &history, clock(0)), Err(Ineligible::SwitchedOff));
        assert_eq!(check_gates(&regions[2], &state, &history, clock(0)), Err(Ineligible::ConditionUnmet));
        assert!(check_gates(&regions[3], &state, &history, clock(0)).is_ok());

        state.variables.insert("tickets".to_string(), 2);
        state.variables.insert("enable_Bonus".to_string(), 1);
        assert!(check_gates(&regions[1], &state, &history, clock(0)).is_ok());
        assert!(check_gates(&regions[2], &state, &history, clock(0)).is_ok());
    }
}
