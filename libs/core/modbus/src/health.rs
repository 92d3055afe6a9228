//! Device health tracking and health-check strategy inference
//! (Health Manager).
//!
//! A device starts `Healthy`. Consecutive poll failures beyond a threshold
//! flip it to `Unhealthy`, starting a cooldown; once the cooldown elapses a
//! single cheap "quick health check" decides whether full polling resumes.
//! The strategy used for that quick check is inferred once per device from
//! its register map, following the keyword/device-type rules recovered from
//! the reference health-check strategy inferencer.

use std::time::{Duration, Instant};
use talos_domain_models::RegisterMap;

const STATUS_KEYWORDS: &[&str] = &[
    "INVSTATUS",
    "STATUS",
    "COMM_STATUS",
    "DEVICE_STATUS",
    "READY",
    "ONLINE_FLAG",
    "DEVICE_READY",
    "ALARM",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// The cheap probe used while a device is `Unhealthy`, to decide whether it
/// is safe to resume full polling (quick health check).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckStrategy {
    /// Read a single STATUS-like register and treat any successful read as
    /// a pass regardless of value.
    SingleRegister { register_name: String },
    /// Read a small bulk range covering the device's lowest-offset pins,
    /// used when no STATUS-like register exists but the device otherwise
    /// supports bulk reads.
    PartialBulk { start_offset: u32, word_count: u16 },
    /// No usable probe could be inferred; fall back to a full poll cycle.
    FullPoll,
}

/// Infers the quick health check strategy for a device from its register
/// map and declared model/device type.
pub fn infer_strategy(register_map: &RegisterMap, device_type: &str) -> HealthCheckStrategy {
    if let Some(name) = find_status_register(register_map) {
        return HealthCheckStrategy::SingleRegister { register_name: name };
    }

    let device_type = device_type.to_ascii_lowercase();
    match device_type.as_str() {
        "inverter" | "vfd" => partial_bulk_or_full(register_map, 2),
        "ai_module" | "di_module" | "io_module" => partial_bulk_or_full(register_map, 1),
        "power_meter" => partial_bulk_or_full(register_map, 4),
        _ => partial_bulk_or_full(register_map, 1),
    }
}

/// As [`infer_strategy`], but consults an author-supplied register name hint
/// first (`<driver>.yml`'s `health_check.register`). Kept as a
/// separate entry point rather than a parameter on `infer_strategy` so the
/// keyword/device-type inference stays testable on its own.
pub fn infer_strategy_with_hint(register_map: &RegisterMap, device_type: &str, hint_register: Option<&str>) -> HealthCheckStrategy {
    if let Some(name) = hint_register {
        if register_map.get_case_insensitive(name).is_some_and(|def| def.readable) {
            return HealthCheckStrategy::SingleRegister { register_name: name.to_string() };
        }
    }
    infer_strategy(register_map, device_type)
}

fn find_status_register(register_map: &RegisterMap) -> Option<String> {
    let mut candidates: Vec<(String, u32)> = register_map
        .iter()
        .filter_map(|(name, def)| {
            let upper = name.to_ascii_uppercase();
            let matches = STATUS_KEYWORDS.iter().any(|kw| upper.contains(kw));
            if matches && def.readable && def.offset.is_some() {
                Some((name.clone(), def.offset.unwrap()))
            } else {
                None
            }
        })
        .collect();
    candidates.sort_by_key(|(_, offset)| *offset);
    candidates.into_iter().next().map(|(name, _)| name)
}

fn partial_bulk_or_full(register_map: &RegisterMap, word_count: u16) -> HealthCheckStrategy {
    let lowest = register_map
        .iter()
        .filter(|(_, def)| def.readable && def.offset.is_some())
        .map(|(_, def)| def.offset.unwrap())
        .min();
    match lowest {
        Some(start_offset) => HealthCheckStrategy::PartialBulk { start_offset, word_count },
        None => HealthCheckStrategy::FullPoll,
    }
}

/// Derived cooldown/backoff parameters for a device's poll interval
/// (cooldown scales with poll interval so a slow-polled device
/// isn't thrashed by fast health probes).
#[derive(Debug, Clone, Copy)]
pub struct HealthParams {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

pub fn calculate_health_params(poll_interval: Duration) -> HealthParams {
    HealthParams {
        failure_threshold: 3,
        cooldown: poll_interval.max(Duration::from_secs(1)) * 5,
    }
}

pub struct HealthManager {
    state: HealthState,
    consecutive_failures: u32,
    params: HealthParams,
    unhealthy_since: Option<Instant>,
}

impl HealthManager {
    pub fn new(params: HealthParams) -> Self {
        Self { state: HealthState::Healthy, consecutive_failures: 0, params, unhealthy_since: None }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn mark_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = HealthState::Healthy;
        self.unhealthy_since = None;
    }

    pub fn mark_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.params.failure_threshold && self.state == HealthState::Healthy {
            self.state = HealthState::Unhealthy;
            self.unhealthy_since = Some(Instant::now());
        }
    }

    /// Whether the cooldown has elapsed and a quick health check should be
    /// attempted to decide if full polling can resume.
    pub fn cooldown_elapsed(&self) -> bool {
        match self.unhealthy_since {
            Some(since) => since.elapsed() >= self.params.cooldown,
            None => false,
        }
    }

    /// Restarts the cooldown clock after a failed quick health check,
    /// without touching `consecutive_failures` (the device stays
    /// `UNHEALTHY` and waits out another full cooldown before the next
    /// probe attempt).
    pub fn retry_cooldown(&mut self) {
        if self.state == HealthState::Unhealthy {
            self.unhealthy_since = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talos_domain_models::{RegisterDefinition, RegisterFormat, RegisterKind};

    fn def(name: &str, offset: u32) -> RegisterDefinition {
        RegisterDefinition {
            name: name.to_string(),
            offset: Some(offset),
            format: RegisterFormat::U16,
            register_type: RegisterKind::Holding,
            readable: true,
            writable: false,
            scale: None,
            offset_value: None,
            formula: None,
            precision: None,
            unit: None,
            bit: None,
            composed_of: None,
            scale_from: None,
        }
    }

    #[test]
    fn prefers_status_keyword_register_when_present() {
        let mut map = RegisterMap::new();
        map.insert(def("TEMP", 0));
        map.insert(def("COMM_STATUS", 5));
        let strategy = infer_strategy(&map, "inverter");
        assert_eq!(strategy, HealthCheckStrategy::SingleRegister { register_name: "COMM_STATUS".into() });
    }

    #[test]
    fn falls_back_to_partial_bulk_for_known_device_type() {
        let mut map = RegisterMap::new();
        map.insert(def("HZ", 3));
        let strategy = infer_strategy(&map, "vfd");
        assert_eq!(strategy, HealthCheckStrategy::PartialBulk { start_offset: 3, word_count: 2 });
    }

    #[test]
    fn hint_register_wins_over_keyword_and_device_type_inference() {
        let mut map = RegisterMap::new();
        map.insert(def("TEMP", 0));
        map.insert(def("CUSTOM_HEALTH_PIN", 4));
        let strategy = infer_strategy_with_hint(&map, "inverter", Some("CUSTOM_HEALTH_PIN"));
        assert_eq!(strategy, HealthCheckStrategy::SingleRegister { register_name: "CUSTOM_HEALTH_PIN".into() });
    }

    #[test]
    fn hint_register_falls_back_when_unknown() {
        let mut map = RegisterMap::new();
        map.insert(def("COMM_STATUS", 5));
        let strategy = infer_strategy_with_hint(&map, "inverter", Some("DOES_NOT_EXIST"));
        assert_eq!(strategy, HealthCheckStrategy::SingleRegister { register_name: "COMM_STATUS".into() });
    }

    #[test]
    fn falls_back_to_full_poll_when_map_is_empty() {
        let map = RegisterMap::new();
        let strategy = infer_strategy(&map, "unknown");
        assert_eq!(strategy, HealthCheckStrategy::FullPoll);
    }

    #[test]
    fn three_consecutive_failures_trip_unhealthy() {
        let mut hm = HealthManager::new(calculate_health_params(Duration::from_secs(1)));
        hm.mark_failure();
        hm.mark_failure();
        assert_eq!(hm.state(), HealthState::Healthy);
        hm.mark_failure();
        assert_eq!(hm.state(), HealthState::Unhealthy);
    }

    #[test]
    fn retry_cooldown_restarts_the_wait_without_leaving_unhealthy() {
        let mut hm = HealthManager::new(calculate_health_params(Duration::from_millis(1)));
        hm.mark_failure();
        hm.mark_failure();
        hm.mark_failure();
        assert_eq!(hm.state(), HealthState::Unhealthy);
        std::thread::sleep(Duration::from_millis(10));
        assert!(hm.cooldown_elapsed());

        hm.retry_cooldown();
        assert_eq!(hm.state(), HealthState::Unhealthy);
        assert!(!hm.cooldown_elapsed());
    }

    #[test]
    fn retry_cooldown_is_a_no_op_while_healthy() {
        let mut hm = HealthManager::new(calculate_health_params(Duration::from_millis(1)));
        hm.retry_cooldown();
        assert_eq!(hm.state(), HealthState::Healthy);
        assert!(!hm.cooldown_elapsed());
    }

    #[test]
    fn success_resets_failure_count_and_state() {
        let mut hm = HealthManager::new(calculate_health_params(Duration::from_secs(1)));
        hm.mark_failure();
        hm.mark_failure();
        hm.mark_failure();
        assert_eq!(hm.state(), HealthState::Unhealthy);
        hm.mark_success();
        assert_eq!(hm.state(), HealthState::Healthy);
    }
}
