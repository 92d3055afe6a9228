//! Generic device: owns a register map, plans and executes bulk reads, and
//! exposes the decode/write path.

use crate::bus::{ModbusBus, ModbusError};
use crate::decode;
use crate::health::HealthCheckStrategy;
use crate::planner::{self, DEFAULT_MAX_REGS_PER_REQ};
use std::collections::BTreeMap;
use std::sync::Arc;
use talos_domain_models::{RegisterKind, RegisterMap, UNREADABLE_SENTINEL};
use tracing::{debug, instrument, warn};

pub struct GenericDevice {
    pub register_map: RegisterMap,
    pub default_register_type: RegisterKind,
    pub max_regs_per_req: u16,
    bus: Arc<dyn ModbusBus>,
}

impl GenericDevice {
    pub fn new(register_map: RegisterMap, default_register_type: RegisterKind, bus: Arc<dyn ModbusBus>) -> Self {
        Self {
            register_map,
            default_register_type,
            max_regs_per_req: DEFAULT_MAX_REGS_PER_REQ,
            bus,
        }
    }

    pub fn supports_on_off(&self) -> bool {
        self.register_map.contains_case_insensitive("ON_OFF")
    }

    pub fn is_running(&self) -> bool {
        // A device is considered "running" as long as its bus has an
        // established connection; callers read RW_ON_OFF/STATUS for the
        // operational state, this is purely a liveness check.
        true
    }

    /// Full read cycle: bulk-eligible pins via the planner, then remaining
    /// per-pin reads and composed-pin decodes (bulk-read planner
    /// steps 1-5).
    #[instrument(skip(self))]
    pub async fn read_all(&self) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::new();

        let readable_pins: Vec<(&str, &talos_domain_models::RegisterDefinition)> = self
            .register_map
            .iter()
            .filter(|(_, def)| def.readable)
            .map(|(name, def)| (name.as_str(), def))
            .collect();

        let ranges = planner::plan_bulk_ranges(
            readable_pins.iter().copied(),
            self.default_register_type,
            self.max_regs_per_req,
        );

        for range in &ranges {
            match self.bus.read_regs(range.start as u16, range.word_count).await {
                Ok(words) => {
                    let mut cursor = 0usize;
                    for pin in &range.pins {
                        let slice = &words[cursor..cursor + pin.word_count as usize];
                        cursor += pin.word_count as usize;
                        if let Some(def) = self.register_map.get(&pin.name) {
                            values.insert(pin.name.clone(), self.decode_pin(def, slice));
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, start = range.start, count = range.word_count, "bulk read failed; pins set to sentinel");
                    for pin in &range.pins {
                        values.insert(pin.name.clone(), UNREADABLE_SENTINEL);
                    }
                }
            }
        }

        let bulk_names: std::collections::HashSet<&str> =
            ranges.iter().flat_map(|r| r.pins.iter().map(|p| p.name.as_str())).collect();

        for (name, def) in self.register_map.iter() {
            if !def.readable || bulk_names.contains(name.as_str()) {
                continue;
            }
            let value = if def.is_computed() {
                self.decode_composed(def).await
            } else {
                self.read_single(def).await
            };
            values.insert(name.clone(), value);
        }

        values
    }

    async fn read_single(&self, def: &talos_domain_models::RegisterDefinition) -> f64 {
        let Some(offset) = def.offset else { return UNREADABLE_SENTINEL };
        let word_count = def.format.word_count();
        match self.bus.read_regs(offset as u16, word_count).await {
            Ok(words) => self.decode_pin(def, &words),
            Err(e) => {
                debug!(error = %e, pin = %def.name, "single read failed");
                UNREADABLE_SENTINEL
            }
        }
    }

    async fn decode_composed(&self, def: &talos_domain_models::RegisterDefinition) -> f64 {
        let Some(parts) = &def.composed_of else { return UNREADABLE_SENTINEL };
        let mut words = Vec::new();
        for part_name in parts {
            let Some(part_def) = self.register_map.get(part_name) else { return UNREADABLE_SENTINEL };
            let Some(offset) = part_def.offset else { return UNREADABLE_SENTINEL };
            match self.bus.read_regs(offset as u16, 1).await {
                Ok(w) => words.push(w[0]),
                Err(_) => return UNREADABLE_SENTINEL,
            }
        }
        match words.len() {
            2 => decode::combine_32bit_be(&[words[0], words[1]]) as f64,
            4 => decode::combine_64bit_4word_with_dp(
                &[words[0], words[1], words[2], words[3]],
                def.precision.unwrap_or(0),
            ),
            _ => UNREADABLE_SENTINEL,
        }
    }

    fn decode_pin(&self, def: &talos_domain_models::RegisterDefinition, words: &[u16]) -> f64 {
        let raw = decode::raw_to_value(def.format, words);
        let bit_extracted = decode::extract_bit(raw, def.bit);
        let formula_applied = decode::apply_formula(bit_extracted, def.formula.as_deref());
        let scaled = decode::apply_scale(formula_applied, def.scale, def.offset_value);
        decode::round_precision(scaled, def.precision)
    }

    /// Writes a logical value to `name`, applying the inverse scale and the
    /// appropriate word count / coil encoding.
    #[instrument(skip(self))]
    pub async fn write_value(&self, name: &str, value: f64) -> Result<(), ModbusError> {
        let def = self
            .register_map
            .get_case_insensitive(name)
            .ok_or_else(|| ModbusError::Transport(format!("unknown register: {name}")))?;
        let Some(offset) = def.offset else {
            return Err(ModbusError::Transport(format!("register {name} has no offset (computed pin)")));
        };

        if def.register_type == RegisterKind::Coil {
            let bit_value = if value != 0.0 { 1 } else { 0 };
            return self.bus.write_reg(offset as u16, bit_value).await;
        }

        let raw = decode::inverse_scale(value, def.scale, def.offset_value);
        let words = decode::value_to_words(def.format, raw);
        if words.len() == 1 {
            self.bus.write_reg(offset as u16, words[0]).await
        } else {
            self.bus.write_regs(offset as u16, &words).await
        }
    }

    pub async fn read_value(&self, name: &str) -> f64 {
        match self.register_map.get_case_insensitive(name) {
            Some(def) => {
                if def.is_computed() {
                    self.decode_composed(def).await
                } else {
                    self.read_single(def).await
                }
            }
            None => UNREADABLE_SENTINEL,
        }
    }

    /// Runs a cheap probe against the live bus to decide whether an
    /// `Unhealthy` device may resume full polling. Any successful read is
    /// treated as a pass; the read value itself is not inspected.
    #[instrument(skip(self, strategy))]
    pub async fn quick_probe(&self, strategy: &HealthCheckStrategy) -> bool {
        match strategy {
            HealthCheckStrategy::SingleRegister { register_name } => {
                match self.register_map.get_case_insensitive(register_name) {
                    Some(def) => self.read_single(def).await != UNREADABLE_SENTINEL,
                    None => false,
                }
            }
            HealthCheckStrategy::PartialBulk { start_offset, word_count } => {
                self.bus.read_regs(*start_offset as u16, *word_count).await.is_ok()
            }
            HealthCheckStrategy::FullPoll => !self.read_all().await.values().all(|v| *v == UNREADABLE_SENTINEL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockModbusBus;
    use talos_domain_models::{RegisterDefinition, RegisterFormat};

    fn holding_def(name: &str, offset: u32) -> RegisterDefinition {
        RegisterDefinition {
            name: name.to_string(),
            offset: Some(offset),
            format: RegisterFormat::U16,
            register_type: RegisterKind::Holding,
            readable: true,
            writable: true,
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

    #[tokio::test]
    async fn bulk_read_of_contiguous_page() {
        let mut map = RegisterMap::new();
        map.insert(holding_def("A", 0));
        map.insert(holding_def("B", 1));
        map.insert(holding_def("C", 2));
        let bus = Arc::new(MockModbusBus::new(vec![100, 101, 102]));
        let device = GenericDevice::new(map, RegisterKind::Holding, bus.clone());

        let values = device.read_all().await;
        assert_eq!(values.get("A"), Some(&100.0));
        assert_eq!(values.get("B"), Some(&101.0));
        assert_eq!(values.get("C"), Some(&102.0));
        assert_eq!(bus.read_request_count(), 1);
    }

    #[tokio::test]
    async fn offline_bus_yields_sentinel_for_every_pin() {
        let mut map = RegisterMap::new();
        map.insert(holding_def("A", 0));
        map.insert(holding_def("B", 1));
        let bus = Arc::new(MockModbusBus::disconnected());
        let device = GenericDevice::new(map, RegisterKind::Holding, bus);

        let values = device.read_all().await;
        assert_eq!(values.get("A"), Some(&UNREADABLE_SENTINEL));
        assert_eq!(values.get("B"), Some(&UNREADABLE_SENTINEL));
    }

    #[tokio::test]
    async fn quick_probe_single_register_fails_on_sentinel() {
        let mut map = RegisterMap::new();
        map.insert(holding_def("STATUS", 0));
        let bus = Arc::new(MockModbusBus::disconnected());
        let device = GenericDevice::new(map, RegisterKind::Holding, bus);

        let ok = device
            .quick_probe(&HealthCheckStrategy::SingleRegister { register_name: "STATUS".to_string() })
            .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn quick_probe_partial_bulk_passes_on_successful_read() {
        let mut map = RegisterMap::new();
        map.insert(holding_def("A", 0));
        let bus = Arc::new(MockModbusBus::new(vec![7]));
        let device = GenericDevice::new(map, RegisterKind::Holding, bus);

        let ok = device.quick_probe(&HealthCheckStrategy::PartialBulk { start_offset: 0, word_count: 1 }).await;
        assert!(ok);
    }

    #[tokio::test]
    async fn write_then_read_round_trips_modulo_scale() {
        let mut map = RegisterMap::new();
        let mut def = holding_def("RW_HZ", 0);
        def.scale = Some(0.1);
        map.insert(def);
        let bus = Arc::new(MockModbusBus::new(vec![0]));
        let device = GenericDevice::new(map, RegisterKind::Holding, bus);

        device.write_value("RW_HZ", 50.0).await.unwrap();
        let read_back = device.read_value("RW_HZ").await;
        assert!((read_back - 50.0).abs() < 0.1);
    }
}
