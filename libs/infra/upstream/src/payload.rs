//! Snapshot -> `PushIMAData` envelope conversion.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use talos_domain_models::snapshot::Snapshot;

/// `equip_suffix` alphabet: `SR` (DI), `CI` (inverter), `ST`
/// (temp), `SP` (pressure), `SF` (flow), `SE` (energy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquipSuffix {
    Sr,
    Ci,
    St,
    Sp,
    Sf,
    Se,
}

impl EquipSuffix {
    fn as_str(self) -> &'static str {
        match self {
            EquipSuffix::Sr => "SR",
            EquipSuffix::Ci => "CI",
            EquipSuffix::St => "ST",
            EquipSuffix::Sp => "SP",
            EquipSuffix::Sf => "SF",
            EquipSuffix::Se => "SE",
        }
    }
}

/// `deviceId = gatewayId[:11] + hex2(slave) + hex1(idx) + equipSuffix`
/// (device ID construction).
pub fn build_device_id(gateway_id: &str, slave_id: &str, idx: u32, suffix: EquipSuffix) -> String {
    let prefix: String = gateway_id.chars().take(11).collect();
    let slave: u32 = slave_id.parse().unwrap_or(0);
    format!("{prefix}{:02x}{:01x}{}", slave & 0xff, idx & 0xf, suffix.as_str())
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceDataItem {
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    #[serde(rename = "Data")]
    pub data: Map<String, Value>,
}

/// One `PushIMAData` envelope, matching the upstream payload's bit-exact shape.
#[derive(Debug, Clone, Serialize)]
pub struct PushImaPayload {
    #[serde(rename = "FUNC")]
    pub func: &'static str,
    pub version: &'static str,
    #[serde(rename = "GatewayID")]
    pub gateway_id: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Data")]
    pub data: Vec<DeviceDataItem>,
}

impl PushImaPayload {
    pub fn new(gateway_id: String, tick: DateTime<Utc>, data: Vec<DeviceDataItem>) -> Self {
        Self {
            func: "PushIMAData",
            version: "6.0",
            gateway_id,
            timestamp: tick.format("%Y%m%d%H%M%S").to_string(),
            data,
        }
    }
}

/// Converts one device's snapshot into zero or more `DeviceDataItem`s,
/// dispatching on `snapshot.device_type` the way
/// `talos-core-modbus::health::infer_strategy` classifies device families.
pub fn convert_snapshot(gateway_id: &str, snapshot: &Snapshot) -> Vec<DeviceDataItem> {
    match snapshot.device_type.to_ascii_lowercase().as_str() {
        "inverter" | "vfd" => convert_inverter(gateway_id, snapshot),
        "di_module" | "io_module" => convert_di_module(gateway_id, snapshot),
        "ai_module" => convert_ai_module(gateway_id, snapshot),
        "flow_meter" => convert_flow_meter(gateway_id, snapshot),
        "power_meter" => convert_power_meter(gateway_id, snapshot),
        other => {
            tracing::debug!(device_type = other, "no upstream converter registered for device type");
            Vec::new()
        }
    }
}

fn convert_inverter(gateway_id: &str, snapshot: &Snapshot) -> Vec<DeviceDataItem> {
    const FIELD_MAP: &[(&str, &str, bool)] = &[
        ("KWH", "kwh", false),
        ("VOLTAGE", "voltage", false),
        ("CURRENT", "current", false),
        ("KW", "kw", false),
        ("HZ", "hz", false),
        ("ERROR", "error", true),
        ("ALERT", "alert", true),
        ("INVSTATUS", "invstatus", true),
        ("RW_HZ", "set_hz", true),
        ("RW_ON_OFF", "on_off", true),
    ];

    let mut data = Map::new();
    for (raw_key, target_key, as_int) in FIELD_MAP {
        if let Some(value) = snapshot.value(raw_key) {
            insert_number(&mut data, target_key, value, *as_int);
        }
    }
    if data.is_empty() {
        return Vec::new();
    }
    let device_id = build_device_id(gateway_id, &snapshot.slave_id, 0, EquipSuffix::Ci);
    vec![DeviceDataItem { device_id, data }]
}

fn convert_di_module(gateway_id: &str, snapshot: &Snapshot) -> Vec<DeviceDataItem> {
    let mut result = Vec::new();
    for i in 1..=16u32 {
        let key = format!("DIn{i:02}");
        let Some(relay) = snapshot.value(&key) else { continue };

        let mut data = Map::new();
        data.insert("Relay0".into(), Value::from(relay as i64));
        data.insert("Relay1".into(), Value::from(0));
        data.insert("MCStatus0".into(), Value::from(snapshot.value("DOut01").unwrap_or(0.0) as i64));
        data.insert("MCStatus1".into(), Value::from(snapshot.value("DOut02").unwrap_or(0.0) as i64));
        data.insert("ByPass".into(), Value::from(snapshot.value("ByPass").unwrap_or(0.0) as i64));

        let device_id = build_device_id(gateway_id, &snapshot.slave_id, i - 1, EquipSuffix::Sr);
        result.push(DeviceDataItem { device_id, data });
    }
    result
}

fn infer_idx_from_key(key: &str) -> u32 {
    let digits: String = key.chars().rev().take_while(|c| c.is_ascii_digit()).collect::<String>().chars().rev().collect();
    digits.parse::<u32>().map(|n| n.saturating_sub(1)).unwrap_or(0)
}

fn convert_ai_module(gateway_id: &str, snapshot: &Snapshot) -> Vec<DeviceDataItem> {
    let mut result = Vec::new();
    for (key, value) in &snapshot.values {
        let (sensor_field, suffix) = if key.to_ascii_lowercase().starts_with("temp") {
            ("Temp", EquipSuffix::St)
        } else if key.to_ascii_lowercase().starts_with("pressure") {
            ("Pressure", EquipSuffix::Sp)
        } else {
            continue;
        };

        let idx = infer_idx_from_key(key);
        let mut data = Map::new();
        data.insert(sensor_field.into(), json_number(*value));
        let device_id = build_device_id(gateway_id, &snapshot.slave_id, idx, suffix);
        result.push(DeviceDataItem { device_id, data });
    }
    result
}

fn convert_flow_meter(gateway_id: &str, snapshot: &Snapshot) -> Vec<DeviceDataItem> {
    const FLOW_SCALE: f64 = 23.1784214;
    let flow = snapshot.value("FLOW_VALUE").unwrap_or(0.0) * FLOW_SCALE;
    let consumption = (snapshot.value("FLOW_CONSUMPTION").unwrap_or(0.0) * FLOW_SCALE) as i64;
    let revconsumption = (snapshot.value("FLOW_REVCONSUMPTION").unwrap_or(0.0) * FLOW_SCALE) as i64;
    let direction = match snapshot.value("FLOW_DIRECTION") {
        Some(v) if v == -1.0 => 65535,
        Some(v) => v as i64,
        None => 0,
    };

    let mut data = Map::new();
    data.insert("flow".into(), json_number(round_to(flow, 4)));
    data.insert("consumption".into(), Value::from(consumption));
    data.insert("revconsumption".into(), Value::from(revconsumption));
    data.insert("direction".into(), Value::from(direction));

    let device_id = build_device_id(gateway_id, &snapshot.slave_id, 0, EquipSuffix::Sf);
    vec![DeviceDataItem { device_id, data }]
}

fn convert_power_meter(gateway_id: &str, snapshot: &Snapshot) -> Vec<DeviceDataItem> {
    const ROUND2: &[&str] = &[
        "AverageVoltage",
        "AverageCurrent",
        "Phase_A_Current",
        "Phase_B_Current",
        "Phase_C_Current",
        "Kw",
        "Kva",
        "Kvar",
        "Kwh",
        "Kvarh",
    ];
    const ENERGY_SCALE_TABLE: [f64; 8] = [0.1, 1.0, 10.0, 100.0, 1000.0, 10_000.0, 100_000.0, 1_000_000.0];

    let mut mapped = std::collections::BTreeMap::new();
    for field in ["AverageVoltage", "AverageCurrent", "Phase_A_Current", "Phase_B_Current", "Phase_C_Current", "Kw", "Kva", "Kvar"] {
        mapped.insert(field.to_string(), snapshot.value(field).unwrap_or(0.0));
    }
    mapped.insert("AveragePowerFactor".to_string(), snapshot.value("AveragePowerFactor").unwrap_or(0.0));

    match (snapshot.value("Kwh_SUM"), snapshot.value("Kvarh_SUM")) {
        (Some(kwh), Some(kvarh)) => {
            mapped.insert("Kwh".to_string(), kwh);
            mapped.insert("Kvarh".to_string(), kvarh);
        }
        _ => {
            let idx = snapshot.value("SCALE_EnergyIndex").unwrap_or(-1.0) as i64;
            let mul = if (0..ENERGY_SCALE_TABLE.len() as i64).contains(&idx) {
                ENERGY_SCALE_TABLE[idx as usize] * 0.001
            } else {
                0.001
            };
            mapped.insert("Kwh".to_string(), read_3word(snapshot, "Kwh") * mul);
            mapped.insert("Kvarh".to_string(), read_3word(snapshot, "Kvarh") * mul);
        }
    }

    for field in ROUND2 {
        if let Some(v) = mapped.get_mut(*field) {
            *v = round_to(*v, 2);
        }
    }
    if let Some(v) = mapped.get_mut("AveragePowerFactor") {
        *v = round_to(*v, 3);
    }

    let mut data = Map::new();
    for (k, v) in mapped {
        data.insert(k, json_number(v));
    }

    let device_id = build_device_id(gateway_id, &snapshot.slave_id, 0, EquipSuffix::Se);
    vec![DeviceDataItem { device_id, data }]
}

fn read_3word(snapshot: &Snapshot, prefix: &str) -> f64 {
    let w1 = snapshot.value(&format!("{prefix}_W1_HI")).unwrap_or(0.0) as i64;
    let w2 = snapshot.value(&format!("{prefix}_W2_MD")).unwrap_or(0.0) as i64;
    let w3 = snapshot.value(&format!("{prefix}_W3_LO")).unwrap_or(0.0) as i64;
    ((w1 << 32) | (w2 << 16) | w3) as f64
}

fn round_to(v: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (v * factor).round() / factor
}

fn insert_number(data: &mut Map<String, Value>, key: &str, value: f64, as_int: bool) {
    let json = if as_int { Value::from(value as i64) } else { json_number(value) };
    data.insert(key.to_string(), json);
}

fn json_number(v: f64) -> Value {
    serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use talos_domain_models::device::DeviceId;

    fn snapshot(device_type: &str, slave_id: &str, values: &[(&str, f64)]) -> Snapshot {
        let mut map = BTreeMap::new();
        for (k, v) in values {
            map.insert((*k).to_string(), *v);
        }
        Snapshot::new(DeviceId::from("M_1"), "M", slave_id, device_type, 0, map)
    }

    #[test]
    fn device_id_uses_first_eleven_gateway_chars() {
        let id = build_device_id("GATEWAY0001EXTRA", "2", 0, EquipSuffix::Ci);
        assert!(id.starts_with("GATEWAY0001"));
        assert!(id.ends_with("CI"));
    }

    #[test]
    fn inverter_conversion_maps_known_fields() {
        let snap = snapshot("inverter", "2", &[("KWH", 12.5), ("HZ", 60.0), ("RW_ON_OFF", 1.0)]);
        let items = convert_snapshot("GATEWAY0001", &snap);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].data["kwh"], json_number(12.5));
        assert_eq!(items[0].data["on_off"], Value::from(1));
    }

    #[test]
    fn di_module_emits_one_item_per_present_pin() {
        let snap = snapshot("di_module", "3", &[("DIn01", 1.0), ("DIn02", 0.0)]);
        let items = convert_snapshot("GATEWAY0001", &snap);
        assert_eq!(items.len(), 2);
        assert!(items[0].device_id.ends_with("SR"));
    }

    #[test]
    fn flow_meter_applies_scale_and_direction_sentinel() {
        let snap = snapshot("flow_meter", "4", &[("FLOW_VALUE", 1.0), ("FLOW_DIRECTION", -1.0)]);
        let items = convert_snapshot("GATEWAY0001", &snap);
        assert_eq!(items[0].data["direction"], Value::from(65535));
        assert_eq!(items[0].data["flow"], json_number(round_to(23.1784214, 4)));
    }

    #[test]
    fn power_meter_prefers_sum_fields_over_legacy_reconstruction() {
        let snap = snapshot("power_meter", "5", &[("Kwh_SUM", 10.0), ("Kvarh_SUM", 2.0)]);
        let items = convert_snapshot("GATEWAY0001", &snap);
        assert_eq!(items[0].data["Kwh"], json_number(10.0));
    }

    #[test]
    fn ai_module_infers_idx_from_trailing_digit() {
        let snap = snapshot("ai_module", "6", &[("Temp2", 25.0)]);
        let items = convert_snapshot("GATEWAY0001", &snap);
        assert_eq!(items.len(), 1);
        // idx = 1 (zero-based) -> hex digit '1'
        assert!(items[0].device_id.contains('1'));
    }
}
