//! Device snapshot: the unit published on `DEVICE_SNAPSHOT` and stored by
//! the repository.

use crate::device::DeviceId;
use crate::UNREADABLE_SENTINEL;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub device_id: DeviceId,
    pub model: String,
    pub slave_id: String,
    pub device_type: String,
    /// Unix epoch seconds. Stored as an integer rather than a formatted
    /// string so ordering and range queries stay cheap; formatted per
    /// upstream payload requirements at the edge (libs/infra/upstream).
    pub sampling_ts: i64,
    pub is_online: bool,
    pub values: BTreeMap<String, f64>,
}

impl Snapshot {
    /// Builds a snapshot and derives `is_online` from its values: a
    /// snapshot is offline iff every numeric value equals -1.
    pub fn new(
        device_id: DeviceId,
        model: impl Into<String>,
        slave_id: impl Into<String>,
        device_type: impl Into<String>,
        sampling_ts: i64,
        values: BTreeMap<String, f64>,
    ) -> Self {
        let is_online = Self::derive_online(&values);
        Self {
            device_id,
            model: model.into(),
            slave_id: slave_id.into(),
            device_type: device_type.into(),
            sampling_ts,
            is_online,
            values,
        }
    }

    /// All-sentinel offline snapshot, used by the Monitor when a device is
    /// in cooldown or a read fails.
    pub fn offline(
        device_id: DeviceId,
        model: impl Into<String>,
        slave_id: impl Into<String>,
        device_type: impl Into<String>,
        sampling_ts: i64,
        param_names: impl IntoIterator<Item = String>,
    ) -> Self {
        let values = param_names
            .into_iter()
            .map(|n| (n, UNREADABLE_SENTINEL))
            .collect();
        Self {
            device_id,
            model: model.into(),
            slave_id: slave_id.into(),
            device_type: device_type.into(),
            sampling_ts,
            is_online: false,
            values,
        }
    }

    fn derive_online(values: &BTreeMap<String, f64>) -> bool {
        if values.is_empty() {
            return false;
        }
        !values.values().all(|v| *v == UNREADABLE_SENTINEL)
    }

    pub fn value(&self, param: &str) -> Option<f64> {
        self.values.get(param).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_iff_all_sentinel() {
        let mut values = BTreeMap::new();
        values.insert("A".into(), -1.0);
        values.insert("B".into(), -1.0);
        let s = Snapshot::new(DeviceId::from("M_1"), "M", "1", "t", 0, values);
        assert!(s.is_online == false);

        let mut values = BTreeMap::new();
        values.insert("A".into(), -1.0);
        values.insert("B".into(), 42.0);
        let s = Snapshot::new(DeviceId::from("M_1"), "M", "1", "t", 0, values);
        assert!(s.is_online);
    }

    #[test]
    fn empty_values_is_offline() {
        let s = Snapshot::new(DeviceId::from("M_1"), "M", "1", "t", 0, BTreeMap::new());
        assert!(!s.is_online);
    }
}
