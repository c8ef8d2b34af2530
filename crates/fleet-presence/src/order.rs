/// Presentation order of the device table: online devices first, then by id.
use std::cmp::Ordering;

use crate::presence::DeviceRecord;

/// Total order over records. Records only tie when their ids are equal.
pub fn compare(a: &DeviceRecord, b: &DeviceRecord) -> Ordering {
    b.online.cmp(&a.online).then_with(|| a.id.cmp(&b.id))
}

pub fn sort_records(records: &mut [DeviceRecord]) {
    records.sort_by(compare);
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{DateTime, Utc};

    fn record(id: &str, online: bool) -> DeviceRecord {
        let mut r = DeviceRecord::new(id, "online", DateTime::<Utc>::from_timestamp(0, 0).unwrap());
        r.online = online;
        r
    }

    fn ids(records: &[DeviceRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_online_first_then_id() {
        let mut records = vec![record("A", false), record("C", true), record("B", true)];
        sort_records(&mut records);
        assert_eq!(ids(&records), vec!["B", "C", "A"]);
    }

    #[test]
    fn test_stable_under_repetition() {
        let mut records = vec![
            record("device-010", false),
            record("device-002", true),
            record("device-001", false),
            record("device-100", true),
        ];
        sort_records(&mut records);
        let first = ids(&records).join(",");
        sort_records(&mut records);
        assert_eq!(ids(&records).join(","), first);
        assert_eq!(first, "device-002,device-100,device-001,device-010");
    }

    #[test]
    fn test_total() {
        let a = record("x", true);
        let b = record("x", true);
        let c = record("y", true);
        assert_eq!(compare(&a, &b), Ordering::Equal);
        assert_eq!(compare(&a, &c), Ordering::Less);
        assert_eq!(compare(&c, &a), Ordering::Greater);
        assert_eq!(compare(&record("z", true), &record("a", false)), Ordering::Less);
    }
}
