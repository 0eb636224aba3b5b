//! End-to-end scenarios across sessions, through the public API only.

use framedump_codec::{
    CodecResult, DumpRecord, FieldDescriptor, FieldKind, FieldValue, RecordValue, Schema,
};
use framedump_core::{
    read_all_parallel, discover, Dump, DumpConfig, ExternalSorter, GroupIndex, IndexKind,
    UniqueIndex,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Measurement {
    id: i64,
    sensor: String,
    reading: i64,
}

static MEASUREMENT_SCHEMA: Schema = Schema::new(
    "Measurement",
    &[
        FieldDescriptor::new(1, "id", FieldKind::I64),
        FieldDescriptor::new(2, "sensor", FieldKind::Str),
        FieldDescriptor::new(3, "reading", FieldKind::I64),
    ],
);

impl DumpRecord for Measurement {
    fn schema() -> &'static Schema {
        &MEASUREMENT_SCHEMA
    }

    fn to_value(&self) -> RecordValue {
        RecordValue::new()
            .with(1, FieldValue::I64(self.id))
            .with(2, FieldValue::Str(self.sensor.clone()))
            .with(3, FieldValue::I64(self.reading))
    }

    fn from_value(value: &RecordValue) -> CodecResult<Self> {
        Ok(Self {
            id: value.get_i64(1)?,
            sensor: value.get_str(2)?.to_owned(),
            reading: value.get_i64(3)?,
        })
    }
}

fn measurement(id: i64) -> Measurement {
    Measurement {
        id,
        sensor: format!("sensor-{}", id % 5),
        reading: id * 10,
    }
}

#[test]
fn write_reopen_filter_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("measurements.dump");
    const N: i64 = 500;

    // Session 1: populate and index.
    {
        let mut dump: Dump<Measurement> = Dump::open(&path, DumpConfig::new()).unwrap();
        let by_id = UniqueIndex::attach(&mut dump, "id").unwrap();
        for id in 0..N {
            dump.add(&measurement(id)).unwrap();
        }
        assert_eq!(dump.record_count(), N as u64);
        let found = by_id.lookup(&dump, &FieldValue::I64(123)).unwrap().unwrap();
        assert_eq!(found.reading, 1230);
        dump.close().unwrap();
    }

    // Session 2: the index loads from disk; delete evens mid-iteration.
    {
        let mut dump: Dump<Measurement> =
            Dump::open(&path, DumpConfig::new().prune_threshold(1.0)).unwrap();
        let by_id = UniqueIndex::attach(&mut dump, "id").unwrap();
        assert_eq!(by_id.num_keys(), N as usize);

        let mut iter = dump.iter().unwrap();
        while let Some(record) = iter.next() {
            if record.unwrap().id % 2 == 0 {
                iter.delete_current().unwrap();
            }
        }
        assert_eq!(dump.record_count(), (N / 2) as u64);
        assert!(by_id
            .lookup(&dump, &FieldValue::I64(0))
            .unwrap()
            .is_none());
        dump.close().unwrap();
    }

    // Session 3: odds remain, still in ascending position order.
    {
        let mut dump: Dump<Measurement> =
            Dump::open(&path, DumpConfig::new().prune_threshold(1.0)).unwrap();
        let ids: Vec<i64> = dump.iter().unwrap().map(|r| r.unwrap().id).collect();
        let expected: Vec<i64> = (0..N).filter(|id| id % 2 == 1).collect();
        assert_eq!(ids, expected);
        dump.close().unwrap();
    }
}

#[test]
fn group_index_and_parallel_read_agree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("measurements.dump");

    let mut dump: Dump<Measurement> = Dump::open(&path, DumpConfig::new()).unwrap();
    let by_sensor = GroupIndex::attach(&mut dump, "sensor").unwrap();
    for id in 0..200 {
        dump.add(&measurement(id)).unwrap();
    }

    let grouped: usize = (0..5)
        .map(|s| {
            by_sensor
                .lookup(&dump, &FieldValue::Str(format!("sensor-{s}")))
                .unwrap()
                .len()
        })
        .sum();
    assert_eq!(grouped, 200);

    let all = read_all_parallel(&dump, 4).unwrap();
    assert_eq!(all.len(), 200);
    assert!(all.windows(2).all(|w| w[0].id < w[1].id));
    dump.close().unwrap();
}

#[test]
fn discovery_sees_what_sessions_left_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("measurements.dump");

    {
        let mut dump: Dump<Measurement> = Dump::open(&path, DumpConfig::new()).unwrap();
        let _by_id = UniqueIndex::attach(&mut dump, "id").unwrap();
        let _by_sensor = GroupIndex::attach(&mut dump, "sensor").unwrap();
        dump.add(&measurement(1)).unwrap();
        dump.close().unwrap();
    }

    let found = discover(&path).unwrap();
    let kinds: Vec<(&str, IndexKind)> = found
        .iter()
        .map(|d| (d.field.as_str(), d.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![("id", IndexKind::Unique), ("sensor", IndexKind::Group)]
    );
}

#[test]
fn sorter_orders_a_full_dump_scan() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("measurements.dump");

    let mut dump: Dump<Measurement> = Dump::open(&path, DumpConfig::new()).unwrap();
    for id in [40, 2, 99, 17, 56, 3] {
        dump.add(&measurement(id)).unwrap();
    }

    let mut sorter =
        ExternalSorter::new(|a: &Measurement, b: &Measurement| b.reading.cmp(&a.reading))
            .with_batch_size(2);
    for record in dump.iter().unwrap() {
        sorter.add(record.unwrap()).unwrap();
    }
    let readings: Vec<i64> = sorter
        .into_sorted_iter()
        .unwrap()
        .map(|r| r.unwrap().reading)
        .collect();
    assert_eq!(readings, vec![990, 560, 400, 170, 30, 20]);
    dump.close().unwrap();
}
