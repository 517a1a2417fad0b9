#![no_main]
use libfuzzer_sys::fuzz_target;
use share_http::HandleTable;

// Drive the table with arbitrary set/remove/grow sequences and check it
// against a plain map.
fuzz_target!(|data: &[u8]| {
    let mut table: HandleTable<u32> = HandleTable::with_capacity(1);
    let mut model = std::collections::HashMap::new();
    let mut last_id = None;
    for (i, op) in data.chunks(2).enumerate() {
        let handle = *op.get(1).unwrap_or(&0) as usize;
        let before = table.capacity();
        match op[0] % 3 {
            0 => {
                let id = table.set(handle, i as u32);
                assert!(last_id < Some(id));
                last_id = Some(id);
                model.insert(handle, (i as u32, id));
            }
            1 => assert_eq!(table.remove(handle), model.remove(&handle).map(|(v, _)| v)),
            _ => {
                table.ensure_capacity(handle);
            }
        }
        assert!(table.capacity() >= before);
        assert!(table.capacity().is_power_of_two());
        assert_eq!(table.len(), model.len());
        for (h, (v, id)) in &model {
            assert_eq!(table.get(*h), Some(v));
            assert_eq!(table.id(*h), Some(*id));
        }
    }
});
