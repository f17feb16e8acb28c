//! Process-wide name uniquification.
//!
//! Backends that mint fresh operator or model names (the accelerator-offload
//! passes) draw from one counter per prefix. The table is shared by every
//! compilation in the process and guarded by a mutex.

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::OnceLock;

static COUNTERS: OnceLock<Mutex<HashMap<String, u64>>> = OnceLock::new();

/// Return `prefix_N` where N starts at 1 and increases per prefix.
pub fn unique_name(prefix: &str) -> String {
    let counters = COUNTERS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut counters = counters.lock();
    let counter = counters.entry(prefix.to_string()).or_insert(0);
    *counter += 1;
    format!("{}_{}", prefix, counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_unique_name_sequence() {
        let a = unique_name("unique_name_test_seq");
        let b = unique_name("unique_name_test_seq");
        assert_eq!(a, "unique_name_test_seq_1");
        assert_eq!(b, "unique_name_test_seq_2");
    }

    #[test]
    fn test_unique_name_concurrent() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    (0..50)
                        .map(|_| unique_name("unique_name_test_mt"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for name in handle.join().unwrap() {
                assert!(seen.insert(name), "duplicate name minted");
            }
        }
        assert_eq!(seen.len(), 400);
    }
}
