//! In-memory scan result cache: scan_id → result, 300 s sliding TTL.
//!
//! Process-local. The daemon owns one cache for its lifetime; CLI one-shot
//! invocations construct and drop one per run, so the confirmation
//! round-trip only works where the process persists between scan and
//! re-submission.

use super::types::ScanResult;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const SCAN_CACHE_TTL: Duration = Duration::from_secs(300);

struct Entry {
    result: ScanResult,
    inserted: Instant,
}

#[derive(Default)]
pub struct ScanCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl ScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a result keyed by its scan_id. Entries are idempotent, so a
    /// duplicate insert is harmless.
    pub fn put(&self, result: ScanResult) {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::evict_expired(&mut map);
        map.insert(
            result.scan_id.clone(),
            Entry {
                result,
                inserted: Instant::now(),
            },
        );
    }

    /// Fetch a live entry by scan_id.
    pub fn get(&self, scan_id: &str) -> Option<ScanResult> {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::evict_expired(&mut map);
        map.get(scan_id).map(|e| e.result.clone())
    }

    /// Verify a scan_id against the code hash of the current submission.
    /// Any mismatch (unknown id, expired entry, changed code) is None.
    pub fn verify(&self, scan_id: &str, code_hash: &str) -> Option<ScanResult> {
        let result = self.get(scan_id)?;
        if result.code_hash == code_hash {
            Some(result)
        } else {
            None
        }
    }

    fn evict_expired(map: &mut HashMap<String, Entry>) {
        let now = Instant::now();
        map.retain(|_, e| now.duration_since(e.inserted) < SCAN_CACHE_TTL);
    }

    #[cfg(test)]
    fn expire(&self, scan_id: &str) {
        let mut map = self.entries.lock().unwrap();
        match Instant::now().checked_sub(SCAN_CACHE_TTL + Duration::from_secs(1)) {
            Some(past) => {
                if let Some(e) = map.get_mut(scan_id) {
                    e.inserted = past;
                }
            }
            // Monotonic clock younger than the TTL; dropping the entry
            // exercises the same miss path
            None => {
                map.remove(scan_id);
            }
        }
    }
}
