//! In-memory mirror of radio state.
//!
//! Written by the router thread as frames arrive and read by the executor.
//! Everything sits behind one lock; update rates are human- and
//! radio-paced.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use meshcore_companion_protocol::{
    BatteryAndStorage, ContactInfo, PublicKey, PublicKeyPrefix, SelfInfo,
};
use parking_lot::Mutex;

use crate::error::LookupError;

#[derive(Debug, Clone, Copy)]
struct Stamped<T> {
    value: T,
    at: Instant,
}

impl<T: Copy> Stamped<T> {
    fn new(value: T) -> Self {
        Stamped {
            value,
            at: Instant::now(),
        }
    }

    fn fresh(&self, max_age: Duration) -> Option<T> {
        (self.at.elapsed() <= max_age).then_some(self.value)
    }
}

#[derive(Default)]
struct CacheState {
    contacts: BTreeMap<PublicKey, ContactInfo>,
    contacts_loaded: bool,
    contacts_stale: bool,
    contacts_since: Option<u32>,
    contact_updates: u64,
    self_info: Option<SelfInfo>,
    battery: Option<Stamped<BatteryAndStorage>>,
    device_time: Option<Stamped<u32>>,
    clock_offset: Option<i64>,
}

/// Local mirror of contacts, identity, clock and battery.
#[derive(Default)]
pub struct StateCache {
    inner: Mutex<CacheState>,
}

impl StateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    /// Insert or refresh a contact. `lastmod` never moves backwards.
    pub fn upsert_contact(&self, contact: ContactInfo) {
        let mut state = self.inner.lock();
        state.contact_updates += 1;
        let lastmod = state
            .contacts
            .get(&contact.public_key)
            .map_or(contact.lastmod, |old| old.lastmod.max(contact.lastmod));
        let key = contact.public_key;
        state.contacts.insert(key, ContactInfo { lastmod, ..contact });
    }

    /// Drop a contact after the radio removed it.
    pub fn remove_contact(&self, key: &PublicKey) -> Option<ContactInfo> {
        self.inner.lock().contacts.remove(key)
    }

    /// All contacts, sorted by name.
    pub fn contacts(&self) -> Vec<ContactInfo> {
        let mut list: Vec<ContactInfo> = self.inner.lock().contacts.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Number of cached contacts.
    pub fn contact_count(&self) -> usize {
        self.inner.lock().contacts.len()
    }

    /// Resolve a contact by exact name, or by an unambiguous name or
    /// hex key prefix.
    pub fn lookup(&self, query: &str) -> Result<ContactInfo, LookupError> {
        let state = self.inner.lock();

        let exact: Vec<&ContactInfo> = state.contacts.values().filter(|c| c.name == query).collect();
        match exact.as_slice() {
            [one] => return Ok((*one).clone()),
            [] => {}
            many => return Err(ambiguous(query, many)),
        }

        let hex_query = query.to_ascii_lowercase();
        let is_hex = !hex_query.is_empty() && hex_query.chars().all(|c| c.is_ascii_hexdigit());
        let matches: Vec<&ContactInfo> = state
            .contacts
            .values()
            .filter(|c| {
                c.name.starts_with(query) || (is_hex && c.public_key.to_hex().starts_with(&hex_query))
            })
            .collect();

        match matches.as_slice() {
            [one] => Ok((*one).clone()),
            [] => Err(LookupError::NotFound(query.to_string())),
            many => Err(ambiguous(query, many)),
        }
    }

    /// Contact whose key starts with `prefix`.
    pub fn find_by_prefix(&self, prefix: &PublicKeyPrefix) -> Option<ContactInfo> {
        self.inner
            .lock()
            .contacts
            .values()
            .find(|c| prefix.matches(&c.public_key))
            .cloned()
    }

    /// An advert means some record changed on the radio.
    pub fn mark_contacts_stale(&self) {
        self.inner.lock().contacts_stale = true;
    }

    /// Whether `contacts` must talk to the radio before answering.
    pub fn contacts_need_refresh(&self) -> bool {
        let state = self.inner.lock();
        !state.contacts_loaded || state.contacts_stale
    }

    /// Marker for an incremental table fetch.
    pub fn contacts_since(&self) -> Option<u32> {
        self.inner.lock().contacts_since
    }

    /// A full or incremental table stream completed.
    pub fn finish_contact_sync(&self, most_recent_lastmod: u32) {
        let mut state = self.inner.lock();
        state.contacts_loaded = true;
        state.contacts_stale = false;
        state.contacts_since = Some(most_recent_lastmod);
    }

    /// Monotonic count of contact records seen.
    pub fn contact_updates(&self) -> u64 {
        self.inner.lock().contact_updates
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Record our own node info.
    pub fn set_self_info(&self, info: SelfInfo) {
        self.inner.lock().self_info = Some(info);
    }

    /// Our own node info, once the handshake ran.
    pub fn self_info(&self) -> Option<SelfInfo> {
        self.inner.lock().self_info.clone()
    }

    /// Apply a change to the cached self info after the radio accepted it.
    pub fn update_self_info(&self, f: impl FnOnce(&mut SelfInfo)) {
        if let Some(info) = self.inner.lock().self_info.as_mut() {
            f(info);
        }
    }

    // ------------------------------------------------------------------
    // Battery and clock
    // ------------------------------------------------------------------

    /// Record a battery reading.
    pub fn record_battery(&self, battery: BatteryAndStorage) {
        self.inner.lock().battery = Some(Stamped::new(battery));
    }

    /// Last battery reading if younger than `max_age`.
    pub fn battery(&self, max_age: Duration) -> Option<BatteryAndStorage> {
        self.inner.lock().battery.and_then(|b| b.fresh(max_age))
    }

    /// Record the radio's clock as just reported.
    pub fn record_device_time(&self, secs: u32) {
        self.inner.lock().device_time = Some(Stamped::new(secs));
    }

    /// The radio's clock, extrapolated from the last reading if that is
    /// younger than `max_age`. No offset is applied.
    pub fn device_time(&self, max_age: Duration) -> Option<u32> {
        let reading = self.inner.lock().device_time?;
        let raw = reading.fresh(max_age)?;
        Some(raw.saturating_add(reading.at.elapsed().as_secs() as u32))
    }

    /// Forget the clock reading, e.g. after setting the clock.
    pub fn invalidate_device_time(&self) {
        self.inner.lock().device_time = None;
    }

    /// Host-minus-device correction, when the radio refused a sync.
    pub fn clock_offset(&self) -> Option<i64> {
        self.inner.lock().clock_offset
    }

    /// Store a clock correction.
    pub fn set_clock_offset(&self, delta: i64) {
        self.inner.lock().clock_offset = Some(delta);
    }

    /// Drop the clock correction after a successful sync.
    pub fn clear_clock_offset(&self) {
        self.inner.lock().clock_offset = None;
    }

    /// Device time with the stored correction applied.
    pub fn corrected_time(&self, raw: u32) -> i64 {
        raw as i64 + self.clock_offset().unwrap_or(0)
    }
}

fn ambiguous(query: &str, matches: &[&ContactInfo]) -> LookupError {
    LookupError::Ambiguous {
        query: query.to_string(),
        candidates: matches.iter().map(|c| c.name.clone()).collect(),
    }
}
