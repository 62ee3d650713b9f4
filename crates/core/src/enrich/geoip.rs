//! Device and IP-geolocation merge. Lookups go through a provider trait and
//! are memoized for the whole run, shared across workers.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::row::{Layer, SessionRow};
use crate::store::Session;

pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoMeta {
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub region_name: Option<String>,
}

pub trait GeoProvider: Send + Sync {
    fn lookup(&self, ip: &str) -> anyhow::Result<GeoMeta>;
}

/// Per-run memoized lookup cache. A race between two workers may duplicate
/// one external call for the same IP; the map itself stays consistent.
pub struct GeoCache {
    provider: Box<dyn GeoProvider>,
    seen: Mutex<HashMap<String, GeoMeta>>,
}

impl GeoCache {
    pub fn new(provider: Box<dyn GeoProvider>) -> Self {
        Self { provider, seen: Mutex::new(HashMap::new()) }
    }

    pub fn meta(&self, ip: &str) -> GeoMeta {
        if let Ok(seen) = self.seen.lock() {
            if let Some(hit) = seen.get(ip) {
                return hit.clone();
            }
        }
        let meta = match self.provider.lookup(ip) {
            Ok(meta) => meta,
            Err(err) => {
                tracing::warn!(ip, %err, "ip geolocation lookup failed");
                GeoMeta::default()
            }
        };
        if let Ok(mut seen) = self.seen.lock() {
            seen.insert(ip.to_string(), meta.clone());
        }
        meta
    }
}

/// Joins device log values into their header columns and resolves each
/// distinct device IP, comma-joining the per-field results in IP order.
pub fn merge_device_info(row: &mut SessionRow, session: &Session, geo: &GeoCache) {
    let Some(device_info) = &session.device_info else {
        return;
    };
    for (header, values) in device_info {
        row.set(Layer::Device, header, Value::String(values.join(",")));
    }
    let Some(ips) = device_info.get("ips") else {
        return;
    };
    row.set(Layer::Device, "Device IP", Value::String(ips.join(",")));

    let metas: Vec<GeoMeta> = ips.iter().map(|ip| geo.meta(ip)).collect();
    let joined = |pick: for<'a> fn(&'a GeoMeta) -> Option<&'a String>| -> String {
        metas
            .iter()
            .map(|meta| pick(meta).map(String::as_str).unwrap_or(NOT_AVAILABLE))
            .collect::<Vec<_>>()
            .join(",")
    };
    row.set(Layer::Device, "Country", Value::String(joined(|meta| meta.country.as_ref())));
    row.set(
        Layer::Device,
        "Country Code",
        Value::String(joined(|meta| meta.country_code.as_ref())),
    );
    row.set(Layer::Device, "Region", Value::String(joined(|meta| meta.region.as_ref())));
    row.set(
        Layer::Device,
        "Region Name",
        Value::String(joined(|meta| meta.region_name.as_ref())),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
    }

    impl GeoProvider for CountingProvider {
        fn lookup(&self, ip: &str) -> anyhow::Result<GeoMeta> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ip == "0.0.0.0" {
                anyhow::bail!("bogon");
            }
            Ok(GeoMeta {
                country: Some("Australia".into()),
                country_code: Some("AU".into()),
                region: None,
                region_name: Some("New South Wales".into()),
            })
        }
    }

    fn session_with_ips(ips: Vec<&str>) -> Session {
        Session {
            id: 1,
            name: "sess".into(),
            pin: "pin".into(),
            email: None,
            completed: false,
            abandoned: false,
            created: String::new(),
            duration: None,
            script_number: None,
            device_info: Some(HashMap::from([
                ("ips".to_string(), ips.into_iter().map(str::to_string).collect()),
                ("Device Model".to_string(), vec!["Pixel 7".to_string()]),
            ])),
            prompts: vec![],
        }
    }

    #[test]
    fn each_distinct_ip_is_looked_up_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = GeoCache::new(Box::new(CountingProvider { calls: Arc::clone(&calls) }));
        let mut row = SessionRow::new();
        merge_device_info(
            &mut row,
            &session_with_ips(vec!["1.1.1.1", "1.1.1.1", "1.1.1.1"]),
            &cache,
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            row.get("Country Code"),
            Some(&Value::String("AU,AU,AU".to_string()))
        );
    }

    #[test]
    fn missing_fields_and_failed_lookups_fill_not_available() {
        let provider = CountingProvider { calls: Arc::new(AtomicUsize::new(0)) };
        let cache = GeoCache::new(Box::new(provider));
        let mut row = SessionRow::new();
        merge_device_info(&mut row, &session_with_ips(vec!["1.1.1.1", "0.0.0.0"]), &cache);
        assert_eq!(row.get("Region"), Some(&Value::String("N/A,N/A".to_string())));
        assert_eq!(row.get("Country"), Some(&Value::String("Australia,N/A".to_string())));
        assert_eq!(
            row.get("Device IP"),
            Some(&Value::String("1.1.1.1,0.0.0.0".to_string()))
        );
        assert_eq!(row.get("Device Model"), Some(&Value::String("Pixel 7".to_string())));
    }

    #[test]
    fn sessions_without_device_info_stay_untouched() {
        let provider = CountingProvider { calls: Arc::new(AtomicUsize::new(0)) };
        let cache = GeoCache::new(Box::new(provider));
        let mut session = session_with_ips(vec![]);
        session.device_info = None;
        let mut row = SessionRow::new();
        merge_device_info(&mut row, &session, &cache);
        assert!(row.is_empty());
    }
}
