//! Fetch strategy per entity family.

use std::collections::HashSet;

use futures_util::{pin_mut, TryStreamExt};
use serde_json::Value;
use tracing::{info, warn};

use super::{Orchestrator, Run};
use crate::api::{extract_items, ApiClient, PageFilters, Window};
use crate::error::{ApiError, RunError};

const SITE_ROOT_KEYS: &[&str] = &["sites", "items", "data"];
const CLIENT_ROOT_KEYS: &[&str] = &["clients", "items", "data"];
const DEVICE_ROOT_KEYS: &[&str] = &["devices", "items", "data"];
const DEVICE_STATUS_ROOT_KEYS: &[&str] = &["items", "events", "data"];
const AP_ROOT_KEYS: &[&str] = &["aps", "items", "data"];
const INTERFACE_ROOT_KEYS: &[&str] = &["interfaces", "items", "data"];

/// Site enumeration is attempted this many times before the run fails.
const SITE_ATTEMPTS: u32 = 2;

// ---

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SiteRef {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SwitchTarget {
    pub serial: String,
    pub site_id: String,
    pub site_name: Option<String>,
}

impl Orchestrator {
    pub(super) async fn run_clients(&self, api: &ApiClient, run: &mut Run) -> Result<(), RunError> {
        // ---
        let cfg = &self.ctx.config;
        let sites = match &cfg.site_id {
            Some(id) => vec![SiteRef {
                id: id.clone(),
                name: None,
            }],
            None => self.enumerate_sites(api).await?,
        };
        info!(sites = sites.len(), "[clients] sites to query");

        for (index, site) in sites.iter().enumerate() {
            let found = self.clients_for_site(api, run, site).await?;
            info!(
                site = index + 1,
                site_id = %site.id,
                site_name = site.name.as_deref().unwrap_or(""),
                clients = found,
                "[clients] site done"
            );
        }
        Ok(())
    }

    async fn enumerate_sites(&self, api: &ApiClient) -> Result<Vec<SiteRef>, RunError> {
        // ---
        let endpoint = &self.ctx.config.endpoints.sites;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let filters = PageFilters::default()
                .param("sort", self.ctx.config.sites_sort.as_deref())
                .root_keys(SITE_ROOT_KEYS);
            match api.fetch_all(endpoint, None, filters).await {
                Ok(items) => return Ok(items.iter().filter_map(site_ref).collect()),
                Err(e) if e.is_auth() || attempt >= SITE_ATTEMPTS => return Err(e.into()),
                Err(e) => warn!(attempt, error = %e, "[sites] enumeration failed"),
            }
        }
    }

    /// Query one site's clients, trying each site parameter spelling until
    /// one returns rows. Returns the number of clients found.
    async fn clients_for_site(
        &self,
        api: &ApiClient,
        run: &mut Run,
        site: &SiteRef,
    ) -> Result<u64, RunError> {
        // ---
        let cfg = &self.ctx.config;
        let mut variants = vec![Some("site-id"), Some("siteId")];
        if cfg.clients_try_global {
            variants.push(None);
        }

        for variant in variants {
            let mut filters = PageFilters {
                statuses: cfg.client_status_filter.clone(),
                ..PageFilters::default()
            }
            .root_keys(CLIENT_ROOT_KEYS);
            if let Some(param) = variant {
                filters = filters.sticky(param, &site.id);
            }

            let pages = api.fetch_pages(&cfg.endpoints.clients, Some(cfg.window()), filters);
            pin_mut!(pages);

            let mut found = 0;
            while let Some(page) = pages.try_next().await? {
                let mut items = page.items;
                for item in &mut items {
                    annotate(
                        item,
                        &[
                            ("_site_id", Some(site.id.as_str())),
                            ("_site_name", site.name.as_deref()),
                        ],
                    );
                }
                found += items.len() as u64;
                run.ingest(&self.sink, &items).await?;
            }
            if found > 0 {
                return Ok(found);
            }
        }
        Ok(0)
    }

    /// Device status from the v2 status feed when enabled, else (or on a
    /// v2 404 with fallback on) from the devices listing. Devices already
    /// ingested from v2 are not ingested again by the fallback.
    pub(super) async fn run_device_status(
        &self,
        api: &ApiClient,
        run: &mut Run,
    ) -> Result<(), RunError> {
        // ---
        let cfg = &self.ctx.config;
        let mut seen = HashSet::new();

        if cfg.device_status_use_v2 {
            let filters = PageFilters::default().root_keys(DEVICE_STATUS_ROOT_KEYS);
            let endpoint = &cfg.endpoints.device_status;
            match self.ingest_devices(api, run, endpoint, None, filters, &mut seen).await {
                Err(RunError::Api(ApiError::Http { status: 404, .. }))
                    if cfg.device_status_fallback =>
                {
                    warn!(%endpoint, "[devices] status feed not found, using devices listing");
                }
                other => return other,
            }
        }

        let filters = self.device_filters();
        let endpoint = &cfg.endpoints.devices;
        self.ingest_devices(api, run, endpoint, Some(cfg.window()), filters, &mut seen)
            .await
    }

    fn device_filters(&self) -> PageFilters {
        PageFilters::default()
            .param("sort", self.ctx.config.device_sort.as_deref())
            .root_keys(DEVICE_ROOT_KEYS)
    }

    async fn ingest_devices(
        &self,
        api: &ApiClient,
        run: &mut Run,
        endpoint: &str,
        window: Option<Window>,
        filters: PageFilters,
        seen: &mut HashSet<String>,
    ) -> Result<(), RunError> {
        // ---
        let pages = api.fetch_pages(endpoint, window, filters);
        pin_mut!(pages);

        while let Some(page) = pages.try_next().await? {
            let before = page.items.len();
            let items: Vec<Value> = page
                .items
                .into_iter()
                .filter(|d| device_key(d).map_or(true, |k| seen.insert(k)))
                .collect();

            let duplicates = (before - items.len()) as u64;
            if duplicates > 0 {
                info!(page = page.number, duplicates, "[devices] duplicates dropped");
                run.dropped(duplicates);
            }
            run.ingest(&self.sink, &items).await?;
        }
        Ok(())
    }

    pub(super) async fn run_access_points(
        &self,
        api: &ApiClient,
        run: &mut Run,
    ) -> Result<(), RunError> {
        // ---
        let cfg = &self.ctx.config;
        let filters = PageFilters::default().root_keys(AP_ROOT_KEYS);
        let pages = api.fetch_pages(&cfg.endpoints.aps, None, filters);
        pin_mut!(pages);

        while let Some(page) = pages.try_next().await? {
            let mut merged = Vec::with_capacity(page.items.len());
            for ap in page.items {
                let Some(serial) = ap_serial(&ap) else {
                    merged.push(ap);
                    continue;
                };
                let endpoint = serial_path(&cfg.endpoints.ap_detail, &serial);
                match api.get_json(&endpoint, &[]).await {
                    Ok(detail) => merged.push(merge_detail(ap, detail_object(detail))),
                    Err(e) if e.is_auth() => return Err(e.into()),
                    Err(e) => {
                        warn!(%serial, error = %e, "[aps] detail fetch failed, using list entry");
                        run.item_error();
                        merged.push(ap);
                    }
                }
            }
            run.ingest(&self.sink, &merged).await?;
        }
        Ok(())
    }

    pub(super) async fn run_switch_interfaces(
        &self,
        api: &ApiClient,
        run: &mut Run,
    ) -> Result<(), RunError> {
        // ---
        let cfg = &self.ctx.config;
        let devices = api
            .fetch_all(&cfg.endpoints.devices, None, self.device_filters())
            .await?;
        let targets = switch_targets(&devices);
        info!(devices = devices.len(), switches = targets.len(), "[switch_interfaces] switches found");

        for target in targets {
            let endpoint = serial_path(&cfg.endpoints.switch_interfaces, &target.serial);
            let params = [("site-id".to_owned(), target.site_id.clone())];

            let body = match api.get_json(&endpoint, &params).await {
                Ok(body) => body,
                Err(e) if e.is_auth() => return Err(e.into()),
                Err(e) => {
                    warn!(serial = %target.serial, site_id = %target.site_id, error = %e,
                        "[switch_interfaces] fetch failed");
                    run.item_error();
                    continue;
                }
            };

            let mut interfaces = extract_items(body, INTERFACE_ROOT_KEYS);
            for iface in &mut interfaces {
                annotate(
                    iface,
                    &[
                        ("_site_id", Some(target.site_id.as_str())),
                        ("_site_name", target.site_name.as_deref()),
                        ("switch_serial", Some(target.serial.as_str())),
                    ],
                );
            }
            info!(serial = %target.serial, interfaces = interfaces.len(), "[switch_interfaces] fetched");
            run.ingest(&self.sink, &interfaces).await?;
        }
        Ok(())
    }
}

// ---

fn str_field<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

fn site_ref(site: &Value) -> Option<SiteRef> {
    Some(SiteRef {
        id: str_field(site, &["id", "siteId", "site_id"])?.to_owned(),
        name: str_field(site, &["name", "siteName", "site_name"]).map(str::to_owned),
    })
}

fn ap_serial(ap: &Value) -> Option<String> {
    str_field(ap, &["serialNumber", "serial", "serial_number"]).map(str::to_owned)
}

/// Fill `{serial}` in an endpoint template as a single encoded path segment.
pub(crate) fn serial_path(template: &str, serial: &str) -> String {
    // ---
    let encoded: String = url::form_urlencoded::byte_serialize(serial.as_bytes()).collect();
    template.replace("{serial}", &encoded.replace('+', "%20"))
}

/// Overwrite `fields` on an entity object; `None` values are left alone.
pub(crate) fn annotate(item: &mut Value, fields: &[(&str, Option<&str>)]) {
    // ---
    let Some(obj) = item.as_object_mut() else {
        return;
    };
    for (key, value) in fields {
        if let Some(value) = value {
            obj.insert((*key).to_owned(), Value::String((*value).to_owned()));
        }
    }
}

/// Stable identity of a device within one run. Status events carry the
/// device under `data`.
pub(crate) fn device_key(device: &Value) -> Option<String> {
    // ---
    let device = device.get("data").filter(|d| d.is_object()).unwrap_or(device);
    let key = ["id", "deviceId", "macAddress", "mac", "serialNumber"]
        .iter()
        .filter_map(|k| device.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    if key.is_some() {
        return key;
    }

    let name = str_field(device, &["deviceName", "name"]);
    let ipv4 = str_field(device, &["ipv4"]);
    if name.is_none() && ipv4.is_none() {
        return None;
    }
    Some(format!("{}|{}", name.unwrap_or(""), ipv4.unwrap_or("")))
}

/// Some gateways wrap the detail document in `data`.
fn detail_object(body: Value) -> Value {
    // ---
    match body {
        Value::Object(mut obj) if !obj.contains_key("serialNumber") && obj.contains_key("data") => {
            match obj.remove("data") {
                Some(data @ Value::Object(_)) => data,
                Some(other) => {
                    obj.insert("data".to_owned(), other);
                    Value::Object(obj)
                }
                None => Value::Object(obj),
            }
        }
        other => other,
    }
}

/// Detail fields win; list fields fill keys the detail lacks or nulls.
pub(crate) fn merge_detail(list: Value, detail: Value) -> Value {
    // ---
    match (list, detail) {
        (Value::Object(list), Value::Object(mut detail)) => {
            for (key, value) in list {
                if detail.get(&key).map_or(true, Value::is_null) {
                    detail.insert(key, value);
                }
            }
            Value::Object(detail)
        }
        (list, _) => list,
    }
}

/// Switches with a serial and a site, in listing order, each once.
pub(crate) fn switch_targets(devices: &[Value]) -> Vec<SwitchTarget> {
    // ---
    let mut seen = HashSet::new();
    devices
        .iter()
        .filter(|d| {
            str_field(d, &["deviceType"]).is_some_and(|t| t.eq_ignore_ascii_case("SWITCH"))
        })
        .filter_map(|d| {
            Some(SwitchTarget {
                serial: str_field(d, &["serialNumber", "serial"])?.to_owned(),
                site_id: str_field(d, &["_site_id", "siteId", "site_id"])?.to_owned(),
                site_name: str_field(d, &["_site_name", "siteName", "site_name"]).map(str::to_owned),
            })
        })
        .filter(|t| seen.insert(t.serial.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_key_precedence() {
        // ---
        assert_eq!(device_key(&json!({ "id": "d1", "mac": "m" })).as_deref(), Some("d1"));
        assert_eq!(device_key(&json!({ "mac": "m", "serialNumber": "s" })).as_deref(), Some("m"));
        assert_eq!(device_key(&json!({ "deviceName": "sw", "ipv4": "10.0.0.1" })).as_deref(), Some("sw|10.0.0.1"));
        assert_eq!(device_key(&json!({ "ipv4": "10.0.0.1" })).as_deref(), Some("|10.0.0.1"));
        assert_eq!(device_key(&json!({ "status": "UP" })), None);
        assert_eq!(device_key(&json!({ "data": { "deviceId": "d9" } })).as_deref(), Some("d9"));
    }

    #[test]
    fn test_merge_detail_prefers_detail() {
        // ---
        let list = json!({ "serialNumber": "S", "deviceName": "list-name", "siteName": "HQ", "model": null });
        let detail = json!({ "serialNumber": "S", "deviceName": "detail-name", "siteName": null, "radios": [] });

        let merged = merge_detail(list, detail);
        assert_eq!(merged["deviceName"], "detail-name");
        assert_eq!(merged["siteName"], "HQ");
        assert!(merged["radios"].is_array());
        assert!(merged["model"].is_null());
    }

    #[test]
    fn test_detail_object_unwraps_data() {
        // ---
        let wrapped = json!({ "data": { "serialNumber": "S" } });
        assert_eq!(detail_object(wrapped), json!({ "serialNumber": "S" }));

        let plain = json!({ "serialNumber": "S", "data": { "x": 1 } });
        assert_eq!(detail_object(plain.clone()), plain);
    }

    #[test]
    fn test_switch_targets_filter() {
        // ---
        let devices = vec![
            json!({ "deviceType": "SWITCH", "serialNumber": "SW1", "siteId": "s1", "siteName": "HQ" }),
            json!({ "deviceType": "ACCESS_POINT", "serialNumber": "AP1", "siteId": "s1" }),
            json!({ "deviceType": "SWITCH", "serialNumber": "SW2" }),
            json!({ "deviceType": "switch", "serial": "SW3", "site_id": "s2" }),
            json!({ "deviceType": "SWITCH", "serialNumber": "SW1", "siteId": "s1" }),
        ];
        let targets = switch_targets(&devices);

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].serial, "SW1");
        assert_eq!(targets[0].site_name.as_deref(), Some("HQ"));
        assert_eq!(targets[1].serial, "SW3");
        assert_eq!(targets[1].site_id, "s2");
    }

    #[test]
    fn test_serial_path_encodes_segment() {
        // ---
        let template = "/network-monitoring/v1alpha1/aps/{serial}";
        assert_eq!(serial_path(template, "CNK7-01"), "/network-monitoring/v1alpha1/aps/CNK7-01");
        assert_eq!(
            serial_path(template, "A/B?c#d e+f"),
            "/network-monitoring/v1alpha1/aps/A%2FB%3Fc%23d%20e%2Bf"
        );
    }

    #[test]
    fn test_annotate_overwrites_and_skips_none() {
        // ---
        let mut item = json!({ "mac": "m", "_site_id": "old" });
        annotate(&mut item, &[("_site_id", Some("new")), ("_site_name", None)]);
        assert_eq!(item["_site_id"], "new");
        assert!(item.get("_site_name").is_none());
    }

    #[test]
    fn test_site_ref() {
        // ---
        assert_eq!(
            site_ref(&json!({ "siteId": "1", "siteName": "Lab" })),
            Some(SiteRef { id: "1".into(), name: Some("Lab".into()) })
        );
        assert_eq!(site_ref(&json!({ "name": "nameless" })), None);
    }
}
