//! Response normalizer: raw API pages in, typed rows per target table out.
//!
//! Mapping is driven entirely by the static field maps in [`crate::table`];
//! the only entity-specific logic here is the one-to-many expansion of AP
//! payloads and the per-family "row is unusable" checks. A missing optional
//! field never fails normalization, it yields a null and a [`MappingGap`].

mod fallback;
mod gaps;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::models::EntityFamily;
use crate::row::{Cell, Row, RowBatch};
use crate::table::Table;

pub use fallback::apply_last_seen_fallback;
pub use gaps::{GapReporter, MappingGap};

// ---

/// Diagnostic settings for the normalizer.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub log_field_gaps: bool,
    pub gap_log_limit: u32,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            log_field_gaps: false,
            gap_log_limit: 20,
        }
    }
}

/// Rows produced from one raw page, grouped by table in write order.
#[derive(Debug, Default)]
pub struct NormalizedPage {
    pub rows: RowBatch,
    /// Entities dropped because a required key was missing.
    pub skipped: u64,
}

impl NormalizedPage {
    pub fn row_count(&self) -> u64 {
        self.rows.values().map(|rows| rows.len() as u64).sum()
    }

    pub fn rows_for(&self, table: Table) -> &[Row] {
        self.rows.get(&table).map_or(&[], Vec::as_slice)
    }
}

/// Normalize a page with default options.
pub fn normalize(raw_page: &[Value], family: EntityFamily) -> NormalizedPage {
    Normalizer::new(&NormalizeOptions::default(), Utc::now()).normalize(raw_page, family)
}

/// Stateful normalizer for one run: owns the gap counters and the
/// ingestion timestamp stamped onto rows that carry one.
#[derive(Debug)]
pub struct Normalizer {
    gaps: GapReporter,
    ingested_at: NaiveDateTime,
}

impl Normalizer {
    pub fn new(options: &NormalizeOptions, ingested_at: DateTime<Utc>) -> Self {
        Self {
            gaps: GapReporter::new(options.log_field_gaps, options.gap_log_limit),
            ingested_at: ingested_at.naive_utc(),
        }
    }

    pub fn gaps(&self) -> &GapReporter {
        &self.gaps
    }

    pub fn normalize(&mut self, raw_page: &[Value], family: EntityFamily) -> NormalizedPage {
        // ---
        let mut page = NormalizedPage::default();

        for item in raw_page {
            let Some(obj) = item.as_object() else {
                page.skipped += 1;
                continue;
            };

            let kept = match family {
                EntityFamily::Clients => self.client(obj, &mut page.rows),
                EntityFamily::DeviceStatus => self.device_status(obj, &mut page.rows),
                EntityFamily::AccessPoints => self.access_point(obj, &mut page.rows),
                EntityFamily::SwitchInterfaces => self.switch_interface(obj, &mut page.rows),
            };
            if !kept {
                page.skipped += 1;
            }
        }
        page
    }

    fn client(&mut self, obj: &Map<String, Value>, out: &mut RowBatch) -> bool {
        // ---
        let row = self.map_object(EntityFamily::Clients, Table::Clients, obj);
        let row = apply_last_seen_fallback(row);

        // Both are NOT NULL in the clients table.
        if row.text("mac").is_none() || row.text("_site_id").is_none() {
            return false;
        }
        push(out, row);
        true
    }

    fn device_status(&mut self, obj: &Map<String, Value>, out: &mut RowBatch) -> bool {
        // ---
        // Status events wrap the device under `data`; plain listings do not.
        let device = obj.get("data").and_then(Value::as_object).unwrap_or(obj);
        let row = self.map_object(EntityFamily::DeviceStatus, Table::DeviceStatus, device);

        if row.text("deviceId").is_none() && row.text("macAddress").is_none() {
            return false;
        }
        push(out, row);
        true
    }

    fn access_point(&mut self, ap: &Map<String, Value>, out: &mut RowBatch) -> bool {
        // ---
        let family = EntityFamily::AccessPoints;
        let row = self.map_object(family, Table::Ap, ap);
        let Some(serial) = row.text("serial").map(str::to_owned) else {
            return false;
        };
        push(out, row);

        for (index, radio) in objects(ap, "radios").enumerate() {
            let mut row = self.child(Table::ApRadio, &serial, radio);
            row.set("radio_index", Cell::Int(i32::try_from(index).ok()));
            push(out, row);

            // WLANs are reported per radio by the detail endpoint.
            for wlan in objects(radio, "wlans") {
                let row = self.child(Table::ApWlan, &serial, wlan);
                push(out, row);
            }
        }
        for wlan in objects(ap, "wlans") {
            let row = self.child(Table::ApWlan, &serial, wlan);
            push(out, row);
        }
        for port in objects(ap, "ports") {
            let row = self.child(Table::ApPort, &serial, port);
            push(out, row);
        }
        if let Some(modem) = ap.get("modem").and_then(Value::as_object) {
            let row = self.child(Table::ApModem, &serial, modem);
            push(out, row);
        }
        for modem in objects(ap, "modems") {
            let row = self.child(Table::ApModem, &serial, modem);
            push(out, row);
        }
        true
    }

    fn switch_interface(&mut self, obj: &Map<String, Value>, out: &mut RowBatch) -> bool {
        // ---
        let mut row = self.map_object(EntityFamily::SwitchInterfaces, Table::SwitchInterface, obj);
        if row.text("switch_serial").is_none() {
            return false;
        }
        row.set("created_at", Cell::Timestamp(Some(self.ingested_at)));
        row.set("updated_at", Cell::Timestamp(Some(self.ingested_at)));
        push(out, row);
        true
    }

    fn child(&mut self, table: Table, serial: &str, obj: &Map<String, Value>) -> Row {
        // ---
        let mut row = self.map_object(EntityFamily::AccessPoints, table, obj);
        if let Some(fk) = table.foreign_key() {
            row.set(fk.column, Cell::Text(Some(serial.to_owned())));
        }
        row
    }

    /// Apply a table's field map to one JSON object.
    fn map_object(&mut self, family: EntityFamily, table: Table, obj: &Map<String, Value>) -> Row {
        // ---
        let mut row = Row::new(table);

        for (index, column) in table.columns().iter().enumerate() {
            if column.is_structural() {
                continue;
            }
            if !column.keys.iter().any(|k| obj.contains_key(*k)) {
                self.gaps.record(MappingGap {
                    family,
                    table,
                    column: column.name,
                });
                continue;
            }
            if let Some(value) = column
                .keys
                .iter()
                .filter_map(|k| obj.get(*k))
                .find(|v| !v.is_null())
            {
                row.set_at(index, Cell::from_json(column.kind, value));
            }
        }
        row
    }
}

fn push(out: &mut RowBatch, row: Row) {
    out.entry(row.table()).or_default().push(row);
}

fn objects<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
) -> impl Iterator<Item = &'a Map<String, Value>> + 'a {
    obj.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn ap_payload() -> Value {
        json!({
            "serialNumber": "CNF7JSS9LP",
            "deviceName": "lobby-ap",
            "macAddress": "aa:bb:cc:00:11:22",
            "ipv4": "10.1.0.5",
            "model": "AP-515",
            "status": "ONLINE",
            "siteId": "site-1",
            "siteName": "HQ",
            "softwareVersion": "10.4.1.0",
            "uptimeInMillis": 86400000,
            "clusterName": "hq-cluster",
            "publicIpv4": "203.0.113.9",
            "radios": [
                {
                    "macAddress": "aa:bb:cc:00:11:30",
                    "band": "2.4 GHz",
                    "channel": "6",
                    "radioNumber": 0,
                    "power": 18,
                    "wlans": [
                        { "wlanName": "corp", "security": "WPA3", "bssid": "aa:bb:cc:00:11:31" }
                    ]
                },
                {
                    "macAddress": "aa:bb:cc:00:11:40",
                    "band": "5 GHz",
                    "channel": "36",
                    "radioNumber": 1,
                    "wlans": [
                        { "wLanName": "guest", "security": "OPEN", "vlan": 20 }
                    ]
                }
            ],
            "ports": [
                { "name": "eth0", "portIndex": 0, "speed": "1000", "duplex": "full" }
            ]
        })
    }

    #[test]
    fn test_ap_expands_children_with_serial() {
        // ---
        let page = normalize(&[ap_payload()], EntityFamily::AccessPoints);

        assert_eq!(page.rows_for(Table::Ap).len(), 1);
        assert_eq!(page.rows_for(Table::ApRadio).len(), 2);
        assert_eq!(page.rows_for(Table::ApWlan).len(), 2);
        assert_eq!(page.rows_for(Table::ApPort).len(), 1);
        assert!(page.rows_for(Table::ApModem).is_empty());

        for table in [Table::ApRadio, Table::ApWlan, Table::ApPort] {
            for row in page.rows_for(table) {
                assert_eq!(row.text("ap_serial"), Some("CNF7JSS9LP"));
            }
        }
        assert_eq!(page.row_count(), 6);
    }

    #[test]
    fn test_ap_relational_names() {
        // ---
        let page = normalize(&[ap_payload()], EntityFamily::AccessPoints);
        let ap = &page.rows_for(Table::Ap)[0];

        assert_eq!(ap.text("name"), Some("lobby-ap"));
        assert_eq!(ap.text("sw_version"), Some("10.4.1.0"));
        assert_eq!(ap.get("uptime"), Some(&Cell::BigInt(Some(86_400_000))));
        assert_eq!(ap.text("public_ip"), Some("203.0.113.9"));

        let radios = page.rows_for(Table::ApRadio);
        assert_eq!(radios[0].get("radio_index"), Some(&Cell::Int(Some(0))));
        assert_eq!(radios[1].get("radio_index"), Some(&Cell::Int(Some(1))));
        assert_eq!(radios[1].get("power"), Some(&Cell::Int(None)));

        let wlans = page.rows_for(Table::ApWlan);
        assert_eq!(wlans[1].text("wlan_name"), Some("guest"));
        assert_eq!(wlans[1].text("vlan"), Some("20"));
    }

    #[test]
    fn test_ap_top_level_wlans_and_modem() {
        // ---
        let payload = json!({
            "serial": "SER-2",
            "wlans": [{ "wlanName": "a" }, { "wlanName": "b" }],
            "ports": [{ "name": "eth0" }],
            "modem": { "manufacturer": "Sierra", "simState": "READY", "firmwareVersion": "1.2" }
        });
        let page = normalize(&[payload], EntityFamily::AccessPoints);

        assert_eq!(page.rows_for(Table::ApWlan).len(), 2);
        assert_eq!(page.rows_for(Table::ApPort).len(), 1);
        let modem = &page.rows_for(Table::ApModem)[0];
        assert_eq!(modem.text("sim_state"), Some("READY"));
        assert_eq!(modem.text("firmware_version"), Some("1.2"));
        assert_eq!(modem.text("ap_serial"), Some("SER-2"));
    }

    #[test]
    fn test_ap_without_serial_is_skipped() {
        // ---
        let page = normalize(&[json!({ "deviceName": "orphan", "radios": [{}] })], EntityFamily::AccessPoints);
        assert_eq!(page.row_count(), 0);
        assert_eq!(page.skipped, 1);
    }

    #[test]
    fn test_client_last_seen_fallback() {
        // ---
        let raw = json!({
            "mac": "de:ad:be:ef:00:01",
            "_site_id": "site-1",
            "lastSeenAt": "0",
            "connectedSince": "2025-03-26T18:45:00Z"
        });
        let page = normalize(&[raw], EntityFamily::Clients);
        let row = &page.rows_for(Table::Clients)[0];

        assert!(!row.get("lastSeenAt").unwrap().is_null());
        assert_eq!(row.get("lastSeenAt"), row.get("connectedSince"));
    }

    #[test]
    fn test_client_key_fallbacks_keep_api_casing() {
        // ---
        let raw = json!({
            "macAddress": "de:ad:be:ef:00:02",
            "siteId": "site-9",
            "hostname": "laptop-7",
            "connectionType": "Wireless",
            "ipAddress": "10.0.0.7",
            "vlanId": 30,
            "capabilities": ["802.11ax", "WPA3"]
        });
        let page = normalize(&[raw], EntityFamily::Clients);
        let row = &page.rows_for(Table::Clients)[0];

        assert_eq!(row.text("mac"), Some("de:ad:be:ef:00:02"));
        assert_eq!(row.text("_site_id"), Some("site-9"));
        assert_eq!(row.text("name"), Some("laptop-7"));
        assert_eq!(row.text("type"), Some("Wireless"));
        assert_eq!(row.text("ipv4"), Some("10.0.0.7"));
        assert_eq!(row.text("vlanId"), Some("30"));
        assert_eq!(row.text("capabilities"), Some(r#"["802.11ax","WPA3"]"#));
    }

    #[test]
    fn test_missing_name_is_null_not_synthesized() {
        // ---
        let raw = json!({ "mac": "de:ad:be:ef:00:03", "_site_id": "s" });
        let page = normalize(&[raw], EntityFamily::Clients);
        assert_eq!(page.rows_for(Table::Clients)[0].text("name"), None);
    }

    #[test]
    fn test_clients_without_mac_or_site_are_skipped() {
        // ---
        let page = normalize(
            &[json!({ "_site_id": "s" }), json!({ "mac": "m" }), json!("garbage")],
            EntityFamily::Clients,
        );
        assert_eq!(page.row_count(), 0);
        assert_eq!(page.skipped, 3);
    }

    #[test]
    fn test_device_status_unwraps_event_data() {
        // ---
        let raw = [
            json!({ "timestamp": 1, "data": { "id": "dev-1", "deviceName": "sw1", "uptimeInMillis": "5000" } }),
            json!({ "mac": "00:11:22:33:44:55", "name": "ap2", "lastSeenAt": 0 }),
            json!({ "deviceName": "nameless" }),
        ];
        let page = normalize(&raw, EntityFamily::DeviceStatus);
        let rows = page.rows_for(Table::DeviceStatus);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text("deviceId"), Some("dev-1"));
        assert_eq!(rows[0].get("uptimeInMillis"), Some(&Cell::BigInt(Some(5000))));
        assert_eq!(rows[1].text("macAddress"), Some("00:11:22:33:44:55"));
        assert_eq!(rows[1].text("deviceName"), Some("ap2"));
        assert!(rows[1].get("lastSeenAt").unwrap().is_null());
        assert_eq!(page.skipped, 1);
    }

    #[test]
    fn test_switch_interface_rows() {
        // ---
        let now = Utc::now();
        let mut normalizer = Normalizer::new(&NormalizeOptions::default(), now);
        let raw = json!({
            "_site_id": "site-1",
            "switch_serial": "SG12345678",
            "id": "1/1/1",
            "index": 1,
            "name": "1/1/1",
            "mtu": 1500,
            "isMultipleNeighbourClients": false,
            "allowedVlans": [1, 10, 20],
            "lag": "lag1"
        });
        let page = normalizer.normalize(&[raw], EntityFamily::SwitchInterfaces);
        let row = &page.rows_for(Table::SwitchInterface)[0];

        assert_eq!(row.text("id"), Some("1/1/1"));
        assert_eq!(row.get("index"), Some(&Cell::Int(Some(1))));
        assert_eq!(row.get("isMultipleNeighbourClients"), Some(&Cell::SmallInt(Some(0))));
        assert_eq!(row.text("allowedVlans"), Some("[1,10,20]"));
        assert_eq!(row.get("created_at"), Some(&Cell::Timestamp(Some(now.naive_utc()))));
        assert_eq!(row.get("created_at"), row.get("updated_at"));
    }

    #[test]
    fn test_gaps_recorded_for_absent_keys_only() {
        // ---
        let mut normalizer = Normalizer::new(&NormalizeOptions::default(), Utc::now());
        let raw = json!({ "mac": "m", "_site_id": "s", "ipv4": null });
        normalizer.normalize(&[raw], EntityFamily::Clients);

        // `ipv4` was present (null), `ipv6` was absent.
        assert_eq!(normalizer.gaps().count(Table::Clients, "ipv4"), 0);
        assert_eq!(normalizer.gaps().count(Table::Clients, "ipv6"), 1);
        assert!(normalizer.gaps().total() > 1);
    }
}
