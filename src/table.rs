//! Target tables and their declarative field maps.
//!
//! Each table owns a fixed, ordered list of [`Column`]s. The order is the
//! column order of the batched `INSERT`, and each column names the API keys
//! consulted (first present wins) when a payload is mapped onto it. Columns
//! with no keys are structural: the normalizer fills them (parent serial,
//! array position, ingestion time).
//!
//! Tables that mirror the API JSON keep its casing (`clients`,
//! `device_status`, `switch_interfacedetails`); the AP family pre-dates that
//! and uses relational names.

use std::fmt;

// ---

/// Storage type of a column, used both for JSON conversion and for binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Text,
    SmallInt,
    Int,
    BigInt,
    Timestamp,
}

/// One column of a target table.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    /// API keys consulted in order. Empty for structural columns.
    pub keys: &'static [&'static str],
    pub kind: ColumnKind,
}

impl Column {
    pub fn is_structural(&self) -> bool {
        self.keys.is_empty()
    }
}

const fn text(name: &'static str, keys: &'static [&'static str]) -> Column {
    Column {
        name,
        keys,
        kind: ColumnKind::Text,
    }
}

const fn int(name: &'static str, keys: &'static [&'static str]) -> Column {
    Column {
        name,
        keys,
        kind: ColumnKind::Int,
    }
}

const fn bigint(name: &'static str, keys: &'static [&'static str]) -> Column {
    Column {
        name,
        keys,
        kind: ColumnKind::BigInt,
    }
}

const fn smallint(name: &'static str, keys: &'static [&'static str]) -> Column {
    Column {
        name,
        keys,
        kind: ColumnKind::SmallInt,
    }
}

const fn timestamp(name: &'static str, keys: &'static [&'static str]) -> Column {
    Column {
        name,
        keys,
        kind: ColumnKind::Timestamp,
    }
}

/// How rows reach a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Insert, or update every non-key column when the natural key exists.
    UpsertOnKey,
    /// Unconditional insert. Re-running with the same data duplicates rows.
    AppendOnly,
}

/// Foreign key from a child table to its parent's natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub parent: Table,
    pub column: &'static str,
    pub references: &'static str,
}

/// Every table the pipeline writes.
///
/// Declaration order is write order: `Ap` sorts before its children, so a
/// `BTreeMap<Table, _>` iterates parents first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Ap,
    ApRadio,
    ApWlan,
    ApPort,
    ApModem,
    Clients,
    DeviceStatus,
    SwitchInterface,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::Ap,
        Table::ApRadio,
        Table::ApWlan,
        Table::ApPort,
        Table::ApModem,
        Table::Clients,
        Table::DeviceStatus,
        Table::SwitchInterface,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Ap => "ap",
            Table::ApRadio => "ap_radio",
            Table::ApWlan => "ap_wlan",
            Table::ApPort => "ap_port",
            Table::ApModem => "ap_modem",
            Table::Clients => "clients",
            Table::DeviceStatus => "device_status",
            Table::SwitchInterface => "switch_interfacedetails",
        }
    }

    pub fn columns(self) -> &'static [Column] {
        match self {
            Table::Ap => AP_COLUMNS,
            Table::ApRadio => AP_RADIO_COLUMNS,
            Table::ApWlan => AP_WLAN_COLUMNS,
            Table::ApPort => AP_PORT_COLUMNS,
            Table::ApModem => AP_MODEM_COLUMNS,
            Table::Clients => CLIENT_COLUMNS,
            Table::DeviceStatus => DEVICE_STATUS_COLUMNS,
            Table::SwitchInterface => SWITCH_INTERFACE_COLUMNS,
        }
    }

    pub fn policy(self) -> WritePolicy {
        match self {
            Table::Ap => WritePolicy::UpsertOnKey,
            _ => WritePolicy::AppendOnly,
        }
    }

    /// Natural key used by [`WritePolicy::UpsertOnKey`].
    pub fn conflict_key(self) -> Option<&'static str> {
        match self {
            Table::Ap => Some("serial"),
            _ => None,
        }
    }

    pub fn foreign_key(self) -> Option<ForeignKey> {
        match self {
            Table::ApRadio | Table::ApWlan | Table::ApPort | Table::ApModem => Some(ForeignKey {
                parent: Table::Ap,
                column: "ap_serial",
                references: "serial",
            }),
            _ => None,
        }
    }

    pub fn column_index(self, name: &str) -> Option<usize> {
        self.columns().iter().position(|c| c.name == name)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---

const AP_COLUMNS: &[Column] = &[
    text("serial", &["serialNumber", "serial", "serial_number"]),
    text("name", &["deviceName", "name"]),
    text("mac_address", &["macAddress"]),
    text("ip_address", &["ipv4"]),
    text("model", &["model"]),
    text("status", &["status"]),
    text("site_id", &["siteId"]),
    text("site_name", &["siteName"]),
    text("sw_version", &["softwareVersion"]),
    bigint("uptime", &["uptimeInMillis"]),
    text("cluster_name", &["clusterName"]),
    text("public_ip", &["publicIpv4"]),
];

const AP_RADIO_COLUMNS: &[Column] = &[
    text("ap_serial", &[]),
    int("radio_index", &[]),
    text("mac_address", &["macAddress"]),
    text("band", &["band"]),
    text("channel", &["channel"]),
    text("bandwidth", &["bandwidth"]),
    text("status", &["status"]),
    int("radio_number", &["radioNumber"]),
    text("mode", &["mode"]),
    text("antenna", &["antenna"]),
    text("spatial_stream", &["spatialStream"]),
    int("power", &["power"]),
];

const AP_WLAN_COLUMNS: &[Column] = &[
    text("ap_serial", &[]),
    text("wlan_name", &["wlanName", "wLanName"]),
    text("security", &["security"]),
    text("security_level", &["securityLevel"]),
    text("bssid", &["bssid"]),
    text("vlan", &["vlan"]),
    text("status", &["status"]),
];

const AP_PORT_COLUMNS: &[Column] = &[
    text("ap_serial", &[]),
    text("port_name", &["name"]),
    int("port_index", &["portIndex"]),
    text("mac_address", &["macAddress"]),
    text("status", &["status"]),
    text("vlan_mode", &["vlanMode"]),
    text("allowed_vlan", &["allowedVlan"]),
    text("native_vlan", &["nativeVlan"]),
    text("access_vlan", &["accessVlan"]),
    text("speed", &["speed"]),
    text("duplex", &["duplex"]),
    text("connector", &["connector"]),
];

const AP_MODEM_COLUMNS: &[Column] = &[
    text("ap_serial", &[]),
    text("manufacturer", &["manufacturer"]),
    text("sim_state", &["simState"]),
    text("status", &["status"]),
    text("state", &["state"]),
    text("model", &["model"]),
    text("imei", &["imei"]),
    text("imsi", &["imsi"]),
    text("iccid", &["iccid"]),
    text("firmware_version", &["firmwareVersion"]),
    text("access_technology", &["accessTechnology"]),
    text("bandwidth", &["bandwidth"]),
    text("band", &["band"]),
];

const CLIENT_COLUMNS: &[Column] = &[
    text("mac", &["mac", "macAddress", "mac_address"]),
    text("_site_id", &["_site_id", "siteId", "site_id"]),
    text("_site_name", &["_site_name", "siteName", "site_name"]),
    text("name", &["name", "hostname", "hostName"]),
    text("status", &["status"]),
    text("experience", &["experience"]),
    text("statusReason", &["statusReason"]),
    text("capabilities", &["capabilities"]),
    text("authentication", &["authentication"]),
    text("type", &["type", "connectionType"]),
    text("ipv4", &["ipv4", "ipAddress", "ip"]),
    text("ipv6", &["ipv6"]),
    text("vlanId", &["vlanId"]),
    text("network", &["network"]),
    text("connectedDeviceSerial", &["connectedDeviceSerial"]),
    text("connectedTo", &["connectedTo"]),
    text("tunnelId", &["tunnelId"]),
    text("tunnel", &["tunnel"]),
    text("role", &["role"]),
    text("port", &["port"]),
    text("keyManagement", &["keyManagement"]),
    timestamp("connectedSince", &["connectedSince", "connected_since"]),
    timestamp("lastSeenAt", &["lastSeenAt", "last_seen", "lastSeen"]),
];

const DEVICE_STATUS_COLUMNS: &[Column] = &[
    text("_site_id", &["_site_id", "siteId", "site_id"]),
    text("_site_name", &["_site_name", "siteName", "site_name"]),
    text("deviceId", &["id", "deviceId"]),
    text("serialNumber", &["serialNumber"]),
    text("macAddress", &["macAddress", "mac"]),
    text("deviceName", &["deviceName", "name"]),
    text("model", &["model"]),
    text("partNumber", &["partNumber"]),
    text("status", &["status"]),
    text("softwareVersion", &["softwareVersion"]),
    text("ipv4", &["ipv4"]),
    text("ipv6", &["ipv6"]),
    text("role", &["role"]),
    text("deviceType", &["deviceType"]),
    text("deployment", &["deployment"]),
    text("persona", &["persona"]),
    text("deviceFunction", &["deviceFunction"]),
    bigint("uptimeInMillis", &["uptimeInMillis"]),
    timestamp("lastSeenAt", &["lastSeenAt"]),
    timestamp("configLastModifiedAt", &["configLastModifiedAt"]),
];

// `id` is the interface identifier reported by the API; the surrogate key
// is the separate `_id` column, which the database assigns.
const SWITCH_INTERFACE_COLUMNS: &[Column] = &[
    text("_site_id", &["_site_id"]),
    text("_site_name", &["_site_name"]),
    text("switch_serial", &["switch_serial"]),
    timestamp("created_at", &[]),
    timestamp("updated_at", &[]),
    text("neighbourPort", &["neighbourPort"]),
    text("neighbourFamily", &["neighbourFamily"]),
    int("index", &["index"]),
    text("vlanMode", &["vlanMode"]),
    text("module", &["module"]),
    text("nativeVlan", &["nativeVlan"]),
    text("neighbourSerial", &["neighbourSerial"]),
    text("speed", &["speed"]),
    smallint("isMultipleNeighbourClients", &["isMultipleNeighbourClients"]),
    text("duplex", &["duplex"]),
    text("name", &["name"]),
    text("connector", &["connector"]),
    text("type", &["type"]),
    text("transceiverStatus", &["transceiverStatus"]),
    text("stpInstanceType", &["stpInstanceType"]),
    text("stpInstanceId", &["stpInstanceId"]),
    text("stpPortRole", &["stpPortRole"]),
    text("stpPortState", &["stpPortState"]),
    text("stpPortInconsistent", &["stpPortInconsistent"]),
    text("transceiverState", &["transceiverState"]),
    text("ipv4", &["ipv4"]),
    text("transceiverProductNumber", &["transceiverProductNumber"]),
    text("transceiverModel", &["transceiverModel"]),
    text("transceiverSerial", &["transceiverSerial"]),
    text("errorReason", &["errorReason"]),
    text("adminStatus", &["adminStatus"]),
    text("operStatus", &["operStatus"]),
    int("mtu", &["mtu"]),
    text("status", &["status"]),
    text("transceiverType", &["transceiverType"]),
    text("neighbourType", &["neighbourType"]),
    text("neighbourHealth", &["neighbourHealth"]),
    text("neighbourRole", &["neighbourRole"]),
    text("lag", &["lag"]),
    text("allowedVlans", &["allowedVlans"]),
    text("allowedVlanIds", &["allowedVlanIds"]),
    text("poeStatus", &["poeStatus"]),
    text("alias", &["alias"]),
    text("description", &["description"]),
    text("poeClass", &["poeClass"]),
    text("portAlignment", &["portAlignment"]),
    text("serial", &["serial"]),
    text("id", &["id"]),
    text("peerPort", &["peerPort"]),
    text("peerMemberId", &["peerMemberId"]),
    text("uplink", &["uplink"]),
    text("portError", &["portError"]),
    text("neighbour", &["neighbour"]),
    text("neighbourFunction", &["neighbourFunction"]),
];

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_column_names_unique_per_table() {
        // ---
        for table in Table::ALL {
            let names: HashSet<_> = table.columns().iter().map(|c| c.name).collect();
            assert_eq!(names.len(), table.columns().len(), "duplicate column in {table}");
        }
    }

    #[test]
    fn test_only_ap_upserts() {
        // ---
        for table in Table::ALL {
            let upserts = table.policy() == WritePolicy::UpsertOnKey;
            assert_eq!(upserts, table == Table::Ap);
            assert_eq!(table.conflict_key().is_some(), upserts);
        }
    }

    #[test]
    fn test_parents_sort_before_children() {
        // ---
        for table in Table::ALL {
            if let Some(fk) = table.foreign_key() {
                assert!(fk.parent < table);
                assert!(table.column_index(fk.column).is_some());
            }
        }
    }

    #[test]
    fn test_switch_interface_keeps_id_column() {
        // ---
        let table = Table::SwitchInterface;
        assert!(table.column_index("id").is_some());
        assert!(table.column_index("_id").is_none());
        assert_eq!(table.columns().len(), 54);
    }
}
