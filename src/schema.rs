//! Database schema management for `aruba-ingest`.
//!
//! Ensures the eight target tables and their indexes exist before any run.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).
//! Column names mirror the API casing where the table does, so they are
//! always quoted.

use anyhow::Result;
use sqlx::PgPool;

use crate::table::Table;

// ---

const AP_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "ap" (
    "id"           BIGSERIAL PRIMARY KEY,
    "serial"       VARCHAR(64)  NOT NULL,
    "name"         VARCHAR(255),
    "mac_address"  VARCHAR(32),
    "ip_address"   VARCHAR(45),
    "model"        VARCHAR(64),
    "status"       VARCHAR(32),
    "site_id"      VARCHAR(64),
    "site_name"    VARCHAR(255),
    "sw_version"   VARCHAR(64),
    "uptime"       BIGINT,
    "cluster_name" VARCHAR(255),
    "public_ip"    VARCHAR(45),
    "created_at"   TIMESTAMPTZ DEFAULT now(),
    "updated_at"   TIMESTAMPTZ DEFAULT now(),
    CONSTRAINT "ap_serial_key" UNIQUE ("serial")
);
"#;

const AP_RADIO_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "ap_radio" (
    "id"             BIGSERIAL PRIMARY KEY,
    "ap_serial"      VARCHAR(64) NOT NULL,
    "radio_index"    INT,
    "mac_address"    VARCHAR(32),
    "band"           VARCHAR(16),
    "channel"        VARCHAR(16),
    "bandwidth"      VARCHAR(16),
    "status"         VARCHAR(16),
    "radio_number"   INT,
    "mode"           VARCHAR(32),
    "antenna"        VARCHAR(32),
    "spatial_stream" VARCHAR(16),
    "power"          INT,
    "created_at"     TIMESTAMPTZ DEFAULT now(),
    CONSTRAINT "fk_ap_radio_ap_serial" FOREIGN KEY ("ap_serial") REFERENCES "ap" ("serial")
);
"#;

const AP_WLAN_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "ap_wlan" (
    "id"             BIGSERIAL PRIMARY KEY,
    "ap_serial"      VARCHAR(64) NOT NULL,
    "wlan_name"      VARCHAR(64),
    "security"       VARCHAR(64),
    "security_level" VARCHAR(64),
    "bssid"          VARCHAR(32),
    "vlan"           VARCHAR(16),
    "status"         VARCHAR(16),
    "created_at"     TIMESTAMPTZ DEFAULT now(),
    CONSTRAINT "fk_ap_wlan_ap_serial" FOREIGN KEY ("ap_serial") REFERENCES "ap" ("serial")
);
"#;

const AP_PORT_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "ap_port" (
    "id"           BIGSERIAL PRIMARY KEY,
    "ap_serial"    VARCHAR(64) NOT NULL,
    "port_name"    VARCHAR(32),
    "port_index"   INT,
    "mac_address"  VARCHAR(32),
    "status"       VARCHAR(16),
    "vlan_mode"    VARCHAR(16),
    "allowed_vlan" VARCHAR(32),
    "native_vlan"  VARCHAR(16),
    "access_vlan"  VARCHAR(16),
    "speed"        VARCHAR(16),
    "duplex"       VARCHAR(16),
    "connector"    VARCHAR(16),
    "created_at"   TIMESTAMPTZ DEFAULT now(),
    CONSTRAINT "fk_ap_port_ap_serial" FOREIGN KEY ("ap_serial") REFERENCES "ap" ("serial")
);
"#;

const AP_MODEM_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "ap_modem" (
    "id"                BIGSERIAL PRIMARY KEY,
    "ap_serial"         VARCHAR(64) NOT NULL,
    "manufacturer"      VARCHAR(64),
    "sim_state"         VARCHAR(32),
    "status"            VARCHAR(16),
    "state"             VARCHAR(16),
    "model"             VARCHAR(64),
    "imei"              VARCHAR(32),
    "imsi"              VARCHAR(32),
    "iccid"             VARCHAR(32),
    "firmware_version"  VARCHAR(64),
    "access_technology" VARCHAR(32),
    "bandwidth"         VARCHAR(16),
    "band"              VARCHAR(16),
    "created_at"        TIMESTAMPTZ DEFAULT now(),
    CONSTRAINT "fk_ap_modem_ap_serial" FOREIGN KEY ("ap_serial") REFERENCES "ap" ("serial")
);
"#;

const CLIENTS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "clients" (
    "id"                    BIGSERIAL PRIMARY KEY,
    "mac"                   VARCHAR(17) NOT NULL,
    "_site_id"              VARCHAR(64) NOT NULL,
    "_site_name"            VARCHAR(255),
    "name"                  VARCHAR(255),
    "status"                VARCHAR(50),
    "experience"            VARCHAR(50),
    "statusReason"          VARCHAR(120),
    "capabilities"          TEXT,
    "authentication"        VARCHAR(100),
    "type"                  VARCHAR(40),
    "ipv4"                  VARCHAR(45),
    "ipv6"                  VARCHAR(45),
    "vlanId"                VARCHAR(16),
    "network"               VARCHAR(100),
    "connectedDeviceSerial" VARCHAR(64),
    "connectedTo"           VARCHAR(255),
    "tunnelId"              VARCHAR(64),
    "tunnel"                VARCHAR(64),
    "role"                  VARCHAR(100),
    "port"                  VARCHAR(64),
    "keyManagement"         VARCHAR(100),
    "connectedSince"        TIMESTAMP,
    "lastSeenAt"            TIMESTAMP,
    "created_at"            TIMESTAMPTZ DEFAULT now(),
    "updated_at"            TIMESTAMPTZ DEFAULT now()
);
"#;

const DEVICE_STATUS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "device_status" (
    "id"                   BIGSERIAL PRIMARY KEY,
    "_site_id"             VARCHAR(64),
    "_site_name"           VARCHAR(255),
    "deviceId"             VARCHAR(64),
    "serialNumber"         VARCHAR(64),
    "macAddress"           VARCHAR(32),
    "deviceName"           VARCHAR(255),
    "model"                VARCHAR(64),
    "partNumber"           VARCHAR(64),
    "status"               VARCHAR(32),
    "softwareVersion"      VARCHAR(64),
    "ipv4"                 VARCHAR(45),
    "ipv6"                 VARCHAR(45),
    "role"                 VARCHAR(64),
    "deviceType"           VARCHAR(64),
    "deployment"           VARCHAR(64),
    "persona"              VARCHAR(64),
    "deviceFunction"       VARCHAR(64),
    "uptimeInMillis"       BIGINT,
    "lastSeenAt"           TIMESTAMP,
    "configLastModifiedAt" TIMESTAMP,
    "created_at"           TIMESTAMPTZ DEFAULT now(),
    "updated_at"           TIMESTAMPTZ DEFAULT now()
);
"#;

// `_id` is the surrogate key; `id` is the interface identifier from the API.
const SWITCH_INTERFACE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "switch_interfacedetails" (
    "_id"                        BIGSERIAL PRIMARY KEY,
    "_site_id"                   VARCHAR(128),
    "_site_name"                 VARCHAR(255),
    "switch_serial"              VARCHAR(64),
    "created_at"                 TIMESTAMP,
    "updated_at"                 TIMESTAMP,
    "neighbourPort"              VARCHAR(64),
    "neighbourFamily"            VARCHAR(64),
    "index"                      INT,
    "vlanMode"                   VARCHAR(32),
    "module"                     VARCHAR(64),
    "nativeVlan"                 VARCHAR(32),
    "neighbourSerial"            VARCHAR(64),
    "speed"                      VARCHAR(32),
    "isMultipleNeighbourClients" SMALLINT,
    "duplex"                     VARCHAR(16),
    "name"                       VARCHAR(128),
    "connector"                  VARCHAR(32),
    "type"                       VARCHAR(32),
    "transceiverStatus"          VARCHAR(32),
    "stpInstanceType"            VARCHAR(32),
    "stpInstanceId"              VARCHAR(32),
    "stpPortRole"                VARCHAR(32),
    "stpPortState"               VARCHAR(32),
    "stpPortInconsistent"        VARCHAR(32),
    "transceiverState"           VARCHAR(32),
    "ipv4"                       VARCHAR(64),
    "transceiverProductNumber"   VARCHAR(64),
    "transceiverModel"           VARCHAR(64),
    "transceiverSerial"          VARCHAR(64),
    "errorReason"                VARCHAR(128),
    "adminStatus"                VARCHAR(32),
    "operStatus"                 VARCHAR(32),
    "mtu"                        INT,
    "status"                     VARCHAR(32),
    "transceiverType"            VARCHAR(32),
    "neighbourType"              VARCHAR(32),
    "neighbourHealth"            VARCHAR(32),
    "neighbourRole"              VARCHAR(32),
    "lag"                        VARCHAR(32),
    "allowedVlans"               TEXT,
    "allowedVlanIds"             TEXT,
    "poeStatus"                  VARCHAR(32),
    "alias"                      VARCHAR(64),
    "description"                VARCHAR(255),
    "poeClass"                   VARCHAR(32),
    "portAlignment"              VARCHAR(32),
    "serial"                     VARCHAR(64),
    "id"                         VARCHAR(64),
    "peerPort"                   VARCHAR(64),
    "peerMemberId"               VARCHAR(64),
    "uplink"                     VARCHAR(32),
    "portError"                  VARCHAR(128),
    "neighbour"                  VARCHAR(128),
    "neighbourFunction"          VARCHAR(64)
);
"#;

const INDEXES: &[&str] = &[
    r#"CREATE INDEX IF NOT EXISTS "idx_serial" ON "ap" ("serial")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_ap_radio_ap_serial" ON "ap_radio" ("ap_serial")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_ap_wlan_ap_serial" ON "ap_wlan" ("ap_serial")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_ap_port_ap_serial" ON "ap_port" ("ap_serial")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_ap_modem_ap_serial" ON "ap_modem" ("ap_serial")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_site_mac" ON "clients" ("_site_id", "mac")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_site_lastSeenAt" ON "clients" ("_site_id", "lastSeenAt")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_site_connectedSince" ON "clients" ("_site_id", "connectedSince")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_site_created" ON "clients" ("_site_id", "created_at")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_dev_site" ON "device_status" ("_site_id", "deviceId")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_dev_site_status" ON "device_status" ("_site_id", "status")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_dev_site_lastSeen" ON "device_status" ("_site_id", "lastSeenAt")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_dev_site_created" ON "device_status" ("_site_id", "created_at")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_switch_if_serial" ON "switch_interfacedetails" ("switch_serial", "created_at")"#,
];

/// DDL for a target table.
pub fn table_ddl(table: Table) -> &'static str {
    match table {
        Table::Ap => AP_DDL,
        Table::ApRadio => AP_RADIO_DDL,
        Table::ApWlan => AP_WLAN_DDL,
        Table::ApPort => AP_PORT_DDL,
        Table::ApModem => AP_MODEM_DDL,
        Table::Clients => CLIENTS_DDL,
        Table::DeviceStatus => DEVICE_STATUS_DDL,
        Table::SwitchInterface => SWITCH_INTERFACE_DDL,
    }
}

/// Create the schema if it does not exist (idempotent).
///
/// Tables are created parents first so child foreign keys resolve. Runs in
/// one transaction; any failure rolls back and is propagated.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    for table in Table::ALL {
        sqlx::query(table_ddl(table)).execute(&mut *tx).await?;
    }
    for index in INDEXES {
        sqlx::query(index).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    tracing::info!(tables = Table::ALL.len(), indexes = INDEXES.len(), "[schema] ready");
    Ok(())
}
