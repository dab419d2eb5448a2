//! Windows inventory over WMI, via the Samba `wmic` client.
//!
//! One WQL query per class. The computer-system query runs first and decides
//! whether the credential is accepted; later queries that fail only leave
//! their fields empty.

use std::collections::BTreeMap;
use std::net::IpAddr;

use async_trait::async_trait;

use fleet_core::fields;

use super::command::{run_tool, ToolOutput};
use super::{clean, CollectError, Collector, Credential, Protocol, RawFields};
use crate::request::PasswordCredential;

const SYSTEM: &str =
    "SELECT Name,Manufacturer,Model,TotalPhysicalMemory,UserName FROM Win32_ComputerSystem";
const BIOS: &str = "SELECT SerialNumber FROM Win32_BIOS";
const ENCLOSURE: &str = "SELECT SerialNumber FROM Win32_SystemEnclosure";
const OS: &str = "SELECT Caption,Version FROM Win32_OperatingSystem";
const CPU: &str = "SELECT Name,NumberOfCores FROM Win32_Processor";
const DISKS: &str = "SELECT DeviceID,Size FROM Win32_LogicalDisk WHERE DriveType=3";
const ADAPTERS: &str =
    "SELECT Description,MACAddress FROM Win32_NetworkAdapterConfiguration WHERE IPEnabled=True";
const MONITORS: &str = "SELECT Name FROM Win32_DesktopMonitor";

const EXPECTED: &[&str] = &[
    fields::HOSTNAME,
    fields::BIOS_SERIAL,
    fields::MANUFACTURER,
    fields::MODEL,
    fields::OS_VERSION,
    fields::RAM_GB,
];

/// NT status codes that mean the credential itself was refused.
const AUTH_FAILURES: [&str; 6] = [
    "NT_STATUS_LOGON_FAILURE",
    "NT_STATUS_ACCESS_DENIED",
    "NT_STATUS_WRONG_PASSWORD",
    "NT_STATUS_ACCOUNT_DISABLED",
    "NT_STATUS_ACCOUNT_LOCKED_OUT",
    "NT_STATUS_PASSWORD_EXPIRED",
];

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

type Row = BTreeMap<String, String>;

pub struct WmiCollector {
    wmic_path: String,
}

impl WmiCollector {
    pub fn new(wmic_path: &str) -> Self {
        Self {
            wmic_path: wmic_path.to_string(),
        }
    }

    async fn query(
        &self,
        target: IpAddr,
        cred: &PasswordCredential,
        wql: &str,
    ) -> Result<Vec<Row>, CollectError> {
        let args = vec![
            "-U".to_string(),
            login(cred),
            format!("//{target}"),
            wql.to_string(),
        ];
        // Samba tools read the password from PASSWD.
        let out = run_tool(&self.wmic_path, &args, &[("PASSWD", cred.password.as_str())]).await?;
        check(&out)?;
        Ok(parse_wmic(&out.stdout))
    }
}

/// `DOMAIN/user` as Samba expects it.
fn login(cred: &PasswordCredential) -> String {
    let user = cred.username.replace('\\', "/");
    match &cred.domain {
        Some(domain) if !domain.is_empty() && !user.contains('/') => format!("{domain}/{user}"),
        _ => user,
    }
}

fn check(out: &ToolOutput) -> Result<(), CollectError> {
    if out.success() {
        return Ok(());
    }
    let text = format!("{}\n{}", out.stderr, out.stdout);
    if let Some(status) = AUTH_FAILURES.iter().find(|s| text.contains(*s)) {
        return Err(CollectError::Auth((*status).to_string()));
    }
    Err(CollectError::Transport(out.diagnostic()))
}

/// Parse `wmic` output: a `CLASS:` line, a `|`-separated header, then rows.
pub fn parse_wmic(output: &str) -> Vec<Row> {
    let mut lines = output
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty() && !l.starts_with("CLASS:"));

    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<&str> = header.split('|').collect();

    lines
        .map(|line| {
            columns
                .iter()
                .zip(line.splitn(columns.len(), '|'))
                .filter(|(_, v)| !v.trim().is_empty() && v.trim() != "(null)")
                .map(|(k, v)| (k.to_string(), v.trim().to_string()))
                .collect()
        })
        .collect()
}

fn first<'a>(rows: &'a [Row], column: &str) -> Option<&'a str> {
    rows.iter().find_map(|r| r.get(column)).map(String::as_str)
}

fn bytes_to_gib(bytes: &str) -> Option<f64> {
    bytes.trim().parse::<f64>().ok().map(|b| b / GIB)
}

/// Map per-class query results to inventory fields.
pub fn to_fields(results: &BTreeMap<&str, Vec<Row>>) -> RawFields {
    let rows = |class: &str| results.get(class).map(Vec::as_slice).unwrap_or_default();
    let mut out = RawFields::new();
    let mut put = |name: &str, value: Option<String>| {
        if let Some(v) = value {
            out.insert(name.to_string(), v);
        }
    };

    let system = rows(SYSTEM);
    put(fields::HOSTNAME, first(system, "Name").map(str::to_string));
    put(fields::MANUFACTURER, first(system, "Manufacturer").map(str::to_string));
    put(fields::MODEL, first(system, "Model").map(str::to_string));
    put(fields::LOGGED_IN_USER, first(system, "UserName").map(str::to_string));
    put(
        fields::RAM_GB,
        first(system, "TotalPhysicalMemory")
            .and_then(bytes_to_gib)
            .map(|gb| format!("{gb:.0}")),
    );

    put(fields::BIOS_SERIAL, first(rows(BIOS), "SerialNumber").map(str::to_string));
    put(
        fields::CHASSIS_SERIAL,
        first(rows(ENCLOSURE), "SerialNumber").map(str::to_string),
    );

    let os = rows(OS);
    put(
        fields::OS_VERSION,
        first(os, "Caption").map(|caption| match first(os, "Version") {
            Some(version) => format!("{caption} {version}"),
            None => caption.to_string(),
        }),
    );

    let cpus = rows(CPU);
    put(fields::CPU, first(cpus, "Name").map(str::to_string));
    let cores: u32 = cpus
        .iter()
        .filter_map(|r| r.get("NumberOfCores")?.parse::<u32>().ok())
        .sum();
    put(fields::CPU_CORES, (cores > 0).then(|| cores.to_string()));

    let disks: Vec<(String, f64)> = rows(DISKS)
        .iter()
        .filter_map(|r| Some((r.get("DeviceID")?.clone(), bytes_to_gib(r.get("Size")?)?)))
        .collect();
    if !disks.is_empty() {
        let storage: Vec<String> = disks
            .iter()
            .map(|(id, gb)| format!("{id}={gb:.2}GB"))
            .collect();
        let total: f64 = disks.iter().map(|(_, gb)| gb).sum();
        put(fields::STORAGE, Some(storage.join(", ")));
        put(fields::DISK_TOTAL_GB, Some(format!("{total:.2}")));
    }

    let adapters = rows(ADAPTERS);
    let macs: Vec<&str> = adapters
        .iter()
        .filter_map(|r| r.get("MACAddress"))
        .map(String::as_str)
        .collect();
    put(fields::MAC_ADDRESS, (!macs.is_empty()).then(|| macs.join(", ")));
    let nics: Vec<&str> = adapters
        .iter()
        .filter_map(|r| r.get("Description"))
        .map(String::as_str)
        .collect();
    put(fields::NETWORK_ADAPTERS, (!nics.is_empty()).then(|| nics.join(", ")));

    let monitors: Vec<&str> = rows(MONITORS)
        .iter()
        .filter_map(|r| r.get("Name"))
        .map(String::as_str)
        .collect();
    put(fields::MONITORS, (!monitors.is_empty()).then(|| monitors.join(", ")));

    out
}

#[async_trait]
impl Collector for WmiCollector {
    fn name(&self) -> &'static str {
        "wmi"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Wmi
    }

    fn expected_fields(&self) -> &'static [&'static str] {
        EXPECTED
    }

    async fn collect(
        &self,
        target: IpAddr,
        credential: &Credential,
    ) -> Result<RawFields, CollectError> {
        let Credential::Wmi(cred) = credential else {
            return Err(CollectError::CredentialMismatch(Protocol::Wmi));
        };

        let mut results = BTreeMap::new();
        results.insert(SYSTEM, self.query(target, cred, SYSTEM).await?);

        for wql in [BIOS, ENCLOSURE, OS, CPU, DISKS, ADAPTERS, MONITORS] {
            match self.query(target, cred, wql).await {
                Ok(rows) => {
                    results.insert(wql, rows);
                }
                Err(e) => tracing::debug!(%target, query = wql, error = %e, "WMI query failed"),
            }
        }

        Ok(clean(to_fields(&results)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testing::fake_tool;

    const SYSTEM_OUT: &str = "CLASS: Win32_ComputerSystem\n\
        Manufacturer|Model|Name|TotalPhysicalMemory|UserName\n\
        Dell Inc.|OptiPlex 7090|WS-042|17032478720|CORP\\jdoe\n";

    fn cred(password: &str) -> Credential {
        Credential::Wmi(PasswordCredential {
            username: "inventory".to_string(),
            password: password.to_string(),
            domain: Some("CORP".to_string()),
        })
    }

    #[test]
    fn parses_header_and_rows() {
        let rows = parse_wmic(SYSTEM_OUT);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Name"], "WS-042");
        assert_eq!(rows[0]["UserName"], "CORP\\jdoe");
    }

    #[test]
    fn maps_classes_to_fields() {
        let mut results = BTreeMap::new();
        results.insert(SYSTEM, parse_wmic(SYSTEM_OUT));
        results.insert(
            BIOS,
            parse_wmic("CLASS: Win32_BIOS\nSerialNumber\nBD35LH2\n"),
        );
        results.insert(
            OS,
            parse_wmic("CLASS: Win32_OperatingSystem\nCaption|Version\nMicrosoft Windows 10 Pro|10.0.19045\n"),
        );
        results.insert(
            DISKS,
            parse_wmic("CLASS: Win32_LogicalDisk\nDeviceID|Size\nC:|250056704000\nD:|1000202043392\n"),
        );
        results.insert(
            ADAPTERS,
            parse_wmic("CLASS: Win32_NetworkAdapterConfiguration\nDescription|MACAddress\nIntel(R) Ethernet|AA:BB:CC:DD:EE:42\n"),
        );

        let fields = to_fields(&results);
        assert_eq!(fields["hostname"], "WS-042");
        assert_eq!(fields["bios_serial"], "BD35LH2");
        assert_eq!(fields["ram_gb"], "16");
        assert_eq!(fields["os_version"], "Microsoft Windows 10 Pro 10.0.19045");
        assert_eq!(fields["storage"], "C:=232.88GB, D:=931.51GB");
        assert_eq!(fields["mac_address"], "AA:BB:CC:DD:EE:42");
        assert!(!fields.contains_key("chassis_serial"));
    }

    #[test]
    fn domain_is_prefixed_once() {
        let with_domain = PasswordCredential {
            username: "inventory".into(),
            password: "x".into(),
            domain: Some("CORP".into()),
        };
        assert_eq!(login(&with_domain), "CORP/inventory");

        let qualified = PasswordCredential {
            username: "CORP\\inventory".into(),
            password: "x".into(),
            domain: Some("OTHER".into()),
        };
        assert_eq!(login(&qualified), "CORP/inventory");
    }

    #[tokio::test]
    async fn rejected_password_is_an_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let wmic = fake_tool(
            dir.path(),
            "wmic",
            r#"[ "$PASSWD" = "right" ] || { echo "ERROR: Login to remote object. NTSTATUS: NT_STATUS_LOGON_FAILURE" >&2; exit 1; }
for last; do :; done
case "$last" in
  *Win32_ComputerSystem*) printf 'CLASS: Win32_ComputerSystem\nName|Manufacturer\nWS-042|Dell Inc.\n' ;;
  *Win32_BIOS*) printf 'CLASS: Win32_BIOS\nSerialNumber\nBD35LH2\n' ;;
  *) echo "NT_STATUS_IO_TIMEOUT" >&2; exit 1 ;;
esac"#,
        );
        let collector = WmiCollector::new(&wmic);
        let target: IpAddr = "10.0.1.42".parse().unwrap();

        let err = collector.collect(target, &cred("wrong")).await.unwrap_err();
        assert!(matches!(err, CollectError::Auth(s) if s == "NT_STATUS_LOGON_FAILURE"));

        let fields = collector.collect(target, &cred("right")).await.unwrap();
        assert_eq!(fields["hostname"], "WS-042");
        assert_eq!(fields["bios_serial"], "BD35LH2");
        assert!(!fields.contains_key("os_version"));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let wmic = fake_tool(
            dir.path(),
            "wmic",
            r#"echo "ERROR: Failed to connect: NT_STATUS_HOST_UNREACHABLE" >&2; exit 1"#,
        );
        let err = WmiCollector::new(&wmic)
            .collect("10.0.1.42".parse().unwrap(), &cred("right"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::Transport(_)));
    }
}
