//! Unix inventory over SSH.
//!
//! Runs a fixed read-only script on the target that prints `key=value`
//! facts. Key logins call `ssh` directly; password logins go through
//! `sshpass -e`, which reads the password from `SSHPASS`.

use std::net::IpAddr;

use async_trait::async_trait;

use fleet_core::fields;

use super::command::{run_tool, ToolOutput};
use super::{clean, CollectError, Collector, Credential, Protocol, RawFields};
use crate::request::SshCredential;

const FACTS_SCRIPT: &str = r#"echo "hostname=$(hostname 2>/dev/null)"
if [ -r /etc/os-release ]; then (. /etc/os-release; echo "os_version=$PRETTY_NAME"); else echo "os_version=$(uname -sr)"; fi
echo "bios_serial=$(cat /sys/class/dmi/id/product_serial 2>/dev/null)"
echo "chassis_serial=$(cat /sys/class/dmi/id/chassis_serial 2>/dev/null)"
echo "manufacturer=$(cat /sys/class/dmi/id/sys_vendor 2>/dev/null)"
echo "model=$(cat /sys/class/dmi/id/product_name 2>/dev/null)"
echo "ram_kb=$(awk '/^MemTotal:/ {print $2}' /proc/meminfo 2>/dev/null)"
echo "cpu=$(awk -F': ' '/^model name/ {print $2; exit}' /proc/cpuinfo 2>/dev/null)"
echo "cpu_cores=$(nproc 2>/dev/null)"
echo "storage=$(lsblk -dnb -o NAME,SIZE,TYPE 2>/dev/null | awk '$3=="disk" {printf "%s%s=%.2fGB", s, $1, $2/1073741824; s=", "}')"
echo "mac_address=$(cat /sys/class/net/*/address 2>/dev/null | grep -v '^00:00:00:00:00:00$' | paste -sd, -)"
echo "logged_in_user=$(who 2>/dev/null | awk 'NR==1 {print $1}')""#;

/// Facts the script reports under their inventory field name.
const PASSTHROUGH: [&str; 10] = [
    fields::HOSTNAME,
    fields::OS_VERSION,
    fields::BIOS_SERIAL,
    fields::CHASSIS_SERIAL,
    fields::MANUFACTURER,
    fields::MODEL,
    fields::CPU,
    fields::CPU_CORES,
    fields::STORAGE,
    fields::MAC_ADDRESS,
];

const EXPECTED: &[&str] = &[
    fields::HOSTNAME,
    fields::OS_VERSION,
    fields::RAM_GB,
    fields::CPU_CORES,
];

/// sshpass exit code for a rejected password.
const SSHPASS_BAD_PASSWORD: i32 = 5;
/// ssh's own exit code for connection and authentication errors.
const SSH_ERROR: i32 = 255;

pub struct SshCollector {
    ssh_path: String,
    sshpass_path: String,
    connect_timeout_secs: u64,
}

impl SshCollector {
    pub fn new(ssh_path: &str, sshpass_path: &str, connect_timeout_secs: u64) -> Self {
        Self {
            ssh_path: ssh_path.to_string(),
            sshpass_path: sshpass_path.to_string(),
            connect_timeout_secs: connect_timeout_secs.max(1),
        }
    }

    fn ssh_args(&self, target: IpAddr, cred: &SshCredential) -> Vec<String> {
        let batch = if cred.key_path.is_some() { "yes" } else { "no" };
        let mut args: Vec<String> = vec![
            "-o".into(),
            format!("BatchMode={batch}"),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "UserKnownHostsFile=/dev/null".into(),
            "-o".into(),
            "LogLevel=ERROR".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".into(),
            "NumberOfPasswordPrompts=1".into(),
            "-p".into(),
            cred.port.unwrap_or(22).to_string(),
        ];
        if let Some(key) = &cred.key_path {
            args.extend(["-o".into(), "IdentitiesOnly=yes".into(), "-i".into(), key.clone()]);
        }
        args.push(format!("{}@{target}", cred.username));
        args.push(FACTS_SCRIPT.to_string());
        args
    }
}

fn check(out: &ToolOutput, via_sshpass: bool) -> Result<(), CollectError> {
    if out.stdout.contains("hostname=") {
        return Ok(());
    }
    match out.code {
        Some(SSHPASS_BAD_PASSWORD) if via_sshpass => {
            Err(CollectError::Auth("password rejected".to_string()))
        }
        Some(SSH_ERROR)
            if out.stderr.contains("Permission denied")
                || out.stderr.contains("Too many authentication failures") =>
        {
            Err(CollectError::Auth(out.diagnostic()))
        }
        _ => Err(CollectError::Transport(out.diagnostic())),
    }
}

/// Parse the script's `key=value` lines into inventory fields.
pub fn parse_facts(stdout: &str) -> RawFields {
    let mut out = RawFields::new();
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key == "ram_kb" {
            if let Ok(kb) = value.trim().parse::<f64>() {
                out.insert(
                    fields::RAM_GB.to_string(),
                    format!("{:.0}", kb / (1024.0 * 1024.0)),
                );
            }
        } else if PASSTHROUGH.contains(&key) {
            out.insert(key.to_string(), value.to_string());
        }
    }
    if let Some(storage) = out.get(fields::STORAGE) {
        let total: f64 = storage
            .split(", ")
            .filter_map(|d| d.split_once('=')?.1.strip_suffix("GB")?.parse::<f64>().ok())
            .sum();
        if total > 0.0 {
            out.insert(fields::DISK_TOTAL_GB.to_string(), format!("{total:.2}"));
        }
    }
    out
}

#[async_trait]
impl Collector for SshCollector {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Ssh
    }

    fn expected_fields(&self) -> &'static [&'static str] {
        EXPECTED
    }

    async fn collect(
        &self,
        target: IpAddr,
        credential: &Credential,
    ) -> Result<RawFields, CollectError> {
        let Credential::Ssh(cred) = credential else {
            return Err(CollectError::CredentialMismatch(Protocol::Ssh));
        };

        let ssh_args = self.ssh_args(target, cred);
        let out = match cred.password.as_deref() {
            Some(password) if cred.key_path.is_none() => {
                let mut args = vec!["-e".to_string(), self.ssh_path.clone()];
                args.extend(ssh_args);
                let out = run_tool(&self.sshpass_path, &args, &[("SSHPASS", password)]).await?;
                check(&out, true)?;
                out
            }
            _ => {
                let out = run_tool(&self.ssh_path, &ssh_args, &[]).await?;
                check(&out, false)?;
                out
            }
        };

        Ok(clean(parse_facts(&out.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testing::fake_tool;

    const FACTS: &str = "hostname=build-01\n\
        os_version=Ubuntu 22.04.3 LTS\n\
        bios_serial=\n\
        manufacturer=Dell Inc.\n\
        ram_kb=32778856\n\
        cpu_cores=8\n\
        storage=nvme0n1=476.94GB, sda=931.51GB\n\
        mac_address=aa:bb:cc:dd:ee:40\n\
        shell_secret=ignored\n";

    fn key_cred() -> Credential {
        Credential::Ssh(SshCredential {
            username: "inventory".into(),
            password: None,
            key_path: Some("/etc/fleet/id_ed25519".into()),
            port: Some(2222),
        })
    }

    fn password_cred(password: &str) -> Credential {
        Credential::Ssh(SshCredential {
            username: "inventory".into(),
            password: Some(password.into()),
            key_path: None,
            port: None,
        })
    }

    #[test]
    fn parses_known_facts_only() {
        let fields = clean(parse_facts(FACTS));
        assert_eq!(fields["hostname"], "build-01");
        assert_eq!(fields["os_version"], "Ubuntu 22.04.3 LTS");
        assert_eq!(fields["ram_gb"], "31");
        assert_eq!(fields["storage"], "nvme0n1=476.94GB, sda=931.51GB");
        assert_eq!(fields["disk_total_gb"], "1408.45");
        assert!(!fields.contains_key("bios_serial"));
        assert!(!fields.contains_key("shell_secret"));
    }

    #[test]
    fn key_login_args() {
        let collector = SshCollector::new("ssh", "sshpass", 10);
        let Credential::Ssh(cred) = key_cred() else {
            unreachable!()
        };
        let args = collector.ssh_args("10.0.1.40".parse().unwrap(), &cred);

        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/etc/fleet/id_ed25519"]));
        assert_eq!(args[args.len() - 2], "inventory@10.0.1.40");
    }

    #[tokio::test]
    async fn password_goes_through_sshpass_env() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = fake_tool(dir.path(), "ssh", "printf 'hostname=build-01\\nos_version=Debian GNU/Linux 12\\n'");
        let sshpass = fake_tool(
            dir.path(),
            "sshpass",
            r#"[ "$SSHPASS" = "right" ] || exit 5
shift
exec "$@""#,
        );
        let collector = SshCollector::new(&ssh, &sshpass, 5);
        let target: IpAddr = "10.0.1.40".parse().unwrap();

        let err = collector.collect(target, &password_cred("wrong")).await.unwrap_err();
        assert!(matches!(err, CollectError::Auth(_)));

        let fields = collector.collect(target, &password_cred("right")).await.unwrap();
        assert_eq!(fields["hostname"], "build-01");
        assert_eq!(fields["os_version"], "Debian GNU/Linux 12");
    }

    #[tokio::test]
    async fn ssh_errors_are_classified() {
        let dir = tempfile::tempdir().unwrap();
        let denied = fake_tool(
            dir.path(),
            "ssh-denied",
            "echo 'inventory@10.0.1.40: Permission denied (publickey).' >&2; exit 255",
        );
        let refused = fake_tool(
            dir.path(),
            "ssh-refused",
            "echo 'ssh: connect to host 10.0.1.40 port 22: Connection refused' >&2; exit 255",
        );
        let target: IpAddr = "10.0.1.40".parse().unwrap();

        let err = SshCollector::new(&denied, "sshpass", 5)
            .collect(target, &key_cred())
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::Auth(_)));

        let err = SshCollector::new(&refused, "sshpass", 5)
            .collect(target, &key_cred())
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::Transport(msg) if msg.contains("Connection refused")));
    }
}
