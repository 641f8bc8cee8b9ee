use crate::domain::{
    ClientResult, ContainerDescriptor, ContainerSpec, Host, HostClient, HostClientError,
    PortMapping,
};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long output readers may lag behind the child before they are abandoned
const READER_GRACE: Duration = Duration::from_millis(500);

/// stderr fragments podman prints when the remote service cannot be reached
const UNREACHABLE_MARKERS: &[&str] = &[
    "unable to connect",
    "connection refused",
    "no route to host",
    "network is unreachable",
    "i/o timeout",
    "connection reset",
    "cannot connect to podman",
    "handshake failed",
];

const NOT_FOUND_MARKERS: &[&str] = &["no such container", "no container with name or id"];

/// `HostClient` backed by the podman CLI talking to a remote podman service
#[derive(Debug, Clone)]
pub struct PodmanHostClient {
    binary: String,
    endpoint: String,
}

impl PodmanHostClient {
    pub fn new(binary: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            endpoint: endpoint.into(),
        }
    }

    pub fn for_host(binary: &str, host: &Host, default_port: u16) -> Self {
        Self::new(binary, endpoint_for(host, default_port))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--url")
            .arg(&self.endpoint)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Runs podman with `args`, returning stdout. The child is killed at the deadline.
    fn podman(&self, args: &[String], timeout: Duration, context: &str) -> ClientResult<String> {
        debug!("podman --url {} {}", self.endpoint, args.join(" "));

        let mut child = self
            .command(args)
            .spawn()
            .map_err(|e| HostClientError::Runtime(format!("{}: spawning {}: {}", context, self.binary, e)))?;

        let stdout = capture(child.stdout.take());
        let stderr = capture(child.stderr.take());

        let waited = wait_with_deadline(&mut child, timeout);

        // A killed child can leave grandchildren holding the pipes open
        let stdout = join_within(stdout, READER_GRACE).unwrap_or_default();
        let stderr = join_within(stderr, READER_GRACE).unwrap_or_default();

        let status = waited.map_err(|e| match e {
            WaitError::Expired => HostClientError::Unreachable(format!(
                "{}: no answer from {} within {:?}",
                context, self.endpoint, timeout
            )),
            WaitError::Io(e) => HostClientError::Runtime(format!("{}: {}", context, e)),
        })?;

        if status.success() {
            return Ok(stdout);
        }

        Err(classify_failure(status, &stderr, context))
    }
}

fn capture<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

/// Joins a reader thread if it finishes within `grace`, otherwise leaves it behind
fn join_within(handle: thread::JoinHandle<String>, grace: Duration) -> Option<String> {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            debug!("Output reader still blocked after {:?}, abandoning it", grace);
            return None;
        }
        thread::sleep(POLL_INTERVAL);
    }
    handle.join().ok()
}

enum WaitError {
    Expired,
    Io(std::io::Error),
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<ExitStatus, WaitError> {
    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(WaitError::Expired);
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(WaitError::Io(e)),
        }
    }
}

fn classify_failure(status: ExitStatus, stderr: &str, context: &str) -> HostClientError {
    let message = stderr.trim();
    let lowered = message.to_ascii_lowercase();

    if UNREACHABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return HostClientError::Unreachable(format!("{}: {}", context, message));
    }

    if NOT_FOUND_MARKERS.iter().any(|m| lowered.contains(m)) {
        return HostClientError::NotFound(message.to_string());
    }

    if message.is_empty() {
        HostClientError::Runtime(format!("{}: podman exited with {}", context, status))
    } else {
        HostClientError::Runtime(format!("{}: {}", context, message))
    }
}

/// Explicit endpoint if set, otherwise `tcp://{address}:{default_port}`
pub fn endpoint_for(host: &Host, default_port: u16) -> String {
    match &host.endpoint {
        Some(endpoint) => endpoint.clone(),
        None => format!("tcp://{}:{}", host.address, default_port),
    }
}

impl HostClient for PodmanHostClient {
    fn list_containers(&self, timeout: Duration) -> ClientResult<Vec<ContainerDescriptor>> {
        let args = strings(&["ps", "--all", "--format", "json"]);
        let stdout = self.podman(&args, timeout, "listing containers")?;
        parse_ps_output(&stdout)
    }

    fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
        timeout: Duration,
    ) -> ClientResult<ContainerDescriptor> {
        let mut args = strings(&["run", "--detach", "--name", name]);

        for port in &spec.ports {
            args.push("-p".into());
            args.push(port.to_string());
        }

        args.push(spec.image.clone());
        args.extend(spec.command.split_whitespace().map(String::from));

        let stdout = self.podman(&args, timeout, &format!("creating container {}", name))?;
        let runtime_id = stdout.trim().lines().last().unwrap_or_default().trim().to_string();

        if runtime_id.is_empty() {
            return Err(HostClientError::Runtime(format!(
                "creating container {}: podman returned no container id",
                name
            )));
        }

        Ok(ContainerDescriptor {
            runtime_id,
            name: name.to_string(),
            image: spec.image.clone(),
            command: spec.command.clone(),
            ports: spec.ports.clone(),
            running: true,
        })
    }

    fn destroy_container(&self, runtime_id: &str, timeout: Duration) -> ClientResult<()> {
        let args = strings(&["rm", "--force", "--ignore", runtime_id]);
        match self.podman(&args, timeout, &format!("removing container {}", runtime_id)) {
            Ok(_) | Err(HostClientError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn inspect(&self, id_or_name: &str, timeout: Duration) -> ClientResult<ContainerDescriptor> {
        let args = strings(&["container", "inspect", id_or_name]);
        let stdout = self.podman(&args, timeout, &format!("inspecting container {}", id_or_name))?;
        parse_inspect_output(&stdout)?
            .into_iter()
            .next()
            .ok_or_else(|| HostClientError::NotFound(id_or_name.to_string()))
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsEntry {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    command: Option<Vec<String>>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    ports: Option<Vec<PsPort>>,
}

#[derive(Debug, Deserialize)]
struct PsPort {
    #[serde(default)]
    host_port: u16,
    #[serde(default)]
    container_port: u16,
}

fn parse_ps_output(stdout: &str) -> ClientResult<Vec<ContainerDescriptor>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<PsEntry> = serde_json::from_str(stdout)
        .map_err(|e| HostClientError::Runtime(format!("unexpected podman ps output: {}", e)))?;

    Ok(entries
        .into_iter()
        .map(|entry| ContainerDescriptor {
            name: entry.names.into_iter().next().unwrap_or_default(),
            image: entry.image,
            command: entry.command.unwrap_or_default().join(" "),
            ports: entry
                .ports
                .unwrap_or_default()
                .into_iter()
                .filter(|p| p.host_port != 0)
                .map(|p| PortMapping::new(p.host_port, p.container_port))
                .collect(),
            running: entry.state.eq_ignore_ascii_case("running"),
            runtime_id: entry.id,
        })
        .collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: InspectState,
    #[serde(default)]
    config: InspectConfig,
    #[serde(default)]
    host_config: InspectHostConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    running: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    image: String,
    #[serde(default)]
    cmd: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostConfig {
    #[serde(default)]
    port_bindings: Option<HashMap<String, Option<Vec<InspectBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectBinding {
    #[serde(default)]
    host_port: String,
}

fn parse_inspect_output(stdout: &str) -> ClientResult<Vec<ContainerDescriptor>> {
    let entries: Vec<InspectEntry> = serde_json::from_str(stdout).map_err(|e| {
        HostClientError::Runtime(format!("unexpected podman inspect output: {}", e))
    })?;

    Ok(entries
        .into_iter()
        .map(|entry| {
            let mut ports = BTreeSet::new();
            for (key, bindings) in entry.host_config.port_bindings.unwrap_or_default() {
                let container_port = key.split('/').next().and_then(|p| p.parse::<u16>().ok());
                let Some(container_port) = container_port else {
                    continue;
                };
                for binding in bindings.unwrap_or_default() {
                    if let Ok(host_port) = binding.host_port.parse::<u16>() {
                        ports.insert(PortMapping::new(host_port, container_port));
                    }
                }
            }

            ContainerDescriptor {
                runtime_id: entry.id,
                name: entry.name,
                image: entry.config.image,
                command: entry.config.cmd.unwrap_or_default().join(" "),
                ports,
                running: entry.state.running,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HostId;

    #[test]
    fn test_endpoint_derivation() {
        let host = Host::new(HostId::new("local"), "local", "127.0.0.1");
        assert_eq!(endpoint_for(&host, 8888), "tcp://127.0.0.1:8888");

        let host = host.with_endpoint("ssh://core@10.0.0.5/run/podman/podman.sock");
        assert_eq!(
            endpoint_for(&host, 8888),
            "ssh://core@10.0.0.5/run/podman/podman.sock"
        );
    }

    #[test]
    fn test_parse_ps_output() {
        let json = r#"[
          {"Id":"a1b2","Names":["shipyard-1"],"Image":"docker.io/library/base:latest",
           "Command":["/bin/bash"],"State":"running",
           "Ports":[{"host_ip":"","container_port":80,"host_port":8080,"range":1,"protocol":"tcp"}]},
          {"Id":"c3d4","Names":["other"],"Image":"redis","Command":null,"State":"exited","Ports":null}
        ]"#;

        let containers = parse_ps_output(json).unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].runtime_id, "a1b2");
        assert_eq!(containers[0].name, "shipyard-1");
        assert_eq!(containers[0].command, "/bin/bash");
        assert!(containers[0].running);
        assert!(containers[0].ports.contains(&PortMapping::new(8080, 80)));
        assert!(!containers[1].running);
        assert!(containers[1].ports.is_empty());

        assert!(parse_ps_output("").unwrap().is_empty());
        assert!(parse_ps_output("not json").is_err());
    }

    #[test]
    fn test_parse_inspect_output() {
        let json = r#"[{
          "Id":"a1b2","Name":"shipyard-3",
          "State":{"Running":true,"Status":"running"},
          "Config":{"Image":"base","Cmd":["/bin/bash","-l"]},
          "HostConfig":{"PortBindings":{"80/tcp":[{"HostIp":"","HostPort":"8080"}],"443/tcp":null}}
        }]"#;

        let containers = parse_inspect_output(json).unwrap();
        assert_eq!(containers[0].name, "shipyard-3");
        assert_eq!(containers[0].command, "/bin/bash -l");
        assert_eq!(containers[0].ports.len(), 1);
        assert!(containers[0].running);
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_classification() {
        use std::os::unix::process::ExitStatusExt;
        let failed = ExitStatus::from_raw(125 << 8);

        assert!(matches!(
            classify_failure(failed, "Error: unable to connect to Podman socket: dial tcp: connection refused", "x"),
            HostClientError::Unreachable(_)
        ));
        assert!(matches!(
            classify_failure(failed, "Error: no such container shipyard-9", "x"),
            HostClientError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure(failed, "Error: docker.io/library/nope: image not known", "x"),
            HostClientError::Runtime(_)
        ));
        assert!(matches!(
            classify_failure(failed, "", "x"),
            HostClientError::Runtime(_)
        ));
    }

    #[test]
    fn test_missing_binary_is_runtime_error() {
        let client = PodmanHostClient::new("/nonexistent/podman-binary", "tcp://127.0.0.1:1");
        let result = client.list_containers(Duration::from_secs(1));
        assert!(matches!(result, Err(HostClientError::Runtime(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_deadline_kills_slow_command() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-podman");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let client = PodmanHostClient::new(script.to_string_lossy(), "tcp://127.0.0.1:1");
        let started = Instant::now();

        let result = client.list_containers(Duration::from_millis(100));

        assert!(matches!(result, Err(HostClientError::Unreachable(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn test_deadline_does_not_wait_for_orphaned_pipes() {
        use std::os::unix::fs::PermissionsExt;

        // The background sleep outlives the killed shell and keeps stdout open
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("forking-podman");
        std::fs::write(&script, "#!/bin/sh\nsleep 5 &\nwait\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let client = PodmanHostClient::new(script.to_string_lossy(), "tcp://127.0.0.1:1");
        let started = Instant::now();

        let result = client.list_containers(Duration::from_millis(100));

        assert!(matches!(result, Err(HostClientError::Unreachable(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_join_within_is_bounded() {
        let done = thread::spawn(|| "out".to_string());
        assert_eq!(join_within(done, Duration::from_secs(1)).as_deref(), Some("out"));

        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let stuck = thread::spawn(move || {
            let _ = rx.recv();
            String::new()
        });
        let started = Instant::now();
        assert_eq!(join_within(stuck, Duration::from_millis(50)), None);
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(tx);
    }
}
