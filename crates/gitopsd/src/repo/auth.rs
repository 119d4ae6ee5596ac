//! SSH authentication environment for git subprocesses.
//!
//! The process reads `SSH_KEY_PATH` and `SSH_KNOWN_HOSTS` once at transport
//! construction and assembles a `GIT_SSH_COMMAND` from whichever are set.
//! Interactive prompting is disabled either way; a daemon has nobody to
//! answer it.

/// Environment variable naming the private key to authenticate with.
pub const SSH_KEY_PATH: &str = "SSH_KEY_PATH";

/// Environment variable naming the known-hosts file for host verification.
pub const SSH_KNOWN_HOSTS: &str = "SSH_KNOWN_HOSTS";

/// Escapes a value for a single-quoted shell string.
fn shell_escape(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Builds the environment for git subprocesses from the process
/// environment.
pub fn build_env() -> Vec<(String, String)> {
    build_env_from(
        std::env::var(SSH_KEY_PATH).ok().as_deref(),
        std::env::var(SSH_KNOWN_HOSTS).ok().as_deref(),
    )
}

fn build_env_from(key_path: Option<&str>, known_hosts: Option<&str>) -> Vec<(String, String)> {
    let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];

    let mut ssh_command = String::from("ssh");
    if let Some(key_path) = key_path.filter(|p| !p.is_empty()) {
        ssh_command.push_str(&format!(" -i {}", shell_escape(key_path)));
        ssh_command.push_str(" -o IdentitiesOnly=yes");
    }
    if let Some(known_hosts) = known_hosts.filter(|p| !p.is_empty()) {
        ssh_command.push_str(&format!(
            " -o UserKnownHostsFile={}",
            shell_escape(known_hosts)
        ));
        ssh_command.push_str(" -o StrictHostKeyChecking=yes");
    }

    if ssh_command != "ssh" {
        env.push(("GIT_SSH_COMMAND".to_string(), ssh_command));
    }

    env
}
