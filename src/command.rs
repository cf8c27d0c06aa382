//! Remote Command Construction
//!
//! Every shell line sent to a managed host is built here. The command
//! grammar is fixed (existing hosts depend on it), so each operation has a
//! dedicated constructor rendering the known template. Untrusted values
//! (usernames, passwords, dates) are never spliced into a line verbatim;
//! they pass through single-quote shell escaping first.
//!
//! Fixed maintenance batches whose text contains no untrusted input use
//! [`ShellCommand::raw`].

use std::borrow::Cow;
use std::fmt;

use chrono::NaiveDate;

/// One fully rendered shell command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    line: String,
}

impl ShellCommand {
    /// Wrap a fixed literal command. The caller guarantees the text contains
    /// no untrusted values.
    pub fn raw(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }

    /// The rendered command line
    pub fn as_str(&self) -> &str {
        &self.line
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

/// Shell-quote an untrusted value for inclusion in a command line.
fn q(value: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(value))
}

/// Create an OS account with a home directory and a login shell.
pub fn create_user(username: &str) -> ShellCommand {
    ShellCommand::raw(format!("useradd -m -s /bin/bash {}", q(username)))
}

/// Set an account password through the piped credential-update mechanism.
pub fn set_password(username: &str, password: &str) -> ShellCommand {
    ShellCommand::raw(format!(
        "printf '%s:%s\\n' {} {} | chpasswd",
        q(username),
        q(password)
    ))
}

/// Set the account expiration date (`YYYY-MM-DD`).
pub fn set_expiration(username: &str, date: NaiveDate) -> ShellCommand {
    ShellCommand::raw(format!(
        "chage -E {} {}",
        date.format("%Y-%m-%d"),
        q(username)
    ))
}

/// Terminate every process owned by the account.
pub fn kill_user_processes(username: &str) -> ShellCommand {
    ShellCommand::raw(format!("pkill -u {}", q(username)))
}

/// Remove the account together with its home directory.
pub fn remove_user(username: &str) -> ShellCommand {
    ShellCommand::raw(format!("userdel -r {}", q(username)))
}

/// Lock the account.
pub fn lock_user(username: &str) -> ShellCommand {
    ShellCommand::raw(format!("usermod -L {}", q(username)))
}

/// Unlock the account.
pub fn unlock_user(username: &str) -> ShellCommand {
    ShellCommand::raw(format!("usermod -U {}", q(username)))
}

/// Count live sshd processes belonging to the account.
pub fn count_ssh_sessions(username: &str) -> ShellCommand {
    let pattern = format!("sshd.*{}", username);
    ShellCommand::raw(format!(
        "ps aux | grep {} | grep -v grep | wc -l",
        q(&pattern)
    ))
}

/// Enumerate logged-in users with per-user session counts.
pub fn active_sessions() -> ShellCommand {
    ShellCommand::raw("who | awk '{print $1}' | sort | uniq -c")
}

/// CPU utilization percentage probe.
pub fn cpu_usage() -> ShellCommand {
    ShellCommand::raw("top -bn1 | grep 'Cpu(s)' | awk '{print $2}' | cut -d'%' -f1")
}

/// RAM utilization/total/used probe (percent, MB, MB).
pub fn memory_usage() -> ShellCommand {
    ShellCommand::raw(
        "free | grep Mem | awk '{printf \"%.2f %.2f %.2f\", $3/$2*100, $2/1024, $3/1024}'",
    )
}

/// Root filesystem utilization probe (percent, total, used).
pub fn disk_usage() -> ShellCommand {
    ShellCommand::raw("df -h / | tail -1 | awk '{print $5, $2, $3}'")
}

/// Human-readable uptime probe.
pub fn uptime() -> ShellCommand {
    ShellCommand::raw("uptime -p")
}

/// Listening TCP/UDP port probe.
pub fn listening_ports() -> ShellCommand {
    ShellCommand::raw("ss -tuln | grep LISTEN | awk '{print $5}' | cut -d':' -f2 | sort -u")
}

/// Reboot the host.
pub fn reboot() -> ShellCommand {
    ShellCommand::raw("reboot")
}

/// The fixed log-cleanup batch. Commands targeting optional paths suppress
/// their own failures so the batch always runs to completion.
pub fn clean_log_batch() -> Vec<ShellCommand> {
    [
        "truncate -s 0 /var/log/auth.log",
        "truncate -s 0 /var/log/syslog",
        "truncate -s 0 /var/log/kern.log",
        "rm -f /var/log/*.gz",
        "rm -f /var/log/*.1",
        "find /var/log/v2ray/ -type f -delete 2>/dev/null || true",
        "find /var/log/xray/ -type f -delete 2>/dev/null || true",
        "find /var/log/nginx/ -type f -name \"*.log\" -exec truncate -s 0 {} \\; 2>/dev/null || true",
        "find /var/log/apache2/ -type f -name \"*.log\" -exec truncate -s 0 {} \\; 2>/dev/null || true",
        "history -c",
    ]
    .into_iter()
    .map(ShellCommand::raw)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_create_user_plain() {
        assert_eq!(
            create_user("alice").as_str(),
            "useradd -m -s /bin/bash alice"
        );
    }

    #[test]
    fn test_set_password_quotes_both_values() {
        // `!` is escaped as '\!' (history expansion), so the password ends
        // up split across quoted segments but still reads back verbatim.
        let cmd = set_password("alice", "s3cret!pass");
        assert_eq!(
            cmd.as_str(),
            "printf '%s:%s\\n' alice 's3cret'\\!'pass' | chpasswd"
        );
    }

    #[test]
    fn test_set_expiration_iso_date() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert_eq!(set_expiration("bob", date).as_str(), "chage -E 2025-03-01 bob");
    }

    #[test]
    fn test_lock_unlock() {
        assert_eq!(lock_user("bob").as_str(), "usermod -L bob");
        assert_eq!(unlock_user("bob").as_str(), "usermod -U bob");
    }

    #[test]
    fn test_count_ssh_sessions_pattern() {
        assert_eq!(
            count_ssh_sessions("alice").as_str(),
            "ps aux | grep 'sshd.*alice' | grep -v grep | wc -l"
        );
    }

    #[test]
    fn test_hostile_username_stays_quoted() {
        let cmd = remove_user("x'; rm -rf / #");
        // The embedded quote must be rewritten so the value cannot close the
        // quoting and start a new command.
        assert!(!cmd.as_str().contains("userdel -r x';"));
        assert!(cmd.as_str().starts_with("userdel -r "));
    }

    #[test]
    fn test_clean_log_batch_is_fixed() {
        let batch = clean_log_batch();
        assert_eq!(batch.len(), 10);
        assert_eq!(batch[0].as_str(), "truncate -s 0 /var/log/auth.log");
        assert_eq!(batch[9].as_str(), "history -c");
    }

    /// Reverse the single-quote escaping performed by `q` so the round-trip
    /// property below can check that quoting is lossless. `q` escapes
    /// exactly two characters, `'` and `!`, each as `'\<c>'`.
    fn unquote(escaped: &str) -> String {
        let mut out = String::new();
        let mut rest = escaped;
        while !rest.is_empty() {
            if let Some(stripped) = rest.strip_prefix("'\\''") {
                out.push('\'');
                rest = stripped;
            } else if let Some(stripped) = rest.strip_prefix("'\\!'") {
                out.push('!');
                rest = stripped;
            } else if let Some(stripped) = rest.strip_prefix('\'') {
                rest = stripped;
            } else {
                let mut chars = rest.chars();
                out.push(chars.next().unwrap());
                rest = chars.as_str();
            }
        }
        out
    }

    proptest! {
        #[test]
        fn prop_quoting_round_trips(value in "\\PC{1,40}") {
            let escaped = q(&value).to_string();
            prop_assert_eq!(unquote(&escaped), value);
        }

        #[test]
        fn prop_password_line_single_pipe(user in "[a-z][a-z0-9_-]{0,15}", pass in "\\PC{1,30}") {
            let line = set_password(&user, &pass).as_str().to_string();
            // Exactly one pipe into chpasswd regardless of password content.
            prop_assert_eq!(line.matches("| chpasswd").count(), 1);
            prop_assert!(line.starts_with("printf "));
        }
    }
}
