//! In-memory host used by unit tests
//!
//! `SimulatedHost` understands the remote commands the reconcilers issue,
//! including the sudo wrapper, and applies them to a small model of accounts,
//! directories and files.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::ssh::{CommandChannel, CommandOutput};

const SUDO_WITH_SECRET: &str = "sudo -k -S -p '' sh -c ";
const SUDO_NON_INTERACTIVE: &str = "sudo -n ";
const SUDO_BARE: &str = "sudo sh -c ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimAccount {
    pub home: String,
    pub shell: String,
    pub uid: Option<u32>,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimFile {
    pub content: String,
    pub owner: String,
    pub mode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDir {
    pub owner: String,
    pub mode: u32,
}

#[derive(Debug, Default)]
struct RemoteState {
    accounts: BTreeMap<String, SimAccount>,
    dirs: BTreeMap<String, SimDir>,
    files: BTreeMap<String, SimFile>,
}

#[derive(Debug, Default)]
pub struct SimulatedHost {
    secret: Option<String>,
    state: Mutex<RemoteState>,
    sent: Mutex<Vec<(String, Option<Vec<u8>>)>>,
    scripts: Mutex<Vec<String>>,
    failing: Mutex<BTreeSet<String>>,
    failing_scripts: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl SimulatedHost {
    /// Host where the login user may sudo without a password
    pub fn new() -> Self {
        Self::default()
    }

    /// Host where sudo requires `secret`
    pub fn with_secret(secret: &str) -> Self {
        Self {
            secret: Some(secret.to_string()),
            ..Self::default()
        }
    }

    pub fn add_account(&self, name: &str, home: &str, shell: &str) {
        self.state.lock().unwrap().accounts.insert(
            name.to_string(),
            SimAccount {
                home: home.to_string(),
                shell: shell.to_string(),
                uid: None,
                groups: Vec::new(),
            },
        );
    }

    pub fn put_file(&self, path: &str, content: &str, owner: &str, mode: u32) {
        self.state.lock().unwrap().files.insert(
            path.to_string(),
            SimFile {
                content: content.to_string(),
                owner: owner.to_string(),
                mode,
            },
        );
    }

    /// Make every invocation of `program` exit 1 without side effects
    pub fn fail_program(&self, program: &str) {
        self.failing.lock().unwrap().insert(program.to_string());
    }

    /// Make every command containing `pattern` exit 1 without side effects
    pub fn fail_when(&self, pattern: &str) {
        self.failing_scripts.lock().unwrap().push(pattern.to_string());
    }

    pub fn account(&self, name: &str) -> Option<SimAccount> {
        self.state.lock().unwrap().accounts.get(name).cloned()
    }

    pub fn file(&self, path: &str) -> Option<SimFile> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn files(&self) -> Vec<(String, SimFile)> {
        self.state
            .lock()
            .unwrap()
            .files
            .iter()
            .map(|(path, file)| (path.clone(), file.clone()))
            .collect()
    }

    pub fn dir(&self, path: &str) -> Option<SimDir> {
        self.state.lock().unwrap().dirs.get(path).cloned()
    }

    /// Raw commands and stdin payloads as sent over the channel
    pub fn sent(&self) -> Vec<(String, Option<Vec<u8>>)> {
        self.sent.lock().unwrap().clone()
    }

    /// Commands with the sudo wrapper removed
    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    /// Unwrapped commands whose program is `program`
    pub fn invocations(&self, program: &str) -> Vec<String> {
        self.scripts()
            .into_iter()
            .filter(|s| split_words(s).first().map(String::as_str) == Some(program))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    /// Strip the sudo wrapper, handling stdin the way `sudo -S` would
    ///
    /// A host built with [`SimulatedHost::new`] never prompts, so a secret
    /// line sent to it stays on the command's stdin.
    fn unwrap_sudo(
        &self,
        command: &str,
        input: Option<&[u8]>,
    ) -> std::result::Result<(String, Vec<u8>), CommandOutput> {
        let input = input.unwrap_or_default().to_vec();

        if let Some(rest) = command.strip_prefix(SUDO_WITH_SECRET) {
            let script = single_word(rest);
            let Some(ref expected) = self.secret else {
                return Ok((script, input));
            };
            let text = String::from_utf8_lossy(&input).into_owned();
            let (line, payload) = text.split_once('\n').unwrap_or((text.as_str(), ""));
            if expected != line {
                return Err(failure(1, "sudo: incorrect password attempt"));
            }
            return Ok((script, payload.as_bytes().to_vec()));
        }

        if let Some(rest) = command.strip_prefix(SUDO_NON_INTERACTIVE) {
            if self.secret.is_some() {
                return Err(failure(1, "sudo: a password is required"));
            }
            return Ok((rest.to_string(), input));
        }

        if let Some(rest) = command.strip_prefix(SUDO_BARE) {
            if self.secret.is_some() {
                return Err(failure(1, "sudo: a password is required"));
            }
            return Ok((single_word(rest), input));
        }

        Ok((command.to_string(), input))
    }

    fn run(&self, script: &str, payload: &[u8]) -> CommandOutput {
        let words = split_words(script);
        let Some(program) = words.first() else {
            return failure(127, "empty command");
        };

        let scripted = self
            .failing_scripts
            .lock()
            .unwrap()
            .iter()
            .any(|p| script.contains(p.as_str()));
        if scripted || self.failing.lock().unwrap().contains(program) {
            return failure(1, &format!("{program}: simulated failure"));
        }

        let mut state = self.state.lock().unwrap();
        let args: Vec<&str> = words[1..].iter().map(String::as_str).collect();

        match (program.as_str(), args.as_slice()) {
            ("true", []) => ok(""),
            ("id", ["-nG", name]) => match state.accounts.get(*name) {
                Some(a) => {
                    let mut groups = vec![name.to_string()];
                    groups.extend(a.groups.iter().cloned());
                    ok(&format!("{}\n", groups.join(" ")))
                }
                None => failure(1, &format!("id: '{name}': no such user")),
            },
            ("id", ["-u", name]) => match state.accounts.get(*name) {
                Some(_) => ok("1000\n"),
                None => failure(1, &format!("id: '{name}': no such user")),
            },
            ("getent", ["passwd", name]) => match state.accounts.get(*name) {
                Some(a) => ok(&format!(
                    "{name}:x:{uid}:{uid}::{}:{}\n",
                    a.home,
                    a.shell,
                    uid = a.uid.unwrap_or(1000)
                )),
                None => failure(2, ""),
            },
            ("useradd", _) => {
                let opts = parse_opts(&args);
                let Some(name) = args.last() else {
                    return failure(2, "useradd: missing name");
                };
                if state.accounts.contains_key(*name) {
                    return failure(9, &format!("useradd: user '{name}' already exists"));
                }
                let home = opts.get("-d").cloned().unwrap_or_default();
                state.dirs.insert(
                    home.clone(),
                    SimDir {
                        owner: format!("{name}:"),
                        mode: 0o755,
                    },
                );
                state.accounts.insert(
                    name.to_string(),
                    SimAccount {
                        home,
                        shell: opts.get("-s").cloned().unwrap_or_default(),
                        uid: opts.get("-u").and_then(|u| u.parse().ok()),
                        groups: split_groups(opts.get("-G")),
                    },
                );
                ok("")
            }
            ("usermod", _) => {
                let opts = parse_opts(&args);
                let Some(name) = args.last() else {
                    return failure(2, "usermod: missing name");
                };
                let Some(account) = state.accounts.get_mut(*name) else {
                    return failure(6, &format!("usermod: user '{name}' does not exist"));
                };
                if let Some(home) = opts.get("-d") {
                    account.home = home.clone();
                }
                if let Some(shell) = opts.get("-s") {
                    account.shell = shell.clone();
                }
                for group in split_groups(opts.get("-G")) {
                    if !account.groups.contains(&group) {
                        account.groups.push(group);
                    }
                }
                ok("")
            }
            ("mkdir", ["-p", path]) => {
                state.dirs.entry(path.to_string()).or_insert(SimDir {
                    owner: "root:".to_string(),
                    mode: 0o755,
                });
                ok("")
            }
            ("chown", [owner, path]) => {
                if let Some(f) = state.files.get_mut(*path) {
                    f.owner = owner.to_string();
                } else if let Some(d) = state.dirs.get_mut(*path) {
                    d.owner = owner.to_string();
                } else {
                    return failure(1, "chown: No such file or directory");
                }
                ok("")
            }
            ("chmod", [mode, path]) => {
                let Ok(mode) = u32::from_str_radix(mode, 8) else {
                    return failure(1, "chmod: invalid mode");
                };
                if let Some(f) = state.files.get_mut(*path) {
                    f.mode = mode;
                } else if let Some(d) = state.dirs.get_mut(*path) {
                    d.mode = mode;
                } else {
                    return failure(1, "chmod: No such file or directory");
                }
                ok("")
            }
            ("cat", [path]) => match state.files.get(*path) {
                Some(f) => ok(&f.content.clone()),
                None => failure(1, "cat: No such file or directory"),
            },
            ("cat", [">", path]) => {
                let content = String::from_utf8_lossy(payload).into_owned();
                state
                    .files
                    .entry(path.to_string())
                    .and_modify(|f| f.content = content.clone())
                    .or_insert(SimFile {
                        content,
                        owner: "root:".to_string(),
                        mode: 0o644,
                    });
                ok("")
            }
            ("sh", ["-c", _, "sh", line, path]) => {
                // grep -qxF || append, as issued by the authorized_keys reconciler
                let file = state.files.entry(path.to_string()).or_insert(SimFile {
                    content: String::new(),
                    owner: "root:".to_string(),
                    mode: 0o644,
                });
                if file.content.lines().any(|l| l == *line) {
                    return ok("");
                }
                if !file.content.is_empty() && !file.content.ends_with('\n') {
                    file.content.push('\n');
                }
                file.content.push_str(line);
                file.content.push('\n');
                ok("appended\n")
            }
            ("visudo", ["-cf", path]) => {
                if state.files.contains_key(*path) {
                    ok(&format!("{path}: parsed OK\n"))
                } else {
                    failure(1, &format!("visudo: unable to open {path}"))
                }
            }
            ("mv", ["-f", from, to]) => match state.files.remove(*from) {
                Some(f) => {
                    state.files.insert(to.to_string(), f);
                    ok("")
                }
                None => failure(1, "mv: cannot stat"),
            },
            ("rm", ["-f", path]) => {
                state.files.remove(*path);
                ok("")
            }
            _ => failure(127, &format!("{program}: command not found")),
        }
    }
}

#[async_trait]
impl CommandChannel for SimulatedHost {
    async fn exec(&self, command: &str, input: Option<&[u8]>) -> Result<CommandOutput> {
        self.sent
            .lock()
            .unwrap()
            .push((command.to_string(), input.map(<[u8]>::to_vec)));

        let (script, payload) = match self.unwrap_sudo(command, input) {
            Ok(unwrapped) => unwrapped,
            Err(output) => return Ok(output),
        };
        self.scripts.lock().unwrap().push(script.clone());

        Ok(self.run(&script, &payload))
    }

    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

#[async_trait]
impl CommandChannel for Arc<SimulatedHost> {
    async fn exec(&self, command: &str, input: Option<&[u8]>) -> Result<CommandOutput> {
        self.as_ref().exec(command, input).await
    }

    async fn close(&self) {
        self.as_ref().close().await
    }
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        ..CommandOutput::with_status(0)
    }
}

fn failure(code: u32, stderr: &str) -> CommandOutput {
    CommandOutput {
        stderr: stderr.to_string(),
        ..CommandOutput::with_status(code)
    }
}

fn single_word(s: &str) -> String {
    split_words(s).into_iter().next().unwrap_or_default()
}

/// `-x value` pairs; flags without a value (`-m`, `-a`) are skipped
fn parse_opts(args: &[&str]) -> BTreeMap<String, String> {
    let mut opts = BTreeMap::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if matches!(*arg, "-d" | "-s" | "-u" | "-G") {
            if let Some(value) = iter.next() {
                opts.insert(arg.to_string(), value.to_string());
            }
        }
    }
    opts
}

fn split_groups(groups: Option<&String>) -> Vec<String> {
    groups
        .map(|g| g.split(',').map(str::to_string).collect())
        .unwrap_or_default()
}

/// Split POSIX shell words, honouring single and double quotes
pub fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == c {
                        break;
                    }
                    current.push(q);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::shell_quote;

    #[test]
    fn test_split_words_round_trips_quoting() {
        let nasty = "it's a \"key\" $(x)";
        let line = format!("cat {} {}", shell_quote(nasty), shell_quote("/p"));
        assert_eq!(split_words(&line), vec!["cat", nasty, "/p"]);
    }
}
