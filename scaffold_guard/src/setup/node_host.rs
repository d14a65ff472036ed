//! Hosts setup scripts in a separate interpreter process.
//!
//! The interpreter runs a host-owned bootstrap harness, never the script
//! directly. The harness hides process-level globals, imports the script,
//! builds a `tools` proxy whose every method is a protocol `call`, and invokes
//! the default export with `{ ctx, tools }`. The child's environment holds
//! only `PATH`, and its working directory is the project directory.
//!
//! Before the script is imported the harness registers a module resolve
//! hook. Every module resolution after that point must name the script itself
//! or an allow-listed specifier; anything else fails to load and the harness
//! reports a `blocked` message, which ends the run.

use async_trait::async_trait;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};

use super::environment::SetupEnvironment;
use super::host::{Answer, HostError, LoadedScript, ScriptExit, ScriptHost, answer};
use super::policy::SandboxConfig;
use super::protocol::{HostMessage, ScriptMessage, parse_script_line};
use super::tools::{SetupTools, namespaces};

/// Flags always passed to the interpreter, ahead of any configured ones.
const HARDENING_ARGS: &[&str] = &["--disallow-code-generation-from-strings"];

const HOOKS: &str = r#"let allowed = new Set();
let entry = '';
let port = null;

const bare = (specifier) => (specifier.startsWith('node:') ? specifier.slice(5) : specifier);

export function initialize(data) {
  allowed = new Set(data.allowed.map(bare));
  entry = data.entry;
  port = data.port;
}

export async function resolve(specifier, context, nextResolve) {
  if (specifier === entry || allowed.has(bare(specifier))) {
    return nextResolve(specifier, context);
  }
  port.postMessage({ specifier });
  throw new Error(`import of '${specifier}' is not allowed in setup scripts`);
}
"#;

const HARNESS: &str = r#"import * as nodeModule from 'node:module';
import { createInterface } from 'node:readline';
import { pathToFileURL } from 'node:url';
import { MessageChannel } from 'node:worker_threads';

const proc = process;
const stdin = proc.stdin;
const stdout = proc.stdout;
const stderr = proc.stderr;
const exit = (code) => proc.exit(code);

const send = (message) => stdout.write(JSON.stringify(message) + '\n');
const pending = new Map();
let nextId = 1;
let finished = false;
// Message of the error the resolve hook throws; it can reach the harness
// before the hook's port message does.
const REFUSED = /^import of '(.*)' is not allowed in setup scripts$/;

const toStderr = (...args) => stderr.write(args.map((a) => (typeof a === 'string' ? a : JSON.stringify(a))).join(' ') + '\n');
console.log = toStderr;
console.info = toStderr;
console.debug = toStderr;

function deepFreeze(value) {
  if (value && typeof value === 'object' && !Object.isFrozen(value)) {
    Object.freeze(value);
    for (const key of Object.keys(value)) deepFreeze(value[key]);
  }
  return value;
}

function buildTools(namespaces) {
  const tools = {};
  for (const [namespace, methods] of Object.entries(namespaces)) {
    const api = {};
    for (const method of methods) {
      api[method] = (...args) =>
        new Promise((resolve, reject) => {
          if (finished) {
            reject(new Error('setup script was stopped'));
            return;
          }
          const id = nextId++;
          pending.set(id, { resolve, reject });
          send({ type: 'call', id, namespace, method, args });
        });
    }
    tools[namespace] = Object.freeze(api);
  }
  return Object.freeze(tools);
}

function hideGlobals() {
  for (const name of ['process', 'fetch', 'WebSocket', 'XMLHttpRequest', 'EventSource']) {
    try {
      Object.defineProperty(globalThis, name, { value: undefined, configurable: false, writable: false });
    } catch {
      // Not every runtime defines every name.
    }
  }
}

function guardImports(init, entry) {
  if (typeof nodeModule.register !== 'function') {
    throw new Error('the interpreter cannot register module hooks; Node.js 20.6 or newer is required');
  }
  const { port1, port2 } = new MessageChannel();
  port1.on('message', (message) => finish({ type: 'blocked', specifier: String(message.specifier) }));
  port1.unref();
  nodeModule.register(pathToFileURL(init.hooks).href, {
    data: { allowed: init.allowedImports, entry, port: port2 },
    transferList: [port2],
  });
}

async function run(init) {
  const entry = pathToFileURL(init.script).href;
  guardImports(init, entry);
  const ctx = deepFreeze(init.ctx);
  const tools = buildTools(init.namespaces);
  hideGlobals();
  const mod = await import(entry);
  if (typeof mod.default !== 'function') {
    throw new Error('setup script has no default export function');
  }
  await mod.default({ ctx, tools });
}

function finish(message) {
  if (finished) return;
  finished = true;
  send(message);
  stdout.write('', () => exit(0));
}

let started = false;
const lines = createInterface({ input: stdin, crlfDelay: Infinity });
lines.on('line', (line) => {
  if (!line.trim()) return;
  let message;
  try {
    message = JSON.parse(line);
  } catch {
    return;
  }
  if (message.type === 'init' && !started) {
    started = true;
    run(message).then(
      () => finish({ type: 'done' }),
      (err) => {
        const text = String((err && err.message) || err);
        const refused = REFUSED.exec(text);
        if (refused) {
          finish({ type: 'blocked', specifier: refused[1] });
          return;
        }
        finish({ type: 'error', message: text, stack: err && err.stack ? String(err.stack) : null });
      },
    );
  } else if (message.type === 'result') {
    const waiter = pending.get(message.id);
    if (!waiter) return;
    pending.delete(message.id);
    if (message.ok) waiter.resolve(message.value);
    else waiter.reject(new Error(message.error));
  }
});
lines.on('close', () => {
  if (!started) exit(2);
});
"#;

async fn send_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

/// Bootstrap files for one run, removed when dropped.
struct Bootstrap {
    dir: tempfile::TempDir,
}

impl Bootstrap {
    fn write() -> Result<Self, HostError> {
        let dir = tempfile::Builder::new()
            .prefix("scaffold-guard-harness-")
            .tempdir()?;
        for (name, text) in [("harness.mjs", HARNESS), ("hooks.mjs", HOOKS)] {
            let mut file = std::fs::File::create(dir.path().join(name))?;
            file.write_all(text.as_bytes())?;
            file.flush()?;
        }
        Ok(Self { dir })
    }

    fn harness(&self) -> PathBuf {
        self.dir.path().join("harness.mjs")
    }

    fn hooks(&self) -> PathBuf {
        self.dir.path().join("hooks.mjs")
    }
}

/// Runs scripts under an external JavaScript interpreter (`node` by default).
#[derive(Debug, Clone)]
pub struct NodeScriptHost {
    interpreter: String,
    interpreter_args: Vec<String>,
    allowed_imports: Vec<String>,
}

impl NodeScriptHost {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            interpreter_args: config.interpreter_args.clone(),
            allowed_imports: config.allowed_imports.clone(),
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }
}

#[async_trait]
impl ScriptHost for NodeScriptHost {
    async fn execute(
        &self,
        script: &LoadedScript,
        env: &SetupEnvironment,
        tools: &SetupTools,
    ) -> Result<ScriptExit, HostError> {
        let bootstrap = Bootstrap::write()?;

        let mut command = Command::new(&self.interpreter);
        command
            .args(HARDENING_ARGS)
            .args(&self.interpreter_args)
            .arg(bootstrap.harness())
            .env_clear();
        // Needed to locate a bare interpreter name.
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        let mut child = command
            .current_dir(tools.root())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HostError::Spawn {
                program: self.interpreter.clone(),
                source,
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Failed to get stdin")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Failed to get stdout")
        })?;

        // Forward the script's console output for diagnostics.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            tracing::info!(target: "setup_script", "{}", line.trim_end());
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(target: "setup_script", "error reading script stderr: {}", e);
                            break;
                        }
                    }
                }
            });
        }

        let ctx = env.to_value();
        let init = HostMessage::Init {
            script: script.path().to_string_lossy().into_owned(),
            hooks: bootstrap.hooks().to_string_lossy().into_owned(),
            allowed_imports: &self.allowed_imports,
            ctx: &ctx,
            namespaces: namespaces(),
        }
        .to_line()
        .map_err(|e| HostError::Protocol(e.to_string()))?;
        send_line(&mut stdin, &init).await?;

        let mut lines = BufReader::new(stdout).lines();
        let exit = loop {
            let Some(line) = lines.next_line().await? else {
                let status = child.wait().await?;
                break ScriptExit::Threw {
                    message: format!("setup script host exited without finishing ({status})"),
                    stack: None,
                };
            };
            match parse_script_line(&line) {
                Some(ScriptMessage::Call(call)) => match answer(tools, &call).await? {
                    Answer::Reply(reply) => {
                        // A call the script never awaited can outlive it; the
                        // next line is then `done` or EOF.
                        if let Err(e) = send_line(&mut stdin, &reply).await {
                            tracing::debug!("Dropped reply to {}: {}", call.name(), e);
                        }
                    }
                    Answer::Stop(reply, violation) => {
                        // Best effort: the child is killed right after.
                        let _ = stdin.write_all(reply.as_bytes()).await;
                        tracing::warn!(
                            "Stopping setup script '{}' after boundary violation: {}",
                            script.path().display(),
                            violation
                        );
                        let _ = child.kill().await;
                        break ScriptExit::Stopped(violation);
                    }
                },
                Some(ScriptMessage::Blocked { specifier }) => {
                    tracing::warn!(
                        "Stopping setup script '{}' after it tried to load '{}'",
                        script.path().display(),
                        specifier
                    );
                    let _ = child.kill().await;
                    break ScriptExit::Blocked(specifier);
                }
                Some(ScriptMessage::Done) => break ScriptExit::Completed,
                Some(ScriptMessage::Error { message, stack }) => {
                    break ScriptExit::Threw { message, stack };
                }
                None => tracing::info!(target: "setup_script", "{}", line.trim_end()),
            }
        };

        drop(stdin);
        if !matches!(exit, ScriptExit::Stopped(_) | ScriptExit::Blocked(_)) {
            // The harness exits on its own after done/error.
            let _ = child.wait().await;
        }
        Ok(exit)
    }
}
