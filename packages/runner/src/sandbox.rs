// ABOUTME: In-process script sandbox on an embedded QuickJS interpreter
// ABOUTME: Restricted console and env globals, heap ceiling, deadline and cancellation via interrupts

use crate::relay::EventEmitter;
use rquickjs::{CatchResultExt, Context, Function, Object, Runtime};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MAX_STACK_BYTES: usize = 1024 * 1024;

/// Extra time given to the interpreter thread after the deadline before the
/// caller stops waiting for it.
const HARD_KILL_GRACE: Duration = Duration::from_millis(500);

/// Installs `console` and `process.env`, then removes the raw native hooks
/// and `eval` from the global scope.
const PRELUDE: &str = r#"
(() => {
  const emit = globalThis.__runbox_emit;
  const env = Object.freeze(Object.assign({}, globalThis.__runbox_env));
  const format = (args) => args.map((arg) => {
    if (typeof arg === "string") return arg;
    try {
      const encoded = JSON.stringify(arg);
      return encoded === undefined ? String(arg) : encoded;
    } catch (_) {
      return String(arg);
    }
  }).join(" ");
  const console = Object.freeze({
    log: (...args) => emit("stdout", format(args)),
    info: (...args) => emit("stdout", format(args)),
    warn: (...args) => emit("stderr", format(args)),
    error: (...args) => emit("stderr", format(args)),
  });
  Object.defineProperty(globalThis, "console", { value: console, writable: false, configurable: false });
  Object.defineProperty(globalThis, "process", {
    value: Object.freeze({ env }),
    writable: false,
    configurable: false,
  });
  delete globalThis.__runbox_emit;
  delete globalThis.__runbox_env;
  delete globalThis.eval;
})();
"#;

/// Evaluates to `(code, settle) => void`.
///
/// User code is compiled as the body of an async function created from the
/// captured `AsyncFunction` constructor, so it runs in global scope and cannot
/// see `settle` or break out of the body syntactically. `then` is captured
/// before user code runs so an overridden `Promise.prototype.then` cannot
/// intercept the outcome.
const LAUNCHER: &str = r#"
(() => {
  const AsyncFunction = Object.getPrototypeOf(async function () {}).constructor;
  const then = Promise.prototype.then;
  const describe = (e) => {
    if (e instanceof Error) {
      const head = e.name + ": " + e.message;
      return e.stack ? head + "\n" + e.stack : head;
    }
    if (typeof e === "string") return e;
    try { return JSON.stringify(e); } catch (_) { return String(e); }
  };
  return (code, settle) => {
    let promise;
    try {
      promise = AsyncFunction(code)();
    } catch (e) {
      settle(false, describe(e));
      return;
    }
    then.call(promise, () => settle(true, ""), (e) => settle(false, describe(e)));
  };
})()
"#;

#[derive(Debug, Clone)]
pub struct SandboxOptions {
    pub timeout: Duration,
    pub memory_limit_mb: u64,
    /// Read-only `process.env` contents.
    pub env: BTreeMap<String, String>,
}

/// How a sandboxed script ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptTermination {
    Completed,
    /// Uncaught exception, rejected promise, or heap exhaustion.
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxOutcome {
    pub success: bool,
    /// Everything captured before the script ended, including partial output.
    pub stdout: String,
    pub error: Option<String>,
    pub termination: ScriptTermination,
}

/// Runs script content without a container.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    node_env: String,
}

impl SandboxExecutor {
    pub fn new(node_env: impl Into<String>) -> Self {
        Self {
            node_env: node_env.into(),
        }
    }

    /// Options with the executor's environment snapshot filled in.
    pub fn options(&self, timeout: Duration, memory_limit_mb: u64) -> SandboxOptions {
        let mut env = BTreeMap::new();
        env.insert("NODE_ENV".to_string(), self.node_env.clone());
        SandboxOptions {
            timeout,
            memory_limit_mb,
            env,
        }
    }

    /// Execute `code` on a blocking thread.
    ///
    /// Every `console` call is published through `emitter` as it happens. The
    /// script is interrupted when `timeout` elapses (reported as `TimedOut`)
    /// or when `cancel` fires (reported as `Cancelled`).
    pub async fn execute(
        &self,
        code: String,
        options: SandboxOptions,
        emitter: EventEmitter,
        cancel: CancellationToken,
    ) -> SandboxOutcome {
        let timeout = options.timeout;
        let thread_emitter = emitter.clone();
        let thread_cancel = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || {
            run_script(&code, &options, thread_emitter, &thread_cancel)
        });

        let raw = tokio::select! {
            joined = handle => match joined {
                Ok(raw) => raw,
                Err(e) => RawOutcome::Failed(format!("interpreter thread failed: {}", e)),
            },
            _ = tokio::time::sleep(timeout + HARD_KILL_GRACE) => {
                warn!(
                    "Interpreter for execution {} ignored its deadline, abandoning it",
                    emitter.execution_id()
                );
                cancel.cancel();
                RawOutcome::TimedOut
            }
        };

        let stdout = emitter.buffer();
        match raw {
            RawOutcome::Completed => SandboxOutcome {
                success: true,
                stdout,
                error: None,
                termination: ScriptTermination::Completed,
            },
            RawOutcome::Failed(message) => SandboxOutcome {
                success: false,
                stdout,
                error: Some(message),
                termination: ScriptTermination::Failed,
            },
            RawOutcome::TimedOut => SandboxOutcome {
                success: false,
                stdout,
                error: Some(format!(
                    "Script exceeded the {}ms time limit",
                    timeout.as_millis()
                )),
                termination: ScriptTermination::TimedOut,
            },
            RawOutcome::Cancelled => SandboxOutcome {
                success: false,
                stdout,
                error: Some("Script was stopped".to_string()),
                termination: ScriptTermination::Cancelled,
            },
        }
    }
}

enum RawOutcome {
    Completed,
    Failed(String),
    TimedOut,
    Cancelled,
}

type Settled = Arc<Mutex<Option<Result<(), String>>>>;

fn run_script(
    code: &str,
    options: &SandboxOptions,
    emitter: EventEmitter,
    cancel: &CancellationToken,
) -> RawOutcome {
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => return RawOutcome::Failed(format!("failed to create interpreter: {}", e)),
    };
    let memory_bytes = options.memory_limit_mb.saturating_mul(1024 * 1024);
    runtime.set_memory_limit(usize::try_from(memory_bytes).unwrap_or(usize::MAX));
    runtime.set_max_stack_size(MAX_STACK_BYTES);

    let deadline = Instant::now() + options.timeout;
    let timed_out = Arc::new(AtomicBool::new(false));
    {
        let timed_out = Arc::clone(&timed_out);
        let cancel = cancel.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || {
            if cancel.is_cancelled() {
                return true;
            }
            if Instant::now() >= deadline {
                timed_out.store(true, Ordering::SeqCst);
                return true;
            }
            false
        })));
    }

    let context = match Context::full(&runtime) {
        Ok(context) => context,
        Err(e) => return RawOutcome::Failed(format!("failed to create context: {}", e)),
    };

    let interrupted = || {
        if timed_out.load(Ordering::SeqCst) {
            Some(RawOutcome::TimedOut)
        } else if cancel.is_cancelled() {
            Some(RawOutcome::Cancelled)
        } else {
            None
        }
    };

    let settled: Settled = Arc::new(Mutex::new(None));
    let started = context.with(|ctx| -> Result<(), String> {
        install_globals(&ctx, emitter, &options.env)
            .catch(&ctx)
            .map_err(|e| e.to_string())?;
        let launch: Function = ctx.eval(LAUNCHER).catch(&ctx).map_err(|e| e.to_string())?;
        let settle = settle_function(&ctx, Arc::clone(&settled))
            .catch(&ctx)
            .map_err(|e| e.to_string())?;
        launch
            .call::<_, ()>((code, settle))
            .catch(&ctx)
            .map_err(|e| e.to_string())
    });

    if let Err(message) = started {
        return interrupted().unwrap_or(RawOutcome::Failed(message));
    }

    // Drive promise jobs until the async wrapper settles or nothing is left.
    loop {
        match runtime.execute_pending_job() {
            Ok(true) => {}
            Ok(false) => break,
            Err(_) => {
                if interrupted().is_some() {
                    break;
                }
            }
        }
    }

    if let Some(outcome) = interrupted() {
        return outcome;
    }

    let result = settled.lock().unwrap_or_else(|p| p.into_inner()).take();
    match result {
        Some(Ok(())) => RawOutcome::Completed,
        Some(Err(message)) => RawOutcome::Failed(message),
        None => {
            debug!("Script finished with an unresolved promise");
            RawOutcome::Failed("Script awaited a promise that never settled".to_string())
        }
    }
}

fn install_globals<'js>(
    ctx: &rquickjs::Ctx<'js>,
    emitter: EventEmitter,
    env: &BTreeMap<String, String>,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let emit = Function::new(ctx.clone(), move |stream: String, text: String| {
        if stream == "stderr" {
            emitter.stderr(text);
        } else {
            emitter.stdout(text);
        }
    })?;
    globals.set("__runbox_emit", emit)?;

    let env_object = Object::new(ctx.clone())?;
    for (key, value) in env {
        env_object.set(key.as_str(), value.as_str())?;
    }
    globals.set("__runbox_env", env_object)?;

    ctx.eval::<(), _>(PRELUDE)
}

/// Records the first settlement reported by the launcher. Never stored on a
/// global, so user code has no way to reach it.
fn settle_function<'js>(
    ctx: &rquickjs::Ctx<'js>,
    settled: Settled,
) -> rquickjs::Result<Function<'js>> {
    Function::new(ctx.clone(), move |ok: bool, message: String| {
        let mut slot = settled.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(if ok { Ok(()) } else { Err(message) });
        }
    })
}
