/// JavaScript Executor - Embedded Engine
///
/// **Core Responsibility:**
/// Evaluate a submission inside an in-process `boa_engine` context and call
/// its exported `solution` once per test.
///
/// **Threading:**
/// A boa `Context` is not `Send`, so each loaded submission lives on its own
/// OS thread and is driven over channels. The engine cannot be preempted:
/// when a call overruns its deadline the thread is abandoned, and the next
/// test reloads the code into a fresh context on a fresh thread.
/// A returned promise is settled by draining the job queue on that same
/// thread, inside the same deadline.
///
/// **Export lookup (first callable wins):**
/// `module.exports.default`, `module.exports`, `module.exports.solution`,
/// `exports.default`, `exports.solution`, a top-level `solution`.

use super::{
    encode_arguments, incidental_lines, parse_json_or_raw, ExecutionResult, Executor,
    PreparedSubmission,
};
use crate::config::LanguageConfig;
use crate::error::{AttemptError, SandboxError};
use crate::sandbox::check_source_size;
use async_trait::async_trait;
use boa_engine::{Context, Source};
use dojo_common::types::{Language, TestCase};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

const ENGINE_STACK_BYTES: usize = 16 * 1024 * 1024;

const ENGINE_STOPPED_MESSAGE: &str = "Script engine stopped unexpectedly";

pub(crate) const MISSING_EXPORT_MESSAGE: &str =
    "No callable 'solution' found: export a function via module.exports or define function solution";

/// Installed before the submission: CommonJS-style module object,
/// a capturing console and the call harness.
const PRELUDE: &str = r#"
var __dojo_logs = [];
var module = { exports: {} };
var exports = module.exports;
function __dojo_show(value) {
  if (typeof value === "string") return value;
  try {
    var text = JSON.stringify(value);
    return text === undefined ? String(value) : text;
  } catch (e) {
    return String(value);
  }
}
var console = (function () {
  function capture(level) {
    return function () {
      var parts = [];
      for (var i = 0; i < arguments.length; i++) parts.push(__dojo_show(arguments[i]));
      var prefix = level === "log" ? "" : "[" + level + "] ";
      __dojo_logs.push(prefix + parts.join(" "));
    };
  }
  return {
    log: capture("log"),
    info: capture("info"),
    warn: capture("warn"),
    error: capture("error"),
    debug: capture("debug")
  };
})();
var __dojo_solution = undefined;
var __dojo_settled = null;
function __dojo_failure(e) {
  return "!" + (e instanceof Error ? String(e) : "Uncaught " + __dojo_show(e));
}
function __dojo_encode(value) {
  try {
    var text = JSON.stringify(value);
    return "=" + (text === undefined ? "null" : text);
  } catch (e) {
    return __dojo_failure(e);
  }
}
function __dojo_invoke(args) {
  __dojo_settled = null;
  try {
    var value = __dojo_solution.apply(undefined, args);
    if (value !== null && (typeof value === "object" || typeof value === "function")
        && typeof value.then === "function") {
      Promise.resolve(value).then(
        function (v) { __dojo_settled = __dojo_encode(v); },
        function (e) { __dojo_settled = __dojo_failure(e); }
      );
      return "?";
    }
    return __dojo_encode(value);
  } catch (e) {
    return __dojo_failure(e);
  }
}
"#;

/// Read back once the job queue has drained after a '?' reply.
const SETTLED_RESULT: &str = "__dojo_settled === null ? \"?\" : __dojo_settled";

const UNSETTLED_PROMISE_MESSAGE: &str = "Returned promise did not settle once pending jobs ran";

const RESOLVE_EXPORT: &str = r#"
(function () {
  var m = module.exports;
  var e = exports;
  var candidates = [
    m != null ? m["default"] : undefined,
    m,
    m != null ? m.solution : undefined,
    e != null ? e["default"] : undefined,
    e != null ? e.solution : undefined,
    typeof solution !== "undefined" ? solution : undefined
  ];
  for (var i = 0; i < candidates.length; i++) {
    if (typeof candidates[i] === "function") {
      __dojo_solution = candidates[i];
      return true;
    }
  }
  return false;
})()
"#;

const DRAIN_CONSOLE: &str = "JSON.stringify(__dojo_logs.splice(0, __dojo_logs.length))";

pub struct JavascriptExecutor {
    load_timeout: Duration,
}

impl JavascriptExecutor {
    pub fn new(config: &LanguageConfig) -> Self {
        Self {
            load_timeout: Duration::from_millis(config.load_timeout_ms),
        }
    }
}

#[async_trait]
impl Executor for JavascriptExecutor {
    fn language(&self) -> Language {
        Language::Javascript
    }

    async fn prepare(
        &self,
        attempt_id: Uuid,
        code: &str,
    ) -> Result<Box<dyn PreparedSubmission>, AttemptError> {
        check_source_size(code)?;

        let (engine, console) = ScriptEngine::spawn(attempt_id, code, self.load_timeout).await?;
        debug!(attempt_id = %attempt_id, "Script loaded");

        Ok(Box::new(LoadedScript {
            attempt_id,
            code: code.to_string(),
            load_timeout: self.load_timeout,
            engine: Some(engine),
            pending_console: console,
        }))
    }
}

struct LoadedScript {
    attempt_id: Uuid,
    code: String,
    load_timeout: Duration,
    /// None after a timed-out call abandoned the engine thread
    engine: Option<ScriptEngine>,
    /// Top-level console output, reported with the first test
    pending_console: Vec<String>,
}

#[async_trait]
impl PreparedSubmission for LoadedScript {
    async fn execute(&mut self, test: &TestCase, timeout: Duration) -> ExecutionResult {
        let mut diagnostics = incidental_lines(
            "console",
            std::mem::take(&mut self.pending_console).iter().map(String::as_str),
        );

        let args = match encode_arguments(test) {
            Ok(args) => args,
            Err(message) => {
                return ExecutionResult::runtime_error(message, Duration::ZERO)
                    .with_diagnostics(diagnostics)
            }
        };

        let engine = match self.engine.take() {
            Some(engine) => engine,
            None => {
                let reloaded =
                    ScriptEngine::spawn(self.attempt_id, &self.code, self.load_timeout).await;
                match reloaded {
                    // Top-level output was already reported on the first load
                    Ok((engine, _)) => engine,
                    Err(e) => {
                        return ExecutionResult::runtime_error(
                            format!("Failed to reload script: {}", e),
                            Duration::ZERO,
                        )
                        .with_diagnostics(diagnostics)
                    }
                }
            }
        };

        let start = Instant::now();
        let reply = match engine.call(args) {
            Some(reply) => reply,
            None => {
                return ExecutionResult::runtime_error(ENGINE_STOPPED_MESSAGE, start.elapsed())
                    .with_diagnostics(diagnostics)
            }
        };

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(reply)) => {
                let elapsed = start.elapsed();
                self.engine = Some(engine);
                diagnostics.extend(incidental_lines(
                    "console",
                    reply.console.iter().map(String::as_str),
                ));
                let result = match reply.result {
                    Ok(text) => ExecutionResult::returned(parse_json_or_raw(&text), elapsed),
                    Err(message) => ExecutionResult::runtime_error(message, elapsed),
                };
                result.with_diagnostics(diagnostics)
            }
            // The engine thread died mid-call (engine panic)
            Ok(Err(_)) => ExecutionResult::runtime_error(ENGINE_STOPPED_MESSAGE, start.elapsed())
                .with_diagnostics(diagnostics),
            Err(_) => {
                warn!(
                    attempt_id = %self.attempt_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Script call overran its deadline, abandoning engine thread"
                );
                drop(engine);
                ExecutionResult::timed_out(start.elapsed()).with_diagnostics(diagnostics)
            }
        }
    }
}

enum LoadFailure {
    Script(String),
    MissingSolution,
}

struct Call {
    args_json: String,
    reply: oneshot::Sender<CallReply>,
}

struct CallReply {
    /// JSON text of the return value, or the thrown error
    result: Result<String, String>,
    console: Vec<String>,
}

/// Handle to a loaded submission on its engine thread.
/// Dropping it lets an idle thread exit.
struct ScriptEngine {
    calls: mpsc::Sender<Call>,
}

impl ScriptEngine {
    async fn spawn(
        attempt_id: Uuid,
        code: &str,
        load_timeout: Duration,
    ) -> Result<(Self, Vec<String>), AttemptError> {
        let (call_tx, call_rx) = mpsc::channel::<Call>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let code = code.to_string();

        std::thread::Builder::new()
            .name(format!("dojo-js-{}", attempt_id.simple()))
            .stack_size(ENGINE_STACK_BYTES)
            .spawn(move || engine_main(code, ready_tx, call_rx))
            .map_err(|source| SandboxError::Spawn {
                program: "javascript engine thread".to_string(),
                source,
            })?;

        match tokio::time::timeout(load_timeout, ready_rx).await {
            Ok(Ok(Ok(console))) => Ok((Self { calls: call_tx }, console)),
            Ok(Ok(Err(LoadFailure::Script(message)))) => Err(AttemptError::ScriptLoad(message)),
            Ok(Ok(Err(LoadFailure::MissingSolution))) => {
                Err(AttemptError::MalformedExport(MISSING_EXPORT_MESSAGE.to_string()))
            }
            Ok(Err(_)) => Err(AttemptError::ScriptLoad(
                "Script engine stopped during load".to_string(),
            )),
            Err(_) => {
                warn!(
                    attempt_id = %attempt_id,
                    load_timeout_ms = load_timeout.as_millis() as u64,
                    "Top-level script overran load budget, abandoning engine thread"
                );
                Err(AttemptError::ScriptLoad(format!(
                    "Top-level code did not finish within {}ms",
                    load_timeout.as_millis()
                )))
            }
        }
    }

    fn call(&self, args_json: String) -> Option<oneshot::Receiver<CallReply>> {
        let (reply, receiver) = oneshot::channel();
        self.calls.send(Call { args_json, reply }).ok()?;
        Some(receiver)
    }
}

fn engine_main(
    code: String,
    ready: oneshot::Sender<Result<Vec<String>, LoadFailure>>,
    calls: mpsc::Receiver<Call>,
) {
    let mut context = Context::default();
    let loaded = load(&mut context, &code);
    let loaded_ok = loaded.is_ok();
    if ready.send(loaded).is_err() || !loaded_ok {
        return;
    }

    while let Ok(call) = calls.recv() {
        let result = invoke(&mut context, &call.args_json);
        let console = drain_console(&mut context);
        let _ = call.reply.send(CallReply { result, console });
    }
}

fn load(context: &mut Context, code: &str) -> Result<Vec<String>, LoadFailure> {
    context
        .eval(Source::from_bytes(PRELUDE))
        .map_err(|e| LoadFailure::Script(format!("prelude: {}", e)))?;
    context
        .eval(Source::from_bytes(code))
        .map_err(|e| LoadFailure::Script(e.to_string()))?;
    let found = context
        .eval(Source::from_bytes(RESOLVE_EXPORT))
        .map_err(|e| LoadFailure::Script(e.to_string()))?;
    if found.as_boolean() != Some(true) {
        return Err(LoadFailure::MissingSolution);
    }
    Ok(drain_console(context))
}

fn invoke(context: &mut Context, args_json: &str) -> Result<String, String> {
    // Arguments go through JSON.parse, never spliced in as an object literal
    let literal = serde_json::to_string(args_json).map_err(|e| e.to_string())?;
    let script = format!("__dojo_invoke(JSON.parse({}))", literal);
    let mut reply = eval_harness(context, &script)?;
    if reply == "?" {
        // A thenable came back: run its reactions, then read how it settled
        context.run_jobs();
        reply = eval_harness(context, SETTLED_RESULT)?;
    }
    // '=' carries the JSON result, '!' the thrown error or rejection, '?' a pending promise
    if let Some(json) = reply.strip_prefix('=') {
        Ok(json.to_string())
    } else if let Some(message) = reply.strip_prefix('!') {
        Err(message.to_string())
    } else if reply == "?" {
        Err(UNSETTLED_PROMISE_MESSAGE.to_string())
    } else {
        Err(format!("Malformed call harness reply: {}", reply))
    }
}

fn eval_harness(context: &mut Context, script: &str) -> Result<String, String> {
    let value = context
        .eval(Source::from_bytes(script))
        .map_err(|e| e.to_string())?;
    value
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| "Call harness returned a non-string value".to_string())
}

fn drain_console(context: &mut Context) -> Vec<String> {
    match context.eval(Source::from_bytes(DRAIN_CONSOLE)) {
        Ok(value) => value
            .as_string()
            .and_then(|s| serde_json::from_str(&s.to_std_string_escaped()).ok())
            .unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageConfigManager;
    use crate::executor::ExecutionOutcome;
    use serde_json::json;

    fn executor() -> JavascriptExecutor {
        let config = LanguageConfigManager::builtin();
        JavascriptExecutor::new(config.get_config(&Language::Javascript).unwrap())
    }

    async fn prepare(code: &str) -> Box<dyn PreparedSubmission> {
        match executor().prepare(Uuid::new_v4(), code).await {
            Ok(prepared) => prepared,
            Err(e) => panic!("prepare failed: {}", e),
        }
    }

    async fn prepare_err(code: &str) -> AttemptError {
        match executor().prepare(Uuid::new_v4(), code).await {
            Ok(_) => panic!("prepare unexpectedly succeeded"),
            Err(e) => e,
        }
    }

    const TWO_SUM: &str = r#"
module.exports = function solution(...xs) {
  const target = xs.pop();
  const seen = new Map();
  for (let i = 0; i < xs.length; i++) {
    if (seen.has(target - xs[i])) return [seen.get(target - xs[i]), i];
    seen.set(xs[i], i);
  }
  return null;
};
"#;

    #[tokio::test]
    async fn test_two_sum_module_exports() {
        let mut prepared = prepare(TWO_SUM).await;
        let tc = TestCase::new(
            vec![json!(2), json!(7), json!(11), json!(15), json!(9)],
            json!([0, 1]),
        );
        let result = prepared.execute(&tc, Duration::from_secs(2)).await;
        assert_eq!(result.outcome, ExecutionOutcome::Returned(json!([0, 1])));
    }

    #[tokio::test]
    async fn test_export_lookup_variants() {
        let sources = [
            "module.exports.default = (a, b) => a + b;",
            "module.exports = { solution: (a, b) => a + b };",
            "exports.solution = function (a, b) { return a + b; };",
            "function solution(a, b) { return a + b; }",
        ];
        for source in sources {
            let mut prepared = prepare(source).await;
            let result = prepared
                .execute(&TestCase::new(vec![json!(2), json!(3)], json!(5)), Duration::from_secs(2))
                .await;
            assert_eq!(result.outcome, ExecutionOutcome::Returned(json!(5)), "{}", source);
        }
    }

    #[tokio::test]
    async fn test_missing_export_is_malformed() {
        let err = prepare_err("const answer = 42;").await;
        assert_eq!(err.kind(), "MALFORMED_EXPORT");
    }

    #[tokio::test]
    async fn test_syntax_error_is_script_load() {
        let err = prepare_err("function solution( {").await;
        assert_eq!(err.kind(), "SCRIPT_LOAD");
    }

    #[tokio::test]
    async fn test_top_level_loop_exceeds_load_budget() {
        let err = prepare_err("while (true) {}").await;
        match err {
            AttemptError::ScriptLoad(message) => assert!(message.contains("1000ms")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_throw_is_runtime_error() {
        let mut prepared = prepare("module.exports = () => { throw new Error('kaboom'); };").await;
        let result = prepared
            .execute(&TestCase::new(vec![], json!(1)), Duration::from_secs(2))
            .await;
        match result.outcome {
            ExecutionOutcome::RuntimeError(message) => assert_eq!(message, "Error: kaboom"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_async_solution_is_awaited() {
        let mut prepared =
            prepare("module.exports = async function (a, b) { return a + b; };").await;
        let result = prepared
            .execute(&TestCase::new(vec![json!(2), json!(3)], json!(5)), Duration::from_secs(2))
            .await;
        assert_eq!(result.outcome, ExecutionOutcome::Returned(json!(5)));

        let chained = prepare(
            "module.exports = (n) => Promise.resolve(n).then((x) => x * 2).then((x) => [x]);",
        )
        .await
        .execute(&TestCase::new(vec![json!(4)], json!([8])), Duration::from_secs(2))
        .await;
        assert_eq!(chained.outcome, ExecutionOutcome::Returned(json!([8])));
    }

    #[tokio::test]
    async fn test_async_throw_is_runtime_error() {
        let mut prepared =
            prepare("module.exports = async () => { throw new Error('async kaboom'); };").await;
        let result = prepared
            .execute(&TestCase::new(vec![], json!(1)), Duration::from_secs(2))
            .await;
        match result.outcome {
            ExecutionOutcome::RuntimeError(message) => assert_eq!(message, "Error: async kaboom"),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let rejected = prepare("module.exports = () => Promise.reject('nope');")
            .await
            .execute(&TestCase::new(vec![], json!(1)), Duration::from_secs(2))
            .await;
        assert_eq!(
            rejected.outcome,
            ExecutionOutcome::RuntimeError("Uncaught nope".to_string())
        );
    }

    #[tokio::test]
    async fn test_never_settling_promise_is_runtime_error() {
        let mut prepared = prepare("module.exports = () => new Promise(() => {});").await;
        let result = prepared
            .execute(&TestCase::new(vec![], json!(1)), Duration::from_secs(2))
            .await;
        assert_eq!(
            result.outcome,
            ExecutionOutcome::RuntimeError(UNSETTLED_PROMISE_MESSAGE.to_string())
        );

        // The engine stays usable for the next call
        let next = prepared
            .execute(&TestCase::new(vec![], json!(1)), Duration::from_secs(2))
            .await;
        assert!(matches!(next.outcome, ExecutionOutcome::RuntimeError(_)));
    }

    #[tokio::test]
    async fn test_async_spin_still_times_out() {
        let mut prepared = prepare(
            "module.exports = async (spin) => { await null; while (spin) {} return 1; };",
        )
        .await;
        let started = Instant::now();
        let spun = prepared
            .execute(&TestCase::new(vec![json!(true)], json!(1)), Duration::from_millis(500))
            .await;
        assert_eq!(spun.outcome, ExecutionOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(750));

        let next = prepared
            .execute(&TestCase::new(vec![json!(false)], json!(1)), Duration::from_secs(2))
            .await;
        assert_eq!(next.outcome, ExecutionOutcome::Returned(json!(1)));
    }

    #[tokio::test]
    async fn test_undefined_becomes_null_and_cycles_fail() {
        let mut prepared = prepare(
            "module.exports = (k) => { if (k === 'cycle') { const o = {}; o.self = o; return o; } };",
        )
        .await;
        let undefined = prepared
            .execute(&TestCase::new(vec![json!("none")], json!(null)), Duration::from_secs(2))
            .await;
        assert_eq!(undefined.outcome, ExecutionOutcome::Returned(json!(null)));

        let cyclic = prepared
            .execute(&TestCase::new(vec![json!("cycle")], json!(null)), Duration::from_secs(2))
            .await;
        assert!(matches!(cyclic.outcome, ExecutionOutcome::RuntimeError(_)));
    }

    #[tokio::test]
    async fn test_console_output_is_captured() {
        let mut prepared = prepare(
            "console.log('loading'); module.exports = (x) => { console.warn('saw', x, {k: 1}); return x; };",
        )
        .await;
        let result = prepared
            .execute(&TestCase::new(vec![json!(7)], json!(7)), Duration::from_secs(2))
            .await;
        assert_eq!(result.outcome, ExecutionOutcome::Returned(json!(7)));
        assert_eq!(
            result.diagnostics,
            vec!["console: loading", "console: [warn] saw 7 {\"k\":1}"]
        );

        let again = prepared
            .execute(&TestCase::new(vec![json!(8)], json!(8)), Duration::from_secs(2))
            .await;
        assert_eq!(again.diagnostics, vec!["console: [warn] saw 8 {\"k\":1}"]);
    }

    #[tokio::test]
    async fn test_timeout_then_next_test_runs_on_fresh_engine() {
        let mut prepared = prepare(
            "let calls = 0; module.exports = (spin) => { calls++; while (spin) {} return calls; };",
        )
        .await;

        let started = Instant::now();
        let spun = prepared
            .execute(&TestCase::new(vec![json!(true)], json!(null)), Duration::from_millis(500))
            .await;
        assert_eq!(spun.outcome, ExecutionOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(750));

        // Fresh context: module state starts over
        let next = prepared
            .execute(&TestCase::new(vec![json!(false)], json!(1)), Duration::from_secs(2))
            .await;
        assert_eq!(next.outcome, ExecutionOutcome::Returned(json!(1)));
    }

    #[tokio::test]
    async fn test_object_keys_survive_round_trip() {
        let mut prepared = prepare("module.exports = () => ({ b: 2, a: 1 });").await;
        let result = prepared
            .execute(&TestCase::new(vec![], json!({"a": 1, "b": 2})), Duration::from_secs(2))
            .await;
        match result.outcome {
            ExecutionOutcome::Returned(value) => {
                assert!(crate::evaluator::structurally_equal(&value, &json!({"a": 1, "b": 2})))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
