/// Test harness injection
///
/// The candidate program never touches a shell. The sandbox command is a
/// fixed interpreter argv ending in `RUNNER_SCRIPT`; the candidate source,
/// stdin text and test expression travel as base64 environment variables and
/// are decoded inside the container by the bootstrap below.
///
/// When a test case carries an expression, the bootstrap evaluates it in the
/// candidate's module scope and prints `<marker><json>` on its own line. The
/// marker is random per run, so ordinary program output cannot be mistaken
/// for the reported value.

use crate::engine::SandboxJob;
use base64::{engine::general_purpose, Engine as _};

pub const ENV_SOURCE: &str = "GRADEBOX_SOURCE";
pub const ENV_STDIN: &str = "GRADEBOX_STDIN";
pub const ENV_EXPRESSION: &str = "GRADEBOX_EXPRESSION";
pub const ENV_MARKER: &str = "GRADEBOX_MARKER";

/// Python bootstrap executed via `python3 -c`.
/// Payload variables are popped from the environment before candidate code runs,
/// and tracebacks are trimmed to frames that belong to the submission.
///
/// Everything the harness needs after candidate code has run (the marker, the
/// JSON encoder, a duplicate of the real stdout fd) is a local of `_main`
/// bound before `exec`, and the module namespace is emptied, so neither
/// `import __main__` nor patching `json` or `sys.stdout` reaches them.
/// Non-finite floats are reported as their `repr` string, never as invalid JSON.
pub const RUNNER_SCRIPT: &str = r#"def _main():
    import base64, io, json, os, sys, traceback

    def payload(name):
        raw = os.environ.pop(name, None)
        if raw is None:
            return None
        return base64.b64decode(raw).decode("utf-8")

    source = payload("GRADEBOX_SOURCE") or ""
    stdin = payload("GRADEBOX_STDIN") or ""
    expression = payload("GRADEBOX_EXPRESSION")
    marker = os.environ.pop("GRADEBOX_MARKER", "")
    dumps = json.dumps
    result = os.fdopen(os.dup(1), "w", encoding="utf-8")
    print_exception = traceback.print_exception
    stderr = sys.stderr
    sys.stdin = io.StringIO(stdin)

    def encode(value):
        try:
            return dumps(value, default=repr, allow_nan=False)
        except ValueError:
            return dumps(repr(value))

    def report(exc):
        tb = exc.__traceback__
        while tb is not None and tb.tb_frame.f_code.co_filename not in ("<submission>", "<test>"):
            tb = tb.tb_next
        print_exception(type(exc), exc, tb, file=stderr)
        stderr.flush()

    scope = {"__name__": "__main__", "__builtins__": __builtins__}
    sys.modules["__main__"].__dict__.clear()
    try:
        exec(compile(source, "<submission>", "exec"), scope)
        if expression is not None:
            value = eval(compile(expression, "<test>", "eval"), scope)
            line = encode(value)
            sys.stdout.flush()
            result.write("\n" + marker + line + "\n")
            result.flush()
    except SystemExit:
        raise
    except BaseException as exc:
        report(exc)
        sys.exit(1)

_main()
"#;

/// Fresh per-run marker
pub fn new_marker() -> String {
    format!("__gradebox_result_{}__:", uuid::Uuid::new_v4().simple())
}

/// Environment for one sandboxed run. Values are base64 so arbitrary text
/// (newlines, quotes, NUL-free unicode) survives the container boundary intact.
pub fn harness_env(job: &SandboxJob) -> Vec<String> {
    let mut env = vec![
        format!("{}={}", ENV_SOURCE, general_purpose::STANDARD.encode(&job.source)),
        format!("{}={}", ENV_MARKER, job.marker),
    ];
    if let Some(stdin) = &job.stdin {
        env.push(format!("{}={}", ENV_STDIN, general_purpose::STANDARD.encode(stdin)));
    }
    if let Some(expression) = &job.expression {
        env.push(format!(
            "{}={}",
            ENV_EXPRESSION,
            general_purpose::STANDARD.encode(expression)
        ));
    }
    env
}

/// What the bootstrap reported on stdout for one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reported<'a> {
    /// No marker line: the program ended before the expression was evaluated
    Nothing,
    /// Exactly one marker line, with its raw JSON value
    Value(&'a str),
    /// More than one marker line: the result channel was tampered with
    Ambiguous,
}

/// Split captured stdout into the program's own output and the value reported
/// by the bootstrap. The harness writes exactly one marker line, so any other
/// count is rejected rather than guessed at.
pub fn split_result<'a>(stdout: &'a str, marker: &str) -> (&'a str, Reported<'a>) {
    if marker.is_empty() {
        return (stdout, Reported::Nothing);
    }
    let needle = format!("\n{}", marker);
    let mut found = stdout.match_indices(&needle);
    let Some((idx, _)) = found.next() else {
        return (stdout, Reported::Nothing);
    };
    if found.next().is_some() {
        return (&stdout[..idx], Reported::Ambiguous);
    }

    let rest = &stdout[idx + needle.len()..];
    let value = rest.lines().next().unwrap_or("").trim();
    (&stdout[..idx], Reported::Value(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Limits;
    use gradebox_common::types::Language;

    fn job(source: &str, stdin: Option<&str>, expression: Option<&str>) -> SandboxJob {
        SandboxJob {
            language: Language::Python,
            source: source.to_string(),
            stdin: stdin.map(String::from),
            expression: expression.map(String::from),
            marker: "__m__:".to_string(),
            limits: Limits::default(),
        }
    }

    fn decode(env: &[String], key: &str) -> Option<String> {
        env.iter()
            .find_map(|kv| kv.strip_prefix(&format!("{}=", key)))
            .map(|v| String::from_utf8(general_purpose::STANDARD.decode(v).unwrap()).unwrap())
    }

    #[test]
    fn test_env_carries_code_as_data() {
        let source = "print('$(rm -rf /)'); x = \"`id`\"";
        let env = harness_env(&job(source, None, None));

        // Raw source never appears verbatim
        assert!(env.iter().all(|kv| !kv.contains("rm -rf")));
        assert_eq!(decode(&env, ENV_SOURCE).as_deref(), Some(source));
        assert!(decode(&env, ENV_STDIN).is_none());
        assert!(decode(&env, ENV_EXPRESSION).is_none());
    }

    #[test]
    fn test_env_includes_stdin_and_expression() {
        let env = harness_env(&job("def add(a, b): return a + b", Some("3\n5\n"), Some("add(3, 5)")));
        assert_eq!(decode(&env, ENV_STDIN).as_deref(), Some("3\n5\n"));
        assert_eq!(decode(&env, ENV_EXPRESSION).as_deref(), Some("add(3, 5)"));
        assert!(env.contains(&format!("{}=__m__:", ENV_MARKER)));
    }

    #[test]
    fn test_markers_are_unique() {
        let a = new_marker();
        let b = new_marker();
        assert_ne!(a, b);
        assert!(a.starts_with("__gradebox_result_"));
    }

    #[test]
    fn test_split_result_extracts_value() {
        let stdout = "working...\n\n__m__:[1, 2, 3]\n";
        let (output, value) = split_result(stdout, "__m__:");
        assert_eq!(output, "working...\n");
        assert_eq!(value, Reported::Value("[1, 2, 3]"));
    }

    #[test]
    fn test_split_result_rejects_second_marker() {
        // A submission that learned the marker and printed its own line,
        // before or after the real one
        let stdout = "\n__m__:0\nmore\n\n__m__:8\n";
        let (output, value) = split_result(stdout, "__m__:");
        assert_eq!(value, Reported::Ambiguous);
        assert_eq!(output, "");
    }

    #[test]
    fn test_split_result_without_marker() {
        let (output, value) = split_result("hello\n", "__m__:");
        assert_eq!(output, "hello\n");
        assert_eq!(value, Reported::Nothing);
    }

    #[test]
    fn test_runner_pops_payload_env() {
        for key in [ENV_SOURCE, ENV_STDIN, ENV_EXPRESSION, ENV_MARKER] {
            assert!(RUNNER_SCRIPT.contains(key), "bootstrap must read {}", key);
        }
        assert!(RUNNER_SCRIPT.contains("os.environ.pop"));
    }

    #[test]
    fn test_runner_keeps_result_channel_private() {
        // No module-level bindings survive into the candidate's reach
        for line in RUNNER_SCRIPT.lines() {
            let top_level = !line.starts_with(' ') && line.contains(" = ");
            assert!(!top_level, "module-level binding in bootstrap: {}", line);
        }
        assert!(RUNNER_SCRIPT.contains("__dict__.clear()"));
        assert!(RUNNER_SCRIPT.contains("dumps = json.dumps"));
        assert!(RUNNER_SCRIPT.contains("os.fdopen(os.dup(1)"));
    }

    #[test]
    fn test_runner_never_emits_non_finite_json() {
        assert!(RUNNER_SCRIPT.contains("allow_nan=False"));
        assert!(RUNNER_SCRIPT.contains("dumps(repr(value))"));
    }
}
