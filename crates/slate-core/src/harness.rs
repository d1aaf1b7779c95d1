//! Bootstrap program run by every execution unit
//!
//! The unit starts the interpreter with [`BOOTSTRAP`] as its `-c` program.
//! Once loaded it prints [`READY_MARKER`] and blocks on stdin for a job:
//! a decimal byte-length line followed by that many bytes of JSON
//! ([`Job`]). Everything after the job on stdin is the program's input.
//!
//! Trace records carry a per-job token so a program writing to the real
//! stdout cannot pass its own lines off as records.

use crate::config::ValueLimits;
use serde::Serialize;

/// First stdout line of every unit once the interpreter is warm
pub const READY_MARKER: &str = "__slate_ready__";

/// Leads every trace record on the unit's real stdout, before the job token
pub const RECORD_MARKER: &str = "__slate_record__";

/// Full record prefix for a job carrying `token`
#[must_use]
pub fn record_prefix(token: &str) -> String {
    format!("{RECORD_MARKER} {token} ")
}

/// Fresh job token
#[must_use]
pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Run,
    Trace,
}

/// Work order sent to a ready unit
#[derive(Debug, Clone, Serialize)]
pub struct Job<'a> {
    pub mode: Mode,
    /// Name of the file holding the code, relative to the unit's directory
    pub main: &'a str,
    pub seed: Option<i64>,
    pub max_steps: u64,
    /// Bytes of program stdout a trace may carry in total
    pub max_stdout: usize,
    /// Record token, see [`record_prefix`]
    pub token: &'a str,
    pub limits: ValueLimits,
}

impl Job<'_> {
    /// Length-prefixed frame as written to the unit's stdin
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let body = serde_json::to_vec(self)?;
        let mut frame = format!("{}\n", body.len()).into_bytes();
        frame.extend_from_slice(&body);
        Ok(frame)
    }
}

pub const BOOTSTRAP: &str = r#"
import builtins, io, json, math, os, random, sys, traceback, types

READY = "__slate_ready__"
RECORD = "__slate_record__"
REAL_STDOUT = sys.stdout


def exit_code_of(exc):
    code = exc.code
    if code is None:
        return 0
    if isinstance(code, int):
        return code
    sys.stderr.write(str(code) + "\n")
    return 1


def report(exc, main_path):
    tb = exc.__traceback__
    while tb is not None and tb.tb_frame.f_code.co_filename != main_path:
        tb = tb.tb_next
    sys.stderr.write("".join(traceback.format_exception(type(exc), exc, tb)))


def run(code, scope, main_path):
    try:
        exec(code, scope)
    except SystemExit as exc:
        return exit_code_of(exc)
    except BaseException as exc:
        report(exc, main_path)
        return 1
    return 0


class Encoder:
    SEQUENCES = {list: "list", tuple: "tuple", set: "set", frozenset: "frozenset"}

    def __init__(self, limits):
        self.max_depth = limits["max_depth"]
        self.max_items = limits["max_items"]
        self.max_string = limits["max_string"]
        self.active = set()

    def opaque(self, type_name, label):
        return {"type": "opaque", "type_name": type_name, "label": label[: self.max_string]}

    def value(self, v, depth=0):
        if v is None:
            return {"type": "none"}
        kind = type(v)
        if kind is bool:
            return {"type": "bool", "value": v}
        if kind is int:
            if -(2 ** 63) <= v < 2 ** 63:
                return {"type": "int", "value": v}
            return self.opaque("int", "<int of %d bits>" % v.bit_length())
        if kind is float:
            if math.isfinite(v):
                return {"type": "float", "value": v}
            return self.opaque("float", repr(v))
        if kind is str:
            return {"type": "str", "value": v[: self.max_string], "len": len(v)}
        if kind in self.SEQUENCES or kind is dict:
            name = self.SEQUENCES.get(kind, "dict")
            if depth >= self.max_depth:
                return self.opaque(name, "<%s of %d items>" % (name, len(v)))
            if id(v) in self.active:
                return self.opaque(name, "<cycle>")
            self.active.add(id(v))
            try:
                if kind is dict:
                    entries = []
                    for i, (k, item) in enumerate(v.items()):
                        if i >= self.max_items:
                            break
                        entries.append([self.value(k, depth + 1), self.value(item, depth + 1)])
                    return {"type": "mapping", "entries": entries, "len": len(v)}
                items = []
                for i, item in enumerate(v):
                    if i >= self.max_items:
                        break
                    items.append(self.value(item, depth + 1))
                return {"type": "sequence", "kind": name, "items": items, "len": len(v)}
            finally:
                self.active.discard(id(v))
        if isinstance(v, (types.FunctionType, types.BuiltinFunctionType, types.MethodType)):
            return self.opaque("function", "<function %s>" % getattr(v, "__qualname__", "?"))
        if isinstance(v, type):
            return self.opaque("class", "<class %s>" % v.__qualname__)
        if isinstance(v, types.ModuleType):
            return self.opaque("module", "<module %s>" % v.__name__)
        return self.opaque(kind.__name__, "<%s object>" % kind.__name__)

    def scope(self, names, skip_dunder):
        out = {}
        for name, v in list(names.items()):
            if skip_dunder and name.startswith("__"):
                continue
            out[name] = self.value(v)
        return out


def trace(code, scope, main_path, job):
    label = job["main"]
    max_steps = job["max_steps"]
    prefix = "%s %s " % (RECORD, job.pop("token"))
    encoder = Encoder(job["limits"])
    captured = io.TextIOWrapper(
        io.BytesIO(), encoding="utf-8", errors=REAL_STDOUT.errors, newline="\n", write_through=True
    )
    state = {"steps": 0, "halted": False, "stdout_left": job["max_stdout"], "stdout_cut": False}
    # Instruction offset last seen per frame, reset by every line event
    offsets = {}

    def emit(record):
        REAL_STDOUT.write(prefix + json.dumps(record) + "\n")
        REAL_STDOUT.flush()

    def drain():
        captured.flush()
        raw = captured.buffer
        data = raw.getvalue()
        raw.seek(0)
        raw.truncate(0)
        if len(data) > state["stdout_left"]:
            data = data[: state["stdout_left"]]
            state["stdout_cut"] = True
        state["stdout_left"] -= len(data)
        return data.decode("utf-8", "replace")

    def halt(frame):
        state["halted"] = True
        sys.settrace(None)
        while frame is not None:
            frame.f_trace = None
            frame = frame.f_back
        emit({"kind": "truncated"})

    def snapshot(frame, event, arg):
        stack = []
        f = frame
        while f is not None:
            if f.f_code.co_filename == main_path:
                stack.append({"function": f.f_code.co_name, "file": label, "line": f.f_lineno})
            f = f.f_back
        stack.reverse()
        module_level = frame.f_code.co_name == "<module>"
        local_vars = {} if module_level else encoder.scope(frame.f_locals, False)
        if event == "return":
            local_vars["__return__"] = encoder.value(arg)
        elif event == "exception":
            exc_type, exc_value = arg[0], arg[1]
            try:
                message = "%s: %s" % (exc_type.__name__, exc_value)
            except Exception:
                message = exc_type.__name__
            local_vars["__exception__"] = encoder.opaque(exc_type.__name__, message)
        stdout = drain()
        return {
            "kind": "step",
            "line": frame.f_lineno,
            "event": event,
            "locals": local_vars,
            "globals": encoder.scope(frame.f_globals, True),
            "stack": stack,
            "stdout": stdout,
            "stdout_truncated": state["stdout_cut"],
        }

    def tracer(frame, event, arg):
        if state["halted"] or frame.f_code.co_filename != main_path:
            return None
        if event == "call":
            frame.f_trace_opcodes = True
        elif event == "line":
            offsets[frame] = None
        elif event == "return":
            offsets.pop(frame, None)
        elif event == "opcode":
            # A jump back within one line raises no line event; count it as one.
            previous = offsets.get(frame)
            offsets[frame] = frame.f_lasti
            if previous is None or frame.f_lasti > previous:
                return tracer
            event = "line"
        if frame.f_code.co_name == "<module>" and event in ("call", "return"):
            return tracer
        if event not in ("line", "call", "return", "exception"):
            return tracer
        if state["steps"] >= max_steps:
            halt(frame)
            return None
        state["steps"] += 1
        emit(snapshot(frame, event, arg))
        return tracer

    sys.stdout = captured
    sys.settrace(tracer)
    try:
        status = run(code, scope, main_path)
    finally:
        sys.settrace(None)
        sys.stdout = REAL_STDOUT
        offsets.clear()
    rest = drain()
    if (rest or state["stdout_cut"]) and not state["halted"]:
        emit({"kind": "output", "text": rest, "stdout_truncated": state["stdout_cut"]})
    return status


def main():
    REAL_STDOUT.write(READY + "\n")
    REAL_STDOUT.flush()
    header = sys.stdin.buffer.readline()
    if not header.strip():
        return 0
    job = json.loads(sys.stdin.buffer.read(int(header.strip())).decode("utf-8"))
    main_path = os.path.abspath(job["main"])
    with open(main_path, encoding="utf-8") as fh:
        source = fh.read()
    if job.get("seed") is not None:
        random.seed(job["seed"])
    scope = {"__name__": "__main__", "__file__": main_path, "__builtins__": builtins}
    try:
        code = compile(source, main_path, "exec")
    except (SyntaxError, ValueError) as exc:
        report(exc, main_path)
        return 1
    if job["mode"] == "trace":
        return trace(code, scope, main_path, job)
    return run(code, scope, main_path)


status = main()
try:
    sys.stdout.flush()
    sys.stderr.flush()
finally:
    sys.exit(status)
"#;
