//! Constrained execution of LLM-generated analysis code.
//!
//! Strategy: shell out to a `python3` subprocess running a generated
//! harness. The harness preseeds the allowed modules (`pd`, `np`, `plt`,
//! `sns`, plus whitelisted stdlib), installs an import hook that rejects
//! anything off the whitelist, executes the cell under restricted
//! builtins with stdout/stderr captured, and — when the current figure
//! has axes — renders it to PNG at 150 DPI and returns it base64-encoded
//! on a marker line. The Rust side screens the code against the
//! forbidden-pattern list before the interpreter ever sees it and bounds
//! the run with a wall-clock timeout.

pub mod clean;
pub mod screen;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

pub use clean::clean_code;
pub use screen::{is_code_safe, ALLOWED_MODULES};

/// Error message for code rejected by the static screen.
pub const FORBIDDEN_ERROR: &str = "Code contains forbidden operations";

/// Marker prefixing the harness result line.
const RESULT_MARKER: &str = "__SANDBOX_RESULT__ ";

/// Default wall-clock limit per execution.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one sandbox run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    /// Whether the cell ran to completion.
    pub success: bool,

    /// Captured stdout.
    pub output: String,

    /// Error message on failure (or captured stderr on success).
    pub error: Option<String>,

    /// Base64-encoded PNG when the cell produced a figure.
    pub image_base64: Option<String>,
}

impl ExecutionOutcome {
    /// Failure outcome with the given error.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Whether the code was rejected by the safety screen. Forbidden
    /// code is never retried.
    pub fn is_forbidden(&self) -> bool {
        self.error.as_deref() == Some(FORBIDDEN_ERROR)
    }
}

/// Executes analysis code. The trait is the seam the analyst depends
/// on; tests substitute a stub.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Clean, screen, and execute one code cell.
    async fn execute(&self, code: &str) -> ExecutionOutcome;
}

/// Python-subprocess sandbox.
pub struct PythonSandbox {
    python_bin: String,
    timeout: Duration,
}

impl PythonSandbox {
    /// Sandbox using `python3` from PATH and the default timeout.
    pub fn new() -> Self {
        Self {
            python_bin: "python3".to_string(),
            timeout: EXECUTION_TIMEOUT,
        }
    }

    /// Override the interpreter binary.
    pub fn with_python(mut self, python_bin: impl Into<String>) -> Self {
        self.python_bin = python_bin.into();
        self
    }

    /// Override the wall-clock limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_cell(&self, code: &str) -> ExecutionOutcome {
        let workdir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => return ExecutionOutcome::failure(format!("sandbox workdir: {}", e)),
        };

        let cell_path = workdir.path().join("cell.py");
        let harness_path = workdir.path().join("harness.py");
        if let Err(e) = std::fs::write(&cell_path, code) {
            return ExecutionOutcome::failure(format!("sandbox write: {}", e));
        }
        if let Err(e) = std::fs::write(&harness_path, HARNESS) {
            return ExecutionOutcome::failure(format!("sandbox write: {}", e));
        }

        let child = Command::new(&self.python_bin)
            .arg(&harness_path)
            .arg(&cell_path)
            .current_dir(workdir.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => return ExecutionOutcome::failure(format!("failed to launch {}: {}", self.python_bin, e)),
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ExecutionOutcome::failure(format!("sandbox wait: {}", e)),
            Err(_) => {
                warn!(timeout = ?self.timeout, "sandbox execution timed out");
                return ExecutionOutcome::failure(format!(
                    "execution timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().rev() {
            if let Some(rest) = line.strip_prefix(RESULT_MARKER) {
                return match serde_json::from_str::<HarnessResult>(rest) {
                    Ok(result) => ExecutionOutcome {
                        success: result.success,
                        output: result.output,
                        error: result.error,
                        image_base64: result.image_base64.filter(|image| {
                            let valid = base64::engine::general_purpose::STANDARD
                                .decode(image)
                                .is_ok();
                            if !valid {
                                warn!("harness returned undecodable chart payload, dropping it");
                            }
                            valid
                        }),
                    },
                    Err(e) => ExecutionOutcome::failure(format!("sandbox result parse: {}", e)),
                };
            }
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        ExecutionOutcome::failure(format!(
            "harness produced no result (stderr: {})",
            stderr.chars().take(500).collect::<String>()
        ))
    }
}

impl Default for PythonSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodeRunner for PythonSandbox {
    async fn execute(&self, code: &str) -> ExecutionOutcome {
        // Screen before any rewriting so a forbidden import cannot hide
        // behind the cleaning pass.
        if !is_code_safe(code) {
            warn!("generated code rejected by safety screen");
            return ExecutionOutcome::failure(FORBIDDEN_ERROR);
        }

        let cleaned = clean_code(code);
        if cleaned.is_empty() {
            return ExecutionOutcome::failure("no executable code after cleaning");
        }
        if !is_code_safe(&cleaned) {
            warn!("cleaned code rejected by safety screen");
            return ExecutionOutcome::failure(FORBIDDEN_ERROR);
        }

        info!(lines = cleaned.lines().count(), "executing analysis code");
        self.run_cell(&cleaned).await
    }
}

#[derive(Deserialize)]
struct HarnessResult {
    success: bool,
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    image_base64: Option<String>,
}

/// Python harness executed by the subprocess. Receives the cell path as
/// `argv[1]`, runs it under restricted builtins, and prints a single
/// JSON result line behind the marker.
const HARNESS: &str = r#"
import sys
import io
import json
import base64
import builtins
from contextlib import redirect_stdout, redirect_stderr

ALLOWED_MODULES = {
    "pandas", "numpy", "matplotlib", "seaborn", "datetime",
    "math", "statistics", "json", "collections", "re",
}

_real_import = builtins.__import__


def _guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
    if name.split(".")[0] in ALLOWED_MODULES:
        return _real_import(name, globals, locals, fromlist, level)
    raise ImportError("Import of '%s' is not allowed in sandbox" % name)


import matplotlib
matplotlib.use("Agg")
import matplotlib.pyplot as plt
import pandas as pd
import numpy as np
try:
    import seaborn as sns
except ImportError:
    sns = None
import datetime
import math
import statistics
import collections
import re
import json as json_module

plt.rcParams["font.sans-serif"] = [
    "Heiti TC", "STHeiti", "PingFang HK", "Hiragino Sans GB",
    "SimHei", "Microsoft YaHei", "Arial Unicode MS", "DejaVu Sans",
]
plt.rcParams["axes.unicode_minus"] = False
plt.rcParams["figure.figsize"] = [12, 7]
plt.rcParams["font.size"] = 12
plt.rcParams["axes.titlesize"] = 18
plt.rcParams["axes.titleweight"] = "bold"
plt.rcParams["axes.labelsize"] = 14
plt.rcParams["xtick.labelsize"] = 12
plt.rcParams["ytick.labelsize"] = 12
plt.rcParams["legend.fontsize"] = 12
plt.rcParams["axes.spines.top"] = False
plt.rcParams["axes.spines.right"] = False
plt.rcParams["axes.grid"] = True
plt.rcParams["grid.alpha"] = 0.3
plt.rcParams["grid.linestyle"] = "--"

_SAFE_NAMES = [
    "print", "len", "range", "enumerate", "zip", "map", "filter", "sorted",
    "sum", "min", "max", "abs", "round", "int", "float", "str", "list",
    "dict", "tuple", "set", "bool", "isinstance", "type", "getattr",
    "setattr", "hasattr", "callable", "iter", "next", "reversed", "slice",
    "all", "any", "chr", "ord", "hex", "bin", "oct", "pow", "divmod",
    "format", "repr", "hash", "id", "Exception", "ValueError", "TypeError",
    "KeyError", "IndexError", "ZeroDivisionError", "StopIteration",
]
safe_builtins = {name: getattr(builtins, name) for name in _SAFE_NAMES}
safe_builtins["__import__"] = _guarded_import
safe_builtins["input"] = lambda *args: ""
safe_builtins["open"] = None

env = {
    "__builtins__": safe_builtins,
    "pd": pd, "np": np, "plt": plt, "sns": sns,
    "pandas": pd, "numpy": np, "matplotlib": matplotlib,
    "datetime": datetime, "math": math, "statistics": statistics,
    "json": json_module, "collections": collections, "re": re,
}

with open(sys.argv[1], encoding="utf-8") as fh:
    cell = fh.read()

stdout_buf = io.StringIO()
stderr_buf = io.StringIO()
result = {"success": False, "output": "", "error": None, "image_base64": None}

try:
    with redirect_stdout(stdout_buf), redirect_stderr(stderr_buf):
        exec(compile(cell, "<cell>", "exec"), env)

    fig = plt.gcf()
    if fig.get_axes():
        buf = io.BytesIO()
        fig.savefig(buf, format="png", dpi=150, bbox_inches="tight", facecolor="white")
        buf.seek(0)
        result["image_base64"] = base64.b64encode(buf.read()).decode("ascii")
        plt.close(fig)

    result["success"] = True
    result["output"] = stdout_buf.getvalue()
    stderr_text = stderr_buf.getvalue()
    result["error"] = stderr_text if stderr_text else None
except BaseException as exc:
    plt.close("all")
    result["output"] = stdout_buf.getvalue()
    result["error"] = "%s: %s" % (type(exc).__name__, exc)

sys.stdout.write("__SANDBOX_RESULT__ " + json.dumps(result, ensure_ascii=False) + "\n")
"#;
