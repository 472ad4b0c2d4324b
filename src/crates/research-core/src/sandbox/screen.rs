//! Static safety screen for generated analysis code.
//!
//! Code is rejected *before* execution when it matches any forbidden
//! pattern: process/filesystem/network modules, dynamic execution, and
//! dunder escape hatches. The harness-side import hook is the second
//! line of defence; this screen is the first.

use regex::RegexSet;
use std::sync::OnceLock;

/// Modules the sandbox preseeds and permits.
pub const ALLOWED_MODULES: [&str; 10] = [
    "pandas",
    "numpy",
    "matplotlib",
    "seaborn",
    "datetime",
    "math",
    "statistics",
    "json",
    "collections",
    "re",
];

const FORBIDDEN_PATTERNS: [&str; 25] = [
    r"(?i)\bimport\s+os\b",
    r"(?i)\bimport\s+sys\b",
    r"(?i)\bimport\s+subprocess\b",
    r"(?i)\bos\.",
    r"(?i)\bsys\.",
    r"(?i)\bsubprocess\.",
    r"(?i)\bopen\s*\(",
    r"(?i)\bexec\s*\(",
    r"(?i)\beval\s*\(",
    r"(?i)__import__",
    r"(?i)\bimport\s+requests\b",
    r"(?i)\brequests\.",
    r"(?i)\bimport\s+urllib\b",
    r"(?i)\burllib\.",
    r"(?i)\bimport\s+socket\b",
    r"(?i)\bsocket\.",
    r"(?i)\bimport\s+shutil\b",
    r"(?i)\bshutil\.",
    r"(?i)\bimport\s+pathlib\b",
    r"(?i)\bpathlib\.",
    r"(?i)\bimport\s+pickle\b",
    r"(?i)\bpickle\.",
    r"(?i)\bimport\s+glob\b",
    r"(?i)\bcompile\s*\(",
    r"(?i)\b__builtins__\b|\b__globals__\b|\b__code__\b",
];

fn forbidden_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(FORBIDDEN_PATTERNS).expect("forbidden patterns are valid"))
}

/// Whether the code is safe to hand to the interpreter.
pub fn is_code_safe(code: &str) -> bool {
    !forbidden_set().is_match(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_os_rejected() {
        assert!(!is_code_safe("import os\nprint(os.getcwd())"));
        assert!(!is_code_safe("import os"));
    }

    #[test]
    fn test_module_attribute_use_rejected() {
        assert!(!is_code_safe("x = sys.path"));
        assert!(!is_code_safe("subprocess.run(['ls'])"));
        assert!(!is_code_safe("requests.get('http://x')"));
        assert!(!is_code_safe("socket.socket()"));
        assert!(!is_code_safe("shutil.rmtree('/')"));
        assert!(!is_code_safe("pickle.loads(b'')"));
    }

    #[test]
    fn test_dynamic_execution_rejected() {
        assert!(!is_code_safe("exec('print(1)')"));
        assert!(!is_code_safe("eval('1+1')"));
        assert!(!is_code_safe("compile('x', '<s>', 'exec')"));
        assert!(!is_code_safe("__import__('os')"));
    }

    #[test]
    fn test_file_access_rejected() {
        assert!(!is_code_safe("data = open('secrets.txt').read()"));
        assert!(!is_code_safe("open ('f')"));
    }

    #[test]
    fn test_dunder_escapes_rejected() {
        assert!(!is_code_safe("print(__builtins__)"));
        assert!(!is_code_safe("f.__globals__['x']"));
        assert!(!is_code_safe("(lambda: 0).__code__"));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(!is_code_safe("IMPORT OS"));
        assert!(!is_code_safe("OS.getcwd()"));
    }

    #[test]
    fn test_plotting_code_accepted() {
        let code = r#"
data = {"Year": [2020, 2022, 2024], "Sales": [136, 688, 1200]}
df = pd.DataFrame(data)
df["Sales"] = pd.to_numeric(df["Sales"], errors="coerce")
plt.figure(figsize=(12, 7))
plt.plot(df["Year"], df["Sales"], linewidth=2.5, marker="o")
plt.title("NEV sales")
print(df.describe())
"#;
        assert!(is_code_safe(code));
    }

    #[test]
    fn test_word_boundaries_avoid_false_positives() {
        // "photos." and "cost" must not trip the os/compile patterns.
        assert!(is_code_safe("photos = [1, 2]\nn = len(photos)"));
        assert!(is_code_safe("cost = 10\ntotal = cost * 2"));
    }
}
