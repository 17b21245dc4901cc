//! Command scripts: a plain-text way to drive a record manager and check results.
//!
//! One command per line, with an optional expected result after `=>`:
//!
//! ```text
//! # comments and blank lines are skipped
//! insert 1 First => true
//! insert 1 Again => false
//! search 1 => First
//! search 2 => null
//! set 1 http://example.com => true
//! delete 1 => true
//! ```
//!
//! `insert`, `delete` and `set` produce `true` or `false`; `search` produces
//! the value, or `null` if the key is absent. Values run to the end of the
//! command and may contain spaces and colons, but not ` =>`.

use crate::btree::{Key, Record, TreeError};
use crate::record_manager::RecordManager;

/// Separates a command from its expected output.
const EXPECT_SEPARATOR: &str = " =>";

/// A single operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Insert(Record),
    Search(Key),
    Delete(Key),
    Set(Record),
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert(record) => write!(f, "insert {} {}", record.key, record.value),
            Self::Search(key) => write!(f, "search {key}"),
            Self::Delete(key) => write!(f, "delete {key}"),
            Self::Set(record) => write!(f, "set {} {}", record.key, record.value),
        }
    }
}

/// A parsed script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// 1-based line number in the script.
    pub line: usize,
    pub command: Command,
    /// Expected output, if the line has one.
    pub expected: Option<String>,
}

/// A step whose output differed from its expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub line: usize,
    pub command: String,
    pub expected: String,
    pub actual: String,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: `{}` returned {}, expected {}",
            self.line, self.command, self.actual, self.expected
        )
    }
}

/// Result of running a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptReport {
    /// Number of steps executed.
    pub executed: usize,
    /// Number of steps that carried an expectation.
    pub checked: usize,
    pub mismatches: Vec<Mismatch>,
}

impl ScriptReport {
    /// Whether every expectation held.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Parse a whole script.
///
/// # Errors
///
/// Returns the first malformed line.
pub fn parse_script(text: &str) -> Result<Vec<Step>, ScriptError> {
    let mut steps = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if let Some(step) = parse_line(index + 1, line)? {
            steps.push(step);
        }
    }
    Ok(steps)
}

/// Parse one line. Returns `None` for blank lines and comments.
///
/// # Errors
///
/// Returns an error for unknown commands, bad keys or missing values.
pub fn parse_line(line: usize, text: &str) -> Result<Option<Step>, ScriptError> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(None);
    }

    let (body, expected) = match text.split_once(EXPECT_SEPARATOR) {
        Some((_, expected)) if expected.contains(EXPECT_SEPARATOR) => {
            return Err(ScriptError::new(
                line,
                format!("more than one `{}` on the line", EXPECT_SEPARATOR.trim()),
            ));
        }
        Some((body, expected)) => (body.trim(), Some(expected.trim().to_string())),
        None => (text, None),
    };

    let mut parts = body.splitn(3, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let key = parts
        .next()
        .ok_or_else(|| ScriptError::new(line, format!("`{name}` needs a key")))?;
    let key: Key = key
        .parse()
        .map_err(|_| ScriptError::new(line, format!("'{key}' is not an integer key")))?;
    let value = parts.next().map(str::trim);

    let command = match (name, value) {
        ("insert", Some(value)) => Command::Insert(Record::new(key, value)),
        ("set", Some(value)) => Command::Set(Record::new(key, value)),
        ("insert" | "set", None) => {
            return Err(ScriptError::new(line, format!("`{name}` needs a value")));
        }
        ("search", None) => Command::Search(key),
        ("delete", None) => Command::Delete(key),
        ("search" | "delete", Some(extra)) => {
            return Err(ScriptError::new(
                line,
                format!("unexpected '{extra}' after `{name} {key}`"),
            ));
        }
        _ => return Err(ScriptError::new(line, format!("unknown command `{name}`"))),
    };

    Ok(Some(Step {
        line,
        command,
        expected,
    }))
}

/// Execute a command, returning its output as the script would print it.
pub fn execute<R: RecordManager>(manager: &mut R, command: &Command) -> Result<String, TreeError> {
    let output = match command {
        Command::Insert(record) => manager.insert(record.clone())?.to_string(),
        Command::Search(key) => manager
            .search(*key)?
            .map_or_else(|| "null".to_string(), |record| record.value),
        Command::Delete(key) => manager.delete(*key)?.to_string(),
        Command::Set(record) => manager.set(record.clone())?.to_string(),
    };
    Ok(output)
}

/// Run every step in order, comparing outputs with expectations.
///
/// A failed expectation is recorded and the run continues; a tree error stops it.
///
/// # Errors
///
/// Returns the first tree error with the line that caused it.
pub fn run_script<R: RecordManager>(
    manager: &mut R,
    steps: &[Step],
) -> Result<ScriptReport, ScriptError> {
    let mut report = ScriptReport::default();

    for step in steps {
        let actual = execute(manager, &step.command)
            .map_err(|e| ScriptError::new(step.line, format!("`{}` failed: {e}", step.command)))?;
        report.executed += 1;
        tracing::debug!(line = step.line, "{} -> {actual}", step.command);

        let Some(expected) = &step.expected else {
            continue;
        };
        report.checked += 1;
        if *expected != actual {
            let mismatch = Mismatch {
                line: step.line,
                command: step.command.to_string(),
                expected: expected.clone(),
                actual,
            };
            tracing::warn!("{mismatch}");
            report.mismatches.push(mismatch);
        }
    }

    Ok(report)
}

/// A malformed or failing script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub line: usize,
    pub message: String,
}

impl ScriptError {
    fn new(line: usize, message: String) -> Self {
        Self { line, message }
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ScriptError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::Tree;
    use crate::config::TreeConfig;
    use crate::storage::MemoryPager;

    fn tree() -> Tree<MemoryPager> {
        Tree::create(MemoryPager::new(1024, 256), TreeConfig::default()).expect("create")
    }

    const BASIC_SCRIPT: &str = "
        # basic operations
        insert 1 First => true
        insert 2 Second => true
        insert 3 Third => true
        insert 3 Third => false
        insert 4 Fourth => true
        search 4 => Fourth
        set 4 Fourth Set => true
        search 4 => Fourth Set
        delete 4 => true
        search 4 => null
        delete 0 => false
        search 1
    ";

    #[test]
    fn test_parse_line_variants() {
        assert_eq!(parse_line(1, "   ").expect("parse"), None);
        assert_eq!(parse_line(1, "# note => ignored").expect("parse"), None);

        let step = parse_line(3, "insert -5 hello world => true")
            .expect("parse")
            .expect("step");
        assert_eq!(step.line, 3);
        assert_eq!(step.command, Command::Insert(Record::new(-5, "hello world")));
        assert_eq!(step.expected.as_deref(), Some("true"));

        let step = parse_line(4, "search 7").expect("parse").expect("step");
        assert_eq!(step.command, Command::Search(7));
        assert_eq!(step.expected, None);
    }

    #[test]
    fn test_values_keep_colons() {
        let step = parse_line(1, "insert 1 http://example.com")
            .expect("parse")
            .expect("step");
        assert_eq!(
            step.command,
            Command::Insert(Record::new(1, "http://example.com"))
        );
        assert_eq!(step.expected, None);

        let step = parse_line(2, "search 1 => key: value")
            .expect("parse")
            .expect("step");
        assert_eq!(step.command, Command::Search(1));
        assert_eq!(step.expected.as_deref(), Some("key: value"));

        let steps =
            parse_script("set 1 a:b => false\ninsert 1 a:b => true\nsearch 1 => a:b").expect("parse");
        let mut tree = tree();
        let report = run_script(&mut tree, &steps).expect("run");
        assert!(report.passed(), "{:?}", report.mismatches);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line(1, "insert 1").is_err());
        assert!(parse_line(1, "insert x value").is_err());
        assert!(parse_line(1, "search 1 2").is_err());
        assert!(parse_line(1, "upsert 1 v").is_err());
        assert!(parse_line(1, "delete").is_err());
        assert!(parse_line(1, "insert 1 a => b => c").is_err());
        assert!(parse_line(1, "search 1: a").is_err());

        let err = parse_script("insert 1 a\nfrobnicate 2").expect_err("bad line");
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_basic_script_passes() {
        let steps = parse_script(BASIC_SCRIPT).expect("parse");
        let mut tree = tree();

        let report = run_script(&mut tree, &steps).expect("run");

        assert!(report.passed(), "{:?}", report.mismatches);
        assert_eq!(report.executed, 12);
        assert_eq!(report.checked, 11);
    }

    #[test]
    fn test_mismatch_reported_and_run_continues() {
        let steps = parse_script("insert 1 a => true\nsearch 1 => b\ninsert 2 c => true").expect("parse");
        let mut tree = tree();

        let report = run_script(&mut tree, &steps).expect("run");

        assert_eq!(report.executed, 3);
        assert_eq!(
            report.mismatches,
            vec![Mismatch {
                line: 2,
                command: "search 1".to_string(),
                expected: "b".to_string(),
                actual: "a".to_string(),
            }]
        );
    }

    #[test]
    fn test_tree_error_stops_run() {
        let long = "x".repeat(500);
        let steps = parse_script(&format!("insert 1 a\ninsert 2 {long}\ninsert 3 c")).expect("parse");
        let mut tree = tree();

        let err = run_script(&mut tree, &steps).expect_err("value too large");
        assert_eq!(err.line, 2);
        assert_eq!(tree.search(3).expect("search"), None);
    }
}
