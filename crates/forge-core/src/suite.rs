//! Acceptance test cases
//!
//! A [`TestCase`] is one zero-argument Python function whose name starts with
//! `test_`. A [`TestSuite`] is the frozen, ordered set of cases a candidate is
//! verified against.

use crate::error::SuiteError;
use pulldown_cmark::{CodeBlockKind, Event, Parser as MdParser, Tag, TagEnd};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::path::Path;

static TEST_FN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+(test_\w*)[ \t]*\(").ok());

static SRC_IMPORT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:from[ \t]+src(?:\.[\w.]+)?[ \t]+import\b.*|import[ \t]+src\b.*)$").ok()
});

/// One acceptance test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    name: String,
    source: String,
}

impl TestCase {
    /// Build a case from Python source.
    ///
    /// # Errors
    /// Returns [`SuiteError::NoTestFunction`] if the source defines no
    /// `test_` function
    pub fn new(source: impl Into<String>) -> Result<Self, SuiteError> {
        let source = source.into();
        let name = TEST_FN
            .as_ref()
            .and_then(|re| re.captures(&source))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| SuiteError::NoTestFunction(preview(&source)))?;
        Ok(Self { name, source })
    }

    /// Test function name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Test case source as written
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Source with `from src import ...` and `import src` lines removed
    #[must_use]
    pub fn adjusted_source(&self) -> String {
        let stripped = match SRC_IMPORT.as_ref() {
            Some(re) => re.replace_all(&self.source, ""),
            None => Cow::Borrowed(self.source.as_str()),
        };
        stripped.trim().to_string()
    }

    /// Program running this case against `candidate`: the candidate, the
    /// adjusted case, then a call to the test function.
    #[must_use]
    pub fn harness(&self, candidate: &str) -> String {
        format!(
            "{candidate}\n\n{case}\n\n{name}()\n",
            candidate = candidate.trim_end(),
            case = self.adjusted_source(),
            name = self.name,
        )
    }
}

/// Ordered collection of test cases
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSuite {
    cases: Vec<TestCase>,
}

impl TestSuite {
    /// Create suite from cases
    #[inline]
    #[must_use]
    pub fn new(cases: Vec<TestCase>) -> Self {
        Self { cases }
    }

    /// Extract fenced ```` ```python ```` blocks that start with `def test_`.
    ///
    /// Other code blocks are ignored.
    ///
    /// # Errors
    /// Returns error if a selected block has no test function
    pub fn from_markdown(markdown: &str) -> Result<Self, SuiteError> {
        let mut cases = Vec::new();
        let mut current: Option<String> = None;

        for event in MdParser::new(markdown) {
            match event {
                Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                    let lang = info.split_whitespace().next().unwrap_or_default();
                    if lang.eq_ignore_ascii_case("python") {
                        current = Some(String::new());
                    }
                }
                Event::Text(text) => {
                    if let Some(code) = current.as_mut() {
                        code.push_str(&text);
                    }
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some(code) = current.take() {
                        let code = code.trim();
                        if code.starts_with("def test_") {
                            cases.push(TestCase::new(code)?);
                        }
                    }
                }
                _ => {}
            }
        }

        tracing::info!("Extracted {} test cases from specification", cases.len());
        Ok(Self { cases })
    }

    /// Split a Python test module into its top-level `test_` functions.
    ///
    /// # Errors
    /// Returns [`SuiteError::Parse`] if the module does not parse cleanly
    pub fn from_python_source(source: &str) -> Result<Self, SuiteError> {
        let tree = forge_ledger::parse_python(source)
            .ok_or_else(|| SuiteError::Parse("python parser unavailable".to_string()))?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(SuiteError::Parse("syntax error in test module".to_string()));
        }

        let mut cases = Vec::new();
        let mut cursor = root.walk();
        for node in root.named_children(&mut cursor) {
            let function = match node.kind() {
                "function_definition" => Some(node),
                "decorated_definition" => node.child_by_field_name("definition"),
                _ => None,
            };
            let Some(function) = function.filter(|f| f.kind() == "function_definition") else {
                continue;
            };
            let is_test = function
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(source.as_bytes()).ok())
                .is_some_and(|name| name.starts_with("test_"));
            if is_test {
                let text = node
                    .utf8_text(source.as_bytes())
                    .map_err(|e| SuiteError::Parse(e.to_string()))?;
                cases.push(TestCase::new(text)?);
            }
        }

        tracing::info!("Extracted {} test cases from test module", cases.len());
        Ok(Self { cases })
    }

    /// Load a suite from a file: markdown unless the extension is `.py`.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SuiteError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SuiteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if path.extension().is_some_and(|ext| ext == "py") {
            Self::from_python_source(&text)
        } else {
            Self::from_markdown(&text)
        }
    }

    /// Cases in order
    #[inline]
    #[must_use]
    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// Iterate over cases
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, TestCase> {
        self.cases.iter()
    }

    /// Number of cases
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

impl<'a> IntoIterator for &'a TestSuite {
    type Item = &'a TestCase;
    type IntoIter = std::slice::Iter<'a, TestCase>;

    fn into_iter(self) -> Self::IntoIter {
        self.cases.iter()
    }
}

fn preview(source: &str) -> String {
    let line = source.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    line.chars().take(60).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SPEC: &str = r#"# Calculator

Provide `add` and `subtract`.

```python
from src import add
def test_add():
    assert add(1, 2) == 3
```

Some prose.

```python
# helper, not a test
def helper():
    return 1
```

```json
{"def test_fake": 1}
```

```python
def test_subtract():
    assert subtract(3, 1) == 2
```
"#;

    #[test]
    fn test_case_requires_test_function() {
        assert!(matches!(
            TestCase::new("def helper():\n    pass\n"),
            Err(SuiteError::NoTestFunction(_))
        ));
        let case = TestCase::new("def test_x():\n    assert True\n").unwrap();
        assert_eq!(case.name(), "test_x");
    }

    #[test]
    fn test_from_markdown_selects_python_test_blocks() {
        // The first block starts with an import, so only the last one qualifies.
        let suite = TestSuite::from_markdown(SPEC).unwrap();
        let names: Vec<_> = suite.iter().map(TestCase::name).collect();
        assert_eq!(names, vec!["test_subtract"]);
    }

    #[test]
    fn test_from_markdown_keeps_order() {
        let md = "```python\ndef test_b():\n    pass\n```\n\n```python\ndef test_a():\n    pass\n```\n";
        let suite = TestSuite::from_markdown(md).unwrap();
        let names: Vec<_> = suite.iter().map(TestCase::name).collect();
        assert_eq!(names, vec!["test_b", "test_a"]);
    }

    #[test]
    fn test_harness_strips_src_imports_only() {
        let case = TestCase::new(
            "import math\nfrom src import add\nimport src\nfrom src.calc import sub\ndef test_add():\n    assert add(1, 2) == 3\n",
        )
        .unwrap();
        let harness = case.harness("def add(a, b):\n    return a + b\n");
        assert!(harness.starts_with("def add(a, b):\n    return a + b\n\n"));
        assert!(harness.contains("import math"));
        assert!(!harness.contains("from src"));
        assert!(!harness.contains("import src"));
        assert!(harness.ends_with("\n\ntest_add()\n"));
    }

    #[test]
    fn test_from_python_source_splits_functions() {
        let module = "import pytest\n\ndef helper():\n    return 2\n\ndef test_one():\n    assert helper() == 2\n\n@pytest.mark.slow\ndef test_two():\n    assert True\n";
        let suite = TestSuite::from_python_source(module).unwrap();
        let names: Vec<_> = suite.iter().map(TestCase::name).collect();
        assert_eq!(names, vec!["test_one", "test_two"]);
        assert!(suite.cases()[1].source().starts_with("@pytest.mark.slow"));
    }

    #[test]
    fn test_from_python_source_rejects_broken_module() {
        assert!(matches!(
            TestSuite::from_python_source("def test_x(:\n"),
            Err(SuiteError::Parse(_))
        ));
    }
}
