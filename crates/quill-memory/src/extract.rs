//! Best-effort structural extraction for C-like sources.
//!
//! This is pattern matching, not parsing. Partial or malformed text yields
//! partial facts and never an error.

use std::sync::LazyLock;

use quill_protocol::{FileFacts, FunctionFact, ImportFact, VariableFact};
use regex::Regex;

static FUNCTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w+)\s+(\w+)\s*\([^)]*\)\s*\{").expect("function pattern is valid")
});
static VARIABLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\s+(\w+)\s*[=;]").expect("variable pattern is valid"));
static INCLUDE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"#include\s*[<"]([^>"]+)[>"]"#).expect("include pattern is valid")
});

/// Words that look like a type or a name to the patterns above but never are.
const CONTROL_WORDS: &[&str] = &[
    "if", "else", "while", "for", "switch", "return", "sizeof", "do", "case", "goto",
];

pub fn extract_facts(content: &str) -> FileFacts {
    let lines = LineIndex::new(content);
    FileFacts {
        functions: FUNCTION_PATTERN
            .captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let (return_type, name) = (caps.get(1)?.as_str(), caps.get(2)?.as_str());
                is_identifier_pair(return_type, name).then(|| FunctionFact {
                    return_type: return_type.to_owned(),
                    name: name.to_owned(),
                    line: lines.line_of(whole.start()),
                })
            })
            .collect(),
        variables: VARIABLE_PATTERN
            .captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let (var_type, name) = (caps.get(1)?.as_str(), caps.get(2)?.as_str());
                is_identifier_pair(var_type, name).then(|| VariableFact {
                    var_type: var_type.to_owned(),
                    name: name.to_owned(),
                    line: lines.line_of(whole.start()),
                })
            })
            .collect(),
        imports: INCLUDE_PATTERN
            .captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some(ImportFact {
                    header: caps.get(1)?.as_str().trim().to_owned(),
                    line: lines.line_of(whole.start()),
                })
            })
            .collect(),
    }
}

fn is_identifier_pair(kind: &str, name: &str) -> bool {
    !CONTROL_WORDS.contains(&kind)
        && !CONTROL_WORDS.contains(&name)
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Byte offsets of line starts, for offset to 1-based line lookups.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(content.match_indices('\n').map(|(offset, _)| offset + 1))
            .collect();
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|start| *start <= offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_function_yields_one_fact() {
        let facts = extract_facts("int add(int a, int b) { return a + b; }");
        assert_eq!(
            facts.functions,
            vec![FunctionFact {
                return_type: "int".to_owned(),
                name: "add".to_owned(),
                line: 1,
            }]
        );
        assert!(facts.variables.is_empty());
        assert!(facts.imports.is_empty());
    }

    #[test]
    fn reports_includes_functions_and_variables_with_lines() {
        let source = "#include <stdio.h>\n#include \"calc.h\"\n\nint total = 0;\n\nint main() {\n    double ratio = 0.5;\n    printf(\"%d\\n\", total);\n    return 0;\n}\n";
        let facts = extract_facts(source);

        let headers: Vec<_> = facts
            .imports
            .iter()
            .map(|import| (import.header.as_str(), import.line))
            .collect();
        assert_eq!(headers, vec![("stdio.h", 1), ("calc.h", 2)]);

        assert_eq!(facts.functions.len(), 1);
        assert_eq!(facts.functions[0].name, "main");
        assert_eq!(facts.functions[0].line, 6);

        let variables: Vec<_> = facts
            .variables
            .iter()
            .map(|variable| (variable.var_type.as_str(), variable.name.as_str(), variable.line))
            .collect();
        assert_eq!(variables, vec![("int", "total", 4), ("double", "ratio", 7)]);
    }

    #[test]
    fn control_flow_is_not_reported() {
        let source = "void f(int x) {\n    if (x) {\n    } else if (x > 1) {\n    }\n    return x;\n}\n";
        let facts = extract_facts(source);
        let names: Vec<_> = facts.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["f"]);
        assert!(facts.variables.is_empty());
    }

    #[test]
    fn garbage_input_yields_no_facts() {
        assert!(extract_facts("}{ (( ;; #include <").is_empty());
        assert!(extract_facts("").is_empty());
    }
}
