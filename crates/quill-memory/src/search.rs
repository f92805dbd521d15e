use quill_protocol::{MemorySnapshot, SearchResult, SearchScope};

const EXCERPT_CHARS: usize = 120;

/// Case-insensitive substring scan over the in-memory document.
pub(crate) fn search(state: &MemorySnapshot, query: &str, scope: SearchScope) -> Vec<SearchResult> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    let matches = |text: &str| text.to_lowercase().contains(&needle);
    let mut results = Vec::new();

    if scope.includes(SearchScope::Files) {
        for (path, record) in &state.files {
            for (offset, line) in record.content.lines().enumerate() {
                if matches(line) {
                    results.push(SearchResult::File {
                        path: path.clone(),
                        line: offset + 1,
                        text: line.trim().to_owned(),
                    });
                }
            }
        }
    }

    if scope.includes(SearchScope::Symbols) {
        for (path, record) in &state.files {
            for function in record.facts.functions.iter().filter(|f| matches(&f.name)) {
                results.push(SearchResult::Function {
                    path: path.clone(),
                    name: function.name.clone(),
                    return_type: function.return_type.clone(),
                    line: function.line,
                });
            }
            for variable in record.facts.variables.iter().filter(|v| matches(&v.name)) {
                results.push(SearchResult::Variable {
                    path: path.clone(),
                    name: variable.name.clone(),
                    var_type: variable.var_type.clone(),
                    line: variable.line,
                });
            }
        }
    }

    if scope.includes(SearchScope::History) {
        for (index, entry) in state.history.iter().enumerate() {
            if matches(entry.action.as_str()) || matches(&entry.details.to_string()) {
                results.push(SearchResult::History {
                    index,
                    action: entry.action,
                    timestamp: entry.timestamp,
                });
            }
        }
    }

    if scope.includes(SearchScope::Interactions) {
        for (index, interaction) in state.interactions.iter().enumerate() {
            if matches(&interaction.prompt) || matches(&interaction.response) {
                results.push(SearchResult::Interaction {
                    index,
                    kind: interaction.kind,
                    excerpt: interaction.prompt.chars().take(EXCERPT_CHARS).collect(),
                });
            }
        }
    }

    results
}
