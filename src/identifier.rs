use std::collections::{HashMap, HashSet};

/// Hands out names that are unique within one scope.
///
/// The first request for a name returns it unchanged. Later requests for the
/// same name get `_1`, `_2`, ... appended, skipping any combination that was
/// already issued. Comparison is byte-exact and case-sensitive.
#[derive(Debug, Default)]
pub struct IdentifierResolver {
    issued: HashSet<String>,
    next_suffix: HashMap<String, u32>,
}

impl IdentifierResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, candidate: &str) -> String {
        if self.issued.insert(candidate.to_string()) {
            return candidate.to_string();
        }

        let suffix = self.next_suffix.entry(candidate.to_string()).or_insert(1);
        loop {
            let name = format!("{}_{}", candidate, suffix);
            *suffix += 1;
            if self.issued.insert(name.clone()) {
                return name;
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.issued.contains(name)
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}
