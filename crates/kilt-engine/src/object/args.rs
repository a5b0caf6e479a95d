//! Arguments descriptors
//!
//! Describes the shape of a call: how many type arguments, how many
//! arguments in total, how many of them are positional, and where each
//! named argument sits. Named entries are kept sorted by name.

use serde::{Deserialize, Serialize};

/// A named argument and its position in the argument list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedArgument {
    /// Argument name
    pub name: String,
    /// Zero-based position among all arguments (receiver included)
    pub position: usize,
}

/// Call shape used by dispatchers and forwarders
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArgumentsDescriptor {
    type_args_len: usize,
    count: usize,
    positional_count: usize,
    named: Vec<NamedArgument>,
}

impl ArgumentsDescriptor {
    /// `count` excludes the type-argument vector; `names` are the trailing
    /// arguments in call order
    pub fn new(type_args_len: usize, count: usize, names: &[String]) -> Self {
        let positional_count = count - names.len();
        let mut named: Vec<NamedArgument> = names
            .iter()
            .enumerate()
            .map(|(i, name)| NamedArgument {
                name: name.clone(),
                position: positional_count + i,
            })
            .collect();
        named.sort_by(|a, b| a.name.cmp(&b.name));
        ArgumentsDescriptor {
            type_args_len,
            count,
            positional_count,
            named,
        }
    }

    /// Positional-only descriptor
    pub fn positional(type_args_len: usize, count: usize) -> Self {
        Self::new(type_args_len, count, &[])
    }

    /// Number of type arguments passed (0 if none)
    pub fn type_args_len(&self) -> usize {
        self.type_args_len
    }

    /// Number of arguments, not counting the type-argument vector
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of positional arguments
    pub fn positional_count(&self) -> usize {
        self.positional_count
    }

    /// Number of named arguments
    pub fn named_count(&self) -> usize {
        self.named.len()
    }

    /// Name of the i-th named argument (sorted order)
    pub fn name_at(&self, i: usize) -> &str {
        &self.named[i].name
    }

    /// Position of the i-th named argument (sorted order)
    pub fn position_at(&self, i: usize) -> usize {
        self.named[i].position
    }

    /// Total slots occupied, counting the type-argument vector
    pub fn size_with_type_args(&self) -> usize {
        self.count + usize::from(self.type_args_len > 0)
    }

    /// Names in call order
    pub fn names_in_call_order(&self) -> Vec<String> {
        let mut named = self.named.clone();
        named.sort_by_key(|n| n.position);
        named.into_iter().map(|n| n.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_arguments_sorted_by_name() {
        let desc = ArgumentsDescriptor::new(0, 4, &["z".to_string(), "a".to_string()]);
        assert_eq!(desc.positional_count(), 2);
        assert_eq!(desc.name_at(0), "a");
        assert_eq!(desc.position_at(0), 3);
        assert_eq!(desc.name_at(1), "z");
        assert_eq!(desc.position_at(1), 2);
        assert_eq!(desc.names_in_call_order(), vec!["z", "a"]);
    }

    #[test]
    fn test_size_with_type_args() {
        assert_eq!(ArgumentsDescriptor::positional(0, 3).size_with_type_args(), 3);
        assert_eq!(ArgumentsDescriptor::positional(2, 3).size_with_type_args(), 4);
    }
}
