use std::collections::{BTreeMap, BTreeSet};

use crate::error::{codes, ApiError};

/// How a selected field is exported.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSelect {
    /// The whole value, recursively.
    Whole,
    /// Only the named sub-fields.
    Sub(FieldSpec),
}

/// A parsed `fields=` projection: comma separated names, dot notation for
/// nested sub-selection (`author.name` selects `name` within `author`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSpec {
    entries: BTreeMap<String, FieldSelect>,
}

impl FieldSpec {
    /// Parse a projection list. When `attributes` is given, every top level
    /// name must be a declared model attribute.
    pub fn parse(csv: &str, attributes: Option<&BTreeSet<String>>) -> Result<Self, ApiError> {
        let mut spec = FieldSpec::default();
        for item in csv.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            if let Some(attrs) = attributes {
                let top = item.split('.').next().unwrap_or(item);
                if !attrs.contains(top) {
                    return Err(ApiError::bad_argument(
                        format!("Unknown field '{}' in fields", top),
                        codes::FIELDS_UNKNOWN,
                    ));
                }
            }
            spec.insert(item)?;
        }
        Ok(spec)
    }

    fn insert(&mut self, path: &str) -> Result<(), ApiError> {
        match path.split_once('.') {
            Some((head, rest)) => {
                let entry = self
                    .entries
                    .entry(head.to_string())
                    .or_insert_with(|| FieldSelect::Sub(FieldSpec::default()));
                // an explicit bare selection already exports the whole value
                if let FieldSelect::Sub(sub) = entry {
                    sub.insert(rest)?;
                }
                Ok(())
            }
            None => {
                if matches!(self.entries.get(path), Some(FieldSelect::Whole)) {
                    return Err(ApiError::bad_argument(
                        format!("Field '{}' selected twice", path),
                        codes::FIELDS_DUPLICATE,
                    ));
                }
                self.entries.insert(path.to_string(), FieldSelect::Whole);
                Ok(())
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn select(&self, name: &str) -> Option<&FieldSelect> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_bare_and_nested_selections() {
        let spec = FieldSpec::parse("title,author.name,author.email", None).unwrap();
        assert!(matches!(spec.select("title"), Some(FieldSelect::Whole)));
        match spec.select("author") {
            Some(FieldSelect::Sub(sub)) => {
                assert!(matches!(sub.select("name"), Some(FieldSelect::Whole)));
                assert!(matches!(sub.select("email"), Some(FieldSelect::Whole)));
            }
            other => panic!("expected sub selection, got {:?}", other),
        }
    }

    #[test]
    fn deep_paths_nest_recursively() {
        let spec = FieldSpec::parse("a.b.c", None).unwrap();
        let FieldSelect::Sub(a) = spec.select("a").unwrap() else { panic!() };
        let FieldSelect::Sub(b) = a.select("b").unwrap() else { panic!() };
        assert!(matches!(b.select("c"), Some(FieldSelect::Whole)));
    }

    #[test]
    fn duplicate_bare_field_is_rejected() {
        let err = FieldSpec::parse("title,title", None).unwrap_err();
        assert_eq!(err.code(), 2430);
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let err = FieldSpec::parse("title,bogus.name", Some(&attrs(&["title"]))).unwrap_err();
        assert_eq!(err.code(), 2431);
    }

    #[test]
    fn nested_path_only_validates_its_top_segment() {
        let spec = FieldSpec::parse("author.anything", Some(&attrs(&["author"]))).unwrap();
        assert!(spec.select("author").is_some());
    }
}
