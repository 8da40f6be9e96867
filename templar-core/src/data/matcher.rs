use indexmap::IndexMap;

use crate::models::{FileBundle, RawEntry};

/// Bundles grouped by base name plus names that matched no known extension.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub bundles: Vec<FileBundle>,
    pub unmatched: Vec<String>,
}

/// `contracts/NDA.v2.json` → `NDA.v2`.
pub fn base_name(file_name: &str) -> &str {
    let without_dir = file_name
        .rfind(['/', '\\'])
        .map_or(file_name, |i| &file_name[i + 1..]);
    match without_dir.rfind('.') {
        Some(dot) if dot + 1 < without_dir.len() => &without_dir[..dot],
        _ => without_dir,
    }
}

fn extension(file_name: &str) -> String {
    file_name
        .to_lowercase()
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_string()
}

/// Group entries by base name, keyed by extension within each bundle.
///
/// Bundles keep the order in which their base name first appeared. A second
/// file with the same base name and extension replaces the first.
pub fn match_files<'a, I>(entries: I) -> MatchOutcome
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut bundles: IndexMap<String, FileBundle> = IndexMap::new();
    let mut unmatched = Vec::new();

    for (name, content) in entries {
        let ext = extension(name);
        if !matches!(ext.as_str(), "json" | "md" | "txt" | "sol") {
            unmatched.push(name.clone());
            continue;
        }

        let base = base_name(name).to_string();
        let bundle = bundles
            .entry(base.clone())
            .or_insert_with(|| FileBundle::new(base));
        let entry = Some(RawEntry::new(name.clone(), content.clone()));
        match ext.as_str() {
            "json" => bundle.json = entry,
            "md" => bundle.markdown = entry,
            "txt" => bundle.text = entry,
            _ => bundle.solidity = entry,
        }
    }

    MatchOutcome {
        bundles: bundles.into_values().collect(),
        unmatched,
    }
}
