//! Knowledge base loading and listing (`coach kb`).

use anyhow::{Context, Result};
use std::path::Path;

use trail_coach_core::models::{display_order, total_phrasings, validate_knowledge_base, KnowledgeEntry};

use crate::config::Config;

/// Read and validate the knowledge base at `path`.
///
/// The file is a JSON array of entries; field names may be English
/// (`phrasings`, `answer`, ...) or the content-table names (`domande`,
/// `risposta`, ...).
pub fn load_knowledge_base(path: &Path) -> Result<Vec<KnowledgeEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read knowledge base: {}", path.display()))?;
    let entries: Vec<KnowledgeEntry> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse knowledge base: {}", path.display()))?;
    validate_knowledge_base(&entries)
        .with_context(|| format!("Invalid knowledge base: {}", path.display()))?;
    Ok(entries)
}

/// Print the knowledge base in display order.
pub fn run_kb(config: &Config) -> Result<()> {
    let entries = load_knowledge_base(&config.knowledge.path)?;

    println!(
        "{} entries, {} phrasings ({})",
        entries.len(),
        total_phrasings(&entries),
        config.knowledge.path.display()
    );
    println!();
    println!("{:<6} {:<14} {:<9} QUESTION", "ID", "CATEGORY", "PHRASINGS");
    for entry in display_order(&entries) {
        let first = entry.phrasings.first().map(String::as_str).unwrap_or("");
        println!(
            "{:<6} {:<14} {:<9} {}",
            entry.id,
            entry.category,
            entry.phrasings.len(),
            first
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn accepts_content_table_field_names() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb.json");
        std::fs::write(
            &path,
            r#"[{"id": 3, "categoria": "recupero", "domande": ["come recupero?", "recupero dopo la gara"],
                "risposta": "Dormi e mangia.", "fonte": "Eat & Run", "ordine": 2}]"#,
        )
        .unwrap();

        let kb = load_knowledge_base(&path).unwrap();
        assert_eq!(kb[0].category, "recupero");
        assert_eq!(kb[0].phrasings.len(), 2);
        assert_eq!(kb[0].source, "Eat & Run");
        assert_eq!(kb[0].rank_hint, 2);
    }

    #[test]
    fn rejects_entry_without_phrasings() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb.json");
        std::fs::write(&path, r#"[{"id": 1, "phrasings": [], "answer": "a"}]"#).unwrap();

        let err = load_knowledge_base(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("no phrasings"));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb.json");
        std::fs::write(
            &path,
            r#"[{"id": 1, "phrasings": ["a"], "answer": "a"},
                {"id": 1, "phrasings": ["b"], "answer": "b"}]"#,
        )
        .unwrap();

        assert!(load_knowledge_base(&path).is_err());
    }

    #[test]
    fn seed_knowledge_base_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/knowledge_base.json");
        let kb = load_knowledge_base(&path).unwrap();
        assert_eq!(kb.len(), 6);
        assert!(kb.iter().all(|e| !e.phrasings.is_empty()));
    }
}
