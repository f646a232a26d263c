//! Foreign-key safe table order
//!
//! Derived once from the `references` declared in `tables`: Kahn's algorithm,
//! ties broken by declaration order so the result is stable.

use super::tables::{TableSpec, TABLES};
use crate::error::{AppError, AppResult};
use once_cell::sync::Lazy;

static RESTORE_ORDER: Lazy<Result<Vec<&'static TableSpec>, String>> =
    Lazy::new(|| topological_order(TABLES));

/// Tables with every referenced table before the tables referencing it
pub fn restore_order() -> AppResult<&'static [&'static TableSpec]> {
    RESTORE_ORDER
        .as_ref()
        .map(|order| order.as_slice())
        .map_err(|e| AppError::Internal(e.clone()))
}

pub fn topological_order(tables: &[TableSpec]) -> Result<Vec<&TableSpec>, String> {
    for table in tables {
        for reference in table.references {
            if !tables.iter().any(|t| t.name == *reference) {
                return Err(format!(
                    "table {} references unmanaged table {}",
                    table.name, reference
                ));
            }
        }
    }

    let mut placed: Vec<&TableSpec> = Vec::with_capacity(tables.len());
    while placed.len() < tables.len() {
        let next = tables.iter().find(|t| {
            !placed.iter().any(|p| p.name == t.name)
                && t.references
                    .iter()
                    .all(|r| *r == t.name || placed.iter().any(|p| p.name == *r))
        });
        match next {
            Some(table) => placed.push(table),
            None => {
                let stuck: Vec<&str> = tables
                    .iter()
                    .filter(|t| !placed.iter().any(|p| p.name == t.name))
                    .map(|t| t.name)
                    .collect();
                return Err(format!("reference cycle among tables: {}", stuck.join(", ")));
            }
        }
    }
    Ok(placed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::tables::ConflictTarget;
    use pretty_assertions::assert_eq;

    fn table(name: &'static str, references: &'static [&'static str]) -> TableSpec {
        TableSpec {
            name,
            columns: &[],
            conflict: ConflictTarget::None,
            references,
        }
    }

    #[test]
    fn test_managed_tables_have_a_valid_order() {
        let order = restore_order().unwrap();
        assert_eq!(order.len(), TABLES.len());
        for (i, table) in order.iter().enumerate() {
            for reference in table.references {
                let at = order.iter().position(|t| t.name == *reference).unwrap();
                assert!(at < i, "{} must come after {}", table.name, reference);
            }
        }
        assert_eq!(order[0].name, "roles");
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let tables = [
            table("child", &["parent"]),
            table("a", &[]),
            table("parent", &[]),
            table("b", &[]),
        ];
        let names: Vec<_> = topological_order(&tables).unwrap().iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["a", "parent", "child", "b"]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let tables = [table("x", &["y"]), table("y", &["x"]), table("z", &[])];
        let err = topological_order(&tables).unwrap_err();
        assert!(err.contains("cycle"));
        assert!(err.contains("x, y"));
    }

    #[test]
    fn test_unknown_reference_is_reported() {
        let tables = [table("x", &["ghost"])];
        let err = topological_order(&tables).unwrap_err();
        assert!(err.contains("ghost"));
    }
}
