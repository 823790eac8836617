//! Queries over every column that stores an element reference

use rusqlite::types::Value;
use rusqlite::{Connection, Row};

use crate::backend::record::{Reference, ReferenceRole};
use crate::error::Result;

use super::query::{join_id_ref_sql, matches_uri_ref, placeholders, text};

/// A `(prefix, local id)` column pair holding a reference
pub(crate) struct RefColumn {
    pub table: &'static str,
    pub p_col: &'static str,
    pub i_col: &'static str,
    /// Extra restriction on which rows hold a reference
    pub only: &'static str,
}

pub(crate) const REF_COLUMNS: [RefColumn; 7] = [
    RefColumn { table: "Annotations", p_col: "media_p", i_col: "media_i", only: "" },
    RefColumn { table: "Contents", p_col: "model_p", i_col: "model_i", only: "" },
    RefColumn { table: "RelationMembers", p_col: "member_p", i_col: "member_i", only: "" },
    RefColumn { table: "ListItems", p_col: "item_p", i_col: "item_i", only: "" },
    RefColumn { table: "Tagged", p_col: "element_p", i_col: "element_i", only: "" },
    RefColumn { table: "Tagged", p_col: "tag_p", i_col: "tag_i", only: "" },
    RefColumn { table: "Meta", p_col: "value_p", i_col: "value_i", only: "is_ref = 1" },
];

impl RefColumn {
    /// Tagged rows may collide once renamed; the newer row wins
    fn update_verb(&self) -> &'static str {
        if self.table == "Tagged" {
            "UPDATE OR REPLACE"
        } else {
            "UPDATE"
        }
    }

    fn restriction(&self) -> String {
        if self.only.is_empty() {
            String::new()
        } else {
            format!(" AND {}", self.only)
        }
    }
}

/// Point every reference to `base#old_id` held by `pids` at `new_id`
pub(crate) fn rename_references(
    conn: &Connection,
    pids: &[String],
    base: &str,
    old_id: &str,
    new_id: &str,
) -> Result<usize> {
    let mut changed = 0;
    for col in &REF_COLUMNS {
        let sql = format!(
            "{verb} {t} SET {i} = ? WHERE {t}.package IN ({pids}){only} AND {m}",
            verb = col.update_verb(),
            t = col.table,
            i = col.i_col,
            pids = placeholders(pids.len()),
            only = col.restriction(),
            m = matches_uri_ref(col.table, col.p_col, col.i_col),
        );
        let mut params = vec![text(new_id)];
        params.extend(pids.iter().map(|p| text(p)));
        params.push(text(old_id));
        params.push(text(base));
        changed += conn.execute(&sql, rusqlite::params_from_iter(params))?;
    }
    Ok(changed)
}

/// Replace the import prefix `old` by `new` in every reference of `pid`
pub(crate) fn rename_prefix(conn: &Connection, pid: &str, old: &str, new: &str) -> Result<()> {
    for col in &REF_COLUMNS {
        let sql = format!(
            "{verb} {t} SET {p} = ?3 WHERE package = ?1 AND {p} = ?2{only}",
            verb = col.update_verb(),
            t = col.table,
            p = col.p_col,
            only = col.restriction(),
        );
        conn.execute(&sql, rusqlite::params![pid, old, new])?;
    }
    Ok(())
}

/// How each union branch selects its rows
pub(crate) enum RefTarget<'a> {
    /// Rows of `pids` pointing at this uri-ref
    UriRef { pids: &'a [String], base: &'a str, id: &'a str },
    /// Rows of `pid` going through the import `prefix`
    Import { pid: &'a str, prefix: &'a str },
}

impl RefTarget<'_> {
    fn condition(&self, alias: &str, p_col: &str, i_col: &str) -> (String, Vec<Value>) {
        match self {
            RefTarget::UriRef { pids, base, id } => {
                let sql = format!(
                    "{a}.package IN ({}) AND {}",
                    placeholders(pids.len()),
                    matches_uri_ref(alias, p_col, i_col),
                    a = alias
                );
                let mut params: Vec<Value> = pids.iter().map(|p| text(p)).collect();
                params.push(text(id));
                params.push(text(base));
                (sql, params)
            }
            RefTarget::Import { pid, prefix } => (
                format!("{a}.package = ? AND {a}.{p} = ?", a = alias, p = p_col),
                vec![text(pid), text(prefix)],
            ),
        }
    }
}

/// Union of every referencing row, as
/// `(package, element, kind, ord, extra, target)`
pub(crate) fn references_sql(target: &RefTarget<'_>) -> (String, Vec<Value>) {
    let branches: [(&str, &str, &str, &str, &str, &str, &str); 7] = [
        ("Annotations a", "a.id", "'media'", "NULL", "''", "media_p", "media_i"),
        ("Contents c", "c.element", "'model'", "NULL", "''", "model_p", "model_i"),
        ("RelationMembers r", "r.relation", "'member'", "r.ord", "''", "member_p", "member_i"),
        ("ListItems l", "l.list", "'item'", "l.ord", "''", "item_p", "item_i"),
        ("Tagged t", "''", "'tag'", "NULL", "#element", "tag_p", "tag_i"),
        ("Tagged t", "''", "'tagged'", "NULL", "#tag", "element_p", "element_i"),
        ("Meta m", "m.element", "'meta'", "NULL", "m.key", "value_p", "value_i"),
    ];

    let mut parts = Vec::new();
    let mut params = Vec::new();
    for (from, element, kind, ord, extra, p_col, i_col) in branches {
        let alias = &from[from.len() - 1..];
        let extra = match extra {
            "#element" => join_id_ref_sql("t.element_p", "t.element_i"),
            "#tag" => join_id_ref_sql("t.tag_p", "t.tag_i"),
            other => other.to_string(),
        };
        let (mut condition, branch_params) = target.condition(alias, p_col, i_col);
        if alias == "m" {
            condition.push_str(" AND m.is_ref = 1");
        }
        parts.push(format!(
            "SELECT {a}.package, {element}, {kind}, {ord}, {extra}, {target} FROM {from} WHERE {condition}",
            a = alias,
            target = join_id_ref_sql(&format!("{}.{}", alias, p_col), &format!("{}.{}", alias, i_col)),
        ));
        params.extend(branch_params);
    }
    (
        format!("{} ORDER BY 1, 2, 3, 4, 5", parts.join(" UNION ALL ")),
        params,
    )
}

pub(crate) fn reference_row(row: &Row<'_>) -> rusqlite::Result<Reference> {
    let kind: String = row.get(2)?;
    let ord: Option<i64> = row.get(3)?;
    let extra: String = row.get(4)?;
    let ord = ord.unwrap_or(0) as usize;
    let role = match kind.as_str() {
        "media" => ReferenceRole::Media,
        "model" => ReferenceRole::ContentModel,
        "member" => ReferenceRole::Member(ord),
        "item" => ReferenceRole::Item(ord),
        "tag" => ReferenceRole::Tag(extra),
        "tagged" => ReferenceRole::Tagged(extra),
        _ => ReferenceRole::Meta(extra),
    };
    Ok(Reference {
        package: row.get(0)?,
        element: row.get(1)?,
        role,
        target: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::schema::init_schema;

    fn store() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO Packages VALUES ('p1', 'urn:p1', '');
             INSERT INTO Packages VALUES ('p2', 'urn:p2', '');
             INSERT INTO Imports VALUES ('p2', 'i', 'file:/p1', 'urn:p1');
             INSERT INTO Annotations VALUES ('p1', 'a1', '', 'm1', 0, 10);
             INSERT INTO Annotations VALUES ('p2', 'a2', 'i', 'm1', 0, 10);
             INSERT INTO RelationMembers VALUES ('p2', 'r', 0, 'i', 'm1');
             INSERT INTO Tagged VALUES ('p2', 'i', 'm1', '', 't');
             INSERT INTO Meta VALUES ('p2', '', 'k', '', 1, 'i', 'm1');
             INSERT INTO Meta VALUES ('p2', '', 'plain', 'm1', 0, '', '');",
        )
        .unwrap();
        conn
    }

    fn all_references(conn: &Connection, target: &RefTarget<'_>) -> Vec<Reference> {
        let (sql, params) = references_sql(target);
        let mut stmt = conn.prepare(&sql).unwrap();
        stmt.query_map(rusqlite::params_from_iter(params), reference_row)
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_references_across_packages() {
        let conn = store();
        let pids = vec!["p1".to_string(), "p2".to_string()];
        let refs = all_references(
            &conn,
            &RefTarget::UriRef { pids: &pids, base: "urn:p1", id: "m1" },
        );

        let roles: Vec<(String, ReferenceRole)> =
            refs.iter().map(|r| (r.package.clone(), r.role.clone())).collect();
        assert_eq!(
            roles,
            vec![
                ("p1".to_string(), ReferenceRole::Media),
                ("p2".to_string(), ReferenceRole::Meta("k".to_string())),
                ("p2".to_string(), ReferenceRole::Tagged("t".to_string())),
                ("p2".to_string(), ReferenceRole::Media),
                ("p2".to_string(), ReferenceRole::Member(0)),
            ]
        );
        assert_eq!(refs[3].target, "i:m1");
    }

    #[test]
    fn test_references_through_import() {
        let conn = store();
        let refs = all_references(&conn, &RefTarget::Import { pid: "p2", prefix: "i" });
        assert_eq!(refs.len(), 4);
    }

    #[test]
    fn test_rename_references_everywhere() {
        let conn = store();
        let pids = vec!["p1".to_string(), "p2".to_string()];
        let changed = rename_references(&conn, &pids, "urn:p1", "m1", "m9").unwrap();
        assert_eq!(changed, 5);

        let plain: String = conn
            .query_row("SELECT value FROM Meta WHERE key = 'plain'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(plain, "m1");
        let members: String = conn
            .query_row("SELECT member_i FROM RelationMembers", [], |r| r.get(0))
            .unwrap();
        assert_eq!(members, "m9");
    }

    #[test]
    fn test_rename_prefix() {
        let conn = store();
        rename_prefix(&conn, "p2", "i", "j").unwrap();
        let prefixes: i64 = conn
            .query_row("SELECT COUNT(*) FROM RelationMembers WHERE member_p = 'j'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(prefixes, 1);
    }
}
