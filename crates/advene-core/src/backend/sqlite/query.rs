//! Small SQL builder for filtered iterations.

use rusqlite::types::Value;

use crate::backend::filter::{MetaFilter, MetaMatch};
use crate::idref::split_uri_ref;

/// SELECT statement assembled from optional conditions
pub(crate) struct Query {
    select: String,
    from: String,
    conditions: Vec<String>,
    params: Vec<Value>,
    order_by: String,
}

impl Query {
    pub fn new(select: &str, from: &str, order_by: &str) -> Self {
        Self {
            select: select.to_string(),
            from: from.to_string(),
            conditions: Vec::new(),
            params: Vec::new(),
            order_by: order_by.to_string(),
        }
    }

    /// Add a condition with `?` placeholders and their values, in order
    pub fn filter(&mut self, condition: impl Into<String>, params: Vec<Value>) -> &mut Self {
        self.conditions.push(condition.into());
        self.params.extend(params);
        self
    }

    /// `column IN (...)`; an empty set adds nothing
    pub fn filter_in(&mut self, column: &str, values: &[String]) -> &mut Self {
        if !values.is_empty() {
            let condition = format!("{} IN ({})", column, placeholders(values.len()));
            let params = values.iter().cloned().map(Value::Text).collect();
            self.filter(condition, params);
        }
        self
    }

    /// Restrict to a set of packages; an empty set matches nothing
    pub fn scope(&mut self, column: &str, pids: &[String]) -> &mut Self {
        if pids.is_empty() {
            self.filter("0", Vec::new())
        } else {
            self.filter_in(column, pids)
        }
    }

    pub fn filter_eq(&mut self, column: &str, value: Option<&str>) -> &mut Self {
        if let Some(v) = value {
            self.filter(format!("{} = ?", column), vec![text(v)]);
        }
        self
    }

    pub fn filter_int(&mut self, column: &str, op: &str, value: Option<i64>) -> &mut Self {
        if let Some(v) = value {
            self.filter(format!("{} {} ?", column, op), vec![Value::Integer(v)]);
        }
        self
    }

    /// Metadata constraints on the element `alias.package`, `alias.id`
    pub fn filter_meta(&mut self, alias: &str, meta: &MetaFilter) -> &mut Self {
        for (key, m) in &meta.0 {
            let owner = format!(
                "m.package = {alias}.package AND m.element = {alias}.id AND m.key = ?",
                alias = alias
            );
            match m {
                MetaMatch::Absent => {
                    self.filter(
                        format!("NOT EXISTS (SELECT 1 FROM Meta m WHERE {})", owner),
                        vec![text(key)],
                    );
                }
                MetaMatch::Plain(value) => {
                    self.filter(
                        format!(
                            "EXISTS (SELECT 1 FROM Meta m WHERE {} AND m.is_ref = 0 AND m.value = ?)",
                            owner
                        ),
                        vec![text(key), text(value)],
                    );
                }
                MetaMatch::Ref(uriref) => {
                    let (base, id) = split_uri_ref(uriref).unwrap_or(("", uriref.as_str()));
                    self.filter(
                        format!(
                            "EXISTS (SELECT 1 FROM Meta m WHERE {} AND m.is_ref = 1 AND {})",
                            owner,
                            matches_uri_ref("m", "value_p", "value_i")
                        ),
                        vec![text(key), text(id), text(base)],
                    );
                }
            }
        }
        self
    }

    pub fn sql(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.select, self.from);
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by);
        }
        sql
    }

    pub fn count_sql(&self) -> String {
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.from);
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        let sql = self.sql();
        (sql, self.params)
    }
}

pub(crate) fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Condition true when `alias.(p_col, i_col)` points at a uri-ref
///
/// Takes two parameters: the local id, then the package base.
pub(crate) fn matches_uri_ref(alias: &str, p_col: &str, i_col: &str) -> String {
    format!(
        "{a}.{i} = ? AND EXISTS (SELECT 1 FROM UriBases u \
         WHERE u.package = {a}.package AND u.prefix = {a}.{p} AND u.uri_base = ?)",
        a = alias,
        p = p_col,
        i = i_col
    )
}

/// SQL expression rebuilding an id-ref from a split pair
pub(crate) fn join_id_ref_sql(p_col: &str, i_col: &str) -> String {
    format!(
        "CASE WHEN {p} = '' THEN {i} ELSE {p} || ':' || {i} END",
        p = p_col,
        i = i_col
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_assembly() {
        let mut q = Query::new("e.id", "Elements e", "e.package, e.id");
        q.filter_in("e.package", &["p1".to_string(), "p2".to_string()])
            .filter_eq("e.typ", Some("t"))
            .filter_eq("e.id", None);

        assert_eq!(
            q.sql(),
            "SELECT e.id FROM Elements e WHERE e.package IN (?, ?) AND e.typ = ? \
             ORDER BY e.package, e.id"
        );
        assert_eq!(q.params().len(), 3);
        assert_eq!(
            q.count_sql(),
            "SELECT COUNT(*) FROM Elements e WHERE e.package IN (?, ?) AND e.typ = ?"
        );
    }

    #[test]
    fn test_empty_in_is_unconstrained() {
        let mut q = Query::new("*", "Medias", "");
        q.filter_in("id", &[]);
        assert_eq!(q.sql(), "SELECT * FROM Medias");
    }

    #[test]
    fn test_meta_ref_params_order() {
        let mut q = Query::new("e.id", "Elements e", "");
        q.filter_meta("e", &MetaFilter::reference("k", "urn:p#t1"));
        let params = q.params();
        assert_eq!(params[0], text("k"));
        assert_eq!(params[1], text("t1"));
        assert_eq!(params[2], text("urn:p"));
    }
}
