//! Ordered collections: relation members and list items
//!
//! Positions are dense (`0..n`). Shifting a range of positions would
//! collide with the primary key mid-update, so shifts go through negative
//! values in two statements.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::idref::split_id_ref;

use super::query::join_id_ref_sql;

/// Table layout of one kind of ordered collection
pub(crate) struct Sequence {
    pub table: &'static str,
    pub owner: &'static str,
    pub p_col: &'static str,
    pub i_col: &'static str,
}

pub(crate) const MEMBERS: Sequence = Sequence {
    table: "RelationMembers",
    owner: "relation",
    p_col: "member_p",
    i_col: "member_i",
};

pub(crate) const ITEMS: Sequence = Sequence {
    table: "ListItems",
    owner: "list",
    p_col: "item_p",
    i_col: "item_i",
};

impl Sequence {
    pub fn count(&self, conn: &Connection, pid: &str, id: &str) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE package = ?1 AND {} = ?2",
            self.table, self.owner
        );
        let n: i64 = conn.query_row(&sql, params![pid, id], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Insert `idref` at `pos`, or append when `pos` is `None`
    pub fn insert(
        &self,
        conn: &Connection,
        pid: &str,
        id: &str,
        idref: &str,
        pos: Option<usize>,
    ) -> Result<()> {
        let n = self.count(conn, pid, id)?;
        let pos = match pos {
            None => n,
            Some(p) if p <= n => p,
            Some(p) => return Err(out_of_range(p, n)),
        };
        if pos < n {
            conn.execute(
                &format!(
                    "UPDATE {} SET ord = -ord - 1 WHERE package = ?1 AND {} = ?2 AND ord >= ?3",
                    self.table, self.owner
                ),
                params![pid, id, pos as i64],
            )?;
            self.restore_signs(conn, pid, id, "-ord")?;
        }
        let (prefix, local) = split_id_ref(idref);
        conn.execute(
            &format!(
                "INSERT INTO {} (package, {}, ord, {}, {}) VALUES (?1, ?2, ?3, ?4, ?5)",
                self.table, self.owner, self.p_col, self.i_col
            ),
            params![pid, id, pos as i64, prefix.unwrap_or(""), local],
        )?;
        Ok(())
    }

    pub fn update(&self, conn: &Connection, pid: &str, id: &str, pos: usize, idref: &str) -> Result<()> {
        let (prefix, local) = split_id_ref(idref);
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} = ?4, {} = ?5 WHERE package = ?1 AND {} = ?2 AND ord = ?3",
                self.table, self.p_col, self.i_col, self.owner
            ),
            params![pid, id, pos as i64, prefix.unwrap_or(""), local],
        )?;
        if changed == 0 {
            return Err(out_of_range(pos, self.count(conn, pid, id)?));
        }
        Ok(())
    }

    pub fn remove(&self, conn: &Connection, pid: &str, id: &str, pos: usize) -> Result<()> {
        let removed = conn.execute(
            &format!(
                "DELETE FROM {} WHERE package = ?1 AND {} = ?2 AND ord = ?3",
                self.table, self.owner
            ),
            params![pid, id, pos as i64],
        )?;
        if removed == 0 {
            return Err(out_of_range(pos, self.count(conn, pid, id)?));
        }
        conn.execute(
            &format!(
                "UPDATE {} SET ord = -ord WHERE package = ?1 AND {} = ?2 AND ord > ?3",
                self.table, self.owner
            ),
            params![pid, id, pos as i64],
        )?;
        self.restore_signs(conn, pid, id, "-ord - 1")
    }

    fn restore_signs(&self, conn: &Connection, pid: &str, id: &str, expr: &str) -> Result<()> {
        conn.execute(
            &format!(
                "UPDATE {} SET ord = {} WHERE package = ?1 AND {} = ?2 AND ord < 0",
                self.table, expr, self.owner
            ),
            params![pid, id],
        )?;
        Ok(())
    }

    pub fn get(&self, conn: &Connection, pid: &str, id: &str, pos: usize) -> Result<Option<String>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE package = ?1 AND {} = ?2 AND ord = ?3",
            join_id_ref_sql(self.p_col, self.i_col),
            self.table,
            self.owner
        );
        Ok(conn
            .query_row(&sql, params![pid, id, pos as i64], |row| row.get(0))
            .optional()?)
    }

    /// Id-refs in order; takes the package and owner ids as parameters
    pub fn iter_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE package = ? AND {} = ? ORDER BY ord",
            join_id_ref_sql(self.p_col, self.i_col),
            self.table,
            self.owner
        )
    }
}

fn out_of_range(pos: usize, len: usize) -> Error {
    Error::model(format!("index {} out of range (length {})", pos, len))
}
