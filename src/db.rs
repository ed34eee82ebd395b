use std::path::Path;

use anyhow::Result;
use rusqlite::Connection;

use crate::sink::FinalRecord;

pub fn open(path: &Path) -> Result<Connection> {
    Ok(Connection::open(path)?)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS awards (
            id         INTEGER PRIMARY KEY,
            title      TEXT NOT NULL,
            winner     TEXT,
            amount     REAL NOT NULL DEFAULT 0,
            date       TEXT NOT NULL,
            url        TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_awards_winner ON awards(winner);
        ",
    )?;
    Ok(())
}

// ── Writing ──

/// Insert all rows in one transaction, preserving their order in `id`.
pub fn save_records(conn: &Connection, rows: &[FinalRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO awards (title, winner, amount, date, url) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for r in rows {
            count += stmt.execute(rusqlite::params![r.title, r.winner, r.amount, r.date, r.url])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Reading ──

pub fn fetch_records(conn: &Connection, limit: usize) -> Result<Vec<FinalRecord>> {
    let mut stmt = conn.prepare(
        "SELECT title, winner, amount, date, url FROM awards ORDER BY id LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(FinalRecord {
                title: row.get(0)?,
                winner: row.get(1)?,
                amount: row.get(2)?,
                date: row.get(3)?,
                url: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct Totals {
    pub rows: usize,
    pub winners: usize,
    pub amount: f64,
}

pub fn totals(conn: &Connection) -> Result<Totals> {
    let (rows, winners, amount) = conn.query_row(
        "SELECT COUNT(*), COUNT(DISTINCT winner), COALESCE(SUM(amount), 0.0) FROM awards",
        [],
        |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, f64>(2)?)),
    )?;
    Ok(Totals {
        rows: rows as usize,
        winners: winners as usize,
        amount,
    })
}
