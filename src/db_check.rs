use itertools::Itertools;
use regex::Regex;
use rusqlite::{Connection, Error as SqliteError};

use crate::common::{EntryKey, SenseIndex};
use crate::config;

/// Hiragana, katakana, the prolonged sound mark and the punctuation found in
/// readings (middle dot, iteration marks, ascii and full-width spaces).
fn kana_only_regex() -> Regex {
    // the pattern is a literal, so this cannot fail
    Regex::new(r"^[\x{3041}-\x{309F}\x{30A0}-\x{30FF}\x{3005}\x{301C}\x{FF5E}\x{3000} ]+$")
        .unwrap_or_else(|e| unreachable!("{e}"))
}

fn check_sense_indices(conn: &Connection, errors: &mut Vec<String>) -> Result<(), SqliteError> {
    let sql = std::iter::once("jmdict_gloss")
        .chain(config::SENSE_TEXT_TABLES.iter().copied())
        .map(|table| format!("SELECT seqnum, sense FROM {table}"))
        .join(" UNION ")
        + " ORDER BY seqnum, sense";
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, EntryKey>(0)?, row.get::<_, SenseIndex>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (seqnum, senses) in &rows.into_iter().chunk_by(|(seqnum, _)| *seqnum) {
        let senses: Vec<SenseIndex> = senses.map(|(_, sense)| sense).collect();
        if !senses.iter().zip(1..).all(|(sense, expected)| *sense == expected) {
            errors.push(format!(
                "Validation Error: entry #{} has non-contiguous senses: {}",
                seqnum,
                senses.iter().join(", ")
            ));
        }
    }
    Ok(())
}

fn check_orphaned_senses(conn: &Connection, errors: &mut Vec<String>) -> Result<(), SqliteError> {
    let sql = std::iter::once("jmdict_gloss")
        .chain(config::SENSE_TEXT_TABLES.iter().copied())
        .map(|table| format!("SELECT seqnum FROM {table}"))
        .join(" UNION ");
    let mut stmt = conn.prepare(&format!(
        "SELECT s.seqnum FROM ({sql}) s
        WHERE NOT EXISTS (SELECT 1 FROM jmdict_form f WHERE f.seqnum = s.seqnum)
        AND NOT EXISTS (SELECT 1 FROM jmdict_reading r WHERE r.seqnum = s.seqnum)
        ORDER BY s.seqnum"
    ))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let seqnum: EntryKey = row.get(0)?;
        errors.push(format!(
            "Validation Error: entry #{} has senses but no form or reading",
            seqnum
        ));
    }
    Ok(())
}

fn check_restrictions(conn: &Connection, errors: &mut Vec<String>) -> Result<(), SqliteError> {
    let mut stmt = conn.prepare(
        "SELECT r.seqnum, r.text, f.seqnum, f.text
        FROM jmdict_reading_restr rr
        JOIN jmdict_reading r ON rr.reading_id = r.id
        JOIN jmdict_form f ON rr.form_id = f.id
        WHERE r.seqnum != f.seqnum
        ORDER BY rr.id",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let reading_seqnum: EntryKey = row.get(0)?;
        let reading: String = row.get(1)?;
        let form_seqnum: EntryKey = row.get(2)?;
        let form: String = row.get(3)?;
        errors.push(format!(
            "Validation Error: reading {} of entry #{} is restricted to form {} of entry #{}",
            reading, reading_seqnum, form, form_seqnum
        ));
    }
    Ok(())
}

fn check_reading_text(conn: &Connection, errors: &mut Vec<String>) -> Result<(), SqliteError> {
    let kana_only = kana_only_regex();
    let mut stmt = conn.prepare("SELECT seqnum, text FROM jmdict_reading ORDER BY id")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let seqnum: EntryKey = row.get(0)?;
        let text: String = row.get(1)?;
        if !kana_only.is_match(&text) {
            errors.push(format!(
                "Validation Error: reading {} of entry #{} contains non-kana characters",
                text, seqnum
            ));
        }
    }
    Ok(())
}

/// Report stored data that breaks the structure produced by the importer.
/// Read-only.
pub fn check_entries(conn: &Connection) -> Result<Vec<String>, SqliteError> {
    let mut errors = vec![];
    check_sense_indices(conn, &mut errors)?;
    check_orphaned_senses(conn, &mut errors)?;
    check_restrictions(conn, &mut errors)?;
    check_reading_text(conn, &mut errors)?;
    Ok(errors)
}
