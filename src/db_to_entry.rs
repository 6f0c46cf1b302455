// Lookup of entries and reconstruction of their hierarchical view from the
// normalized tables written by xml_to_db.

use itertools::Itertools;
use rusqlite::{Connection, Error as SqliteError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::common::{EntryKey, SenseIndex, SqliteId};
use crate::config;
use crate::grow_buf::{GrowBuf, GrowError};

// --- Error Handling ---
#[derive(Debug)]
pub enum RetrievalError {
    InvalidQuery(String),
    NotFound(EntryKey),
    QueryFailed {
        entry_key: Option<EntryKey>,
        source: SqliteError,
    },
    OutOfMemory(GrowError),
}

impl RetrievalError {
    fn for_entry(self, key: EntryKey) -> Self {
        match self {
            Self::QueryFailed {
                entry_key: None,
                source,
            } => Self::QueryFailed {
                entry_key: Some(key),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for RetrievalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidQuery(msg) => write!(f, "Invalid query: {}", msg),
            Self::NotFound(key) => write!(f, "No forms or readings for entry #{}", key),
            Self::QueryFailed {
                entry_key: Some(key),
                source,
            } => write!(f, "Query for entry #{} failed: {}", key, source),
            Self::QueryFailed {
                entry_key: None,
                source,
            } => write!(f, "Query failed: {}", source),
            Self::OutOfMemory(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RetrievalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            RetrievalError::InvalidQuery(_) => None,
            RetrievalError::NotFound(_) => None,
            RetrievalError::QueryFailed { ref source, .. } => Some(source),
            RetrievalError::OutOfMemory(ref source) => Some(source),
        }
    }
}

impl From<SqliteError> for RetrievalError {
    fn from(err: SqliteError) -> Self {
        Self::QueryFailed {
            entry_key: None,
            source: err,
        }
    }
}

impl From<GrowError> for RetrievalError {
    fn from(err: GrowError) -> Self {
        Self::OutOfMemory(err)
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;

// --- Query ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Written forms first, readings if no form matches.
    Auto,
    Kanji,
    Reading,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Words of the query, matched as one glob pattern joined by spaces.
    pub tokens: Vec<String>,
    pub mode: SearchMode,
    /// 1-based
    pub page: u32,
    pub page_size: u32,
    pub language: String,
}

impl SearchQuery {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SearchQuery {
            tokens: tokens.into_iter().map(Into::into).collect(),
            mode: SearchMode::Auto,
            page: 1,
            page_size: config::DEFAULT_PAGE_SIZE,
            language: config::DEFAULT_LANG.to_owned(),
        }
    }

    pub fn pattern(&self) -> String {
        self.tokens.iter().join(" ")
    }

    fn validate(&self) -> Result<()> {
        if self.tokens.iter().all(|t| t.trim().is_empty()) {
            return Err(RetrievalError::InvalidQuery("empty query".to_owned()));
        }
        if self.page == 0 || self.page_size == 0 {
            return Err(RetrievalError::InvalidQuery(format!(
                "page {} with page size {}",
                self.page, self.page_size
            )));
        }
        Ok(())
    }
}

// --- Reconstructed view ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadingView {
    pub id: SqliteId,
    pub text: String,
    pub is_primary_reading: bool,
    pub tags: Vec<String>,
    /// Ids of the forms this reading is limited to, empty if it applies to all.
    pub restricted_to: Vec<SqliteId>,
}

impl ReadingView {
    pub fn applies_to(&self, form_id: SqliteId) -> bool {
        self.restricted_to.is_empty() || self.restricted_to.contains(&form_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormView {
    pub id: SqliteId,
    pub text: String,
    pub tags: Vec<String>,
    pub readings: Vec<ReadingView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlossView {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gloss_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenseView {
    pub index: SenseIndex,
    pub parts_of_speech: Vec<String>,
    /// Only glosses in the requested language, in document order.
    pub glosses: Vec<GlossView>,
    pub cross_references: Vec<String>,
    pub notes: Vec<String>,
    pub misc: Vec<String>,
}

impl SenseView {
    fn new(index: SenseIndex) -> Self {
        SenseView {
            index,
            parts_of_speech: vec![],
            glosses: vec![],
            cross_references: vec![],
            notes: vec![],
            misc: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconstructedEntry {
    pub entry_key: EntryKey,
    /// Ordered by id, the first one is the headword.
    pub forms: Vec<FormView>,
    pub readings: Vec<ReadingView>,
    pub senses: Vec<SenseView>,
}

/// What is shown as the title of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Headword<'a> {
    pub form: Option<&'a FormView>,
    pub reading: Option<&'a ReadingView>,
}

impl ReconstructedEntry {
    /// First form with its first reading, or the first reading of an entry
    /// without written forms.
    pub fn headword(&self) -> Headword<'_> {
        match self.forms.first() {
            Some(form) => Headword {
                form: Some(form),
                reading: form.readings.first(),
            },
            None => Headword {
                form: None,
                reading: self.readings.first(),
            },
        }
    }

    pub fn other_forms(&self) -> &[FormView] {
        self.forms.get(1..).unwrap_or_default()
    }
}

#[derive(Debug)]
pub enum SearchOutcome {
    NoMatches,
    Matches {
        matched_on: SearchMode,
        /// One result per candidate entry, in candidate order.
        entries: Vec<Result<ReconstructedEntry>>,
    },
}

// --- Lookup ---

/// Distinct entry keys with a form (or reading) matching the glob `pattern`,
/// ordered by their first matching row.
pub fn find_entry_keys(
    conn: &Connection,
    pattern: &str,
    mode: SearchMode,
    page: u32,
    page_size: u32,
) -> Result<GrowBuf<EntryKey>> {
    let sql = match mode {
        SearchMode::Kanji | SearchMode::Auto => {
            "SELECT seqnum FROM jmdict_form WHERE text GLOB ?1 GROUP BY seqnum ORDER BY MIN(id) LIMIT ?2 OFFSET ?3"
        }
        SearchMode::Reading => {
            "SELECT seqnum FROM jmdict_reading WHERE text GLOB ?1 GROUP BY seqnum ORDER BY MIN(id) LIMIT ?2 OFFSET ?3"
        }
    };
    let offset = u64::from(page.saturating_sub(1)) * u64::from(page_size);
    // grows with the rows actually returned
    let mut keys = GrowBuf::new(page_size.min(config::DEFAULT_PAGE_SIZE) as usize)?;
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query((pattern, page_size, offset))?;
    while let Some(row) = rows.next()? {
        keys.push(row.get(0)?)?;
    }
    Ok(keys)
}

/// Look up `query` and reconstruct every matching entry. A failing entry does
/// not stop the others, its error is returned in its place.
pub fn search(conn: &Connection, query: &SearchQuery) -> Result<SearchOutcome> {
    query.validate()?;
    let pattern = query.pattern();
    let find = |mode| find_entry_keys(conn, &pattern, mode, query.page, query.page_size);

    let (matched_on, keys) = match query.mode {
        SearchMode::Auto => {
            let keys = find(SearchMode::Kanji)?;
            if keys.is_empty() {
                debug!("no kanji results for {:?}, trying reading", pattern);
                (SearchMode::Reading, find(SearchMode::Reading)?)
            } else {
                (SearchMode::Kanji, keys)
            }
        }
        mode => (mode, find(mode)?),
    };
    if keys.is_empty() {
        return Ok(SearchOutcome::NoMatches);
    }
    debug!(count = keys.len(), ?matched_on, "found matching entries");

    let db_to_entry = DbToEntry::new(conn, &query.language);
    let entries = keys
        .into_iter()
        .map(|key| {
            let entry = db_to_entry.reconstruct(key);
            if let Err(e) = &entry {
                warn!("{}", e);
            }
            entry
        })
        .collect();
    Ok(SearchOutcome::Matches {
        matched_on,
        entries,
    })
}

// --- Reconstruction ---

#[derive(Debug)]
pub struct DbToEntry<'a> {
    conn: &'a Connection,
    language: &'a str,
}

impl<'a> DbToEntry<'a> {
    pub fn new(conn: &'a Connection, language: &'a str) -> Self {
        DbToEntry { conn, language }
    }

    pub fn reconstruct(&self, entry_key: EntryKey) -> Result<ReconstructedEntry> {
        self.reconstruct_inner(entry_key)
            .map_err(|e| e.for_entry(entry_key))
    }

    fn reconstruct_inner(&self, entry_key: EntryKey) -> Result<ReconstructedEntry> {
        let forms = self.fetch_forms(entry_key)?;
        let readings = self.fetch_readings(entry_key)?;
        if forms.is_empty() && readings.is_empty() {
            return Err(RetrievalError::NotFound(entry_key));
        }

        let mut forms_with_readings = GrowBuf::new(forms.len())?;
        for form in forms {
            let mut form_readings = GrowBuf::new(readings.len())?;
            for reading in readings.iter().filter(|r| r.applies_to(form.id)) {
                form_readings.push(reading.clone())?;
            }
            forms_with_readings.push(FormView {
                readings: form_readings.into_vec(),
                ..form
            })?;
        }

        Ok(ReconstructedEntry {
            entry_key,
            forms: forms_with_readings.into_vec(),
            readings: readings.into_vec(),
            senses: self.fetch_senses(entry_key)?,
        })
    }

    fn fetch_texts(&self, sql: &str, owner_id: SqliteId) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let texts = stmt
            .query_map((owner_id,), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(texts)
    }

    fn fetch_forms(&self, entry_key: EntryKey) -> Result<GrowBuf<FormView>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, text FROM jmdict_form WHERE seqnum=?1 ORDER BY id")?;
        let rows = stmt
            .query_map((entry_key,), |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(SqliteId, String)>>>()?;

        let mut forms = GrowBuf::new(rows.len())?;
        for (id, text) in rows {
            forms.push(FormView {
                id,
                text,
                tags: self.fetch_texts(
                    "SELECT text FROM jmdict_form_tag WHERE form_id=?1 ORDER BY id",
                    id,
                )?,
                readings: vec![],
            })?;
        }
        Ok(forms)
    }

    fn fetch_readings(&self, entry_key: EntryKey) -> Result<GrowBuf<ReadingView>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, text, is_primary FROM jmdict_reading WHERE seqnum=?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map((entry_key,), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<(SqliteId, String, bool)>>>()?;

        let mut restr_stmt = self.conn.prepare_cached(
            "SELECT form_id FROM jmdict_reading_restr WHERE reading_id=?1 ORDER BY id",
        )?;
        let mut readings = GrowBuf::new(rows.len())?;
        for (id, text, is_primary_reading) in rows {
            let restricted_to = restr_stmt
                .query_map((id,), |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<SqliteId>>>()?;
            readings.push(ReadingView {
                id,
                text,
                is_primary_reading,
                tags: self.fetch_texts(
                    "SELECT text FROM jmdict_reading_tag WHERE reading_id=?1 ORDER BY id",
                    id,
                )?,
                restricted_to,
            })?;
        }
        Ok(readings)
    }

    fn fetch_senses(&self, entry_key: EntryKey) -> Result<Vec<SenseView>> {
        // a sense exists if any of its rows exists, whatever the language
        let sense_sql = std::iter::once("jmdict_gloss")
            .chain(config::SENSE_TEXT_TABLES.iter().copied())
            .map(|table| format!("SELECT sense FROM {} WHERE seqnum=?1", table))
            .join(" UNION ")
            + " ORDER BY sense";
        let mut stmt = self.conn.prepare_cached(&sense_sql)?;
        let mut senses: BTreeMap<SenseIndex, SenseView> = stmt
            .query_map((entry_key,), |row| row.get(0))?
            .map(|index| index.map(|index| (index, SenseView::new(index))))
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt = self.conn.prepare_cached(
            "SELECT sense, text, type, gender FROM jmdict_gloss WHERE seqnum=?1 AND lang=?2 ORDER BY sense, id",
        )?;
        let glosses = stmt
            .query_map((entry_key, self.language), |row| {
                Ok((
                    row.get::<_, SenseIndex>(0)?,
                    GlossView {
                        text: row.get(1)?,
                        gloss_type: row.get(2)?,
                        gender: row.get(3)?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (index, group) in &glosses.into_iter().chunk_by(|(index, _)| *index) {
            if let Some(sense) = senses.get_mut(&index) {
                sense.glosses.extend(group.map(|(_, gloss)| gloss));
            }
        }

        for table in config::SENSE_TEXT_TABLES {
            let mut stmt = self.conn.prepare_cached(&format!(
                "SELECT sense, text FROM {} WHERE seqnum=?1 ORDER BY sense, id",
                table
            ))?;
            let rows = stmt
                .query_map((entry_key,), |row| {
                    Ok((row.get::<_, SenseIndex>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (index, group) in &rows.into_iter().chunk_by(|(index, _)| *index) {
                let Some(sense) = senses.get_mut(&index) else {
                    continue;
                };
                let texts = match *table {
                    "jmdict_pos" => &mut sense.parts_of_speech,
                    "jmdict_xref" => &mut sense.cross_references,
                    "jmdict_sense_note" => &mut sense.notes,
                    _ => &mut sense.misc,
                };
                texts.extend(group.map(|(_, text)| text));
            }
        }

        Ok(senses.into_values().collect())
    }
}
