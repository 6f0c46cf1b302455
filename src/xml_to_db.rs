use std::fmt;
use std::io::BufRead;
use std::time::{Duration, Instant};

use nom::{
    IResult, Parser,
    character::complete::{multispace0, u32},
    combinator::all_consuming,
    sequence::delimited,
};
use rusqlite::{Connection, Error as SqliteError, OptionalExtension, Params};
use tracing::{debug, info, warn};

use crate::common::{EntryKey, SenseIndex, SqliteId};
use crate::config;
use crate::grow_buf::GrowError;
use crate::xml_cursor::{DocumentShape, ElementHandler, XmlCursor, XmlError};

#[derive(Debug)]
pub enum ImportError {
    MalformedDocument(String),
    OutOfMemory(GrowError),
    DanglingReference {
        entry_key: EntryKey,
        form_text: String,
    },
    StorageError {
        operation: &'static str,
        source: SqliteError,
    },
    Read(String),
}

pub type Result<T> = std::result::Result<T, ImportError>;

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedDocument(msg) => write!(f, "Malformed document: {}", msg),
            Self::OutOfMemory(e) => write!(f, "{}", e),
            Self::DanglingReference {
                entry_key,
                form_text,
            } => write!(
                f,
                "Reading restriction of entry #{} refers to unknown form {}",
                entry_key, form_text
            ),
            Self::StorageError { operation, source } => {
                write!(f, "Failed to {}: {}", operation, source)
            }
            Self::Read(e) => write!(f, "Read error: {}", e),
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            ImportError::MalformedDocument(_) => None,
            ImportError::OutOfMemory(ref source) => Some(source),
            ImportError::DanglingReference { .. } => None,
            ImportError::StorageError { ref source, .. } => Some(source),
            ImportError::Read(_) => None,
        }
    }
}

impl From<XmlError> for ImportError {
    fn from(err: XmlError) -> Self {
        match err {
            XmlError::OutOfMemory(e) => Self::OutOfMemory(e),
            XmlError::Read(e) => Self::Read(e),
            e @ (XmlError::Malformed { .. } | XmlError::UnexpectedElement { .. }) => {
                Self::MalformedDocument(e.to_string())
            }
        }
    }
}

fn storage(operation: &'static str) -> impl FnOnce(SqliteError) -> ImportError {
    move |source| ImportError::StorageError { operation, source }
}

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    /// Entries per committed transaction.
    pub batch_size: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            batch_size: config::COMMIT_FREQ,
        }
    }
}

#[derive(Debug)]
pub struct ImportReport {
    pub imported_count: usize,
    pub committed_count: usize,
    pub batches_committed: usize,
    pub elapsed: Duration,
    pub result: Result<()>,
}

impl ImportReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs();
        let (hour, min, sec) = (secs / 3600, secs / 60 % 60, secs % 60);
        let taken = if hour > 0 {
            format!("{}h {}m {}s", hour, min, sec)
        } else if min > 0 {
            format!("{}m {}s", min, sec)
        } else {
            format!("{}s", sec)
        };
        match &self.result {
            Ok(()) => write!(f, "Imported {} entries in {}", self.imported_count, taken),
            Err(e) => write!(
                f,
                "Import failed after {} entries ({} committed in {} batches) in {}: {}",
                self.imported_count, self.committed_count, self.batches_committed, taken, e
            ),
        }
    }
}

/// Ids of the rows the next child elements link to. Reset for every entry.
#[derive(Debug, Default)]
struct ImportContext {
    entry_key: Option<EntryKey>,
    form_id: Option<SqliteId>,
    reading_id: Option<SqliteId>,
    sense_index: SenseIndex,
    imported: usize,
    committed: usize,
    batches: usize,
}

impl ImportContext {
    fn reset_entry(&mut self) {
        self.entry_key = None;
        self.form_id = None;
        self.reading_id = None;
        self.sense_index = 0;
    }
}

fn entry_key_digits(input: &str) -> IResult<&str, u32> {
    all_consuming(delimited(multispace0, u32, multispace0)).parse(input)
}

fn parse_entry_key(text: &str) -> Result<EntryKey> {
    entry_key_digits(text)
        .map(|(_, seqnum)| EntryKey::from(seqnum))
        .map_err(|e| ImportError::MalformedDocument(format!("invalid ent_seq {:?}: {}", text, e)))
}

#[derive(Debug)]
pub struct XmlToDb<'a> {
    conn: &'a Connection,
    batch_size: usize,
    ctx: ImportContext,
}

impl<'a> XmlToDb<'a> {
    pub fn new(conn: &'a Connection, options: &ImportOptions) -> Self {
        XmlToDb {
            conn,
            batch_size: options.batch_size.max(1),
            ctx: ImportContext::default(),
        }
    }

    /// Import the whole document. Batches committed before a failure stay in
    /// the database, the batch in flight is rolled back.
    pub fn xml_to_db<R: BufRead>(&mut self, input: R) -> Result<()> {
        let mut cursor = XmlCursor::new(DocumentShape::default())?;
        self.conn
            .execute_batch(config::DB_SCHEMA)
            .map_err(storage("create schema"))?;
        self.conn
            .execute_batch("BEGIN TRANSACTION")
            .map_err(storage("begin transaction"))?;

        let result = cursor.parse(input, self).and_then(|()| self.commit());
        if result.is_err() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("rollback of the current batch failed: {}", e);
            }
        }
        result
    }

    pub fn imported_count(&self) -> usize {
        self.ctx.imported
    }

    /// Entries that are part of a committed transaction.
    pub fn committed_count(&self) -> usize {
        self.ctx.committed
    }

    pub fn batches_committed(&self) -> usize {
        self.ctx.batches
    }

    fn commit(&mut self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(storage("commit transaction"))?;
        if self.ctx.imported > self.ctx.committed {
            self.ctx.batches += 1;
            self.ctx.committed = self.ctx.imported;
        }
        debug!(
            entries = self.ctx.imported,
            batches = self.ctx.batches,
            "committed batch"
        );
        Ok(())
    }

    fn next_batch(&mut self) -> Result<()> {
        self.commit()?;
        self.conn
            .execute_batch("BEGIN TRANSACTION")
            .map_err(storage("begin transaction"))
    }

    fn insert<P: Params>(&self, operation: &'static str, sql: &str, params: P) -> Result<SqliteId> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(storage(operation))?;
        stmt.execute(params).map_err(storage(operation))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn entry_key(&self, element: &str) -> Result<EntryKey> {
        self.ctx.entry_key.ok_or_else(|| {
            ImportError::MalformedDocument(format!("<{}> outside of an entry with <ent_seq>", element))
        })
    }

    fn form_id(&self, element: &str) -> Result<SqliteId> {
        self.ctx.form_id.ok_or_else(|| {
            ImportError::MalformedDocument(format!("<{}> without a preceding <keb>", element))
        })
    }

    fn reading_id(&self, element: &str) -> Result<SqliteId> {
        self.ctx.reading_id.ok_or_else(|| {
            ImportError::MalformedDocument(format!("<{}> without a preceding <reb>", element))
        })
    }

    fn sense(&self, element: &str) -> Result<(EntryKey, SenseIndex)> {
        let entry_key = self.entry_key(element)?;
        if self.ctx.sense_index == 0 {
            return Err(ImportError::MalformedDocument(format!(
                "<{}> outside of a <sense>",
                element
            )));
        }
        Ok((entry_key, self.ctx.sense_index))
    }

    fn close_entry(&mut self) -> Result<()> {
        debug!(entry_key = ?self.ctx.entry_key, "inserted entry");
        self.ctx.reset_entry();
        self.ctx.imported += 1;
        if self.ctx.imported % self.batch_size == 0 {
            self.next_batch()?;
        }
        Ok(())
    }

    fn create_form_entry(&mut self, text: &str) -> Result<()> {
        let entry_key = self.entry_key("keb")?;
        let form_id = self.insert(
            "insert written form",
            "INSERT INTO jmdict_form (seqnum, text) VALUES (?1,?2)",
            (entry_key, text),
        )?;
        self.ctx.form_id = Some(form_id);
        Ok(())
    }

    fn create_reading_entry(&mut self, text: &str) -> Result<()> {
        let entry_key = self.entry_key("reb")?;
        let reading_id = self.insert(
            "insert reading",
            "INSERT INTO jmdict_reading (seqnum, text, is_primary) VALUES (?1,?2,1)",
            (entry_key, text),
        )?;
        self.ctx.reading_id = Some(reading_id);
        Ok(())
    }

    fn create_restriction_entry(&mut self, form_text: &str) -> Result<()> {
        let entry_key = self.entry_key("re_restr")?;
        let reading_id = self.reading_id("re_restr")?;
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM jmdict_form WHERE seqnum=?1 AND text=?2 ORDER BY id DESC")
            .map_err(storage("look up restricted form"))?;
        let form_id: Option<SqliteId> = stmt
            .query_row((entry_key, form_text), |row| row.get(0))
            .optional()
            .map_err(storage("look up restricted form"))?;
        let Some(form_id) = form_id else {
            return Err(ImportError::DanglingReference {
                entry_key,
                form_text: form_text.to_owned(),
            });
        };
        self.insert(
            "insert reading restriction",
            "INSERT INTO jmdict_reading_restr (reading_id, form_id) VALUES (?1,?2)",
            (reading_id, form_id),
        )?;
        Ok(())
    }

    fn clear_primary_reading(&mut self) -> Result<()> {
        let reading_id = self.reading_id("re_nokanji")?;
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE jmdict_reading SET is_primary = 0 WHERE id = ?1")
            .map_err(storage("clear primary reading"))?;
        stmt.execute((reading_id,))
            .map_err(storage("clear primary reading"))?;
        Ok(())
    }

    fn create_gloss_entry(&mut self, cursor: &XmlCursor) -> Result<()> {
        let (entry_key, sense_index) = self.sense("gloss")?;
        let lang = cursor.attribute("xml:lang").unwrap_or(config::DEFAULT_LANG);
        self.insert(
            "insert gloss",
            "INSERT INTO jmdict_gloss (seqnum, sense, lang, text, type, gender) VALUES (?1,?2,?3,?4,?5,?6)",
            (
                entry_key,
                sense_index,
                lang,
                cursor.text(),
                cursor.attribute("g_type"),
                cursor.attribute("g_gend"),
            ),
        )?;
        Ok(())
    }

    fn create_sense_text_entry(&mut self, element: &str, text: &str) -> Result<()> {
        let (entry_key, sense_index) = self.sense(element)?;
        let (operation, sql) = match element {
            "pos" => (
                "insert part of speech",
                "INSERT INTO jmdict_pos (seqnum, sense, text) VALUES (?1,?2,?3)",
            ),
            "xref" => (
                "insert cross-reference",
                "INSERT INTO jmdict_xref (seqnum, sense, text) VALUES (?1,?2,?3)",
            ),
            "s_inf" => (
                "insert sense note",
                "INSERT INTO jmdict_sense_note (seqnum, sense, text) VALUES (?1,?2,?3)",
            ),
            _ => (
                "insert sense misc",
                "INSERT INTO jmdict_sense_misc (seqnum, sense, text) VALUES (?1,?2,?3)",
            ),
        };
        self.insert(operation, sql, (entry_key, sense_index, text))?;
        Ok(())
    }
}

impl ElementHandler for XmlToDb<'_> {
    type Error = ImportError;

    fn start_element(&mut self, cursor: &XmlCursor) -> Result<()> {
        match cursor.name() {
            "entry" => self.ctx.reset_entry(),
            "sense" => self.ctx.sense_index += 1,
            _ => {}
        }
        Ok(())
    }

    fn end_element(&mut self, cursor: &XmlCursor) -> Result<()> {
        let text = cursor.text();
        match cursor.name() {
            "entry" => self.close_entry()?,
            "ent_seq" => self.ctx.entry_key = Some(parse_entry_key(text)?),
            "keb" => self.create_form_entry(text)?,
            "reb" => self.create_reading_entry(text)?,
            "ke_inf" => {
                let form_id = self.form_id("ke_inf")?;
                self.insert(
                    "insert form tag",
                    "INSERT INTO jmdict_form_tag (form_id, text) VALUES (?1,?2)",
                    (form_id, text),
                )?;
            }
            "re_inf" => {
                let reading_id = self.reading_id("re_inf")?;
                self.insert(
                    "insert reading tag",
                    "INSERT INTO jmdict_reading_tag (reading_id, text) VALUES (?1,?2)",
                    (reading_id, text),
                )?;
            }
            "re_restr" => self.create_restriction_entry(text)?,
            "re_nokanji" => self.clear_primary_reading()?,
            "gloss" => self.create_gloss_entry(cursor)?,
            element @ ("pos" | "xref" | "s_inf" | "misc") => {
                self.create_sense_text_entry(element, text)?;
            }
            // ke_pri, re_pri, lsource, dial, stagk, ... are not stored
            _ => {}
        }
        Ok(())
    }
}

/// Create the indices used by lookups. Failures are logged only, the indices
/// can be rebuilt at any time.
pub fn create_indices(conn: &Connection) -> usize {
    let mut created = 0;
    for sql in config::DB_INDICES {
        match conn.execute_batch(sql) {
            Ok(()) => created += 1,
            Err(e) => warn!("index creation failed ({}): {}", sql, e),
        }
    }
    created
}

/// Import a JMdict document read from `input` into `conn`.
pub fn import<R: BufRead>(input: R, conn: &Connection, options: &ImportOptions) -> ImportReport {
    let start = Instant::now();
    info!(batch_size = options.batch_size, "importing dictionary");
    let mut xml_to_db = XmlToDb::new(conn, options);
    let result = xml_to_db.xml_to_db(input);
    let report = ImportReport {
        imported_count: xml_to_db.imported_count(),
        committed_count: xml_to_db.committed_count(),
        batches_committed: xml_to_db.batches_committed(),
        elapsed: start.elapsed(),
        result,
    };
    info!("{}", report);
    if report.is_ok() {
        info!("creating indices");
        create_indices(conn);
    }
    report
}
