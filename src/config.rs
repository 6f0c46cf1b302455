/// Read buffer size for the XML input stream.
pub const XML_BUF_SIZE: usize = 1 << 15;
/// Number of entries committed per transaction during import.
pub const COMMIT_FREQ: usize = 50_000;
/// Gloss language when the `xml:lang` attribute is absent.
pub const DEFAULT_LANG: &str = "eng";
pub const DEFAULT_PAGE_SIZE: u32 = 5;
/// Initial capacity of the text accumulation buffer.
pub const TEXT_BUF_CAPACITY: usize = 256;

pub const ROOT_ELEMENT: &str = "JMdict";
pub const ENTRY_ELEMENT: &str = "entry";

pub const DB_SCHEMA: &str = r#"

PRAGMA user_version = 1;
/* A written (kanji) form of an entry. seqnum is the JMdict sequence number shared by all rows of one entry. */
CREATE TABLE IF NOT EXISTS "jmdict_form" (
	"id" INTEGER NOT NULL UNIQUE,
	"seqnum" INTEGER NOT NULL,
	"text" TEXT NOT NULL,
	PRIMARY KEY("id")
);

/* ke_inf annotations of a written form */
CREATE TABLE IF NOT EXISTS "jmdict_form_tag" (
	"id" INTEGER NOT NULL UNIQUE,
	"form_id" INTEGER NOT NULL,
	"text" TEXT NOT NULL,
	PRIMARY KEY("id"),
	FOREIGN KEY ("form_id") REFERENCES "jmdict_form"("id")
	ON UPDATE NO ACTION ON DELETE CASCADE
);

/* is_primary is cleared for readings marked with re_nokanji */
CREATE TABLE IF NOT EXISTS "jmdict_reading" (
	"id" INTEGER NOT NULL UNIQUE,
	"seqnum" INTEGER NOT NULL,
	"text" TEXT NOT NULL,
	"is_primary" INTEGER NOT NULL DEFAULT 1,
	PRIMARY KEY("id")
);

/* A reading with rows in this table applies only to the listed forms, otherwise to all forms of the entry */
CREATE TABLE IF NOT EXISTS "jmdict_reading_restr" (
	"id" INTEGER NOT NULL UNIQUE,
	"reading_id" INTEGER NOT NULL,
	"form_id" INTEGER NOT NULL,
	PRIMARY KEY("id"),
	FOREIGN KEY ("reading_id") REFERENCES "jmdict_reading"("id")
	ON UPDATE NO ACTION ON DELETE CASCADE,
	FOREIGN KEY ("form_id") REFERENCES "jmdict_form"("id")
	ON UPDATE NO ACTION ON DELETE CASCADE
);

/* re_inf annotations of a reading */
CREATE TABLE IF NOT EXISTS "jmdict_reading_tag" (
	"id" INTEGER NOT NULL UNIQUE,
	"reading_id" INTEGER NOT NULL,
	"text" TEXT NOT NULL,
	PRIMARY KEY("id"),
	FOREIGN KEY ("reading_id") REFERENCES "jmdict_reading"("id")
	ON UPDATE NO ACTION ON DELETE CASCADE
);

/* sense is the 1-based position of the sense within the entry */
CREATE TABLE IF NOT EXISTS "jmdict_gloss" (
	"id" INTEGER NOT NULL UNIQUE,
	"seqnum" INTEGER NOT NULL,
	"sense" INTEGER NOT NULL,
	"lang" TEXT NOT NULL,
	"text" TEXT NOT NULL,
	"type" TEXT,
	"gender" TEXT,
	PRIMARY KEY("id")
);

/* part of speech */
CREATE TABLE IF NOT EXISTS "jmdict_pos" (
	"id" INTEGER NOT NULL UNIQUE,
	"seqnum" INTEGER NOT NULL,
	"sense" INTEGER NOT NULL,
	"text" TEXT NOT NULL,
	PRIMARY KEY("id")
);

/* cross-references are kept as opaque text */
CREATE TABLE IF NOT EXISTS "jmdict_xref" (
	"id" INTEGER NOT NULL UNIQUE,
	"seqnum" INTEGER NOT NULL,
	"sense" INTEGER NOT NULL,
	"text" TEXT NOT NULL,
	PRIMARY KEY("id")
);

/* s_inf */
CREATE TABLE IF NOT EXISTS "jmdict_sense_note" (
	"id" INTEGER NOT NULL UNIQUE,
	"seqnum" INTEGER NOT NULL,
	"sense" INTEGER NOT NULL,
	"text" TEXT NOT NULL,
	PRIMARY KEY("id")
);

CREATE TABLE IF NOT EXISTS "jmdict_sense_misc" (
	"id" INTEGER NOT NULL UNIQUE,
	"seqnum" INTEGER NOT NULL,
	"sense" INTEGER NOT NULL,
	"text" TEXT NOT NULL,
	PRIMARY KEY("id")
);

"#;

/// Indices created once the import has been committed. Failures are not fatal.
pub const DB_INDICES: &[&str] = &[
    r#"CREATE INDEX IF NOT EXISTS "jmdict_form_index_0" ON "jmdict_form" ("seqnum")"#,
    r#"CREATE INDEX IF NOT EXISTS "jmdict_form_index_1" ON "jmdict_form" ("text")"#,
    r#"CREATE INDEX IF NOT EXISTS "jmdict_reading_index_0" ON "jmdict_reading" ("seqnum")"#,
    r#"CREATE INDEX IF NOT EXISTS "jmdict_reading_index_1" ON "jmdict_reading" ("text")"#,
    r#"CREATE INDEX IF NOT EXISTS "jmdict_reading_restr_index_0" ON "jmdict_reading_restr" ("form_id")"#,
    r#"CREATE INDEX IF NOT EXISTS "jmdict_reading_restr_index_1" ON "jmdict_reading_restr" ("reading_id")"#,
    r#"CREATE INDEX IF NOT EXISTS "jmdict_form_tag_index_0" ON "jmdict_form_tag" ("form_id")"#,
    r#"CREATE INDEX IF NOT EXISTS "jmdict_reading_tag_index_0" ON "jmdict_reading_tag" ("reading_id")"#,
    r#"CREATE INDEX IF NOT EXISTS "jmdict_gloss_index_0" ON "jmdict_gloss" ("seqnum", "sense")"#,
    r#"CREATE INDEX IF NOT EXISTS "jmdict_gloss_index_1" ON "jmdict_gloss" ("lang")"#,
    r#"CREATE INDEX IF NOT EXISTS "jmdict_pos_index_0" ON "jmdict_pos" ("seqnum", "sense")"#,
    r#"CREATE INDEX IF NOT EXISTS "jmdict_xref_index_0" ON "jmdict_xref" ("seqnum", "sense")"#,
    r#"CREATE INDEX IF NOT EXISTS "jmdict_sense_note_index_0" ON "jmdict_sense_note" ("seqnum", "sense")"#,
    r#"CREATE INDEX IF NOT EXISTS "jmdict_sense_misc_index_0" ON "jmdict_sense_misc" ("seqnum", "sense")"#,
];

/// Tables with one text column per sense row, besides `jmdict_gloss`.
pub const SENSE_TEXT_TABLES: &[&str] = &[
    "jmdict_pos",
    "jmdict_xref",
    "jmdict_sense_note",
    "jmdict_sense_misc",
];
