use jdic::config;
use jdic::db_check;
use jdic::db_to_entry::{self, ReconstructedEntry, SearchMode, SearchOutcome, SearchQuery};
use jdic::xml_to_db::{self, ImportOptions};

use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, anyhow, bail};
use itertools::Itertools;
use rusqlite::Connection;

#[derive(Parser)]
#[command(name = "jdic")]
#[command(version = "0.1.0")]
#[command(about = "JMdict importer and lookup tool", long_about = None)]
struct Cli {
    /// Words to look up, `*` and `?` match any characters
    query: Vec<String>,

    /// Dictionary database (sqlite)
    #[arg(short, long, default_value = "db.sqlite3")]
    db: PathBuf,

    /// Import a JMdict XML file into the database before searching
    #[arg(short, long)]
    import: Option<PathBuf>,

    /// Only match written (kanji) forms
    #[arg(short, long, conflicts_with = "reading")]
    kanji: bool,

    /// Only match readings
    #[arg(short, long)]
    reading: bool,

    /// Maximum number of entries per page
    #[arg(short = 'm', long, default_value_t = config::DEFAULT_PAGE_SIZE)]
    max: u32,

    /// Page of results to show, starting at 1
    #[arg(short, long, default_value_t = 1)]
    page: u32,

    /// Language of the glosses to show
    #[arg(short, long, default_value = config::DEFAULT_LANG)]
    lang: String,

    /// Entries per committed transaction during import
    #[arg(long, default_value_t = config::COMMIT_FREQ)]
    batch_size: usize,

    /// Print the results as JSON
    #[arg(long)]
    json: bool,

    /// Omit parts of speech and cross-references
    #[arg(long)]
    fast: bool,

    /// Log more (-v info, -vv debug), otherwise RUST_LOG is used
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(cli: &Cli) {
    let filter = match cli.verbose {
        0 => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into()),
        1 => tracing_subscriber::EnvFilter::new("info"),
        _ => tracing_subscriber::EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn import(cli: &Cli, conn: &Connection) -> anyhow::Result<()> {
    let Some(path) = &cli.import else {
        return Ok(());
    };
    let file = File::open(path).context(format!("Could not open JMdict file {}", path.display()))?;
    let reader = BufReader::with_capacity(config::XML_BUF_SIZE, file);
    let report = xml_to_db::import(reader, conn, &ImportOptions {
        batch_size: cli.batch_size,
    });
    if !report.is_ok() {
        bail!("{}", report);
    }
    println!("{}", report);

    let errors = db_check::check_entries(conn).context("Consistency check failed")?;
    for err in errors {
        eprintln!("{err}");
    }
    Ok(())
}

fn write_entry<W: Write>(out: &mut W, entry: &ReconstructedEntry, fast: bool) -> io::Result<()> {
    let headword = entry.headword();
    match (headword.form, headword.reading) {
        (Some(form), Some(reading)) if reading.is_primary_reading => {
            writeln!(out, "{}【{}】", form.text, reading.text)?;
        }
        (Some(form), None) => writeln!(out, "{}", form.text)?,
        (_, Some(reading)) => writeln!(out, "{}", reading.text)?,
        (None, None) => {}
    }

    for sense in &entry.senses {
        if !fast && !sense.parts_of_speech.is_empty() {
            writeln!(out, "    {}", sense.parts_of_speech.iter().join(", "))?;
        }
        let mut glosses = sense.glosses.iter();
        if let Some(first) = glosses.next() {
            writeln!(out, "{:02}) {}", sense.index, first.text)?;
        }
        for gloss in glosses {
            writeln!(out, "    {}", gloss.text)?;
        }
        for note in sense.notes.iter().chain(&sense.misc) {
            writeln!(out, "    ({})", note)?;
        }
        if !fast && !sense.cross_references.is_empty() {
            writeln!(out, "    See also {}", sense.cross_references.iter().join(", "))?;
        }
    }

    if !entry.other_forms().is_empty() {
        writeln!(
            out,
            "Other forms: {}",
            entry.other_forms().iter().map(|f| &f.text).join("、")
        )?;
    }
    writeln!(out)
}

fn search(cli: &Cli, conn: &Connection) -> anyhow::Result<()> {
    let mode = if cli.kanji {
        SearchMode::Kanji
    } else if cli.reading {
        SearchMode::Reading
    } else {
        SearchMode::Auto
    };
    let query = SearchQuery {
        tokens: cli.query.clone(),
        mode,
        page: cli.page,
        page_size: cli.max,
        language: cli.lang.clone(),
    };

    let entries = match db_to_entry::search(conn, &query)? {
        SearchOutcome::NoMatches => {
            println!("No results found...");
            return Ok(());
        }
        SearchOutcome::Matches { entries, .. } => entries,
    };

    let mut out = BufWriter::new(io::stdout().lock());
    let mut found = vec![];
    for entry in entries {
        match entry {
            Ok(entry) => found.push(entry),
            Err(e) => eprintln!("{e}"),
        }
    }
    if cli.json {
        serde_json::to_writer_pretty(&mut out, &found)?;
        writeln!(out)?;
    } else {
        for entry in &found {
            write_entry(&mut out, entry, cli.fast)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    if cli.import.is_none() && cli.query.is_empty() {
        return Err(anyhow!("Nothing to do, pass a query or --import"));
    }
    let conn = Connection::open(&cli.db)
        .context(format!("Could not open sqlite file {}", cli.db.display()))?;

    import(&cli, &conn)?;
    if !cli.query.is_empty() {
        search(&cli, &conn)?;
    }
    Ok(())
}
