use std::io::Cursor;

use rusqlite::Connection;

use jdic::db_check;
use jdic::db_to_entry::{
    self, DbToEntry, ReconstructedEntry, RetrievalError, SearchMode, SearchOutcome, SearchQuery,
};
use jdic::xml_to_db::{self, ImportError, ImportOptions};

const DICT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE JMdict [
<!ELEMENT JMdict (entry*)>
<!ENTITY v1 "Ichidan verb">
<!ENTITY vt "transitive verb">
<!ENTITY n "noun (common) (futsuumeishi)">
<!ENTITY uk "word usually written using kana alone">
<!ENTITY iK "word containing irregular kanji usage">
]>
<JMdict>
<entry>
<ent_seq>1358280</ent_seq>
<k_ele>
<keb>食べる</keb>
<ke_pri>ichi1</ke_pri>
</k_ele>
<k_ele>
<keb>喰べる</keb>
<ke_inf>&iK;</ke_inf>
</k_ele>
<r_ele>
<reb>たべる</reb>
<re_restr>食べる</re_restr>
</r_ele>
<r_ele>
<reb>くう</reb>
</r_ele>
<r_ele>
<reb>はむ</reb>
</r_ele>
<sense>
<pos>&v1;</pos>
<pos>&vt;</pos>
<gloss>to eat</gloss>
<gloss>to live on (e.g. a salary)</gloss>
<gloss xml:lang="ger">essen</gloss>
</sense>
</entry>
<entry>
<ent_seq>1358300</ent_seq>
<k_ele>
<keb>食う</keb>
</k_ele>
<r_ele>
<reb>くう</reb>
</r_ele>
<sense>
<pos>&v1;</pos>
<xref>食べる</xref>
<gloss>to eat</gloss>
</sense>
<sense>
<misc>&uk;</misc>
<s_inf>vulgar</s_inf>
<gloss g_type="fig">to bite</gloss>
</sense>
</entry>
<entry>
<ent_seq>2000100</ent_seq>
<r_ele>
<reb>ピーマン</reb>
</r_ele>
<r_ele>
<reb>ピメント</reb>
<re_nokanji/>
</r_ele>
<sense>
<pos>&n;</pos>
<gloss>green pepper</gloss>
</sense>
<sense>
<dial>ksb</dial>
<gloss>pimento</gloss>
</sense>
<sense>
<stagr>ピメント</stagr>
<gloss>capsicum</gloss>
</sense>
</entry>
</JMdict>
"#;

fn imported(xml: &str, batch_size: usize) -> (Connection, xml_to_db::ImportReport) {
    let conn = Connection::open_in_memory().unwrap();
    let report = xml_to_db::import(Cursor::new(xml), &conn, &ImportOptions { batch_size });
    (conn, report)
}

fn test_db() -> Connection {
    let (conn, report) = imported(DICT, 50_000);
    assert!(report.is_ok(), "{}", report);
    conn
}

fn query(tokens: &[&str], mode: SearchMode, page: u32, page_size: u32) -> SearchQuery {
    SearchQuery {
        mode,
        page,
        page_size,
        ..SearchQuery::new(tokens.iter().copied())
    }
}

fn found(outcome: SearchOutcome) -> (SearchMode, Vec<ReconstructedEntry>) {
    match outcome {
        SearchOutcome::Matches {
            matched_on,
            entries,
        } => (
            matched_on,
            entries.into_iter().map(Result::unwrap).collect(),
        ),
        SearchOutcome::NoMatches => panic!("expected matches"),
    }
}

fn reading_texts(entry: &ReconstructedEntry, form: usize) -> Vec<&str> {
    entry.forms[form]
        .readings
        .iter()
        .map(|r| r.text.as_str())
        .collect()
}

#[test]
fn test_import_report() {
    let (_conn, report) = imported(DICT, 50_000);
    assert_eq!(report.imported_count, 3);
    assert_eq!(report.committed_count, 3);
    assert_eq!(report.batches_committed, 1);
    assert!(report.to_string().starts_with("Imported 3 entries in "));
}

#[test]
fn test_round_trip_restrictions_and_glosses() {
    let conn = test_db();
    let entry = DbToEntry::new(&conn, "eng").reconstruct(1_358_280).unwrap();

    assert_eq!(entry.forms.len(), 2);
    assert_eq!(entry.forms[0].text, "食べる");
    assert_eq!(entry.forms[1].text, "喰べる");
    assert_eq!(entry.forms[1].tags, vec!["word containing irregular kanji usage"]);
    assert_eq!(reading_texts(&entry, 0), vec!["たべる", "くう", "はむ"]);
    assert_eq!(reading_texts(&entry, 1), vec!["くう", "はむ"]);
    assert_eq!(entry.readings[0].restricted_to, vec![entry.forms[0].id]);

    assert_eq!(entry.senses.len(), 1);
    let sense = &entry.senses[0];
    assert_eq!(sense.index, 1);
    assert_eq!(sense.parts_of_speech, vec!["Ichidan verb", "transitive verb"]);
    let glosses: Vec<&str> = sense.glosses.iter().map(|g| g.text.as_str()).collect();
    assert_eq!(glosses, vec!["to eat", "to live on (e.g. a salary)"]);

    let headword = entry.headword();
    assert_eq!(headword.form.map(|f| f.text.as_str()), Some("食べる"));
    assert_eq!(headword.reading.map(|r| r.text.as_str()), Some("たべる"));
    assert_eq!(entry.other_forms().len(), 1);
}

#[test]
fn test_gloss_language_filter() {
    let conn = test_db();
    let entry = DbToEntry::new(&conn, "ger").reconstruct(1_358_280).unwrap();
    assert_eq!(entry.senses.len(), 1);
    assert_eq!(entry.senses[0].glosses.len(), 1);
    assert_eq!(entry.senses[0].glosses[0].text, "essen");
}

#[test]
fn test_sense_fields() {
    let conn = test_db();
    let entry = DbToEntry::new(&conn, "eng").reconstruct(1_358_300).unwrap();
    assert_eq!(entry.senses.len(), 2);
    assert_eq!(entry.senses[0].cross_references, vec!["食べる"]);
    let second = &entry.senses[1];
    assert_eq!(second.misc, vec!["word usually written using kana alone"]);
    assert_eq!(second.notes, vec!["vulgar"]);
    assert_eq!(second.glosses[0].gloss_type.as_deref(), Some("fig"));
    assert_eq!(second.glosses[0].gender, None);
}

#[test]
fn test_sense_indices_are_contiguous() {
    let conn = test_db();
    let entry = DbToEntry::new(&conn, "eng").reconstruct(2_000_100).unwrap();
    let indices: Vec<u32> = entry.senses.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert_eq!(db_check::check_entries(&conn).unwrap(), Vec::<String>::new());
}

#[test]
fn test_no_kanji_reading_is_not_primary() {
    let conn = test_db();
    let entry = DbToEntry::new(&conn, "eng").reconstruct(2_000_100).unwrap();
    assert!(entry.forms.is_empty());
    assert_eq!(entry.readings.len(), 2);
    assert!(entry.readings[0].is_primary_reading);
    assert_eq!(entry.readings[1].text, "ピメント");
    assert!(!entry.readings[1].is_primary_reading);
    assert_eq!(
        entry.headword().reading.map(|r| r.text.as_str()),
        Some("ピーマン")
    );
}

#[test]
fn test_pattern_search_pages() {
    let conn = test_db();
    let (_, page_1) =
        found(db_to_entry::search(&conn, &query(&["食*"], SearchMode::Kanji, 1, 1)).unwrap());
    let (_, page_2) =
        found(db_to_entry::search(&conn, &query(&["食*"], SearchMode::Kanji, 2, 1)).unwrap());
    assert_eq!(page_1.len(), 1);
    assert_eq!(page_2.len(), 1);
    assert_eq!(page_1[0].entry_key, 1_358_280);
    assert_eq!(page_2[0].entry_key, 1_358_300);

    let page_3 = db_to_entry::search(&conn, &query(&["食*"], SearchMode::Kanji, 3, 1)).unwrap();
    assert!(matches!(page_3, SearchOutcome::NoMatches));
}

#[test]
fn test_reading_matches_several_entries_once_each() {
    let conn = test_db();
    let (matched_on, entries) =
        found(db_to_entry::search(&conn, &query(&["くう"], SearchMode::Reading, 1, 5)).unwrap());
    assert_eq!(matched_on, SearchMode::Reading);
    let keys: Vec<i64> = entries.iter().map(|e| e.entry_key).collect();
    assert_eq!(keys, vec![1_358_280, 1_358_300]);
}

#[test]
fn test_auto_mode_falls_back_to_reading() {
    let conn = test_db();
    let (auto_mode, auto_entries) =
        found(db_to_entry::search(&conn, &query(&["たべ*"], SearchMode::Auto, 1, 5)).unwrap());
    let (_, reading_entries) =
        found(db_to_entry::search(&conn, &query(&["たべ*"], SearchMode::Reading, 1, 5)).unwrap());
    assert_eq!(auto_mode, SearchMode::Reading);
    assert_eq!(auto_entries, reading_entries);

    let (auto_mode, _) =
        found(db_to_entry::search(&conn, &query(&["食う"], SearchMode::Auto, 1, 5)).unwrap());
    assert_eq!(auto_mode, SearchMode::Kanji);
}

#[test]
fn test_no_matches_is_not_an_error() {
    let conn = test_db();
    let outcome = db_to_entry::search(&conn, &query(&["存在しない"], SearchMode::Auto, 1, 5));
    assert!(matches!(outcome, Ok(SearchOutcome::NoMatches)));
}

#[test]
fn test_multi_word_query() {
    let conn = test_db();
    let outcome = db_to_entry::search(&conn, &query(&["食べ", "る"], SearchMode::Kanji, 1, 5));
    assert!(matches!(outcome, Ok(SearchOutcome::NoMatches)));

    conn.execute(
        "INSERT INTO jmdict_form (seqnum, text) VALUES (1358280, 'ご飯 食べる')",
        (),
    )
    .unwrap();
    let (_, entries) =
        found(db_to_entry::search(&conn, &query(&["ご飯", "食べる"], SearchMode::Kanji, 1, 5)).unwrap());
    assert_eq!(entries[0].entry_key, 1_358_280);
}

#[test]
fn test_missing_entry_is_not_found() {
    let conn = test_db();
    let result = DbToEntry::new(&conn, "eng").reconstruct(1);
    assert!(matches!(result, Err(RetrievalError::NotFound(1))));
}

fn numbered_entry(seqnum: u32, restriction: &str) -> String {
    format!(
        "<entry><ent_seq>{seqnum}</ent_seq>\
        <k_ele><keb>字{seqnum}</keb></k_ele>\
        <r_ele><reb>じ</reb>{restriction}</r_ele>\
        <sense><gloss>character {seqnum}</gloss></sense></entry>\n"
    )
}

#[test]
fn test_batch_durability() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dict.sqlite3");
    let xml = format!(
        "<JMdict>\n{}{}{}{}</JMdict>\n",
        numbered_entry(1, ""),
        numbered_entry(2, ""),
        numbered_entry(3, ""),
        numbered_entry(4, "<re_restr>missing</re_restr>"),
    );
    {
        let conn = Connection::open(&path).unwrap();
        let report = xml_to_db::import(Cursor::new(xml), &conn, &ImportOptions { batch_size: 2 });
        assert!(matches!(
            report.result,
            Err(ImportError::DanglingReference { entry_key: 4, .. })
        ));
        assert_eq!(report.imported_count, 3);
        assert_eq!(report.committed_count, 2);
        assert_eq!(report.batches_committed, 1);
    }

    let conn = Connection::open(&path).unwrap();
    let keys: Vec<i64> = conn
        .prepare("SELECT DISTINCT seqnum FROM jmdict_form ORDER BY seqnum")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(keys, vec![1, 2]);
    let glosses: i64 = conn
        .query_row("SELECT COUNT(*) FROM jmdict_gloss", [], |row| row.get(0))
        .unwrap();
    assert_eq!(glosses, 2);
}

#[test]
fn test_dangling_restriction_keeps_nothing_from_the_batch() {
    let xml = format!("<JMdict>\n{}</JMdict>\n", numbered_entry(7, "<re_restr>字8</re_restr>"));
    let (conn, report) = imported(&xml, 50_000);
    match report.result {
        Err(ImportError::DanglingReference {
            entry_key,
            form_text,
        }) => {
            assert_eq!(entry_key, 7);
            assert_eq!(form_text, "字8");
        }
        other => panic!("unexpected result {other:?}"),
    }
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM jmdict_reading", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 0);
}

#[test]
fn test_malformed_documents() {
    for xml in [
        "<JMdict><entry><ent_seq>1</ent_seq>",
        "<Kanjidic><entry/></Kanjidic>",
        "<JMdict><word/></JMdict>",
        "<JMdict><entry><ent_seq>x1</ent_seq></entry></JMdict>",
        "<JMdict><entry><keb>字</keb></entry></JMdict>",
        "<JMdict><entry><ent_seq>1</ent_seq><gloss>g</gloss></entry></JMdict>",
        "<JMdict><entry><ent_seq>1</ent_seq><sense><pos>&undeclared;</pos></sense></entry></JMdict>",
        "",
        "   \n",
        "<?xml version=\"1.0\"?>\n",
    ] {
        let (_conn, report) = imported(xml, 50_000);
        assert!(
            matches!(report.result, Err(ImportError::MalformedDocument(_))),
            "{xml:?}: {:?}",
            report.result
        );
    }
}

#[test]
fn test_reimport_into_same_database() {
    let conn = test_db();
    let report = xml_to_db::import(Cursor::new(DICT), &conn, &ImportOptions::default());
    assert!(report.is_ok(), "{}", report);
    let forms: i64 = conn
        .query_row("SELECT COUNT(*) FROM jmdict_form WHERE seqnum = 1358300", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(forms, 2);
}

#[test]
fn test_senses_numbered_across_other_siblings() {
    let xml = "<JMdict>
<entry>
<ent_seq>3000</ent_seq>
<r_ele><reb>あい</reb></r_ele>
<info><audit><upd_date>2020-01-01</upd_date></audit></info>
<sense><gloss>first</gloss></sense>
<lsource>x</lsource>
<r_ele><reb>あいい</reb></r_ele>
<ke_pri>ichi1</ke_pri>
<sense><pos>noun</pos></sense>
<info/><info/>
<sense><gloss>third</gloss></sense>
<example><ex_text>愛</ex_text></example>
<sense><xref>恋</xref><gloss>fourth</gloss></sense>
</entry>
</JMdict>
";
    let (conn, report) = imported(xml, 50_000);
    assert!(report.is_ok(), "{}", report);
    let entry = DbToEntry::new(&conn, "eng").reconstruct(3000).unwrap();
    let indices: Vec<u32> = entry.senses.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4]);
    assert_eq!(entry.senses[1].parts_of_speech, vec!["noun"]);
    assert!(entry.senses[1].glosses.is_empty());
    assert_eq!(entry.senses[3].glosses[0].text, "fourth");
    assert_eq!(entry.readings.len(), 2);
    assert_eq!(db_check::check_entries(&conn).unwrap(), Vec::<String>::new());
}

#[test]
fn test_large_page_size_is_not_preallocated() {
    let conn = test_db();
    let (_, entries) = found(
        db_to_entry::search(&conn, &query(&["食う"], SearchMode::Kanji, 1, u32::MAX)).unwrap(),
    );
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_key, 1_358_300);
}

#[test]
fn test_storage_error_rolls_back_current_batch() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(jdic::config::DB_SCHEMA).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER reject_gloss BEFORE INSERT ON jmdict_gloss
        WHEN NEW.text = 'character 2'
        BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
    )
    .unwrap();
    let xml = format!(
        "<JMdict>\n{}{}{}</JMdict>\n",
        numbered_entry(1, ""),
        numbered_entry(2, ""),
        numbered_entry(3, ""),
    );
    let report = xml_to_db::import(Cursor::new(xml), &conn, &ImportOptions { batch_size: 1 });
    assert!(matches!(
        report.result,
        Err(ImportError::StorageError {
            operation: "insert gloss",
            ..
        })
    ));
    assert_eq!(report.committed_count, 1);
    assert_eq!(report.batches_committed, 1);

    let readings: i64 = conn
        .query_row("SELECT COUNT(*) FROM jmdict_reading", [], |row| row.get(0))
        .unwrap();
    assert_eq!(readings, 1);
    let forms: i64 = conn
        .query_row("SELECT COUNT(*) FROM jmdict_form WHERE seqnum = 2", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(forms, 0);
}

#[test]
fn test_failed_entry_does_not_hide_other_results() {
    let conn = test_db();
    conn.execute_batch("DROP TABLE jmdict_form_tag").unwrap();
    let outcome =
        db_to_entry::search(&conn, &query(&["*"], SearchMode::Reading, 1, 5)).unwrap();
    let SearchOutcome::Matches { entries, .. } = outcome else {
        panic!("expected matches");
    };
    assert_eq!(entries.len(), 3);
    assert!(matches!(
        entries[0],
        Err(RetrievalError::QueryFailed {
            entry_key: Some(1_358_280),
            ..
        })
    ));
    assert!(matches!(
        entries[1],
        Err(RetrievalError::QueryFailed {
            entry_key: Some(1_358_300),
            ..
        })
    ));
    let reading_only = entries[2].as_ref().unwrap();
    assert_eq!(reading_only.entry_key, 2_000_100);
    assert!(reading_only.forms.is_empty());
}

#[test]
fn test_index_failure_is_not_fatal() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("CREATE TABLE jmdict_form_index_0 (x)").unwrap();
    let report = xml_to_db::import(Cursor::new(DICT), &conn, &ImportOptions::default());
    assert!(report.is_ok(), "{}", report);

    let indices: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'jmdict_%_index_%'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(indices, jdic::config::DB_INDICES.len() as i64 - 1);
    assert_eq!(
        xml_to_db::create_indices(&conn),
        jdic::config::DB_INDICES.len() - 1
    );
}
