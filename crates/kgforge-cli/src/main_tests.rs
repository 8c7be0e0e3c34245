//! CLI tests

use super::*;
use std::io::Write;

#[test]
fn test_parse_ingest_with_globals() {
    let cli = Cli::try_parse_from([
        "kgforge",
        "--format",
        "json",
        "--database",
        "/tmp/graph.db",
        "ingest",
        "a.txt",
        "b.jsonl",
        "--workers",
        "2",
        "--fuzzy",
    ])
    .unwrap();

    assert_eq!(cli.format, OutputFormat::Json);
    assert_eq!(cli.database, Some(PathBuf::from("/tmp/graph.db")));
    match cli.command {
        Commands::Ingest {
            paths,
            jsonl,
            workers,
            fuzzy,
        } => {
            assert_eq!(paths.len(), 2);
            assert!(!jsonl);
            assert_eq!(workers, Some(2));
            assert!(fuzzy);
        }
        _ => panic!("expected ingest"),
    }
}

#[test]
fn test_ingest_requires_paths() {
    assert!(Cli::try_parse_from(["kgforge", "ingest"]).is_err());
}

#[test]
fn test_search_kind_is_validated() {
    let cli = Cli::try_parse_from(["kgforge", "search", "baro", "--kind", "organization"]).unwrap();
    match cli.command {
        Commands::Search { kind, limit, .. } => {
            assert_eq!(kind, Some(EntityKind::Organization));
            assert_eq!(limit, 20);
        }
        _ => panic!("expected search"),
    }

    assert!(Cli::try_parse_from(["kgforge", "search", "baro", "--kind", "planet"]).is_err());
}

#[test]
fn test_relations_optional_second_entity() {
    let cli = Cli::try_parse_from([
        "kgforge",
        "relations",
        "Bursa Barosu",
        "Ahmet Yılmaz",
        "--type",
        "mentioned_with",
    ])
    .unwrap();
    match cli.command {
        Commands::Relations {
            name,
            other,
            relation_type,
        } => {
            assert_eq!(name, "Bursa Barosu");
            assert_eq!(other.as_deref(), Some("Ahmet Yılmaz"));
            assert_eq!(relation_type.as_deref(), Some("mentioned_with"));
        }
        _ => panic!("expected relations"),
    }
}

#[test]
fn test_query_joins_words() {
    let cli = Cli::try_parse_from([
        "kgforge", "query", "Ahmet", "Yılmaz", "kimdir?", "--limit", "5",
    ])
    .unwrap();
    match cli.command {
        Commands::Query { question, limit } => {
            assert_eq!(question.join(" "), "Ahmet Yılmaz kimdir?");
            assert_eq!(limit, 5);
        }
        _ => panic!("expected query"),
    }

    assert!(Cli::try_parse_from(["kgforge", "query"]).is_err());
}

#[test]
fn test_quiet_flag_after_subcommand() {
    let cli = Cli::try_parse_from(["kgforge", "reset", "--force", "-q"]).unwrap();
    assert!(cli.quiet);
    assert!(matches!(cli.command, Commands::Reset { force: true }));
}

#[test]
fn test_read_plain_text_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("baro-haberi.txt");
    fs::write(&path, "Bursa Barosu toplandı.").unwrap();

    let documents = read_documents(&[path.clone()], false).unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].uri, path.display().to_string());
    assert_eq!(documents[0].title, "baro-haberi");
    assert_eq!(documents[0].raw_text, "Bursa Barosu toplandı.");
}

#[test]
fn test_read_jsonl_documents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docs.jsonl");
    let mut file = fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"{{"uri": "doc://1", "title": "Bir", "text": "Bursa Barosu toplandı."}}"#
    )
    .unwrap();
    writeln!(file).unwrap();
    writeln!(file, r#"{{"uri": "doc://2", "raw_text": "Ankara Barosu toplandı."}}"#).unwrap();

    let documents = read_documents(&[path], false).unwrap();
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].title, "Bir");
    assert_eq!(documents[1].uri, "doc://2");
    assert_eq!(documents[1].title, "");
}

#[test]
fn test_read_jsonl_reports_bad_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docs.txt");
    fs::write(&path, "{\"uri\": \"doc://1\"}\n").unwrap();

    let err = read_documents(&[path], true).unwrap_err();
    assert!(err.to_string().contains("line 1"));
}
