//! kgforge CLI - build a knowledge graph from documents

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use kgforge_core::config::Config;
use kgforge_core::domain::knowledge::{
    CanonicalEntity, Document, EntityContext, EntityKind, IngestSummary, KnowledgeGraphService,
    MergeOutcome, QueryAnswer, RelationType, Relationship, SourceDocument,
};
use kgforge_core::infrastructure::knowledge::SqliteGraphStore;
use kgforge_core::storage::Database;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "kgforge")]
#[command(author, version, about = "Incremental knowledge graph builder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Database file (overrides store.database_path)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest text or JSON Lines files into the graph
    Ingest {
        /// Files to ingest
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Treat every file as JSON Lines ({"uri", "title", "text"} per line)
        #[arg(long)]
        jsonl: bool,
        /// Documents ingested concurrently (overrides ingest.workers)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Enable fuzzy resolution for this run
        #[arg(long)]
        fuzzy: bool,
    },

    /// Show graph statistics
    Stats,

    /// Find entities by name
    Search {
        query: String,
        /// Only entities of this kind
        #[arg(short, long, value_parser = parse_kind)]
        kind: Option<EntityKind>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show relationships of an entity, or between two entities
    Relations {
        name: String,
        other: Option<String>,
        /// Only relationships of this type
        #[arg(long = "type")]
        relation_type: Option<String>,
    },

    /// Show an entity with its neighbours and source documents
    Context { name: String },

    /// Ask a question ("X ile Y arasındaki ilişki", "X kimdir?", "... belgeleri")
    Query {
        #[arg(required = true)]
        question: Vec<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Find documents by title or URI
    Documents {
        query: String,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Delete the whole graph
    Reset {
        #[arg(long)]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset to defaults
    Reset,
    /// Show config file path
    Path,
}

fn parse_kind(s: &str) -> Result<EntityKind, String> {
    EntityKind::parse(s).ok_or_else(|| {
        let valid: Vec<&str> = EntityKind::all().iter().map(|k| k.as_str()).collect();
        format!("unknown kind '{}'. Valid kinds: {}", s, valid.join(", "))
    })
}

/// One line of a JSON Lines input file
#[derive(Debug, Deserialize)]
struct JsonlRecord {
    uri: String,
    #[serde(default)]
    title: String,
    #[serde(alias = "raw_text", alias = "content")]
    text: String,
}

impl From<JsonlRecord> for SourceDocument {
    fn from(record: JsonlRecord) -> Self {
        SourceDocument::new(record.uri, record.title, record.text)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.quiet { "kgforge=warn" } else { "kgforge=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_directive.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli).await;

    if let Err(e) = &result {
        if let Some(suggestion) = e
            .downcast_ref::<kgforge_core::Error>()
            .and_then(|e| e.suggestion())
        {
            eprintln!("Hint: {}", suggestion);
        }
    }
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let database = cli.database.as_deref();

    match cli.command {
        Commands::Ingest {
            paths,
            jsonl,
            workers,
            fuzzy,
        } => {
            let mut config = Config::load()?;
            if let Some(workers) = workers {
                config.ingest.workers = workers;
            }
            if fuzzy {
                config.resolution.fuzzy_enabled = true;
            }
            config.validate()?;
            cmd_ingest(&config, database, &paths, jsonl, cli.format, cli.quiet).await
        }

        Commands::Stats => cmd_stats(database, cli.format).await,

        Commands::Search { query, kind, limit } => {
            cmd_search(database, &query, kind, limit, cli.format).await
        }

        Commands::Relations {
            name,
            other,
            relation_type,
        } => {
            let relation_type = relation_type.as_deref().map(RelationType::parse);
            cmd_relations(
                database,
                &name,
                other.as_deref(),
                relation_type.as_ref(),
                cli.format,
            )
            .await
        }

        Commands::Context { name } => cmd_context(database, &name, cli.format).await,

        Commands::Query { question, limit } => {
            cmd_query(database, &question.join(" "), limit, cli.format).await
        }

        Commands::Documents { query, limit } => {
            cmd_documents(database, &query, limit, cli.format).await
        }

        Commands::Reset { force } => cmd_reset(database, force, cli.quiet).await,

        Commands::Config { action } => cmd_config(action, cli.quiet),

        Commands::Doctor => cmd_doctor(database, cli.quiet).await,
    }
}

// ========== Setup ==========

async fn open_database(config: &Config, database: Option<&Path>) -> anyhow::Result<Database> {
    let mut db_config = config.database_config();
    if let Some(path) = database {
        db_config.path = path.to_path_buf();
    }
    Database::new(db_config).await
}

async fn open_service(
    config: &Config,
    database: Option<&Path>,
) -> anyhow::Result<(Database, KnowledgeGraphService<SqliteGraphStore>)> {
    let db = open_database(config, database).await?;
    let store = Arc::new(SqliteGraphStore::new(db.pool().clone()));
    let service = KnowledgeGraphService::new(store)
        .with_extractor(config.extractor())
        .with_resolver(config.resolver_config())
        .with_retry_policy(config.retry_policy())
        .with_workers(config.ingest.workers);
    Ok((db, service))
}

async fn open_default_service(
    database: Option<&Path>,
) -> anyhow::Result<(Database, KnowledgeGraphService<SqliteGraphStore>)> {
    let config = Config::load()?;
    open_service(&config, database).await
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Load documents from plain text or JSON Lines files
fn read_documents(paths: &[PathBuf], jsonl: bool) -> anyhow::Result<Vec<SourceDocument>> {
    let mut documents = Vec::new();

    for path in paths {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;

        let is_jsonl = jsonl || path.extension().is_some_and(|ext| ext == "jsonl");
        if is_jsonl {
            for (index, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let record: JsonlRecord = serde_json::from_str(line).with_context(|| {
                    format!("Invalid record on line {} of {}", index + 1, path.display())
                })?;
                documents.push(record.into());
            }
        } else {
            let title = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            documents.push(SourceDocument::new(path.display().to_string(), title, contents));
        }
    }

    Ok(documents)
}

// ========== Commands ==========

async fn cmd_ingest(
    config: &Config,
    database: Option<&Path>,
    paths: &[PathBuf],
    jsonl: bool,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let documents = read_documents(paths, jsonl)?;
    if documents.is_empty() {
        bail!("No documents found in the given files");
    }

    let (db, service) = open_service(config, database).await?;
    let service = Arc::new(service);
    info!(documents = documents.len(), database = %db.path().display(), "Ingesting");

    let results = service.ingest_batch(documents).await;
    db.close().await;

    let summaries: Vec<&IngestSummary> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let rejected: Vec<String> = results
        .iter()
        .filter_map(|r| r.as_ref().err().map(|e| e.to_string()))
        .collect();
    let count = |outcome: MergeOutcome| summaries.iter().filter(|s| s.outcome == outcome).count();
    let not_merged = count(MergeOutcome::NotMerged);

    match format {
        OutputFormat::Json => {
            print_json(&serde_json::json!({
                "documents": summaries,
                "rejected": rejected,
            }))?;
        }
        OutputFormat::Text if !quiet => {
            for summary in &summaries {
                println!(
                    "{}  {}  entities={} relationships={} links={}",
                    summary.uri,
                    summary.outcome,
                    summary.entities_upserted,
                    summary.relationships_upserted,
                    summary.links_created
                );
                for error in &summary.errors {
                    println!("  ! {} [{}] {}", error.item, error.code, error.message);
                }
            }
            for reason in &rejected {
                println!("  ! rejected: {}", reason);
            }
            println!(
                "Ingested {} documents: {} merged, {} partial, {} not merged, {} rejected",
                results.len(),
                count(MergeOutcome::FullyMerged),
                count(MergeOutcome::PartiallyMerged),
                not_merged,
                rejected.len()
            );
        }
        OutputFormat::Text => {}
    }

    if not_merged + rejected.len() > 0 {
        bail!("{} of {} documents were not merged", not_merged + rejected.len(), results.len());
    }
    Ok(())
}

async fn cmd_stats(database: Option<&Path>, format: OutputFormat) -> anyhow::Result<()> {
    let (_db, service) = open_default_service(database).await?;
    let stats = service.stats().await?;

    if format == OutputFormat::Json {
        return print_json(&stats);
    }

    println!("Knowledge Graph");
    println!("===============");
    println!(
        "Nodes:          {} ({} entities, {} documents)",
        stats.total_nodes, stats.total_entities, stats.total_documents
    );
    println!("Relationships:  {}", stats.total_relationships);
    println!("Mention links:  {}", stats.total_mention_links);
    println!("Mentions:       {}", stats.total_mentions);

    if !stats.entities_by_kind.is_empty() {
        println!();
        println!("Entities by kind:");
        for (kind, count) in &stats.entities_by_kind {
            println!("  {:<14} {}", kind.as_str(), count);
        }
    }
    if !stats.relationships_by_type.is_empty() {
        println!();
        println!("Relationships by type:");
        for (relation_type, count) in &stats.relationships_by_type {
            println!("  {:<14} {}", relation_type.as_str(), count);
        }
    }
    Ok(())
}

async fn cmd_search(
    database: Option<&Path>,
    query: &str,
    kind: Option<EntityKind>,
    limit: usize,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (_db, service) = open_default_service(database).await?;
    let entities = service.search(query, kind, limit).await?;

    if format == OutputFormat::Json {
        return print_json(&entities);
    }

    print_entities(&entities, query);
    Ok(())
}

async fn cmd_relations(
    database: Option<&Path>,
    name: &str,
    other: Option<&str>,
    relation_type: Option<&RelationType>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (_db, service) = open_default_service(database).await?;
    let relationships = service.relationships(name, other, relation_type).await?;

    if format == OutputFormat::Json {
        return print_json(&relationships);
    }

    print_relationships(&relationships);
    Ok(())
}

async fn cmd_context(
    database: Option<&Path>,
    name: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (_db, service) = open_default_service(database).await?;
    let context = service.context(name).await?;

    if format == OutputFormat::Json {
        return print_json(&context);
    }

    print_context(&context);
    Ok(())
}

async fn cmd_query(
    database: Option<&Path>,
    question: &str,
    limit: usize,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (_db, service) = open_default_service(database).await?;
    let answer = service.query(question, limit).await?;

    if format == OutputFormat::Json {
        return print_json(&answer);
    }

    match &answer {
        QueryAnswer::Relationship(relationships) => print_relationships(relationships),
        QueryAnswer::EntityContext(context) => print_context(context),
        QueryAnswer::Document(documents) => print_documents(documents, question),
        QueryAnswer::Entity(entities) => print_entities(entities, question),
    }
    Ok(())
}

async fn cmd_documents(
    database: Option<&Path>,
    query: &str,
    limit: usize,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (_db, service) = open_default_service(database).await?;
    let documents = service.documents(query, limit).await?;

    if format == OutputFormat::Json {
        return print_json(&documents);
    }

    print_documents(&documents, query);
    Ok(())
}

// ========== Output ==========

fn print_entities(entities: &[CanonicalEntity], query: &str) {
    if entities.is_empty() {
        println!("No entities match '{}'.", query);
        return;
    }
    for entity in entities {
        println!(
            "{:<32} {:<14} {}",
            entity.display_name, entity.kind.as_str(), entity.mention_count
        );
    }
}

fn print_relationships(relationships: &[Relationship]) {
    if relationships.is_empty() {
        println!("No relationships found.");
        return;
    }
    for relationship in relationships {
        println!(
            "{} -[{}]- {}  (strength {})",
            relationship.from_key,
            relationship.relation_type,
            relationship.to_key,
            relationship.strength
        );
    }
}

fn print_documents(documents: &[Document], query: &str) {
    if documents.is_empty() {
        println!("No documents match '{}'.", query);
        return;
    }
    for document in documents {
        println!(
            "{}  {}  ({} chars)",
            document.uri, document.title, document.content_length
        );
    }
}

fn print_context(context: &EntityContext) {
    let entity = &context.entity;
    println!("{} ({})", entity.display_name, entity.kind);
    println!("  key:       {}", entity.key);
    println!("  mentions:  {}", entity.mention_count);

    if !context.related.is_empty() {
        println!();
        println!("Related:");
        for related in &context.related {
            println!(
                "  {:<32} {:<14} {} x{}",
                related.entity.display_name,
                related.entity.kind.as_str(),
                related.relation_type,
                related.strength
            );
        }
    }
    if !context.documents.is_empty() {
        println!();
        println!("Mentioned in:");
        for mention in &context.documents {
            println!("  {}  \"{}\"", mention.document.uri, mention.sentence);
        }
    }
}

async fn cmd_reset(database: Option<&Path>, force: bool, quiet: bool) -> anyhow::Result<()> {
    if !force {
        bail!("Refusing to delete the graph without --force");
    }

    let (_db, service) = open_default_service(database).await?;
    service.reset().await?;
    if !quiet {
        println!("Knowledge graph reset.");
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(database: Option<&Path>, quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("kgforge Health Check");
        println!("====================");
        println!();
    }

    let mut all_ok = true;

    let config = match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
            config
        }
        Err(e) => {
            all_ok = false;
            warn!(error = %e, "Configuration invalid");
            if !quiet {
                println!("[!!] Configuration: {}", e);
                println!("     Using defaults for the remaining checks");
            }
            Config::default()
        }
    };

    match open_database(&config, database).await {
        Ok(db) => {
            let healthy = db.health_check().await.is_ok();
            if !quiet {
                let mark = if healthy { "OK" } else { "!!" };
                println!("[{}] Database: {}", mark, db.path().display());
            }
            all_ok &= healthy;

            match db.migration_status().await {
                Ok(status) if !status.needs_migration => {
                    if !quiet {
                        println!("[OK] Schema: version {}", status.current_version);
                    }
                }
                Ok(status) => {
                    all_ok = false;
                    if !quiet {
                        println!(
                            "[!!] Schema: version {} of {}",
                            status.current_version, status.target_version
                        );
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Schema: {}", e);
                    }
                }
            }
            db.close().await;
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: {:#}", e);
            }
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed.");
        } else {
            println!("Some checks failed.");
        }
    }

    if !all_ok {
        bail!("Health check failed");
    }
    Ok(())
}

#[cfg(test)]
mod main_tests;
