use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use serde_json::json;
use storechat::{
    ChatDb,
    Chatbot,
    ConfigDb,
    DataDir,
    EmbeddingDb,
    Indexer,
    ModelManager,
    cli::{Cli, Command, ModelAction, SessionAction},
    completion::{CompletionConfig, build_provider},
    config_db::{EMBEDDING_MODEL_KEY, LAST_REINDEX_KEY},
    error::{self, Error},
    model_manager::{DEFAULT_MODEL_ID, MODEL_ENV_VAR, resolve_model_id},
    records::Catalog,
    search,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("STORECHAT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let model_id = resolve_model_id(
        cli.model.as_deref(),
        std::env::var(MODEL_ENV_VAR).ok(),
        config_db.get_setting(EMBEDDING_MODEL_KEY)?,
    );

    match cli.command {
        Command::Reindex(args) => {
            let catalog = Catalog::load(&args.catalog).await?;
            let indexer = Indexer::new(
                Arc::new(ModelManager::for_model(model_id)),
                EmbeddingDb::open(&data_dir.embeddings_db())?,
            );
            let report = indexer.reindex(&catalog).await?;
            config_db.set_setting(LAST_REINDEX_KEY, &Utc::now().to_rfc3339())?;

            if args.json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!("Indexed {}", report.summary());
            }
        }
        Command::Search(args) => {
            let chatbot = build_chatbot(&data_dir, model_id)?;
            let results =
                chatbot.search(&args.query, args.tier, args.count).await?;
            if args.json {
                search::format_json(&results, &args.query)?;
            } else {
                search::format_human(&results);
            }
        }
        Command::Ask(args) => {
            let chatbot = build_chatbot(&data_dir, model_id)?;
            let reply = chatbot
                .ask(&args.query, args.session.as_deref(), args.tier)
                .await?;
            if args.json {
                println!("{}", serde_json::to_string(&reply)?);
            } else {
                println!("{}", reply.answer);
                eprintln!("session: {}", reply.session_id);
            }
        }
        Command::Session { action } => {
            let chat_db = ChatDb::open(&data_dir.chat_db())?;
            match action {
                SessionAction::List { json } => session_list(&chat_db, json)?,
                SessionAction::Show { id, json } => {
                    session_show(&chat_db, &id, json)?;
                }
            }
        }
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, &model_id, args.json)?;
        }
        Command::Mcp => {
            let chatbot = build_chatbot(&data_dir, model_id)?;
            storechat::mcp::run_mcp(chatbot).await?;
        }
        Command::Model { action } => match action {
            ModelAction::Show { json } => {
                model_show(&config_db, &cli.model, json)?;
            }
            ModelAction::Set { model } => {
                config_db.set_setting(EMBEDDING_MODEL_KEY, &model)?;
                println!("Default model set to {model}");
            }
            ModelAction::Clear => {
                if config_db.remove_setting(EMBEDDING_MODEL_KEY)? {
                    println!("Cleared stored model, using {DEFAULT_MODEL_ID}");
                } else {
                    println!("No stored model setting");
                }
            }
        },
        Command::Completions(args) => args.generate(),
    }

    Ok(())
}

fn build_chatbot(data_dir: &DataDir, model_id: String) -> error::Result<Chatbot> {
    Chatbot::builder()
        .embedder(Arc::new(ModelManager::for_model(model_id)))
        .embeddings(EmbeddingDb::open(&data_dir.embeddings_db())?)
        .conversations(Arc::new(ChatDb::open(&data_dir.chat_db())?))
        .completion(build_provider(CompletionConfig::from_env())?)
        .build()
}

fn session_list(chat_db: &ChatDb, json: bool) -> error::Result<()> {
    let sessions = chat_db.all_sessions()?;
    if json {
        println!("{}", serde_json::to_string(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions.");
    }
    for s in &sessions {
        println!(
            "{}  {:<8}  updated {}",
            s.id,
            s.tier,
            s.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn session_show(chat_db: &ChatDb, id: &str, json: bool) -> error::Result<()> {
    let conversation =
        chat_db
            .load_conversation(id)?
            .ok_or_else(|| Error::NotFound {
                kind: "session",
                name: id.to_string(),
            })?;

    if json {
        println!("{}", serde_json::to_string(&conversation)?);
        return Ok(());
    }

    println!(
        "Session {} ({})",
        conversation.session.id, conversation.session.tier
    );
    for m in &conversation.messages {
        println!(
            "[{}] {}: {}",
            m.timestamp.format("%H:%M:%S"),
            m.role,
            m.content
        );
    }
    Ok(())
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    model_id: &str,
    json: bool,
) -> error::Result<()> {
    let embedding_db = EmbeddingDb::open(&data_dir.embeddings_db())?;
    let counts = embedding_db.count_by_source()?;
    let total: usize = counts.values().sum();
    let dimension = embedding_db.dimension()?;
    let sessions = ChatDb::open(&data_dir.chat_db())?.session_count()?;
    let last_reindex = config_db.get_setting_or(LAST_REINDEX_KEY, "never")?;

    if json {
        let doc = json!({
            "dataDir": data_dir.root().display().to_string(),
            "model": model_id,
            "records": total,
            "recordsBySource": counts,
            "dimension": dimension,
            "sessions": sessions,
            "lastReindex": last_reindex,
        });
        println!("{}", serde_json::to_string(&doc)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Model: {model_id}");
        println!("Records: {total}");
        for (source, count) in &counts {
            println!("  {source}: {count}");
        }
        if let Some(dim) = dimension {
            println!("Dimension: {dim}");
        }
        println!("Sessions: {sessions}");
        println!("Last reindex: {last_reindex}");
    }
    Ok(())
}

fn model_show(
    config_db: &ConfigDb,
    cli_model: &Option<String>,
    json: bool,
) -> error::Result<()> {
    let env_model = std::env::var(MODEL_ENV_VAR).ok();
    let stored = config_db.get_setting(EMBEDDING_MODEL_KEY)?;

    let (resolved, source) = if let Some(model) = cli_model {
        (model.clone(), "cli")
    } else if let Some(model) = env_model.clone() {
        (model, "env")
    } else if let Some(model) = stored.clone() {
        (model, "config")
    } else {
        (DEFAULT_MODEL_ID.to_string(), "default")
    };

    if json {
        let doc = json!({
            "resolved": resolved,
            "source": source,
            "cli": cli_model,
            "env": env_model,
            "config": stored,
            "default": DEFAULT_MODEL_ID,
        });
        println!("{}", serde_json::to_string(&doc)?);
    } else {
        println!("Model: {resolved} ({source})");
        if let Some(model) = stored {
            println!("Stored setting: {model}");
        }
    }
    Ok(())
}
