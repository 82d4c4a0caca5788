/// tallydb API demo
///
/// Demonstrates the main operations:
/// - storing and loading documents through a session
/// - a multi-map/reduce index joining users and posts
/// - staleness-aware queries, search and projections
/// - index status and health checks

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tallydb::core::config::Config;
use tallydb::core::database::Database;
use tallydb::core::session::Entity;
use tallydb::core::types::Value;
use tallydb::fields;
use tallydb::index::aggregate;
use tallydb::index::definition::IndexDefinition;
use tallydb::query::ast::Query;
use tallydb::query::types::{Projection, QueryRequest};
use tallydb::schema::schema::FieldOptions;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct User {
    #[serde(default)]
    id: String,
    name: String,
}

impl Entity for User {
    fn collection() -> &'static str {
        "users"
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Post {
    #[serde(default)]
    id: String,
    user_id: String,
    title: String,
}

impl Entity for Post {
    fn collection() -> &'static str {
        "posts"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PostsPerUser {
    user_id: String,
    user_name: Option<String>,
    post_count: i64,
}

fn posts_per_user() -> tallydb::core::error::Result<IndexDefinition> {
    IndexDefinition::builder("Posts/CountByUser")
        .map("users", |doc| {
            Ok(vec![fields! {
                "UserId" => doc.id.as_str(),
                "UserName" => doc.get_field("Name").cloned(),
                "PostCount" => 0,
            }])
        })
        .map("posts", |doc| {
            Ok(vec![fields! {
                "UserId" => doc.get_field("UserId").cloned(),
                "UserName" => Value::Null,
                "PostCount" => 1,
            }])
        })
        .reduce(&["UserId"], |rows| {
            Ok(vec![fields! {
                "UserId" => rows[0].get("UserId").cloned(),
                "UserName" => aggregate::first_non_null(rows, "UserName"),
                "PostCount" => aggregate::sum(rows, "PostCount"),
            }])
        })
        .build()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("tallydb=info").init();

    println!("\n╔═══════════════════════════════════════════════╗");
    println!("║        tallydb - Complete API Demo            ║");
    println!("╚═══════════════════════════════════════════════╝\n");

    // Step 1: Create database and indexes
    println!("Step 1: Opening database...");
    let db = Database::open(Config::default())?;
    db.register_index(posts_per_user()?)?;
    db.register_index(
        IndexDefinition::builder("Posts/ByTitle")
            .map("posts", |doc| Ok(vec![fields! { "Title" => doc.get_field("Title").cloned() }]))
            .field("Title", FieldOptions::analyzed())
            .build()?,
    )?;
    println!("  Indexes: {:?}\n", db.index_names());

    // Step 2: Store documents through a session
    println!("Step 2: Storing documents...");
    let mut session = db.open_session();
    let ayende = session.store_entity(&User { id: String::new(), name: "Ayende".into() })?;
    let user_id = session.id_of(ayende).unwrap_or_default().to_string();
    for title in ["Map/reduce in practice", "Staleness explained", "Rust ownership"] {
        session.store_entity(&Post {
            id: String::new(),
            user_id: user_id.clone(),
            title: title.into(),
        })?;
    }
    let saved = session.save_changes()?;
    println!("  Saved batch at sequence {}\n", saved.sequence);

    // Step 3: Query without and with waiting for the index
    println!("Step 3: Querying the map/reduce index...");
    let stale = db.query("Posts/CountByUser", QueryRequest::new())?;
    println!("  Without waiting: {} rows (stale: {})", stale.len(), stale.stats.is_stale);

    let fresh = db.query(
        "Posts/CountByUser",
        QueryRequest::new()
            .filter(Query::equals("UserId", user_id.as_str()))
            .wait_timeout(Duration::from_secs(5)),
    )?;
    for row in fresh.deserialize::<PostsPerUser>()? {
        println!(
            "  {} ({}) wrote {} posts",
            row.user_id,
            row.user_name.unwrap_or_default(),
            row.post_count
        );
    }
    println!();

    // Step 4: Search and projection
    println!("Step 4: Searching titles...");
    let hits = db.query(
        "Posts/ByTitle",
        QueryRequest::new()
            .filter(Query::search("Title", "staleness rust"))
            .select(Projection::new().document_id("PostId").field("Title"))
            .wait_for_non_stale(),
    )?;
    for hit in hits.iter() {
        println!(
            "  {} {:?} (score {:.2})",
            hit.get_str("PostId").unwrap_or("?"),
            hit.get_str("Title").unwrap_or(""),
            hit.score
        );
    }
    println!();

    // Step 5: Update through a new session
    println!("Step 5: Renaming the user...");
    let mut session = db.open_session();
    if let Some(handle) = session.load(&user_id)? {
        if let Some(body) = session.entity_mut(handle) {
            body.insert("Name".into(), "Oren".into());
        }
    }
    session.save_changes()?;
    let renamed = db.query(
        "Posts/CountByUser",
        QueryRequest::new().filter(Query::equals("UserId", user_id.as_str())).wait_for_non_stale(),
    )?;
    println!("  Name is now {:?}\n", renamed.hits.first().and_then(|hit| hit.get_str("UserName")));

    // Step 6: Status and health
    println!("Step 6: Index status and health...");
    for status in db.index_statuses() {
        println!(
            "  {}: indexed up to {} of {}, {} entries, {} errors",
            status.name,
            status.last_indexed_sequence,
            status.store_sequence,
            status.entry_count,
            status.errors.len()
        );
    }
    let health = db.health_check();
    println!("  Health: {:?}", health.status);
    let stats = db.stats();
    println!("  Documents: {}, log entries: {}\n", stats.total_documents, stats.log_entries);

    db.shutdown();
    Ok(())
}
