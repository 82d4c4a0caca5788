mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use chrono::{Duration as Days, Utc};
use serde::{Deserialize, Serialize};
use tallydb::core::error::ErrorKind;
use tallydb::core::session::Entity;
use tallydb::core::types::{escape_id_component, Value};
use tallydb::fields;
use tallydb::index::definition::IndexDefinition;
use tallydb::query::ast::Query;
use tallydb::query::types::{Projection, QueryRequest};
use tallydb::schema::schema::FieldOptions;

use common::{open_db, WAIT};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Foo {
    #[serde(default)]
    id: String,
    data: i64,
}

impl Entity for Foo {
    fn collection() -> &'static str {
        "foos"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FooWithId {
    id: Option<String>,
    data: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FooWithFooIdAndId {
    foo_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    data: i64,
}

fn seeded_foos() -> tallydb::core::database::Database {
    let db = open_db();
    let mut session = db.open_session();
    for data in 1..=4 {
        session.store_entity(&Foo { id: String::new(), data }).unwrap();
    }
    session.save_changes().unwrap();
    db
}

#[test]
fn test_project_id_onto_field_named_id() {
    let db = seeded_foos();
    let results = db
        .query_collection(
            "foos",
            QueryRequest::new()
                .filter(Query::greater_than("Data", 1))
                .select(Projection::new().document_id("Id").field("Data"))
                .order_by("Data")
                .wait_for_non_stale(),
        )
        .unwrap();
    let foos: Vec<FooWithId> = results.deserialize().unwrap();

    assert_eq!(foos.len(), 3);
    assert_eq!(foos[0].id.as_deref(), Some("foos/2"));
    assert_eq!(foos.iter().map(|f| f.data).collect::<Vec<_>>(), vec![2, 3, 4]);
}

#[test]
fn test_project_id_onto_another_name_leaves_id_unset() {
    let db = seeded_foos();
    let results = db
        .query_collection(
            "foos",
            QueryRequest::new()
                .filter(Query::greater_than("Data", 1))
                .select(Projection::new().document_id("FooId").field("Id").field("Data"))
                .wait_for_non_stale(),
        )
        .unwrap();
    let foos: Vec<FooWithFooIdAndId> = results.deserialize().unwrap();

    assert_eq!(foos.len(), 3);
    for foo in &foos {
        assert!(foo.foo_id.as_deref().is_some_and(|id| id.starts_with("foos/")));
        assert!(foo.id.is_none());
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Plant {
    #[serde(default)]
    id: String,
    caught_date: Option<chrono::DateTime<Utc>>,
}

impl Entity for Plant {
    fn collection() -> &'static str {
        "plants"
    }
}

#[test]
fn test_null_equality_matches_only_explicit_nulls() {
    let db = open_db();
    db.register_index(
        IndexDefinition::builder("Plants/ByCaughtDate")
            .map("plants", |doc| Ok(vec![fields! { "CaughtDate" => doc.get_field("CaughtDate").cloned() }]))
            .build()
            .unwrap(),
    )
    .unwrap();

    let now = Utc::now();
    let dates = [Some(100), Some(99), None, Some(98), Some(97), None, Some(96), Some(95)];
    let mut session = db.open_session();
    for days in dates {
        session
            .store_entity(&Plant {
                id: String::new(),
                caught_date: days.map(|d| now - Days::days(d)),
            })
            .unwrap();
    }
    session.save_changes().unwrap();

    let nulls = db
        .query(
            "Plants/ByCaughtDate",
            QueryRequest::new().filter(Query::is_null("CaughtDate")).wait_for_non_stale(),
        )
        .unwrap();
    assert_eq!(nulls.len(), 2);
    assert_eq!(nulls.stats.total_results, 2);
    assert_eq!(nulls.ids(), vec!["plants/3", "plants/6"]);

    let recent = db
        .query(
            "Plants/ByCaughtDate",
            QueryRequest::new()
                .filter(Query::greater_than("CaughtDate", now - Days::days(97) - Days::hours(1)))
                .wait_for_non_stale(),
        )
        .unwrap();
    assert_eq!(recent.len(), 3);
}

const NAMES: [&str; 8] = ["Bill", "Bob", "Bobby", "Charles", "Bob Smith", "David", "Eric", "Bob"];

fn seeded_names() -> tallydb::core::database::Database {
    let db = open_db();
    let mut session = db.open_session();
    for name in NAMES {
        session.store("users", fields! { "Name" => name }).unwrap();
    }
    session.save_changes().unwrap();
    db
}

#[test]
fn test_search_unanalyzed_field_matches_whole_values() {
    let db = seeded_names();
    let results = db
        .query_collection(
            "users",
            QueryRequest::new().filter(Query::search("Name", "Bob")).wait_for_non_stale(),
        )
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|hit| hit.get_str("Name") == Some("Bob")));
}

#[test]
fn test_search_analyzed_field_matches_tokens() {
    let db = seeded_names();
    db.register_index(
        IndexDefinition::builder("Users/ByName")
            .map("users", |doc| Ok(vec![fields! { "Name" => doc.get_field("Name").cloned() }]))
            .field("Name", FieldOptions::analyzed())
            .build()
            .unwrap(),
    )
    .unwrap();

    let results = db
        .query(
            "Users/ByName",
            QueryRequest::new().filter(Query::search("Name", "Bob")).wait_for_non_stale(),
        )
        .unwrap();

    let mut names: Vec<&str> = results.iter().filter_map(|hit| hit.get_str("Name")).collect();
    names.sort();
    assert_eq!(names, vec!["Bob", "Bob", "Bob Smith"]);
    // Single-token values score above the longer one.
    assert_eq!(results.hits[2].get_str("Name"), Some("Bob Smith"));
}

#[test]
fn test_keyword_search_over_multi_valued_field() {
    let db = open_db();
    db.register_index(
        IndexDefinition::builder("Plants/ByKeyword")
            .map("plants", |doc| {
                Ok(vec![fields! {
                    "Keyword" => vec![doc.get_field("Name").cloned(), doc.get_field("Gardner").cloned()],
                }])
            })
            .field("Keyword", FieldOptions::analyzed())
            .build()
            .unwrap(),
    )
    .unwrap();

    let plants = [
        ("Rose", "Sally"),
        ("Potato", "John"),
        ("Onion", "Susan"),
        ("Basil", "Gary"),
        ("Thyme", "Rose"),
        ("Tomato", "John"),
        ("Pineapple", "Karen"),
        ("Blueberry", "Bill"),
    ];
    let mut session = db.open_session();
    for (name, gardner) in plants {
        session.store("plants", fields! { "Name" => name, "Gardner" => gardner }).unwrap();
    }
    session.save_changes().unwrap();

    let search = |term: &str| {
        db.query(
            "Plants/ByKeyword",
            QueryRequest::new().filter(Query::search("Keyword", term)).wait_for_non_stale(),
        )
        .unwrap()
    };

    for (term, expected) in [("Onion", 1), ("Bill", 1), ("Rose", 2)] {
        let results = search(term);
        assert_eq!(results.len(), expected, "search for {}", term);
        assert_eq!(results.stats.total_results, expected);
    }
}

#[test]
fn test_membership_over_loaded_co_workers() {
    let db = open_db();
    let mut session = db.open_session();
    let dick = session.store("users", fields! {}).unwrap();
    let harry = session.store("users", fields! {}).unwrap();
    let dick_id = session.id_of(dick).unwrap().to_string();
    let harry_id = session.id_of(harry).unwrap().to_string();

    let co_worker = |id: &str, show: bool| Value::from(fields! { "UserId" => id, "ShowUpdates" => show });
    let tom = session
        .store(
            "users",
            fields! {
                "CoWorkers" => vec![co_worker(&dick_id, true), co_worker(&harry_id, true)],
            },
        )
        .unwrap();
    let tom_id = session.id_of(tom).unwrap().to_string();
    session.store("activities", fields! { "UserId" => dick_id.as_str(), "Text" => "See Dick run" }).unwrap();
    session.store("activities", fields! { "UserId" => harry_id.as_str(), "Text" => "See Harry run" }).unwrap();
    session.store("activities", fields! { "UserId" => tom_id.as_str(), "Text" => "See Tom run" }).unwrap();
    session.save_changes().unwrap();

    let mut session = db.open_session();
    let tom = session.load(&tom_id).unwrap().unwrap();
    let followed: Vec<Value> = session
        .get(tom)
        .and_then(|body| body.get("CoWorkers"))
        .map(|co_workers| {
            co_workers
                .elements()
                .filter(|c| c.get("ShowUpdates").and_then(Value::as_bool) == Some(true))
                .filter_map(|c| c.get("UserId").cloned())
                .collect()
        })
        .unwrap_or_default();

    let activities = session
        .query_collection(
            "activities",
            QueryRequest::new().filter(Query::one_of("UserId", followed)).wait_for_non_stale(),
        )
        .unwrap();
    assert_eq!(activities.len(), 2);
}

#[test]
fn test_escaped_ids_stay_distinct() {
    let db = open_db();
    let mut session = db.open_session();
    for name in ["C#", "C++"] {
        let id = format!("languages/{}", escape_id_component(name.trim()));
        session.store("languages", fields! { "Id" => id, "Name" => name }).unwrap();
    }
    session.save_changes().unwrap();

    let languages = db
        .query_collection("languages", QueryRequest::new().order_by("Name").wait_for_non_stale())
        .unwrap();
    assert_eq!(languages.len(), 2);
    assert_eq!(languages.ids(), vec!["languages/C%23", "languages/C%2B%2B"]);
    assert_eq!(languages.hits[1].get_str("Id"), Some("languages/C%2B%2B"));
}

#[test]
fn test_paging_and_ordering() {
    let db = open_db();
    for n in 0..25 {
        db.put_in("items", "", fields! { "Rank" => n % 5, "Label" => format!("item {:02}", n) })
            .unwrap();
    }

    let page = db
        .query_collection(
            "items",
            QueryRequest::new()
                .filter(Query::between("Rank", 1, 3))
                .order_by_desc("Rank")
                .order_by("Label")
                .skip(2)
                .take(4)
                .wait_for_non_stale(),
        )
        .unwrap();

    assert_eq!(page.stats.total_results, 15);
    assert_eq!(page.stats.skipped, 2);
    let labels: Vec<&str> = page.iter().filter_map(|hit| hit.get_str("Label")).collect();
    assert_eq!(labels, vec!["item 13", "item 18", "item 23", "item 02"]);
}

#[test]
fn test_unknown_field_on_static_index_is_malformed() {
    let db = seeded_names();
    db.register_index(
        IndexDefinition::builder("Users/ByName")
            .map("users", |doc| Ok(vec![fields! { "Name" => doc.get_field("Name").cloned() }]))
            .build()
            .unwrap(),
    )
    .unwrap();

    let err = db
        .query(
            "Users/ByName",
            QueryRequest::new().filter(Query::equals("Age", 42)).wait_for_non_stale(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedPredicate);

    // Dynamic indexes accept any field.
    let none = db
        .query_collection(
            "users",
            QueryRequest::new().filter(Query::equals("Age", 42)).wait_for_non_stale(),
        )
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn test_wait_for_non_stale_reflects_latest_write() {
    let db = open_db();
    db.register_index(
        IndexDefinition::builder("Users/ByName")
            .map("users", |doc| Ok(vec![fields! { "Name" => doc.get_field("Name").cloned() }]))
            .build()
            .unwrap(),
    )
    .unwrap();

    for round in 0..20 {
        let id = format!("users/{}", round);
        db.put(&id, fields! { "Name" => "Bob" }).unwrap();

        // Without waiting the result may lag, but the stats say so.
        let quick = db.query("Users/ByName", QueryRequest::new()).unwrap();
        assert_eq!(quick.stats.is_stale, quick.stats.indexed_sequence < quick.stats.store_sequence);
        assert!(quick.len() <= round + 1);

        let fresh = db
            .query("Users/ByName", QueryRequest::new().wait_timeout(WAIT))
            .unwrap();
        assert!(!fresh.stats.is_stale);
        assert_eq!(fresh.len(), round + 1);
        assert!(fresh.ids().contains(&id.as_str()));
    }
}

#[test]
fn test_wait_times_out_on_slow_index() {
    let db = open_db();
    let release = Arc::new(AtomicBool::new(false));
    let gate = release.clone();
    db.register_index(
        IndexDefinition::builder("Users/Slow")
            .map("users", move |doc| {
                while !gate.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(vec![fields! { "Name" => doc.get_field("Name").cloned() }])
            })
            .build()
            .unwrap(),
    )
    .unwrap();
    db.put("users/1", fields! { "Name" => "Bob" }).unwrap();

    let err = db
        .query("Users/Slow", QueryRequest::new().wait_timeout(Duration::from_millis(50)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StaleIndexTimeout);
    assert!(err.is_recoverable());

    let stale = db.query("Users/Slow", QueryRequest::new()).unwrap();
    assert!(stale.stats.is_stale);
    assert!(stale.is_empty());

    release.store(true, Ordering::SeqCst);
    let fresh = db.query("Users/Slow", QueryRequest::new().wait_timeout(WAIT)).unwrap();
    assert_eq!(fresh.ids(), vec!["users/1"]);
}
