//! Compiled table queries executed against the in-memory store.

use docshift::{memory::InMemoryStore, prelude::*};
use serde::Deserialize;

#[derive(Debug, Default, PartialEq, Deserialize)]
struct User {
    name: String,
    age: i64,
}

async fn users() -> (InMemoryStore, CollectionRef) {
    let store = InMemoryStore::new();
    let users = store.collection("users");
    users
        .insert_documents(vec![
            doc! { "name": "Ann", "age": 12, "city": "Oslo" },
            doc! { "name": "Bob", "age": 18, "city": "Rome" },
            doc! { "name": "Cid", "age": 40, "city": "Oslo" },
            doc! { "name": "Dee", "age": 25, "city": "Rome" },
        ])
        .await
        .unwrap();
    (store, users)
}

fn specs() -> QuerySpecSet {
    QuerySpecSet::new()
        .with("name", FieldSpec::field("name", "$eq"))
        .with("minAge", FieldSpec::field("age", "$gte").convert(convert::int))
        .with("cities", FieldSpec::field("city", "$in").convert(convert::string_list))
        .with("search", FieldSpec::field("name", "$regex"))
        .with("keyword", FieldSpec::fields(["name", "city"], "$regex"))
}

#[tokio::test]
async fn table_query_filters_sorts_and_pages() {
    let (_store, users) = users().await;
    let request: TableRequest = serde_json::from_str(
        r#"{ "query": { "minAge": "18" }, "sort": ["-age"], "start": 0, "limit": 2 }"#,
    )
    .unwrap();

    let page = table_query(users.as_ref(), &request, &specs(), true, &SerdePrototype::<User>::new())
        .await
        .unwrap();

    assert_eq!(page.count, 3);
    assert_eq!(
        page.result,
        vec![
            User { name: "Cid".into(), age: 40 },
            User { name: "Dee".into(), age: 25 },
        ]
    );
}

#[tokio::test]
async fn second_page_starts_after_the_first() {
    let (_store, users) = users().await;
    let request = TableRequest {
        query: doc! { "minAge": "18" },
        sort: vec!["-age".into()],
        start: 2,
        limit: 2,
    };

    let page = table_query(users.as_ref(), &request, &specs(), true, &SerdePrototype::<User>::new())
        .await
        .unwrap();

    assert_eq!(page.count, 3);
    assert_eq!(page.result, vec![User { name: "Bob".into(), age: 18 }]);
}

#[tokio::test]
async fn membership_list_and_passthrough() {
    let (_store, users) = users().await;
    let request = TableRequest {
        query: doc! { "cities": "Rome", "name": "Dee" },
        ..Default::default()
    };
    let page = table_query(users.as_ref(), &request, &specs(), true, &RawPrototype)
        .await
        .unwrap();
    assert_eq!(page.count, 1);

    let request = TableRequest {
        query: doc! { "city": "Oslo" },
        sort: vec!["name".into()],
        ..Default::default()
    };
    let page = table_query(users.as_ref(), &request, &specs(), false, &SerdePrototype::<User>::new())
        .await
        .unwrap();
    assert_eq!(
        page.result.iter().map(|u| u.name.as_str()).collect::<Vec<_>>(),
        vec!["Ann", "Cid"]
    );

    let page = table_query(users.as_ref(), &request, &specs(), true, &RawPrototype)
        .await
        .unwrap();
    assert_eq!(page.count, 4);
}

#[tokio::test]
async fn regex_specs_match_case_insensitively() {
    let (_store, users) = users().await;
    let request = TableRequest { query: doc! { "search": "^b" }, ..Default::default() };

    let page = table_query(users.as_ref(), &request, &specs(), true, &SerdePrototype::<User>::new())
        .await
        .unwrap();
    assert_eq!(page.count, 1);
    assert_eq!(page.result, vec![User { name: "Bob".into(), age: 18 }]);

    let request = TableRequest {
        query: doc! { "keyword": "O" },
        sort: vec!["name".into()],
        ..Default::default()
    };
    let page = table_query(users.as_ref(), &request, &specs(), true, &SerdePrototype::<User>::new())
        .await
        .unwrap();
    assert_eq!(page.result, vec![User { name: "Bob".into(), age: 18 }]);
}

#[tokio::test]
async fn base_query_projects_rows() {
    let (_store, users) = users().await;

    let (rows, count) = base_query(
        users.as_ref(),
        doc! { "name": "Bob" },
        &["name"],
        0,
        0,
        &["name"],
        &[],
        None,
        &RawPrototype,
    )
    .await
    .unwrap();

    assert_eq!(count, 1);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_str("name").unwrap(), "Bob");
    assert!(rows[0].get("age").is_none());
    assert!(rows[0].get("_id").is_some());
}

#[tokio::test]
async fn base_query_sorts_under_a_collation() {
    let (_store, users) = users().await;
    users
        .insert_documents(vec![doc! { "name": "bea", "age": 33, "city": "Oslo" }])
        .await
        .unwrap();

    let (rows, count) = base_query(
        users.as_ref(),
        doc! { "age": { "$gte": 25 } },
        &["name"],
        0,
        0,
        &[],
        &[],
        Some(doc! { "locale": "en", "strength": 2 }),
        &SerdePrototype::<User>::new(),
    )
    .await
    .unwrap();

    assert_eq!(count, 3);
    assert_eq!(
        rows.iter().map(|u| u.name.as_str()).collect::<Vec<_>>(),
        vec!["bea", "Cid", "Dee"]
    );
}

#[tokio::test]
async fn invalid_windows_and_projections_are_rejected() {
    let (_store, users) = users().await;

    let request = TableRequest { start: -1, ..Default::default() };
    let err = table_query(users.as_ref(), &request, &specs(), true, &RawPrototype)
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::Validation(_)));

    let err = base_query(users.as_ref(), doc! {}, &[], 0, 0, &["name"], &["age"], None, &RawPrototype)
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::Config(_)));
}

#[tokio::test]
async fn bad_parameter_is_a_conversion_error() {
    let (_store, users) = users().await;
    let request = TableRequest { query: doc! { "minAge": "old" }, ..Default::default() };

    let err = table_query(users.as_ref(), &request, &specs(), true, &RawPrototype)
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::Conversion { ref key, .. } if key == "minAge"));
}

#[tokio::test]
async fn logical_composition_runs_on_the_store() {
    let (_store, users) = users().await;
    let logic = LogicNode::or([LogicNode::leaf("name"), LogicNode::leaf("age")]);

    let compiled = compile_with_logic(doc! { "name": "Ann", "minAge": "30" }, &specs(), true, &logic).unwrap();

    assert_eq!(
        compiled.filter,
        Some(doc! { "$or": [ { "name": { "$eq": "Ann" } }, { "age": { "$gte": 30_i64 } } ] })
    );
    assert_eq!(users.count_documents(compiled.filter_or_all()).await.unwrap(), 2);
}
