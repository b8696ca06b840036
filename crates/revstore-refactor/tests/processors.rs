//! End-to-end migration runs against the in-memory backend.

use std::sync::Arc;

use revstore_refactor::core::schema::{self, ColumnDef, DbType, TableSchema};
use revstore_refactor::resolver::{ModelIndex, PartStorage, TypePart};
use revstore_refactor::store::memory::MemoryStore;
use revstore_refactor::{
    EngineConfig, MigrationRunner, QualifiedName, RowValue, SchemaRepository, TypePartId,
};

fn model_with_reference(name: &str, id: i64, table: &str) -> ModelIndex {
    let mut model = ModelIndex::new();
    model.add_part(
        &QualifiedName::parse(name).unwrap(),
        TypePart {
            id: TypePartId(id),
            owner_table: table.to_string(),
            storage: PartStorage::Reference {
                table: table.to_string(),
            },
        },
    );
    model
}

fn link_row(
    branch: i64,
    id: i64,
    rev_min: i64,
    rev_max: i64,
    src: i64,
    dest: i64,
    reference: i64,
) -> Vec<(&'static str, RowValue)> {
    vec![
        (schema::BRANCH, RowValue::Int(branch)),
        (schema::IDENTIFIER, RowValue::Int(id)),
        (schema::REV_MIN, RowValue::Int(rev_min)),
        (schema::REV_MAX, RowValue::Int(rev_max)),
        (schema::REV_CREATE, RowValue::Int(rev_min)),
        (schema::SOURCE_ID, RowValue::Int(src)),
        (schema::SOURCE_TYPE, RowValue::Text("ITEM".into())),
        (schema::DEST_ID, RowValue::Int(dest)),
        (schema::DEST_TYPE, RowValue::Text("ITEM".into())),
        (schema::META_ATTRIBUTE_ID, RowValue::Int(reference)),
        (schema::SORT_ORDER, RowValue::Null),
    ]
}

fn script(processors: &str) -> EngineConfig {
    EngineConfig::from_yaml(&format!(
        "store:\n  type: memory\nprocessors:\n{}",
        processors
    ))
    .unwrap()
}

#[tokio::test]
async fn test_duplicate_removal_shrinks_overlapping_assignment() {
    let mut repo = SchemaRepository::new();
    repo.add(TableSchema::association("HAS_PARTS"));
    let store = MemoryStore::with_schema(&repo);
    // Two assignments of the same value to the same owner: [1,5] and [3,8].
    store.insert_row("HAS_PARTS", link_row(0, 1, 1, 5, 1, 10, 42));
    store.insert_row("HAS_PARTS", link_row(0, 2, 3, 8, 1, 10, 42));

    let config = script(
        "  - type: remove-duplicate-links\n    table: HAS_PARTS\n    reference: \"tl.core:Item#parts\"\n",
    );
    let runner = MigrationRunner::new(
        Arc::new(store.clone()),
        repo,
        model_with_reference("tl.core:Item#parts", 42, "HAS_PARTS"),
    );
    let report = runner.run(&config.script).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(report.applied, 1);

    let mut lifetimes: Vec<(i64, i64)> = store
        .rows("HAS_PARTS")
        .iter()
        .map(|r| {
            (
                r[schema::REV_MIN].as_int().unwrap(),
                r[schema::REV_MAX].as_int().unwrap(),
            )
        })
        .collect();
    lifetimes.sort();
    // The earlier assignment survives unchanged; the later one starts after
    // the covered range.
    assert_eq!(lifetimes, vec![(1, 5), (6, 8)]);
}

#[tokio::test]
async fn test_cross_product_synthesis_intersects_lifetimes() {
    let mut repo = SchemaRepository::new();
    repo.add(TableSchema::association("HAS_PARTS"));
    repo.add(TableSchema::object("SRC", Vec::new()));
    repo.add(TableSchema::object("DST", Vec::new()));
    let store = MemoryStore::with_schema(&repo);
    for (table, id, min, max) in [("SRC", 1i64, 1i64, 10i64), ("DST", 100, 5, 20)] {
        store.insert_row(
            table,
            vec![
                (schema::BRANCH, RowValue::Int(0)),
                (schema::IDENTIFIER, RowValue::Int(id)),
                (schema::REV_MIN, RowValue::Int(min)),
                (schema::REV_MAX, RowValue::Int(max)),
                (schema::TYPE_ID, RowValue::Int(1)),
            ],
        );
    }

    let config = script(
        "  - type: create-links\n    table: HAS_PARTS\n    reference: \"tl.core:Item#parts\"\n    source_table: SRC\n    dest_table: DST\n",
    );
    let runner = MigrationRunner::new(
        Arc::new(store.clone()),
        repo,
        model_with_reference("tl.core:Item#parts", 42, "HAS_PARTS"),
    );
    let report = runner.run(&config.script).await.unwrap();
    assert!(report.succeeded());

    let links = store.rows("HAS_PARTS");
    assert_eq!(links.len(), 1);
    assert_eq!(links[0][schema::SOURCE_ID], RowValue::Int(1));
    assert_eq!(links[0][schema::DEST_ID], RowValue::Int(100));
    assert_eq!(links[0][schema::REV_MIN], RowValue::Int(5));
    assert_eq!(links[0][schema::REV_MAX], RowValue::Int(10));
}

#[tokio::test]
async fn test_column_to_flex_and_back_restores_value() {
    let mut repo = SchemaRepository::new();
    repo.add(TableSchema::object(
        "A",
        vec![ColumnDef::nullable("C1", DbType::String)],
    ));
    repo.add(TableSchema::flex());
    let store = MemoryStore::with_schema(&repo);
    store.insert_row(
        "A",
        vec![
            (schema::BRANCH, RowValue::Int(0)),
            (schema::IDENTIFIER, RowValue::Int(1)),
            (schema::REV_MIN, RowValue::Int(1)),
            (schema::REV_MAX, RowValue::Int(4)),
            (schema::REV_CREATE, RowValue::Int(1)),
            (schema::TYPE_ID, RowValue::Int(1)),
            ("C1", RowValue::Text("Hello".into())),
        ],
    );

    let config = script(
        "  - type: column-to-flex\n    table: A\n    column: C1\n    attribute: c1\n    drop_column: false\n  - type: flex-to-column\n    table: A\n    attribute: c1\n    column: C1\n",
    );
    let runner = MigrationRunner::new(Arc::new(store.clone()), repo, ModelIndex::new());
    let report = runner.run(&config.script).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(report.applied, 2);

    let rows = store.rows("A");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["C1"], RowValue::Text("Hello".into()));
    assert_eq!(rows[0][schema::REV_MIN], RowValue::Int(1));
    assert_eq!(rows[0][schema::REV_MAX], RowValue::Int(4));
    assert_eq!(store.row_count(schema::FLEX_DATA), 0);
}

#[tokio::test]
async fn test_bridge_removal_keeps_bridge_and_intersects_lifetimes() {
    let mut repo = SchemaRepository::new();
    repo.add(TableSchema::association("HAS_PARTS"));
    let store = MemoryStore::with_schema(&repo);
    let mut model = model_with_reference("m:Item#entries", 42, "HAS_PARTS");
    model.add_part(
        &QualifiedName::parse("m:Entry#value").unwrap(),
        TypePart {
            id: TypePartId(43),
            owner_table: "HAS_PARTS".to_string(),
            storage: PartStorage::Reference {
                table: "HAS_PARTS".to_string(),
            },
        },
    );
    model.add_part(
        &QualifiedName::parse("m:Item#values").unwrap(),
        TypePart {
            id: TypePartId(44),
            owner_table: "HAS_PARTS".to_string(),
            storage: PartStorage::Reference {
                table: "HAS_PARTS".to_string(),
            },
        },
    );
    // source 1 -> bridge 10 [1,5]; bridge 10 -> dest 100 [3,8].
    store.insert_row("HAS_PARTS", link_row(0, 1, 1, 5, 1, 10, 42));
    store.insert_row("HAS_PARTS", link_row(0, 2, 3, 8, 10, 100, 43));

    let config = script(
        "  - type: synthesize-direct-links\n    table: HAS_PARTS\n    source_reference: \"m:Item#entries\"\n    dest_reference: \"m:Entry#value\"\n    new_reference: \"m:Item#values\"\n",
    );
    let runner = MigrationRunner::new(Arc::new(store.clone()), repo, model);
    let report = runner.run(&config.script).await.unwrap();
    assert!(report.succeeded());

    // Both hops survive; exactly one direct link with lifetime [3,5].
    let rows = store.rows("HAS_PARTS");
    assert_eq!(rows.len(), 3);
    let direct: Vec<_> = rows
        .iter()
        .filter(|r| r[schema::META_ATTRIBUTE_ID] == RowValue::Int(44))
        .collect();
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0][schema::REV_MIN], RowValue::Int(3));
    assert_eq!(direct[0][schema::REV_MAX], RowValue::Int(5));
    assert_eq!(direct[0][schema::SOURCE_ID], RowValue::Int(1));
    assert_eq!(direct[0][schema::DEST_ID], RowValue::Int(100));
}

#[tokio::test]
async fn test_order_synthesis_is_monotone_in_attribute_values() {
    let mut repo = SchemaRepository::new();
    repo.add(TableSchema::association("HAS_PARTS"));
    repo.add(TableSchema::object(
        "ITEM",
        vec![ColumnDef::nullable("POSITION", DbType::Double)],
    ));
    let store = MemoryStore::with_schema(&repo);
    let positions = [(20i64, 3.0f64), (21, 1.0), (22, 2.0), (23, 2.0)];
    for (id, position) in positions {
        store.insert_row(
            "ITEM",
            vec![
                (schema::BRANCH, RowValue::Int(0)),
                (schema::IDENTIFIER, RowValue::Int(id)),
                (schema::REV_MIN, RowValue::Int(1)),
                (schema::REV_MAX, RowValue::Int(100)),
                ("POSITION", RowValue::Double(position)),
            ],
        );
    }
    for (link_id, dest) in [(1i64, 20i64), (2, 21), (3, 22), (4, 23)] {
        store.insert_row("HAS_PARTS", link_row(0, link_id, 5, 50, 9, dest, 42));
    }

    let config = script(
        "  - type: synthesize-link-order\n    table: HAS_PARTS\n    reference: \"tl.core:Item#parts\"\n    order_table: ITEM\n    order_column: POSITION\n    step: 10\n",
    );
    let runner = MigrationRunner::new(
        Arc::new(store.clone()),
        repo,
        model_with_reference("tl.core:Item#parts", 42, "HAS_PARTS"),
    );
    let report = runner.run(&config.script).await.unwrap();
    assert!(report.succeeded());

    let mut by_position: Vec<(f64, i64)> = store
        .rows("HAS_PARTS")
        .iter()
        .map(|r| {
            let dest = r[schema::DEST_ID].as_int().unwrap();
            let position = positions.iter().find(|(id, _)| *id == dest).unwrap().1;
            (position, r[schema::SORT_ORDER].as_int().unwrap())
        })
        .collect();
    by_position.sort_by(|a, b| a.partial_cmp(b).unwrap());
    // Non-decreasing overall, strictly increasing between distinct values.
    for pair in by_position.windows(2) {
        assert!(pair[0].1 <= pair[1].1);
        if pair[0].0 < pair[1].0 {
            assert!(pair[0].1 < pair[1].1);
        }
    }
    let orders: Vec<i64> = by_position.iter().map(|(_, order)| *order).collect();
    assert_eq!(orders, vec![0, 10, 20, 30]);
}

#[tokio::test]
async fn test_move_objects_round_trip_preserves_rows() {
    let mut repo = SchemaRepository::new();
    let attrs = vec![ColumnDef::nullable("NAME", DbType::String)];
    repo.add(TableSchema::object("A", attrs.clone()));
    repo.add(TableSchema::object("B", attrs));
    repo.add(TableSchema::flex());
    let store = MemoryStore::with_schema(&repo);
    let mut model = ModelIndex::new();
    model.add_type(
        &QualifiedName::parse("m:Special").unwrap(),
        revstore_refactor::resolver::TypeEntry {
            id: TypePartId(7),
            table: "A".to_string(),
        },
    );
    store.insert_row(
        "A",
        vec![
            (schema::BRANCH, RowValue::Int(1)),
            (schema::IDENTIFIER, RowValue::Int(10)),
            (schema::REV_MIN, RowValue::Int(2)),
            (schema::REV_MAX, RowValue::Int(9)),
            (schema::REV_CREATE, RowValue::Int(2)),
            (schema::TYPE_ID, RowValue::Int(7)),
            ("NAME", RowValue::Text("alpha".into())),
        ],
    );
    let before = store.rows("A");

    let there = script(
        "  - type: move-objects\n    source_table: A\n    target_table: B\n    types: [\"m:Special\"]\n",
    );
    let back = script(
        "  - type: move-objects\n    source_table: B\n    target_table: A\n    types: [\"m:Special\"]\n",
    );
    let runner = MigrationRunner::new(Arc::new(store.clone()), repo, model);
    assert!(runner.run(&there.script).await.unwrap().succeeded());
    assert_eq!(store.row_count("A"), 0);
    assert_eq!(store.row_count("B"), 1);
    assert!(runner.run(&back.script).await.unwrap().succeeded());

    assert_eq!(store.rows("A"), before);
    assert_eq!(store.row_count("B"), 0);
}
