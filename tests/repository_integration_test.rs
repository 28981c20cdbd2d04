// ==========================================
// Repository 层集成测试
// ==========================================
// 测试目标: 会话快照持久化 / 目标库按会话隔离 / 跨会话自然键去重
// ==========================================

mod test_helpers;

use inventory_import::domain::schema::{SchemaField, INVENTORY_SCHEMA};
use inventory_import::domain::validation::ErrorKind;
use inventory_import::importer::CancelFlag;
use inventory_import::repository::{RecordSink, SqliteRecordSink};
use inventory_import::{
    logging, FieldType, ImportApi, ImportStage, SchemaRegistry, TargetSchema,
};
use test_helpers::*;

/// 上传 + 接受建议 + 校验 + 提交，返回会话 ID
async fn committed_session(api: &ImportApi, rows: &[&str]) -> String {
    let session = api
        .start_import(INVENTORY_SCHEMA, "stock.csv", &inventory_csv(rows))
        .await
        .expect("start_import failed");
    api.accept_suggestions(&session.session_id).await.unwrap();
    let validated = api.run_validation(&session.session_id).await.unwrap();
    assert!(validated.validation.as_ref().unwrap().errors.is_empty());

    let (session, result) = api
        .commit(&session.session_id, &CancelFlag::new(), None)
        .await
        .expect("commit failed");
    assert_eq!(session.stage, ImportStage::Completed);
    assert_eq!(result.success_rows, rows.len());
    session.session_id
}

// ==========================================
// 测试用例
// ==========================================

#[tokio::test]
async fn test_session_survives_reopen() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();

    let session_id = {
        let api = create_test_api(&db_path);
        let session = api
            .start_import(INVENTORY_SCHEMA, "stock.csv", &inventory_csv(&["A-1,Bolt,3,1.50"]))
            .await
            .unwrap();
        api.accept_suggestions(&session.session_id).await.unwrap();
        session.session_id
    };

    // 新实例读取同一数据库：映射与日志保持
    let api = create_test_api(&db_path);
    let session = api.get_session(&session_id).await.unwrap();
    assert_eq!(session.stage, ImportStage::Mapping);
    assert_eq!(session.row_count(), 1);
    assert_eq!(session.column_for_field("sku"), Some("SKU"));
    assert!(!session.audit_log.is_empty());

    let session = api.run_validation(&session_id).await.unwrap();
    assert_eq!(session.stage, ImportStage::Correcting);
}

#[tokio::test]
async fn test_list_sessions_respects_limit() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let api = create_test_api(&db_path);

    let mut ids = Vec::new();
    for i in 0..3 {
        let row = format!("S-{},Item,1,1.00", i);
        let session = api
            .start_import(INVENTORY_SCHEMA, &format!("f{}.csv", i), &inventory_csv(&[&row]))
            .await
            .unwrap();
        ids.push(session.session_id);
    }

    let all = api.list_sessions(10).await.unwrap();
    assert_eq!(all.len(), 3);
    for id in &ids {
        assert!(all.iter().any(|s| &s.session_id == id));
    }
    assert!(all.iter().all(|s| s.stage == ImportStage::Mapping && s.row_count == 1));

    assert_eq!(api.list_sessions(2).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rollback_only_touches_own_session() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let api = create_test_api(&db_path);

    let first = committed_session(&api, &["A-1,Bolt,3,1.50", "A-2,Nut,4,0.10"]).await;
    let second = committed_session(&api, &["B-1,Washer,10,0.05"]).await;

    let (session, removed) = api.rollback(&first).await.unwrap();
    assert_eq!(session.stage, ImportStage::RolledBack);
    assert_eq!(removed, 2);

    assert_eq!(count_records(&db_path, &first), 0);
    assert_eq!(count_records(&db_path, &second), 1);

    let records = fetch_records(&db_path, &second);
    assert_eq!(records[0]["sku"], "B-1");
}

#[tokio::test]
async fn test_natural_key_from_other_session_is_duplicate() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let api = create_test_api(&db_path);

    let first = committed_session(&api, &["A-1,Bolt,3,1.50"]).await;

    // 第二个会话中 A-1 已存在于目标库
    let session = api
        .start_import(
            INVENTORY_SCHEMA,
            "again.csv",
            &inventory_csv(&["A-1,Bolt,5,1.50", "A-9,Pin,2,0.30"]),
        )
        .await
        .unwrap();
    api.accept_suggestions(&session.session_id).await.unwrap();
    let validated = api.run_validation(&session.session_id).await.unwrap();
    let result = validated.validation.unwrap();
    assert_eq!(result.duplicate_count, 1);
    assert_eq!(result.errors[0].row_index, 0);
    assert_eq!(result.errors[0].kind, ErrorKind::DuplicateKey);

    // 回滚前一会话后，重新校验不再重复
    api.rollback(&first).await.unwrap();
    let again = api
        .start_import(
            INVENTORY_SCHEMA,
            "again.csv",
            &inventory_csv(&["A-1,Bolt,5,1.50"]),
        )
        .await
        .unwrap();
    api.accept_suggestions(&again.session_id).await.unwrap();
    let validated = api.run_validation(&again.session_id).await.unwrap();
    assert!(validated.validation.unwrap().errors.is_empty());
}

#[tokio::test]
async fn test_sink_existing_keys_after_commit() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let api = create_test_api(&db_path);

    committed_session(&api, &["A-1,Bolt,3,1.50", "A-2,Nut,4,0.10"]).await;

    let sink = SqliteRecordSink::new(&db_path).unwrap();
    let keys = vec!["A-2".to_string(), "Z-9".to_string(), "A-1".to_string()];
    let existing = sink.existing_keys(INVENTORY_SCHEMA, &keys).await.unwrap();
    assert_eq!(existing, vec!["A-2".to_string(), "A-1".to_string()]);
}

#[tokio::test]
async fn test_natural_keys_isolated_between_schemas() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let api = create_test_api(&db_path);
    committed_session(&api, &["A-1,Bolt,3,1.50"]).await;

    // 自定义 Schema 与库存 Schema 共用同一目标表
    let mut registry = SchemaRegistry::with_builtin();
    registry
        .register(TargetSchema {
            name: "supplier_stock".to_string(),
            fields: vec![
                SchemaField::new("sku", "SKU", FieldType::Text, true),
                SchemaField::new("name", "Product Name", FieldType::Text, true),
            ],
            natural_key: vec!["sku".to_string()],
        })
        .unwrap();
    let supplier_api = ImportApi::open(&db_path, registry).unwrap();

    let session = supplier_api
        .start_import("supplier_stock", "supplier.csv", b"SKU,Product Name\nA-1,Bolt\n")
        .await
        .unwrap();
    supplier_api.accept_suggestions(&session.session_id).await.unwrap();
    let validated = supplier_api.run_validation(&session.session_id).await.unwrap();
    assert!(validated.validation.unwrap().errors.is_empty());

    let (session, result) = supplier_api
        .commit(&session.session_id, &CancelFlag::new(), None)
        .await
        .unwrap();
    assert_eq!(session.stage, ImportStage::Completed);
    assert_eq!(result.success_rows, 1);
    assert_eq!(count_records(&db_path, &session.session_id), 1);
}
