use asset_ingest::llm::prompts;
use asset_ingest::*;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;
use asset_ingest::pipeline::PipelineBuilder;

struct Harness {
    pipeline: Arc<IngestionPipeline>,
    portfolio: Arc<InMemoryPortfolioStore>,
    staging: Arc<InMemoryStagingRepository>,
}

fn harness() -> Harness {
    harness_with(|builder| builder)
}

fn harness_with(configure: impl FnOnce(PipelineBuilder) -> PipelineBuilder) -> Harness {
    let portfolio = Arc::new(InMemoryPortfolioStore::new());
    let staging = Arc::new(InMemoryStagingRepository::new());
    let builder = IngestionPipeline::builder(portfolio.clone(), staging.clone());
    let pipeline = configure(builder).build().unwrap();
    Harness {
        pipeline: Arc::new(pipeline),
        portfolio,
        staging,
    }
}

fn csv(filename: &str, body: &str) -> UploadedFile {
    UploadedFile::new(filename, body.as_bytes().to_vec())
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn holding(name: &str, value: f64, class: AssetClass, subclass: &str) -> ClassifiedAsset {
    ClassifiedAsset {
        asset: RawAsset::new(name, value, "previous.csv"),
        classification: Classification {
            asset_class: class,
            asset_subclass: subclass.to_string(),
            risk_level: RiskLevel::Moderate,
            expected_return_pct: 8.0,
            confidence_score: 0.9,
            verified_via: VerifiedVia::Rule,
        },
    }
}

#[tokio::test]
async fn test_csv_with_bad_rows_end_to_end() {
    let h = harness();
    let file = csv(
        "holdings_30-11-2024.csv",
        "Name,Value\nHDFC Bank,150000\n,5000\nGold ETF,-10\n",
    );

    let summary = h.pipeline.ingest("alice", &[file], None).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.files[0].assets_extracted, 1);
    assert_eq!(summary.files[0].rows_dropped, 2);
    assert_eq!(summary.files[0].method, Some(ExtractionMethod::Tabular));
    assert_eq!(summary.sessions.len(), 1);

    let session = &summary.sessions[0];
    assert_eq!(session.statement_date.date, Some(d(2024, 11, 30)));
    assert_eq!(session.statement_date.confidence, DateConfidence::High);
    assert_eq!(session.statement_date.source, DateSource::Filename);
    assert_eq!(session.proposed_name.as_deref(), Some("November 2024"));
    assert_eq!(session.snapshot_match.suggested_action, SuggestedAction::CreateNew);
    assert_eq!(session.staged_count, 1);

    let view = h.pipeline.review(session.session_id).await.unwrap();
    assert_eq!(view.upload.status, UploadStatus::InReview);
    assert_eq!(view.staged_assets[0].name(), "HDFC Bank");
    assert_eq!(view.staged_assets[0].value(), 150000.0);

    let result = h
        .pipeline
        .finalize(session.session_id, &FinalizeOptions::default())
        .await
        .unwrap();
    assert_eq!(result.assets_saved, 1);
    assert!(!result.merged);
    assert_eq!(result.totals.total(), 150000.0);

    let snapshot = h
        .portfolio
        .get_snapshot("alice", &result.snapshot_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.statement_date, Some(d(2024, 11, 30)));
    assert_eq!(snapshot.name.as_deref(), Some("November 2024"));
    assert_eq!(snapshot.source_files, vec!["holdings_30-11-2024.csv"]);

    // finalized sessions are closed and their staged rows are gone
    assert!(matches!(
        h.pipeline.review(session.session_id).await,
        Err(IngestError::SessionClosed { .. })
    ));
    assert!(h.staging.load_staged_assets(session.session_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_files_do_not_abort_the_batch() {
    let h = harness();
    let files = vec![
        csv("good_2024-11-30.csv", "Name,Value\nSBI Savings Account,25000\n"),
        csv("notes.docx", "this is not a statement at all"),
        csv("tiny.csv", "a,b"),
        csv("header_only.csv", "Name,Value\n"),
    ];

    let (tx, mut rx) = mpsc::channel(64);
    let summary = h.pipeline.ingest("alice", &files, Some(tx)).await.unwrap();
    assert_eq!(summary.total_files, 4);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.sessions.len(), 1);

    let failed: Vec<&FileOutcome> = summary
        .files
        .iter()
        .filter(|f| f.status == FileStatus::Failed)
        .collect();
    assert_eq!(
        failed.iter().map(|f| f.filename.as_str()).collect::<Vec<_>>(),
        vec!["notes.docx", "tiny.csv", "header_only.csv"]
    );
    assert!(failed.iter().all(|f| f.error.is_some()));

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.first(), Some(&IngestEvent::Starting { files: 4 }));
    assert_eq!(events.last(), Some(&IngestEvent::Done));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, IngestEvent::FileFailed { .. }))
            .count(),
        3
    );
    assert!(events.iter().any(|e| matches!(e, IngestEvent::Classifying(_))));
}

#[tokio::test]
async fn test_duplicate_holdings_across_brokers_merge() {
    let h = harness();
    let files = vec![
        csv("broker_a_2024-11-30.csv", "Name,Value\nReliance Industries Ltd,500000\n"),
        csv("broker_b_2024-11-30.csv", "Name,Value\nReliance Industries Ltd,510000\n"),
    ];
    let summary = h.pipeline.ingest("alice", &files, None).await.unwrap();
    assert_eq!(summary.sessions.len(), 1);

    let session = &summary.sessions[0];
    assert_eq!(session.duplicate_groups.len(), 1);
    let group = &session.duplicate_groups[0];
    assert_eq!(group.recommendation, Recommendation::Merge);

    let outcome = h
        .pipeline
        .resolve_duplicates(session.session_id, &group.members[0].id, &Resolution::Merge)
        .await
        .unwrap();
    let merged = outcome.merged.unwrap();
    assert_eq!(merged.value(), 1010000.0);
    assert_eq!(
        merged.source_file(),
        "broker_a_2024-11-30.csv, broker_b_2024-11-30.csv"
    );

    let result = h
        .pipeline
        .finalize(session.session_id, &FinalizeOptions::default())
        .await
        .unwrap();
    assert_eq!(result.assets_saved, 1);
    assert_eq!(result.totals.total(), 1010000.0);
}

#[tokio::test]
async fn test_close_snapshot_is_proposed_and_merged_into() {
    let h = harness();
    let previous = Snapshot {
        id: "snap-nov".to_string(),
        name: Some("November 2024".to_string()),
        statement_date: Some(d(2024, 11, 20)),
        totals: ClassTotals {
            other: 1000.0,
            ..Default::default()
        },
        source_files: vec!["previous.csv".to_string()],
        created_at: Utc::now(),
    };
    h.portfolio
        .seed(
            "alice",
            previous,
            vec![holding("Gold ETF", 1000.0, AssetClass::Other, "gold")],
        )
        .await;

    let file = csv(
        "statement_30-11-2024.csv",
        "Name,Value\nGold ETF,1000\nSBI Fixed Deposit,5000\n",
    );
    let summary = h.pipeline.ingest("alice", &[file], None).await.unwrap();
    let session = &summary.sessions[0];
    assert_eq!(session.snapshot_match.match_type, SnapshotMatchType::Close);
    assert_eq!(session.snapshot_match.suggested_action, SuggestedAction::Prompt);
    assert_eq!(session.snapshot_match.days_difference, Some(10));
    assert_eq!(session.snapshot_match.matched_snapshot_id.as_deref(), Some("snap-nov"));

    // the staged gold holding duplicates the one already in the snapshot
    assert_eq!(session.duplicate_groups.len(), 1);
    let view = h.pipeline.review(session.session_id).await.unwrap();
    let gold = view
        .staged_assets
        .iter()
        .find(|a| a.name() == "Gold ETF")
        .unwrap();
    assert!(gold.is_duplicate);

    h.pipeline
        .resolve_duplicates(
            session.session_id,
            &gold.id.to_string(),
            &Resolution::DeleteOne { ids: vec![gold.id] },
        )
        .await
        .unwrap();

    let options = FinalizeOptions {
        merge_mode: true,
        ..Default::default()
    };
    let result = h.pipeline.finalize(session.session_id, &options).await.unwrap();
    assert!(result.merged);
    assert_eq!(result.snapshot_id, "snap-nov");
    assert_eq!(result.assets_saved, 1);
    assert_eq!(result.totals.total(), 5000.0);

    let snapshot = h.portfolio.get_snapshot("alice", "snap-nov").await.unwrap().unwrap();
    assert_eq!(snapshot.total_value(), 6000.0);
    assert_eq!(
        snapshot.source_files,
        vec!["previous.csv", "statement_30-11-2024.csv"]
    );
    assert_eq!(h.portfolio.list_assets("alice", "snap-nov").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_empty_selection_has_no_side_effects() {
    let h = harness();
    let file = csv("holdings_2024-11-30.csv", "Name,Value\nHDFC Bank,150000\n");
    let summary = h.pipeline.ingest("alice", &[file], None).await.unwrap();
    let session_id = summary.sessions[0].session_id;

    let options = FinalizeOptions {
        selected_ids: Some(Vec::new()),
        ..Default::default()
    };
    let err = h.pipeline.finalize(session_id, &options).await.unwrap_err();
    assert!(matches!(err, IngestError::Finalize(FinalizeError::NoAssetsSelected)));
    assert_eq!(h.portfolio.snapshot_count("alice").await, 0);

    // deselecting everything hits the same guard
    let view = h.pipeline.review(session_id).await.unwrap();
    let ids: Vec<Uuid> = view.staged_assets.iter().map(|a| a.id).collect();
    h.pipeline.staging().set_selected(session_id, &ids, false).await.unwrap();
    let err = h
        .pipeline
        .finalize(session_id, &FinalizeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoAssetsSelected);
    assert_eq!(h.portfolio.snapshot_count("alice").await, 0);
}

#[tokio::test]
async fn test_repeated_selected_ids_commit_once() {
    let h = harness();
    let file = csv("holdings_2024-11-30.csv", "Name,Value\nHDFC Bank,150000\nInfosys Ltd,90000\n");
    let summary = h.pipeline.ingest("alice", &[file], None).await.unwrap();
    let session_id = summary.sessions[0].session_id;
    let view = h.pipeline.review(session_id).await.unwrap();
    let hdfc = view.staged_assets.iter().find(|a| a.name() == "HDFC Bank").unwrap().id;

    let options = FinalizeOptions {
        selected_ids: Some(vec![hdfc, hdfc, hdfc]),
        ..Default::default()
    };
    let result = h.pipeline.finalize(session_id, &options).await.unwrap();
    assert_eq!(result.assets_saved, 1);
    assert_eq!(result.totals.total(), 150000.0);

    let rows = h.portfolio.list_assets("alice", &result.snapshot_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    let snapshot = h
        .portfolio
        .get_snapshot("alice", &result.snapshot_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.total_value(), 150000.0);
}

#[tokio::test]
async fn test_edits_are_flushed_before_finalize() {
    let h = harness();
    let file = csv("holdings_2024-11-30.csv", "Name,Value\nHDFC Bank,150000\nInfosys Ltd,90000\n");
    let summary = h.pipeline.ingest("alice", &[file], None).await.unwrap();
    let session_id = summary.sessions[0].session_id;
    let view = h.pipeline.review(session_id).await.unwrap();

    let hdfc = view.staged_assets.iter().find(|a| a.name() == "HDFC Bank").unwrap();
    let patch = StagedAssetPatch {
        current_value: Some(155000.0),
        asset_class: Some(AssetClass::Equity),
        asset_subclass: Some("large_cap_equity".to_string()),
        ..StagedAssetPatch::new(hdfc.id)
    };
    assert_eq!(h.pipeline.update_staged(session_id, &[patch]).await.unwrap(), 1);

    let result = h
        .pipeline
        .finalize(session_id, &FinalizeOptions::default())
        .await
        .unwrap();
    assert_eq!(result.assets_saved, 2);
    assert_eq!(result.totals.total(), 245000.0);
    assert!(result.totals.equity >= 155000.0);

    let rows = h.portfolio.list_assets("alice", &result.snapshot_id).await.unwrap();
    let saved = rows.iter().find(|r| r.asset.asset.name == "HDFC Bank").unwrap();
    assert_eq!(saved.asset.asset.current_value, 155000.0);
    assert_eq!(saved.asset.classification.verified_via, VerifiedVia::Manual);
    assert_eq!(saved.asset.classification.asset_subclass, "large_cap_equity");
}

#[tokio::test]
async fn test_files_far_apart_become_separate_sessions() {
    let h = harness();
    let files = vec![
        csv("nov_2024-11-30.csv", "Name,Value\nHDFC Bank,150000\n"),
        csv("nov_2024-11-27.csv", "Name,Value\nPPF Account,300000\n"),
        csv("jan_2025-01-31.csv", "Name,Value\nHDFC Bank,160000\n"),
    ];
    let summary = h.pipeline.ingest("alice", &files, None).await.unwrap();
    assert_eq!(summary.sessions.len(), 2);

    let first = &summary.sessions[0];
    assert_eq!(first.proposed_name.as_deref(), Some("Nov 27-30, 2024"));
    assert_eq!(first.statement_date.date, Some(d(2024, 11, 30)));
    assert_eq!(first.staged_count, 2);
    assert_eq!(first.source_files.len(), 2);

    let second = &summary.sessions[1];
    assert_eq!(second.proposed_name.as_deref(), Some("January 2025"));
    assert_eq!(second.staged_count, 1);
}

/// Answers by prompt kind: table extraction, statement date or classification.
struct ScriptedOracle;

#[async_trait]
impl ClassificationOracle for ScriptedOracle {
    async fn classify_text(&self, system_prompt: &str, _user_prompt: &str) -> Result<Value> {
        if system_prompt.starts_with(prompts::SYSTEM_PROMPT_TABULAR.trim_end()) {
            Ok(json!([
                { "name": "Axis Bluechip Fund", "currentValue": "52,000", "quantity": 12.5 },
                { "name": "Total", "currentValue": 52000 }
            ]))
        } else if system_prompt == prompts::SYSTEM_PROMPT_STATEMENT_DATE {
            Ok(json!({ "date": null, "confidence": "low" }))
        } else {
            Ok(json!({ "assetClass": "equity", "assetSubclass": "equity_mutual_fund", "confidence": 0.9 }))
        }
    }

    async fn classify_images(&self, _prompt: &str, _images: &[PageImage]) -> Result<Value> {
        Ok(json!([]))
    }
}

#[tokio::test]
async fn test_unstructured_table_uses_oracle_fallback() {
    let h = harness_with(|builder| builder.oracle(Arc::new(ScriptedOracle)));
    let file = csv(
        "cas_2024-11-30.csv",
        "Folio 123 | Axis Bluechip\nUnits 12.5 | NAV not available\n",
    );

    let summary = h.pipeline.ingest("alice", &[file], None).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.files[0].method, Some(ExtractionMethod::AiTabular));
    assert_eq!(summary.files[0].assets_extracted, 1);
    assert!(summary.files[0].rows_dropped >= 1);

    let view = h.pipeline.review(summary.sessions[0].session_id).await.unwrap();
    let fund = &view.staged_assets[0];
    assert_eq!(fund.value(), 52000.0);
    assert_eq!(fund.classified.asset.quantity, Some(12.5));
    assert_eq!(fund.classified.classification.asset_class, AssetClass::Equity);
}

#[tokio::test]
async fn test_api_reports_errors_as_records() {
    let h = harness();
    let api = PipelineApi::new(h.pipeline.clone());

    let missing = api.review(Uuid::new_v4()).await;
    assert!(!missing.is_success());
    assert_eq!(missing.error().unwrap().kind, ErrorKind::SessionNotFound);

    let request = api::IngestRequest {
        user_id: "alice".to_string(),
        files: vec![csv("holdings_2024-11-30.csv", "Name,Value\nHDFC Bank,150000\n")],
    };
    let summary = api.ingest(request, None).await;
    let session_id = summary.data().unwrap().sessions[0].session_id;

    let response = api
        .finalize(api::FinalizeRequest {
            session_id,
            options: FinalizeOptions {
                selected_ids: Some(Vec::new()),
                ..Default::default()
            },
        })
        .await;
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["status"], "error");
    assert_eq!(value["error"]["kind"], "no_assets_selected");

    let response = api
        .finalize(api::FinalizeRequest {
            session_id,
            options: FinalizeOptions::default(),
        })
        .await;
    assert!(response.is_success());
    assert_eq!(response.data().unwrap().assets_saved, 1);
}
