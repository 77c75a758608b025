use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use axrelay_core::{
    RunError,
    appliance::SubmissionStatus,
    config::ExecutionMode,
    ledger::SubmissionLedger,
    types::{ApplianceId, ContentHash, Profile, ResultState, SubmissionKey},
};

#[path = "support/mod.rs"]
mod support;
use support::{
    FakeAppliances, Harness, LosingLedger, PROFILE, file_names, md5_hex,
    verdict,
};

fn key(contents: &[u8], appliance: &str) -> SubmissionKey {
    SubmissionKey::new(
        ContentHash::new(md5_hex(contents)),
        Profile::from(PROFILE),
        ApplianceId::from(appliance),
    )
}

fn drop_numbered(h: &Harness, count: usize) -> Result<()> {
    for i in 1..=count {
        h.drop_file(&format!("f{i}"), format!("sample {i}").as_bytes())?;
    }
    Ok(())
}

#[tokio::test]
async fn five_files_over_three_appliances_round_robin() -> Result<()> {
    let h = Harness::new(&["A", "B", "C"], FakeAppliances::new()).await?;
    drop_numbered(&h, 5)?;

    let report = h.engine().run().await?;

    let uploads = h.api.uploads().await;
    let assigned: Vec<(String, String)> = uploads
        .iter()
        .map(|u| (u.file_name.clone(), u.appliance.to_string()))
        .collect();
    assert_eq!(
        assigned,
        vec![
            ("f1".into(), "A".into()),
            ("f2".into(), "B".into()),
            ("f3".into(), "C".into()),
            ("f4".into(), "A".into()),
            ("f5".into(), "B".into()),
        ]
    );
    assert_eq!(report.dispatch.attempted, 5);
    assert_eq!(report.dispatch.submitted, 5);
    assert!(file_names(&h.incoming()).is_empty());
    assert_eq!(
        file_names(&h.stage("Pending")),
        vec!["f1", "f2", "f3", "f4", "f5"]
    );

    let records = h.records().await?;
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.is_pending()));
    assert!(
        records
            .iter()
            .all(|r| r.path.parent() == Some(h.stage("Pending").as_path()))
    );

    let logouts: Vec<String> =
        h.api.logouts().await.iter().map(|a| a.to_string()).collect();
    assert_eq!(logouts, vec!["A", "B", "C"]);
    Ok(())
}

#[tokio::test]
async fn per_appliance_mode_keeps_the_same_assignment() -> Result<()> {
    let h = Harness::new(&["A", "B", "C"], FakeAppliances::new())
        .await?
        .with_execution(ExecutionMode::PerAppliance);
    drop_numbered(&h, 5)?;

    let report = h.engine().run().await?;
    assert_eq!(report.dispatch.submitted, 5);

    let mut by_appliance: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for upload in h.api.uploads().await {
        by_appliance
            .entry(upload.appliance.to_string())
            .or_default()
            .push(upload.file_name);
    }
    assert_eq!(by_appliance["A"], vec!["f1", "f4"]);
    assert_eq!(by_appliance["B"], vec!["f2", "f5"]);
    assert_eq!(by_appliance["C"], vec!["f3"]);
    assert_eq!(h.records().await?.len(), 5);
    Ok(())
}

#[tokio::test]
async fn major_verdict_moves_file_to_malicious() -> Result<()> {
    let h = Harness::new(&["A"], FakeAppliances::new()).await?;
    h.drop_file("f1", b"evil")?;
    h.engine().run().await?;

    let upload = h.api.upload_of("f1").await.expect("f1 uploaded");
    h.api
        .complete(
            &upload.analysis_id,
            verdict("majr", "Trojan.Gen", &md5_hex(b"evil")),
        )
        .await;

    let report = h.engine().run().await?;
    assert_eq!(report.poll.resolved, 1);
    assert_eq!(report.poll.integrity_warnings, 0);
    assert_eq!(file_names(&h.stage("Malicious")), vec!["f1"]);
    assert!(file_names(&h.stage("Pending")).is_empty());

    let record = h
        .ledger
        .latest_for(&key(b"evil", "A"))
        .await?
        .expect("record");
    assert_eq!(record.state, ResultState::Malicious);
    assert!(record.completed_at.is_some());
    assert_eq!(record.threat_names, vec!["Trojan.Gen"]);
    assert_eq!(
        record.detail_url.as_deref(),
        Some("https://ax.lab.local/alerts/Trojan.Gen")
    );
    assert_eq!(record.path, h.stage("Malicious").join("f1"));
    Ok(())
}

#[tokio::test]
async fn minor_and_unrecognised_severities_map_to_benign_and_unknown()
-> Result<()> {
    let h = Harness::new(&["A"], FakeAppliances::new()).await?;
    h.drop_file("f1", b"one")?;
    h.drop_file("f2", b"two")?;
    h.engine().run().await?;

    let first = h.api.upload_of("f1").await.expect("f1");
    let second = h.api.upload_of("f2").await.expect("f2");
    h.api
        .complete(
            &first.analysis_id,
            verdict("MINR", "Adware", &md5_hex(b"one")),
        )
        .await;
    h.api
        .complete(&second.analysis_id, verdict("crit", "Odd", &md5_hex(b"two")))
        .await;

    h.engine().run().await?;
    assert_eq!(file_names(&h.stage("Benign")), vec!["f1"]);
    assert_eq!(file_names(&h.stage("Unknown")), vec!["f2"]);
    assert_eq!(
        h.ledger.latest_for(&key(b"two", "A")).await?.map(|r| r.state),
        Some(ResultState::Unknown)
    );
    Ok(())
}

#[tokio::test]
async fn resubmission_inside_cooldown_is_dropped() -> Result<()> {
    let h = Harness::new(&["A"], FakeAppliances::new()).await?;
    h.drop_file("f1", b"evil")?;
    h.engine().run().await?;
    let upload = h.api.upload_of("f1").await.expect("f1 uploaded");
    h.api
        .complete(
            &upload.analysis_id,
            verdict("majr", "Trojan.Gen", &md5_hex(b"evil")),
        )
        .await;
    h.engine().run().await?;

    h.drop_file("f1", b"evil")?;
    let report = h.engine().run().await?;

    assert_eq!(report.dispatch.dropped, 1);
    assert_eq!(report.dispatch.submitted, 0);
    assert!(file_names(&h.incoming()).is_empty());
    assert_eq!(h.total_records().await?, 1);
    assert_eq!(h.api.uploads().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_of_in_flight_analysis_is_dropped() -> Result<()> {
    let h = Harness::new(&["A"], FakeAppliances::new()).await?;
    h.drop_file("f1", b"same bytes")?;
    h.engine().run().await?;

    h.drop_file("f1", b"same bytes")?;
    let report = h.engine().run().await?;

    assert_eq!(report.poll.in_progress, 1);
    assert_eq!(report.dispatch.dropped, 1);
    assert!(file_names(&h.incoming()).is_empty());
    assert_eq!(file_names(&h.stage("Pending")), vec!["f1"]);
    assert_eq!(h.total_records().await?, 1);
    Ok(())
}

#[tokio::test]
async fn digest_mismatch_warns_but_still_records_verdict() -> Result<()> {
    let h = Harness::new(&["A"], FakeAppliances::new()).await?;
    h.drop_file("f1", b"evil")?;
    h.engine().run().await?;
    let upload = h.api.upload_of("f1").await.expect("f1 uploaded");
    h.api
        .complete(
            &upload.analysis_id,
            verdict("majr", "Trojan.Gen", "00000000000000000000000000000000"),
        )
        .await;

    let report = h.engine().run().await?;

    assert_eq!(report.poll.resolved, 1);
    assert_eq!(report.poll.integrity_warnings, 1);
    let record = h
        .ledger
        .latest_for(&key(b"evil", "A"))
        .await?
        .expect("record");
    assert_eq!(record.state, ResultState::Malicious);
    assert_eq!(file_names(&h.stage("Malicious")), vec!["f1"]);
    Ok(())
}

#[tokio::test]
async fn lost_ledger_update_aborts_the_run() -> Result<()> {
    let h = Harness::new(&["A"], FakeAppliances::new()).await?;
    h.drop_file("f1", b"evil")?;
    h.engine().run().await?;
    let upload = h.api.upload_of("f1").await.expect("f1 uploaded");
    h.api
        .complete(
            &upload.analysis_id,
            verdict("majr", "Trojan.Gen", &md5_hex(b"evil")),
        )
        .await;
    h.drop_file("f2", b"never dispatched")?;

    let losing = Arc::new(LosingLedger::new((*h.ledger).clone()));
    let outcome = h.engine_with_ledger(losing).run().await;

    assert!(matches!(outcome, Err(RunError::VerdictLost { .. })));
    assert_eq!(file_names(&h.incoming()), vec!["f2"], "dispatch never ran");
    assert_eq!(h.api.logouts().await.len(), 2, "sessions still closed");
    let record = h
        .ledger
        .latest_for(&key(b"evil", "A"))
        .await?
        .expect("record");
    assert!(record.is_pending());
    Ok(())
}

#[tokio::test]
async fn refused_login_shrinks_the_pool() -> Result<()> {
    let api = FakeAppliances::new().refusing("B");
    let h = Harness::new(&["A", "B", "C"], api).await?;
    drop_numbered(&h, 4)?;

    let report = h.engine().run().await?;

    assert_eq!(report.configured_appliances, 3);
    assert_eq!(report.active_appliances, 2);
    let order: Vec<String> = h
        .api
        .uploads()
        .await
        .iter()
        .map(|u| u.appliance.to_string())
        .collect();
    assert_eq!(order, vec!["A", "C", "A", "C"]);
    Ok(())
}

#[tokio::test]
async fn empty_pool_is_fatal_and_leaves_files_alone() -> Result<()> {
    let api = FakeAppliances::new().refusing("A").refusing("B");
    let h = Harness::new(&["A", "B"], api).await?;
    h.drop_file("f1", b"payload")?;

    let outcome = h.engine().run().await;

    assert!(matches!(outcome, Err(RunError::NoActiveAppliances)));
    assert_eq!(file_names(&h.incoming()), vec!["f1"]);
    assert!(h.api.uploads().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn rejected_upload_leaves_file_and_writes_nothing() -> Result<()> {
    let api = FakeAppliances::new().rejecting_uploads("A");
    let h = Harness::new(&["A"], api).await?;
    h.drop_file("f1", b"payload")?;

    let report = h.engine().run().await?;

    assert_eq!(report.dispatch.failed, 1);
    assert_eq!(file_names(&h.incoming()), vec!["f1"]);
    assert_eq!(h.total_records().await?, 0);
    Ok(())
}

#[tokio::test]
async fn unknown_submission_stays_pending() -> Result<()> {
    let h = Harness::new(&["A"], FakeAppliances::new()).await?;
    h.drop_file("f1", b"payload")?;
    h.engine().run().await?;
    let upload = h.api.upload_of("f1").await.expect("f1 uploaded");
    h.api
        .set_status(&upload.analysis_id, SubmissionStatus::NotFound)
        .await;

    let report = h.engine().run().await?;

    assert_eq!(report.poll.not_found, 1);
    assert_eq!(report.poll.resolved, 0);
    let record = h
        .ledger
        .latest_for(&key(b"payload", "A"))
        .await?
        .expect("record");
    assert!(record.is_pending());
    assert_eq!(file_names(&h.stage("Pending")), vec!["f1"]);
    Ok(())
}

#[tokio::test]
async fn same_named_sample_waits_for_the_pending_one() -> Result<()> {
    let h = Harness::new(&["A"], FakeAppliances::new()).await?;
    h.drop_file("report.pdf", b"first")?;
    h.engine().run().await?;

    h.drop_file("report.pdf", b"second")?;
    let report = h.engine().run().await?;

    assert_eq!(report.dispatch.deferred, 1);
    assert_eq!(report.dispatch.submitted, 0);
    assert_eq!(h.api.uploads().await.len(), 1);
    assert_eq!(std::fs::read(h.incoming().join("report.pdf"))?, b"second");
    assert_eq!(
        std::fs::read(h.stage("Pending").join("report.pdf"))?,
        b"first"
    );
    assert_eq!(h.total_records().await?, 1);

    let first = h.api.upload_of("report.pdf").await.expect("first uploaded");
    h.api
        .complete(
            &first.analysis_id,
            verdict("minr", "Adware", &md5_hex(b"first")),
        )
        .await;

    let report = h.engine().run().await?;
    assert_eq!(report.poll.resolved, 1);
    assert_eq!(report.dispatch.submitted, 1);
    assert!(file_names(&h.incoming()).is_empty());

    let second = h.api.upload_of("report.pdf").await.expect("second uploaded");
    assert_ne!(second.analysis_id, first.analysis_id);
    h.api
        .complete(
            &second.analysis_id,
            verdict("majr", "Trojan.Gen", &md5_hex(b"second")),
        )
        .await;
    h.engine().run().await?;

    assert_eq!(
        std::fs::read(h.stage("Benign").join("report.pdf"))?,
        b"first"
    );
    assert_eq!(
        std::fs::read(h.stage("Malicious").join("report.pdf"))?,
        b"second"
    );
    assert!(h.records().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn verdict_directory_name_clash_keeps_both_files() -> Result<()> {
    let h = Harness::new(&["A"], FakeAppliances::new()).await?;
    for contents in [&b"first"[..], &b"second"[..]] {
        h.drop_file("report.pdf", contents)?;
        h.engine().run().await?;
        let upload = h.api.upload_of("report.pdf").await.expect("uploaded");
        h.api
            .complete(
                &upload.analysis_id,
                verdict("minr", "Adware", &md5_hex(contents)),
            )
            .await;
        h.engine().run().await?;
    }

    assert_eq!(
        file_names(&h.stage("Benign")),
        vec!["report.2.pdf", "report.pdf"]
    );
    assert_eq!(
        std::fs::read(h.stage("Benign").join("report.2.pdf"))?,
        b"second"
    );
    let record = h
        .ledger
        .latest_for(&key(b"second", "A"))
        .await?
        .expect("record");
    assert_eq!(record.path, h.stage("Benign").join("report.2.pdf"));
    Ok(())
}
