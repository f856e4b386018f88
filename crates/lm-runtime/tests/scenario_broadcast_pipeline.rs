//! Scenario: broadcast pipeline fan-out.
//!
//! # Invariants under test
//!
//! 1. A feature observed again with only its retrieval time changed is
//!    suppressed; a real property change passes.
//! 2. The per-feature stream carries only passed features, in batch order,
//!    at least `pacing` apart.
//! 3. A collection subscriber joining after N rounds first receives
//!    `current()`, then later rounds.
//! 4. A malformed geometry drops only that feature; the rest of the batch
//!    is merged, detected and published.
//! 5. A lagging per-feature subscriber gets one `Lagged` error and its
//!    stream ends; a concurrent subscriber receives every event.
//! 6. Dropping a subscription affects no other subscriber or the round loop.
//! 7. The run loop survives importer failures.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use lm_geom::{encode, encode_hex, ByteOrder, Coord, Geometry, Shape};
use lm_import::{ImportError, ScriptedImporter};
use lm_runtime::{BroadcastPipeline, DeliveryError, PipelineSettings};
use lm_schemas::{Properties, PropertyValue, RawFeature, RawGeometry, RETRIEVAL_TIME};
use tokio::time::Instant;

fn segment_geometry(i: u32) -> Geometry {
    let x = 4.9 + f64::from(i) * 0.01;
    Geometry::xy(Shape::LineString(vec![
        Coord::xy(x, 52.3),
        Coord::xy(x + 0.005, 52.31),
    ]))
    .with_srid(4326)
}

fn segment(id: &str, i: u32, travel_time: f64, fetched_at: &str) -> RawFeature {
    let ts: DateTime<Utc> = fetched_at.parse().unwrap();
    let mut properties = Properties::new();
    properties.insert("travel_time".to_string(), PropertyValue::Number(travel_time));
    properties.insert(RETRIEVAL_TIME.to_string(), PropertyValue::Timestamp(ts));
    RawFeature {
        id: id.to_string(),
        geometry: RawGeometry::Hex(encode_hex(&segment_geometry(i), ByteOrder::LittleEndian)),
        properties,
    }
}

fn pipeline(importer: Arc<ScriptedImporter>) -> BroadcastPipeline {
    BroadcastPipeline::new(PipelineSettings::new("traveltime"), importer, None)
}

#[tokio::test(start_paused = true)]
async fn only_changed_features_reach_the_feature_stream() {
    let importer = Arc::new(ScriptedImporter::with_batches(vec![
        vec![
            segment("seg-1", 1, 60.0, "2024-05-01T12:00:00Z"),
            segment("seg-2", 2, 45.0, "2024-05-01T12:00:00Z"),
        ],
        vec![
            // Only the retrieval time differs.
            segment("seg-1", 1, 60.0, "2024-05-01T12:01:00Z"),
            // Travel time changed.
            segment("seg-2", 2, 50.0, "2024-05-01T12:01:00Z"),
        ],
    ]));
    let mut p = pipeline(importer);
    let mut features = p.handle().subscribe_features();

    let r1 = p.run_round().await.unwrap();
    assert_eq!((r1.passed, r1.suppressed), (2, 0));
    let r2 = p.run_round().await.unwrap();
    assert_eq!((r2.passed, r2.suppressed), (1, 1));

    let mut seen = Vec::new();
    for _ in 0..3 {
        let ev = features.next().await.unwrap().unwrap();
        seen.push((ev.round, ev.feature.id.clone()));
    }
    assert_eq!(
        seen,
        vec![
            (1, "seg-1".to_string()),
            (1, "seg-2".to_string()),
            (2, "seg-2".to_string()),
        ]
    );

    // The full collection still carries both, with seg-2 updated.
    let current = p.handle().current();
    assert_eq!(current.features.len(), 2);
    assert_eq!(
        current.features.get("seg-2").unwrap().property("travel_time"),
        Some(&PropertyValue::Number(50.0))
    );
}

#[tokio::test(start_paused = true)]
async fn feature_stream_is_ordered_and_paced() {
    let batch: Vec<RawFeature> = (0..4)
        .map(|i| segment(&format!("seg-{i}"), i, 30.0, "2024-05-01T12:00:00Z"))
        .collect();
    let importer = Arc::new(ScriptedImporter::with_batches(vec![batch]));
    let mut p = BroadcastPipeline::new(
        PipelineSettings::new("traveltime").with_pacing(Duration::from_millis(5)),
        importer,
        None,
    );

    let stream = p.handle().subscribe_features();
    let collector = tokio::spawn(async move {
        stream
            .take(4)
            .map(|ev| (ev.unwrap().feature.id.clone(), Instant::now()))
            .collect::<Vec<_>>()
            .await
    });

    p.run_round().await.unwrap();
    let received = collector.await.unwrap();

    let ids: Vec<&str> = received.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["seg-0", "seg-1", "seg-2", "seg-3"]);
    for pair in received.windows(2) {
        assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(5));
    }
}

#[tokio::test]
async fn late_collection_subscriber_gets_current_first() {
    let importer = Arc::new(ScriptedImporter::with_batches(vec![
        vec![segment("seg-1", 1, 60.0, "2024-05-01T12:00:00Z")],
        vec![segment("seg-2", 2, 45.0, "2024-05-01T12:01:00Z")],
        vec![segment("seg-3", 3, 30.0, "2024-05-01T12:02:00Z")],
    ]));
    let mut p = pipeline(importer);
    p.run_round().await.unwrap();
    p.run_round().await.unwrap();

    let handle = p.handle();
    let mut late = handle.subscribe_collection();
    let first = late.next().await.unwrap();
    assert_eq!(first, handle.current());
    assert_eq!(first.round, 2);
    assert_eq!(
        first.features.ids().collect::<Vec<_>>(),
        vec!["seg-1", "seg-2"]
    );

    p.run_round().await.unwrap();
    let next = late.next().await.unwrap();
    assert_eq!(next.round, 3);
    assert_eq!(next.features.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn malformed_geometry_drops_only_that_feature() {
    let good_point = Geometry::xy(Shape::Point(Some(Coord::xy(5.1, 52.1))));
    let batch = vec![
        segment("seg-1", 1, 60.0, "2024-05-01T12:00:00Z"),
        RawFeature {
            id: "broken".to_string(),
            // LineString header with a truncated count.
            geometry: RawGeometry::Binary(vec![1, 2, 0, 0, 0, 3]),
            properties: Properties::new(),
        },
        RawFeature {
            id: "not-hex".to_string(),
            geometry: RawGeometry::Hex("zz".to_string()),
            properties: Properties::new(),
        },
        RawFeature {
            id: "sign-1".to_string(),
            geometry: RawGeometry::Binary(encode(&good_point, ByteOrder::BigEndian)),
            properties: Properties::new(),
        },
    ];
    let importer = Arc::new(ScriptedImporter::with_batches(vec![batch]));
    let mut p = pipeline(importer);
    let mut features = p.handle().subscribe_features();

    let report = p.run_round().await.unwrap();
    assert_eq!(report.received, 4);
    assert_eq!(report.decoded, 2);
    assert_eq!(report.dropped, 2);
    assert_eq!(report.passed, 2);

    assert_eq!(features.next().await.unwrap().unwrap().feature.id, "seg-1");
    assert_eq!(features.next().await.unwrap().unwrap().feature.id, "sign-1");
    assert_eq!(
        p.handle().current().features.ids().collect::<Vec<_>>(),
        vec!["seg-1", "sign-1"]
    );
    assert!(p.detector().last_hash("broken").is_none());
}

#[tokio::test(start_paused = true)]
async fn lagging_subscriber_is_cut_off_alone() {
    let batch: Vec<RawFeature> = (0..5)
        .map(|i| segment(&format!("seg-{i}"), i, 30.0, "2024-05-01T12:00:00Z"))
        .collect();
    let importer = Arc::new(ScriptedImporter::with_batches(vec![batch]));
    let mut p = BroadcastPipeline::new(
        PipelineSettings::new("traveltime").with_diff_capacity(2),
        importer,
        None,
    );
    let handle = p.handle();

    let mut slow = handle.subscribe_features();
    let fast = handle.subscribe_features();
    let collector = tokio::spawn(async move {
        fast.take(5)
            .map(|ev| ev.map(|e| e.feature.id.clone()))
            .collect::<Vec<_>>()
            .await
    });

    p.run_round().await.unwrap();
    let fast_seen = collector.await.unwrap();
    assert_eq!(fast_seen.len(), 5);
    assert!(fast_seen.iter().all(|r| r.is_ok()));

    assert_eq!(
        slow.next().await,
        Some(Err(DeliveryError::Lagged { skipped: 3 }))
    );
    assert!(slow.next().await.is_none());
}

#[tokio::test]
async fn dropped_subscription_leaves_others_running() {
    let importer = Arc::new(ScriptedImporter::with_batches(vec![
        vec![segment("seg-1", 1, 60.0, "2024-05-01T12:00:00Z")],
        vec![segment("seg-1", 1, 75.0, "2024-05-01T12:01:00Z")],
    ]));
    let mut p = pipeline(importer);
    let handle = p.handle();

    let mut kept = handle.subscribe_collection();
    let dropped = handle.subscribe_collection();
    let gone_features = handle.subscribe_features();
    assert_eq!(handle.feature_subscribers(), 1);

    assert_eq!(kept.next().await.unwrap().round, 0);
    p.run_round().await.unwrap();
    drop(dropped);
    drop(gone_features);
    assert_eq!(handle.feature_subscribers(), 0);

    assert_eq!(kept.next().await.unwrap().round, 1);
    p.run_round().await.unwrap();
    assert_eq!(kept.next().await.unwrap().round, 2);
}

#[tokio::test(start_paused = true)]
async fn run_loop_continues_after_importer_failure() {
    let importer = Arc::new(ScriptedImporter::new());
    importer.push_error(ImportError::Api {
        status: 503,
        message: "maintenance".to_string(),
    });
    importer.push_batch(vec![segment("seg-1", 1, 60.0, "2024-05-01T12:00:00Z")]);

    let (handle, task) = pipeline(importer.clone()).spawn(Duration::from_secs(60));
    let mut collection = handle.subscribe_collection();
    assert_eq!(collection.next().await.unwrap().round, 0);

    let first = collection.next().await.unwrap();
    assert_eq!(first.round, 1);
    assert_eq!(first.features.len(), 1);
    assert_eq!(importer.fetches(), 2);
    assert_eq!(handle.last_report().unwrap().passed, 1);

    task.abort();
}
