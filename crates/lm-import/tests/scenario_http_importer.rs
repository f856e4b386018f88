//! Scenario: HTTP importer against a mock source.
//!
//! # Invariants under test
//!
//! 1. A 200 response yields one raw feature per wire feature, in order,
//!    with the hex geometry preserved and a retrieval timestamp stamped.
//! 2. An empty collection is a valid (empty) batch, not an error.
//! 3. Non-success statuses map to `ImportError::Api`.
//! 4. Malformed JSON maps to `ImportError::Decode`.
//! 5. A malformed feature is skipped; its siblings still arrive in order.

use std::time::Duration;

use httpmock::prelude::*;
use lm_geom::{encode_hex, ByteOrder, Coord, Geometry, Shape};
use lm_import::{HttpImporter, ImportError, Importer};
use lm_schemas::{PropertyValue, RawGeometry, RETRIEVAL_TIME};
use serde_json::json;

fn segment_hex() -> String {
    let g = Geometry::xy(Shape::LineString(vec![
        Coord::xy(4.9, 52.3),
        Coord::xy(4.95, 52.35),
    ]))
    .with_srid(4326);
    encode_hex(&g, ByteOrder::LittleEndian)
}

fn importer(server: &MockServer) -> HttpImporter {
    HttpImporter::new(server.url("/traveltime"), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn fetch_maps_wire_features_in_order() {
    let server = MockServer::start_async().await;
    let hex = segment_hex();
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/traveltime");
            then.status(200).json_body(json!({
                "features": [
                    {"id": "seg-1", "geometry": hex, "properties": {"travel_time": 61, "velocity": 88.0}},
                    {"id": "seg-2", "geometry": hex, "properties": {"travel_time": 42}}
                ]
            }));
        })
        .await;

    let batch = importer(&server).fetch_batch().await.unwrap();
    mock.assert_async().await;

    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].id, "seg-1");
    assert_eq!(batch[1].id, "seg-2");
    assert_eq!(batch[0].geometry, RawGeometry::Hex(segment_hex()));
    assert_eq!(
        batch[0].properties["travel_time"],
        PropertyValue::Number(61.0)
    );
    assert!(matches!(
        batch[0].properties.get(RETRIEVAL_TIME),
        Some(PropertyValue::Timestamp(_))
    ));

    let decoded = batch[0].clone().decode().unwrap();
    assert_eq!(decoded.geometry.srid(), 4326);
}

#[tokio::test]
async fn stamp_can_be_disabled() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/traveltime");
            then.status(200)
                .json_body(json!({"features": [{"id": "a", "geometry": "00"}]}));
        })
        .await;

    let batch = importer(&server)
        .without_retrieval_stamp()
        .fetch_batch()
        .await
        .unwrap();
    assert!(batch[0].properties.get(RETRIEVAL_TIME).is_none());
}

#[tokio::test]
async fn empty_collection_is_empty_batch() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/traveltime");
            then.status(200).json_body(json!({"features": []}));
        })
        .await;

    assert!(importer(&server).fetch_batch().await.unwrap().is_empty());
}

#[tokio::test]
async fn server_error_maps_to_api_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/traveltime");
            then.status(503).body("maintenance");
        })
        .await;

    let err = importer(&server).fetch_batch().await.unwrap_err();
    assert_eq!(
        err,
        ImportError::Api {
            status: 503,
            message: "maintenance".to_string(),
        }
    );
}

#[tokio::test]
async fn malformed_json_maps_to_decode_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/traveltime");
            then.status(200).body("{not json");
        })
        .await;

    let err = importer(&server).fetch_batch().await.unwrap_err();
    assert!(matches!(err, ImportError::Decode(_)));
}

#[tokio::test]
async fn malformed_feature_does_not_lose_batch() {
    let server = MockServer::start_async().await;
    let hex = segment_hex();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/traveltime");
            then.status(200).json_body(json!({
                "features": [
                    {"id": "seg-1", "geometry": hex, "properties": {"travel_time": 61}},
                    {"id": "seg-2", "geometry": hex, "properties": {"lanes": [1, 2]}},
                    {"id": "seg-3", "geometry": {"type": "LineString"}},
                    {"geometry": hex},
                    {"id": "seg-5", "geometry": hex, "properties": {"travel_time": 42}}
                ]
            }));
        })
        .await;

    let batch = importer(&server).fetch_batch().await.unwrap();
    let ids: Vec<&str> = batch.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["seg-1", "seg-5"]);
    assert_eq!(batch[1].properties["travel_time"], PropertyValue::Number(42.0));
}
