use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use ridenest_api::{app, middleware::JwtVerifier, AppState};
use ridenest_core::{Identity, Role};
use ridenest_store::app_config::Config;
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &str = "integration-secret";

async fn test_app() -> Router {
    let state = AppState::from_config(&Config::in_memory(SECRET)).await.unwrap();
    app(state)
}

fn token(user: &str, role: Role) -> String {
    JwtVerifier::new(SECRET)
        .issue(&Identity::new(user, role), chrono::Duration::minutes(10))
        .unwrap()
}

async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn stop(address: &str, lat: f64, lng: f64) -> Value {
    json!({ "address": address, "coordinates": { "lat": lat, "lng": lng } })
}

fn van_ride(with_seat: bool) -> Value {
    let mut body = json!({
        "type": "event-transport",
        "vehicle": { "id": "KA-05-7788", "class": "Van" },
        "scheduledTime": "2026-11-02T08:30:00Z",
        "route": { "distance": 10000.0, "duration": 1200.0, "optimized": true }
    });
    if with_seat {
        body["pickup"] = stop("Indiranagar", 12.97, 77.64);
        body["dropoff"] = stop("Palace Grounds", 13.0, 77.59);
    }
    body
}

fn join_body() -> Value {
    json!({ "pickup": stop("Koramangala", 12.93, 77.62), "dropoff": stop("Palace Grounds", 13.0, 77.59) })
}

#[tokio::test]
async fn test_health_is_public_and_rides_need_a_token() {
    let app = test_app().await;

    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&app, "GET", "/rides", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = call(&app, "GET", "/rides", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_group_fare_follows_the_roster() {
    let app = test_app().await;
    let p1 = token("p1", Role::Passenger);

    let (status, ride) = call(&app, "POST", "/rides", Some(&p1), Some(van_ride(true))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(ride["totalFare"], 195);
    assert_eq!(ride["status"], "pending");
    let id = ride["id"].as_str().unwrap().to_string();

    for user in ["p2", "p3", "p4"] {
        let (status, _) = call(
            &app,
            "POST",
            &format!("/rides/{}/join", id),
            Some(&token(user, Role::Passenger)),
            Some(join_body()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, ride) = call(&app, "GET", &format!("/rides/{}", id), Some(&p1), None).await;
    let shares: Vec<i64> = ride["passengers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["fare"]["amount"].as_i64().unwrap())
        .collect();
    assert_eq!(shares, vec![49, 49, 49, 49]);

    let (_, ride) = call(
        &app,
        "POST",
        &format!("/rides/{}/join", id),
        Some(&token("p5", Role::Passenger)),
        Some(join_body()),
    )
    .await;
    assert_eq!(ride["totalFare"], 195);
    assert!(ride["passengers"].as_array().unwrap().iter().all(|p| p["fare"]["amount"] == 39));

    // Same passenger again
    let (status, _) = call(&app, "POST", &format!("/rides/{}/join", id), Some(&p1), Some(join_body())).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_driver_lifecycle_over_http() {
    let app = test_app().await;
    let p1 = token("p1", Role::Passenger);
    let d1 = token("d1", Role::Driver);
    let d2 = token("d2", Role::Driver);

    let (_, ride) = call(&app, "POST", "/rides", Some(&p1), Some(van_ride(true))).await;
    let id = ride["id"].as_str().unwrap().to_string();

    // Unassigned pending rides show up for any driver
    let (status, visible) = call(&app, "GET", "/rides", Some(&d2), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(visible.as_array().unwrap().len(), 1);

    // Passengers cannot accept
    let (status, _) = call(&app, "PUT", &format!("/rides/{}/accept", id), Some(&p1), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, ride) = call(&app, "PUT", &format!("/rides/{}/accept", id), Some(&d1), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ride["status"], "confirmed");
    assert_eq!(ride["driverId"], "d1");

    let (status, _) = call(&app, "PUT", &format!("/rides/{}/reject", id), Some(&d2), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/rides/{}/join", id),
        Some(&token("p2", Role::Passenger)),
        Some(join_body()),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let status_uri = format!("/rides/{}/status", id);
    let (status, _) = call(&app, "PUT", &status_uri, Some(&d1), Some(json!({ "status": "completed" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&app, "PUT", &status_uri, Some(&d1), Some(json!({ "status": "in-progress" }))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, upcoming) = call(&app, "GET", "/rides/driver/upcoming", Some(&d1), None).await;
    assert_eq!(upcoming[0]["status"], "in-progress");

    let (status, _) = call(&app, "PUT", &status_uri, Some(&d1), Some(json!({ "status": "completed" }))).await;
    assert_eq!(status, StatusCode::OK);

    let rate_uri = format!("/rides/{}/rate", id);
    let (status, rating) = call(&app, "POST", &rate_uri, Some(&p1), Some(json!({ "score": 5 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rating["count"], 1);

    let (status, _) = call(&app, "POST", &rate_uri, Some(&p1), Some(json!({ "score": 4 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, upcoming) = call(&app, "GET", "/rides/driver/upcoming", Some(&d1), None).await;
    assert!(upcoming.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_and_passenger_status() {
    let app = test_app().await;
    let d1 = token("d1", Role::Driver);

    let (status, ride) = call(&app, "POST", "/rides", Some(&d1), Some(van_ride(false))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = ride["id"].as_str().unwrap().to_string();

    for user in ["p1", "p2"] {
        call(
            &app,
            "POST",
            &format!("/rides/{}/join", id),
            Some(&token(user, Role::Passenger)),
            Some(join_body()),
        )
        .await;
    }

    let (status, ride) = call(
        &app,
        "PUT",
        &format!("/rides/{}/passengers/p2/status", id),
        Some(&d1),
        Some(json!({ "status": "cancelled" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ride["passengers"].as_array().unwrap().len(), 1);
    assert_eq!(ride["passengers"][0]["fare"]["amount"], 195);

    let (status, _) = call(
        &app,
        "PUT",
        &format!("/rides/{}/cancel", id),
        Some(&token("stranger", Role::Passenger)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, ride) = call(&app, "PUT", &format!("/rides/{}/cancel", id), Some(&d1), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ride["status"], "cancelled");

    let (status, _) = call(&app, "GET", &format!("/rides/{}", uuid::Uuid::new_v4()), Some(&d1), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_fare_quote_and_validation() {
    let app = test_app().await;
    let p1 = token("p1", Role::Passenger);

    let (status, quote) = call(
        &app,
        "POST",
        "/fares/quote",
        Some(&p1),
        Some(json!({ "distance": 10000.0, "duration": 1200.0, "vehicleClass": "Van", "passengerCount": 4 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["total"], 195);
    assert_eq!(quote["perPerson"], 49);

    let (status, _) = call(
        &app,
        "POST",
        "/fares/quote",
        Some(&p1),
        Some(json!({ "distance": -5.0, "duration": 60.0, "vehicleClass": "Sedan" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut no_route = van_ride(true);
    no_route.as_object_mut().unwrap().remove("route");
    let (status, _) = call(&app, "POST", "/rides", Some(&p1), Some(no_route)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_count_ride_operations() {
    let app = test_app().await;
    let p1 = token("p1", Role::Passenger);
    call(&app, "POST", "/rides", Some(&p1), Some(van_ride(true))).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains(r#"ridenest_ride_operations_total{operation="create",outcome="ok"} 1"#));
    assert!(text.contains("ridenest_hub_connections 0"));
}
