use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use diesel::SqliteConnection;
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, instrument, warn};
use utoipa::OpenApi;

use crate::error::ApiError;
use crate::establish_connection;
use crate::serializer::{self, serialize_pizza, serialize_restaurant, serialize_restaurant_pizza};
use crate::store::{DieselStore, RestaurantStore, StoreError};
use crate::validation::{validate_restaurant_pizza, ValidationError};

#[derive(Clone)]
pub struct AppState {
    pub database_url: Arc<str>,
}

impl AppState {
    pub fn new(database_url: impl Into<Arc<str>>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    fn connect(&self) -> Result<SqliteConnection, StoreError> {
        establish_connection(&self.database_url)
    }

    /// Runs `f` against a store bound to a connection that lives for this call only.
    fn with_store<T>(
        &self,
        f: impl FnOnce(&mut DieselStore<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.connect()?;
        f(&mut DieselStore::new(&mut conn))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/restaurants", get(list_restaurants))
        .route(
            "/restaurants/{id}",
            get(get_restaurant).delete(delete_restaurant),
        )
        .route("/pizzas", get(list_pizzas))
        .route("/restaurant_pizzas", post(create_restaurant_pizza))
        .route("/api-docs/openapi.json", get(openapi))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Ids beyond the `restaurants.id` column range cannot name a restaurant.
fn restaurant_id(id: i64) -> Result<i32, ApiError> {
    i32::try_from(id).map_err(|_| {
        warn!("Restaurant with ID {id} not found");
        ApiError::NotFound("Restaurant not found".to_string())
    })
}

/// Logs the storage failure and hides it behind a generic message.
fn internal(context: &'static str, message: &'static str) -> impl FnOnce(StoreError) -> ApiError {
    move |err| {
        error!(error = %err, "{context}");
        ApiError::Internal(message.to_string())
    }
}

pub async fn index() -> Html<&'static str> {
    Html("<h1>Code Challenge: Pizza Restaurant API</h1>")
}

#[utoipa::path(
    get,
    path = "/restaurants",
    responses(
        (status = 200, description = "All restaurants with their restaurant pizzas", body = [serializer::Restaurant]),
        (status = 500, description = "Internal error", body = serializer::ErrorResponse),
    ),
    tag = "restaurants"
)]
#[instrument(skip(state))]
pub async fn list_restaurants(
    State(state): State<AppState>,
) -> Result<Json<Vec<serializer::Restaurant>>, ApiError> {
    debug!("Fetching all restaurants");

    let restaurants = state
        .with_store(|store| store.list_restaurants())
        .map_err(internal(
            "Error retrieving restaurants",
            "An error occurred while retrieving restaurants.",
        ))?;

    Ok(Json(
        restaurants
            .into_iter()
            .map(|(restaurant, restaurant_pizzas)| {
                serialize_restaurant(restaurant, &restaurant_pizzas)
            })
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/restaurants/{id}",
    responses(
        (status = 200, description = "Restaurant details", body = serializer::Restaurant),
        (status = 404, description = "Restaurant not found", body = serializer::ErrorResponse),
        (status = 500, description = "Internal error", body = serializer::ErrorResponse),
    ),
    params(
        ("id" = i64, Path, description = "Restaurant ID")
    ),
    tag = "restaurants"
)]
#[instrument(skip(state))]
pub async fn get_restaurant(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serializer::Restaurant>, ApiError> {
    debug!("Fetching restaurant with ID: {id}");
    let id = restaurant_id(id)?;

    let (restaurant, restaurant_pizzas) = state
        .with_store(|store| store.restaurant_with_pizzas(id))
        .map_err(internal(
            "Error retrieving restaurant",
            "An error occurred while retrieving the restaurant.",
        ))?
        .ok_or_else(|| {
            warn!("Restaurant with ID {id} not found");
            ApiError::NotFound("Restaurant not found".to_string())
        })?;

    Ok(Json(serialize_restaurant(restaurant, &restaurant_pizzas)))
}

#[utoipa::path(
    delete,
    path = "/restaurants/{id}",
    responses(
        (status = 204, description = "Restaurant and its restaurant pizzas deleted"),
        (status = 404, description = "Restaurant not found", body = serializer::ErrorResponse),
        (status = 500, description = "Internal error", body = serializer::ErrorResponse),
    ),
    params(
        ("id" = i64, Path, description = "Restaurant ID")
    ),
    tag = "restaurants"
)]
#[instrument(skip(state))]
pub async fn delete_restaurant(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    debug!("Attempting to delete restaurant with ID: {id}");
    let id = restaurant_id(id)?;

    let deleted = state
        .with_store(|store| store.write(|store| store.delete_restaurant(id)))
        .map_err(internal(
            "Error deleting restaurant",
            "An error occurred while deleting the restaurant.",
        ))?;

    if !deleted {
        warn!("Restaurant with ID {id} not found");
        return Err(ApiError::NotFound("Restaurant not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/pizzas",
    responses(
        (status = 200, description = "All pizzas", body = [serializer::Pizza]),
        (status = 500, description = "Internal error", body = serializer::ErrorResponse),
    ),
    tag = "pizzas"
)]
#[instrument(skip(state))]
pub async fn list_pizzas(
    State(state): State<AppState>,
) -> Result<Json<Vec<serializer::Pizza>>, ApiError> {
    let pizzas = state
        .with_store(|store| store.list_pizzas())
        .map_err(internal(
            "Error retrieving pizzas",
            "An error occurred while retrieving pizzas.",
        ))?;

    if pizzas.is_empty() {
        debug!("No pizzas found");
    }

    Ok(Json(pizzas.into_iter().map(serialize_pizza).collect()))
}

#[utoipa::path(
    post,
    path = "/restaurant_pizzas",
    request_body = serializer::CreateRestaurantPizzaRequest,
    responses(
        (status = 201, description = "Restaurant pizza created", body = serializer::RestaurantPizza),
        (status = 400, description = "Validation failed", body = serializer::ValidationErrorResponse),
        (status = 500, description = "Internal error", body = serializer::ErrorResponse),
    ),
    tag = "restaurant_pizzas"
)]
#[instrument(skip(state))]
pub async fn create_restaurant_pizza(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<serializer::RestaurantPizza>), ApiError> {
    const CONTEXT: &str = "Error creating restaurant pizza";
    const MESSAGE: &str = "An internal error occurred.";

    debug!("Creating restaurant_pizza with data: {payload}");

    let mut conn = state.connect().map_err(internal(CONTEXT, MESSAGE))?;

    // References are checked and the row inserted under one write lock, so a
    // restaurant deleted concurrently is reported as not found.
    let created = DieselStore::new(&mut conn)
        .write::<_, ValidationError, _>(|store| {
            let valid = validate_restaurant_pizza(&payload, store)?;
            Ok(store.create_restaurant_pizza(&valid)?)
        })
        .map_err(|err| match err {
            ValidationError::Invalid(errors) => {
                warn!(?errors, "Rejected restaurant_pizza");
                ApiError::ValidationFailed(errors)
            }
            ValidationError::Store(err) => internal(CONTEXT, MESSAGE)(err),
        })?;
    debug!(id = created.id, "Created restaurant_pizza");

    Ok((
        StatusCode::CREATED,
        Json(serialize_restaurant_pizza(&created)),
    ))
}

pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        list_restaurants,
        get_restaurant,
        delete_restaurant,
        list_pizzas,
        create_restaurant_pizza,
    ),
    components(
        schemas(
            serializer::Restaurant,
            serializer::RestaurantPizza,
            serializer::Pizza,
            serializer::CreateRestaurantPizzaRequest,
            serializer::ErrorResponse,
            serializer::ValidationErrorResponse,
        )
    ),
    tags(
        (name = "restaurants", description = "Restaurant endpoints"),
        (name = "pizzas", description = "Pizza endpoints"),
        (name = "restaurant_pizzas", description = "Prices linking pizzas to restaurants")
    ),
    info(
        title = "Pizza Restaurant API",
        description = "Restaurants, pizzas and the prices restaurants charge for them",
        version = "1.0.0"
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, response::IntoResponse};
    use serde_json::json;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::models;
    use crate::store::tests::{seed_pizza, seed_restaurant, setup_database};
    use crate::validation::{MISSING_FIELDS, PIZZA_NOT_FOUND, PRICE_OUT_OF_RANGE, RESTAURANT_NOT_FOUND};

    struct Fixture {
        _dir: TempDir,
        state: AppState,
        restaurant: models::Restaurant,
        pizza: models::Pizza,
    }

    // Dough and Margherita, no restaurant pizzas yet.
    fn setup() -> Fixture {
        let (dir, database_url) = setup_database();
        let conn = &mut establish_connection(&database_url).unwrap();
        let restaurant = seed_restaurant(conn, "Dough");
        let pizza = seed_pizza(conn, "Margherita");

        Fixture {
            _dir: dir,
            state: AppState::new(database_url),
            restaurant,
            pizza,
        }
    }

    fn restaurant_pizza_count(state: &AppState) -> usize {
        state
            .with_store(|store| store.list_restaurant_pizzas())
            .unwrap()
            .len()
    }

    async fn create(state: &AppState, payload: Value) -> Result<serializer::RestaurantPizza, ApiError> {
        create_restaurant_pizza(State(state.clone()), Json(payload))
            .await
            .map(|(status, Json(body))| {
                assert_eq!(status, StatusCode::CREATED);
                body
            })
    }

    #[tokio::test]
    async fn test_create_restaurant_pizza() {
        let fixture = setup();

        let created = create(
            &fixture.state,
            json!({
                "restaurant_id": fixture.restaurant.id,
                "pizza_id": fixture.pizza.id,
                "price": 15
            }),
        )
        .await
        .unwrap();

        assert_eq!(created.price, 15);
        assert_eq!(created.restaurant_id, fixture.restaurant.id);
        assert_eq!(created.pizza_id, fixture.pizza.id);
        assert_eq!(restaurant_pizza_count(&fixture.state), 1);
    }

    #[tokio::test]
    async fn test_create_restaurant_pizza_price_out_of_range() {
        let fixture = setup();

        for price in [0, 31, -5, 50] {
            let result = create(
                &fixture.state,
                json!({
                    "restaurant_id": fixture.restaurant.id,
                    "pizza_id": fixture.pizza.id,
                    "price": price
                }),
            )
            .await;

            match result {
                Err(ApiError::ValidationFailed(errors)) => {
                    assert_eq!(errors, vec![PRICE_OUT_OF_RANGE])
                }
                other => panic!("expected validation failure, got {:?}", other),
            }
        }

        assert_eq!(restaurant_pizza_count(&fixture.state), 0);
    }

    #[tokio::test]
    async fn test_create_restaurant_pizza_dangling_references() {
        let fixture = setup();

        let result = create(
            &fixture.state,
            json!({"restaurant_id": 999, "pizza_id": 998, "price": 10}),
        )
        .await;

        match result {
            Err(ApiError::ValidationFailed(errors)) => {
                assert_eq!(errors, vec![RESTAURANT_NOT_FOUND, PIZZA_NOT_FOUND])
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
        assert_eq!(restaurant_pizza_count(&fixture.state), 0);
    }

    #[tokio::test]
    async fn test_create_restaurant_pizza_missing_fields() {
        let fixture = setup();

        let response = create(&fixture.state, json!({"restaurant_id": fixture.restaurant.id}))
            .await
            .unwrap_err()
            .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
        .unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"errors": [MISSING_FIELDS, PRICE_OUT_OF_RANGE]}));
    }

    #[tokio::test]
    async fn test_create_restaurant_pizza_unreachable_database() {
        let dir = tempfile::tempdir().unwrap();
        let database_url = dir
            .path()
            .join("missing")
            .join("app.db")
            .to_str()
            .unwrap()
            .to_string();
        let state = AppState::new(database_url);

        let result = create(&state, json!({"restaurant_id": 1, "pizza_id": 1, "price": 10})).await;

        match result {
            Err(ApiError::Internal(message)) => assert_eq!(message, "An internal error occurred."),
            other => panic!("expected internal error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_restaurant() {
        let fixture = setup();
        let created = create(
            &fixture.state,
            json!({
                "restaurant_id": fixture.restaurant.id,
                "pizza_id": fixture.pizza.id,
                "price": 12
            }),
        )
        .await
        .unwrap();

        let Json(restaurant) = get_restaurant(
            State(fixture.state.clone()),
            Path(i64::from(fixture.restaurant.id)),
        )
        .await
        .unwrap();

        assert_eq!(restaurant.name, "Dough");
        assert_eq!(restaurant.restaurant_pizzas, vec![created]);
    }

    #[tokio::test]
    async fn test_get_restaurant_not_found() {
        let fixture = setup();

        let response = get_restaurant(State(fixture.state.clone()), Path(999))
            .await
            .unwrap_err()
            .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_restaurants() {
        let fixture = setup();
        create(
            &fixture.state,
            json!({
                "restaurant_id": fixture.restaurant.id,
                "pizza_id": fixture.pizza.id,
                "price": 9
            }),
        )
        .await
        .unwrap();

        let Json(restaurants) = list_restaurants(State(fixture.state.clone())).await.unwrap();

        assert_eq!(restaurants.len(), 1);
        assert_eq!(restaurants[0].address, "Dough Street");
        assert_eq!(restaurants[0].restaurant_pizzas.len(), 1);
        assert_eq!(restaurants[0].restaurant_pizzas[0].price, 9);
    }

    #[tokio::test]
    async fn test_list_pizzas() {
        let fixture = setup();

        let Json(pizzas) = list_pizzas(State(fixture.state.clone())).await.unwrap();

        assert_eq!(pizzas.len(), 1);
        assert_eq!(pizzas[0].name, "Margherita");
    }

    #[tokio::test]
    async fn test_list_pizzas_empty() {
        let (_dir, database_url) = setup_database();

        let Json(pizzas) = list_pizzas(State(AppState::new(database_url))).await.unwrap();

        assert!(pizzas.is_empty());
    }

    #[tokio::test]
    async fn test_delete_restaurant_cascades() {
        let fixture = setup();
        create(
            &fixture.state,
            json!({
                "restaurant_id": fixture.restaurant.id,
                "pizza_id": fixture.pizza.id,
                "price": 20
            }),
        )
        .await
        .unwrap();

        let status = delete_restaurant(
            State(fixture.state.clone()),
            Path(i64::from(fixture.restaurant.id)),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let result = get_restaurant(
            State(fixture.state.clone()),
            Path(i64::from(fixture.restaurant.id)),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
        assert_eq!(restaurant_pizza_count(&fixture.state), 0);

        let Json(pizzas) = list_pizzas(State(fixture.state.clone())).await.unwrap();
        assert_eq!(pizzas.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_restaurant() {
        let fixture = setup();
        create(
            &fixture.state,
            json!({
                "restaurant_id": fixture.restaurant.id,
                "pizza_id": fixture.pizza.id,
                "price": 20
            }),
        )
        .await
        .unwrap();

        let response = delete_restaurant(State(fixture.state.clone()), Path(999))
            .await
            .unwrap_err()
            .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let Json(restaurants) = list_restaurants(State(fixture.state.clone())).await.unwrap();
        assert_eq!(restaurants.len(), 1);
        assert_eq!(restaurant_pizza_count(&fixture.state), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_restaurant_id_is_not_found() {
        let fixture = setup();
        let id = i64::from(i32::MAX) + 1;

        let result = get_restaurant(State(fixture.state.clone()), Path(id)).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));

        let response = delete_restaurant(State(fixture.state.clone()), Path(id))
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_creates_all_succeed() {
        let fixture = setup();

        let tasks = (0..64)
            .map(|i| {
                let state = fixture.state.clone();
                let payload = json!({
                    "restaurant_id": fixture.restaurant.id,
                    "pizza_id": fixture.pizza.id,
                    "price": 1 + i % 30
                });
                tokio::spawn(async move {
                    create_restaurant_pizza(State(state), Json(payload)).await
                })
            })
            .collect::<Vec<_>>();

        for task in tasks {
            let (status, _) = task.await.unwrap().unwrap();
            assert_eq!(status, StatusCode::CREATED);
        }

        assert_eq!(restaurant_pizza_count(&fixture.state), 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create_and_delete() {
        let fixture = setup();

        let creates = (0..16)
            .map(|_| {
                let state = fixture.state.clone();
                let payload = json!({
                    "restaurant_id": fixture.restaurant.id,
                    "pizza_id": fixture.pizza.id,
                    "price": 10
                });
                tokio::spawn(async move {
                    create_restaurant_pizza(State(state), Json(payload)).await
                })
            })
            .collect::<Vec<_>>();
        let delete = tokio::spawn(delete_restaurant(
            State(fixture.state.clone()),
            Path(i64::from(fixture.restaurant.id)),
        ));

        assert_eq!(delete.await.unwrap().unwrap(), StatusCode::NO_CONTENT);
        for task in creates {
            match task.await.unwrap() {
                Ok((status, _)) => assert_eq!(status, StatusCode::CREATED),
                Err(ApiError::ValidationFailed(errors)) => {
                    assert_eq!(errors, vec![RESTAURANT_NOT_FOUND])
                }
                Err(other) => panic!("expected created or not found, got {:?}", other),
            }
        }

        assert_eq!(restaurant_pizza_count(&fixture.state), 0);
    }

    #[tokio::test]
    async fn test_router_create_and_delete() {
        let fixture = setup();
        let app = router(fixture.state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/restaurant_pizzas")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({
                            "restaurant_id": fixture.restaurant.id,
                            "pizza_id": fixture.pizza.id,
                            "price": 15
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
        .unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["price"], json!(15));
        assert_eq!(value["restaurant_id"], json!(fixture.restaurant.id));
        assert_eq!(value["pizza_id"], json!(fixture.pizza.id));
        assert!(value["id"].is_i64());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/restaurants/{}", fixture.restaurant.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
        .unwrap();
        assert!(body.is_empty());

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/restaurants/{}", fixture.restaurant.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_openapi_document_lists_routes() {
        let Json(doc) = openapi().await;

        assert!(doc.paths.paths.contains_key("/restaurants/{id}"));
        assert!(doc.paths.paths.contains_key("/restaurant_pizzas"));
    }
}
