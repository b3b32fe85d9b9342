use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RestaurantPizza {
    pub id: i32,
    /// Price in whole currency units, between 1 and 30
    pub price: i32,
    pub restaurant_id: i32,
    pub pizza_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Restaurant {
    pub id: i32,
    pub name: String,
    pub address: String,
    /// Prices this restaurant offers, without nested pizza or restaurant objects
    pub restaurant_pizzas: Vec<RestaurantPizza>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Pizza {
    pub id: i32,
    pub name: String,
    pub ingredients: String,
}

/// Request body accepted by `POST /restaurant_pizzas`.
///
/// The handler reads the body as raw JSON so that missing or mistyped fields
/// end up in the validation error list instead of a rejected extraction.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateRestaurantPizzaRequest {
    pub restaurant_id: i32,
    pub pizza_id: i32,
    pub price: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ValidationErrorResponse {
    pub errors: Vec<String>,
}

pub fn serialize_restaurant_pizza(restaurant_pizza: &models::RestaurantPizza) -> RestaurantPizza {
    RestaurantPizza {
        id: restaurant_pizza.id,
        price: restaurant_pizza.price,
        restaurant_id: restaurant_pizza.restaurant_id,
        pizza_id: restaurant_pizza.pizza_id,
    }
}

pub fn serialize_restaurant(
    restaurant: models::Restaurant,
    restaurant_pizzas: &[models::RestaurantPizza],
) -> Restaurant {
    Restaurant {
        id: restaurant.id,
        name: restaurant.name,
        address: restaurant.address,
        restaurant_pizzas: restaurant_pizzas
            .iter()
            .map(serialize_restaurant_pizza)
            .collect(),
    }
}

pub fn serialize_pizza(pizza: models::Pizza) -> Pizza {
    Pizza {
        id: pizza.id,
        name: pizza.name,
        ingredients: pizza.ingredients,
    }
}
