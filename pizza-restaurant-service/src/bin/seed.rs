//! Resets the database to a small set of restaurants, pizzas and prices.
//!
//! ```text
//! DATABASE_URL=app.db cargo run --bin seed
//! ```

use diesel::prelude::*;
use tracing::info;

use pizza_restaurant_service::models::{NewPizza, NewRestaurant};
use pizza_restaurant_service::store::{DieselStore, RestaurantStore, StoreError};
use pizza_restaurant_service::validation::{Price, ValidRestaurantPizza};
use pizza_restaurant_service::{database_url, establish_connection, run_migrations, schema};

const RESTAURANTS: [(&str, &str); 3] = [
    ("Karen's Pizza Shack", "address1"),
    ("Sanjay's Pizza", "address2"),
    ("Kiki's Pizza", "address3"),
];

const PIZZAS: [(&str, &str); 3] = [
    ("Emma", "Dough, Tomato Sauce, Cheese"),
    ("Geri", "Dough, Tomato Sauce, Cheese, Pepperoni"),
    ("Melanie", "Dough, Sauce, Ricotta, Red peppers, Mustard"),
];

// (restaurant index, pizza index, price)
const OFFERS: [(usize, usize, i64); 3] = [(0, 0, 1), (1, 1, 4), (2, 2, 5)];

fn clear(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    conn.transaction::<_, StoreError, _>(|conn| {
        diesel::delete(schema::restaurant_pizzas::table).execute(conn)?;
        diesel::delete(schema::restaurants::table).execute(conn)?;
        diesel::delete(schema::pizzas::table).execute(conn)?;
        Ok(())
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let database_url = database_url();
    let conn = &mut establish_connection(&database_url)?;
    run_migrations(conn)?;
    clear(conn)?;

    let mut store = DieselStore::new(conn);

    let restaurants = RESTAURANTS
        .iter()
        .map(|(name, address)| {
            store.create_restaurant(&NewRestaurant {
                name: name.to_string(),
                address: address.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let pizzas = PIZZAS
        .iter()
        .map(|(name, ingredients)| {
            store.create_pizza(&NewPizza {
                name: name.to_string(),
                ingredients: ingredients.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    for (restaurant, pizza, price) in OFFERS {
        store.create_restaurant_pizza(&ValidRestaurantPizza {
            restaurant_id: restaurants[restaurant].id,
            pizza_id: pizzas[pizza].id,
            price: Price::new(price)?,
        })?;
    }

    info!(
        "Seeded {} restaurants, {} pizzas and {} restaurant pizzas into {}",
        restaurants.len(),
        pizzas.len(),
        OFFERS.len(),
        database_url
    );

    Ok(())
}
