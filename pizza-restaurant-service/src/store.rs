use diesel::{dsl::exists, prelude::*, select, ConnectionError, SqliteConnection};

use crate::models::{
    NewPizza, NewRestaurant, NewRestaurantPizza, Pizza, Restaurant, RestaurantPizza,
};
use crate::schema::{pizzas, restaurant_pizzas, restaurants};
use crate::validation::{EntityLookup, ValidRestaurantPizza};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to connect to database: {0}")]
    Connection(#[from] ConnectionError),
    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("failed to run migrations: {0}")]
    Migration(Box<dyn std::error::Error + Send + Sync>),
    #[error("pizza {pizza_id} is still offered by {references} restaurant(s)")]
    PizzaInUse { pizza_id: i32, references: i64 },
}

/// Typed access to restaurants, pizzas and the prices linking them.
///
/// Lookups return `Ok(None)` for a missing row. Every mutation runs in its
/// own transaction and leaves the store untouched when it fails.
pub trait RestaurantStore: EntityLookup {
    fn find_restaurant(&mut self, id: i32) -> Result<Option<Restaurant>, StoreError>;

    fn restaurant_with_pizzas(
        &mut self,
        id: i32,
    ) -> Result<Option<(Restaurant, Vec<RestaurantPizza>)>, StoreError>;

    fn list_restaurants(&mut self) -> Result<Vec<(Restaurant, Vec<RestaurantPizza>)>, StoreError>;

    fn find_pizza(&mut self, id: i32) -> Result<Option<Pizza>, StoreError>;

    fn list_pizzas(&mut self) -> Result<Vec<Pizza>, StoreError>;

    fn list_restaurant_pizzas(&mut self) -> Result<Vec<RestaurantPizza>, StoreError>;

    fn create_restaurant(&mut self, restaurant: &NewRestaurant) -> Result<Restaurant, StoreError>;

    fn create_pizza(&mut self, pizza: &NewPizza) -> Result<Pizza, StoreError>;

    fn create_restaurant_pizza(
        &mut self,
        restaurant_pizza: &ValidRestaurantPizza,
    ) -> Result<RestaurantPizza, StoreError>;

    /// Removes a restaurant together with its restaurant pizzas.
    ///
    /// Returns `false` when no restaurant has this id.
    fn delete_restaurant(&mut self, id: i32) -> Result<bool, StoreError>;

    /// Removes a pizza no restaurant offers.
    ///
    /// Fails with [`StoreError::PizzaInUse`] while restaurant pizzas still
    /// reference it; returns `false` when no pizza has this id.
    fn delete_pizza(&mut self, id: i32) -> Result<bool, StoreError>;
}

pub struct DieselStore<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> DieselStore<'a> {
    pub fn new(conn: &'a mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so reads made in `f` (such as the
    /// existence checks before an insert) still hold when `f` writes. Store
    /// mutations called from `f` nest as savepoints.
    pub fn write<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut DieselStore<'_>) -> Result<T, E>,
        E: From<diesel::result::Error>,
    {
        self.conn
            .immediate_transaction(|conn| f(&mut DieselStore::new(conn)))
    }
}

impl EntityLookup for DieselStore<'_> {
    fn restaurant_exists(&mut self, id: i32) -> Result<bool, StoreError> {
        Ok(select(exists(restaurants::table.find(id))).get_result(self.conn)?)
    }

    fn pizza_exists(&mut self, id: i32) -> Result<bool, StoreError> {
        Ok(select(exists(pizzas::table.find(id))).get_result(self.conn)?)
    }
}

impl RestaurantStore for DieselStore<'_> {
    fn find_restaurant(&mut self, id: i32) -> Result<Option<Restaurant>, StoreError> {
        Ok(restaurants::table
            .find(id)
            .select(Restaurant::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn restaurant_with_pizzas(
        &mut self,
        id: i32,
    ) -> Result<Option<(Restaurant, Vec<RestaurantPizza>)>, StoreError> {
        let Some(restaurant) = self.find_restaurant(id)? else {
            return Ok(None);
        };

        let children = RestaurantPizza::belonging_to(&restaurant)
            .select(RestaurantPizza::as_select())
            .order(restaurant_pizzas::id.asc())
            .load(self.conn)?;

        Ok(Some((restaurant, children)))
    }

    fn list_restaurants(&mut self) -> Result<Vec<(Restaurant, Vec<RestaurantPizza>)>, StoreError> {
        let results = restaurants::table
            .select(Restaurant::as_select())
            .order(restaurants::id.asc())
            .load(self.conn)?;

        let children = RestaurantPizza::belonging_to(&results)
            .select(RestaurantPizza::as_select())
            .order(restaurant_pizzas::id.asc())
            .load(self.conn)?
            .grouped_by(&results);

        Ok(results.into_iter().zip(children).collect())
    }

    fn find_pizza(&mut self, id: i32) -> Result<Option<Pizza>, StoreError> {
        Ok(pizzas::table
            .find(id)
            .select(Pizza::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn list_pizzas(&mut self) -> Result<Vec<Pizza>, StoreError> {
        Ok(pizzas::table
            .select(Pizza::as_select())
            .order(pizzas::id.asc())
            .load(self.conn)?)
    }

    fn list_restaurant_pizzas(&mut self) -> Result<Vec<RestaurantPizza>, StoreError> {
        Ok(restaurant_pizzas::table
            .select(RestaurantPizza::as_select())
            .order(restaurant_pizzas::id.asc())
            .load(self.conn)?)
    }

    fn create_restaurant(&mut self, restaurant: &NewRestaurant) -> Result<Restaurant, StoreError> {
        self.conn.transaction::<_, StoreError, _>(|conn| {
            Ok(diesel::insert_into(restaurants::table)
                .values(restaurant)
                .returning(Restaurant::as_returning())
                .get_result(conn)?)
        })
    }

    fn create_pizza(&mut self, pizza: &NewPizza) -> Result<Pizza, StoreError> {
        self.conn.transaction::<_, StoreError, _>(|conn| {
            Ok(diesel::insert_into(pizzas::table)
                .values(pizza)
                .returning(Pizza::as_returning())
                .get_result(conn)?)
        })
    }

    fn create_restaurant_pizza(
        &mut self,
        restaurant_pizza: &ValidRestaurantPizza,
    ) -> Result<RestaurantPizza, StoreError> {
        let row = NewRestaurantPizza {
            price: restaurant_pizza.price.get(),
            restaurant_id: restaurant_pizza.restaurant_id,
            pizza_id: restaurant_pizza.pizza_id,
        };

        self.conn.transaction::<_, StoreError, _>(|conn| {
            Ok(diesel::insert_into(restaurant_pizzas::table)
                .values(&row)
                .returning(RestaurantPizza::as_returning())
                .get_result(conn)?)
        })
    }

    fn delete_restaurant(&mut self, id: i32) -> Result<bool, StoreError> {
        // Children first: rows can only reference an existing restaurant, so
        // a missing restaurant deletes nothing at either step.
        self.conn.transaction::<_, StoreError, _>(|conn| {
            diesel::delete(
                restaurant_pizzas::table.filter(restaurant_pizzas::restaurant_id.eq(id)),
            )
            .execute(conn)?;
            let deleted = diesel::delete(restaurants::table.find(id)).execute(conn)?;

            Ok(deleted > 0)
        })
    }

    fn delete_pizza(&mut self, id: i32) -> Result<bool, StoreError> {
        self.conn.transaction::<_, StoreError, _>(|conn| {
            let references = restaurant_pizzas::table
                .filter(restaurant_pizzas::pizza_id.eq(id))
                .count()
                .get_result::<i64>(conn)?;
            if references > 0 {
                return Err(StoreError::PizzaInUse {
                    pizza_id: id,
                    references,
                });
            }

            let deleted = diesel::delete(pizzas::table.find(id)).execute(conn)?;
            Ok(deleted > 0)
        })
    }
}
