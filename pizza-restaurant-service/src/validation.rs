//! Field and reference checks for a proposed restaurant pizza.
//!
//! Everything here runs before the store is asked to write anything. The only
//! storage dependency is [`EntityLookup`], so the rules can be exercised
//! against an in-memory set of ids.

use serde_json::Value;

use crate::store::StoreError;

pub const MISSING_FIELDS: &str = "Missing required fields.";
pub const PRICE_OUT_OF_RANGE: &str = "Price must be between 1 and 30.";
pub const RESTAURANT_NOT_FOUND: &str = "Restaurant not found.";
pub const PIZZA_NOT_FOUND: &str = "Pizza not found.";

const REQUIRED_FIELDS: [&str; 3] = ["restaurant_id", "pizza_id", "price"];

/// Price of a pizza at a restaurant, always within `Price::MIN..=Price::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Price(i32);

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("price {0} is outside {min}..={max}", min = Price::MIN, max = Price::MAX)]
pub struct PriceOutOfRange(pub i64);

impl Price {
    pub const MIN: i32 = 1;
    pub const MAX: i32 = 30;

    pub fn new(value: i64) -> Result<Self, PriceOutOfRange> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Ok(Self(value as i32))
        } else {
            Err(PriceOutOfRange(value))
        }
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

/// Existence checks the validator needs from the store.
pub trait EntityLookup {
    fn restaurant_exists(&mut self, id: i32) -> Result<bool, StoreError>;
    fn pizza_exists(&mut self, id: i32) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidRestaurantPizza {
    pub restaurant_id: i32,
    pub pizza_id: i32,
    pub price: Price,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid restaurant pizza: {}", .0.join(" "))]
    Invalid(Vec<String>),
    #[error("store failed while validating: {0}")]
    Store(#[from] StoreError),
}

impl From<diesel::result::Error> for ValidationError {
    fn from(err: diesel::result::Error) -> Self {
        Self::Store(err.into())
    }
}

/// Checks presence, price range and references of a restaurant pizza payload.
///
/// Every violation found is reported, in that order, instead of stopping at
/// the first one. Existence is only checked for ids that are present.
pub fn validate_restaurant_pizza<L>(
    payload: &Value,
    lookup: &mut L,
) -> Result<ValidRestaurantPizza, ValidationError>
where
    L: EntityLookup + ?Sized,
{
    let fields = payload.as_object();
    let field = |name: &str| fields.and_then(|f| f.get(name));
    let mut errors = Vec::new();

    if REQUIRED_FIELDS.iter().any(|name| field(name).is_none()) {
        errors.push(MISSING_FIELDS.to_string());
    }

    let price = match field("price").and_then(integral).map(Price::new) {
        Some(Ok(price)) => Some(price),
        _ => {
            errors.push(PRICE_OUT_OF_RANGE.to_string());
            None
        }
    };

    let restaurant_id = match field("restaurant_id") {
        Some(value) => {
            let found = resolve(value, |id| lookup.restaurant_exists(id))?;
            if found.is_none() {
                errors.push(RESTAURANT_NOT_FOUND.to_string());
            }
            found
        }
        None => None,
    };

    let pizza_id = match field("pizza_id") {
        Some(value) => {
            let found = resolve(value, |id| lookup.pizza_exists(id))?;
            if found.is_none() {
                errors.push(PIZZA_NOT_FOUND.to_string());
            }
            found
        }
        None => None,
    };

    match (restaurant_id, pizza_id, price) {
        (Some(restaurant_id), Some(pizza_id), Some(price)) if errors.is_empty() => {
            Ok(ValidRestaurantPizza {
                restaurant_id,
                pizza_id,
                price,
            })
        }
        _ => Err(ValidationError::Invalid(errors)),
    }
}

/// JSON integers, or floats without a fractional part.
fn integral(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };
    number.as_i64().or_else(|| {
        number
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

fn resolve<F>(value: &Value, exists: F) -> Result<Option<i32>, StoreError>
where
    F: FnOnce(i32) -> Result<bool, StoreError>,
{
    let Some(id) = integral(value).and_then(|v| i32::try_from(v).ok()) else {
        return Ok(None);
    };
    Ok(exists(id)?.then_some(id))
}
