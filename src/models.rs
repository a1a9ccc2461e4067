use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Fresh store-assigned document id. Time-ordered, so sled keys iterate in
/// roughly creation order.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Stored identity record. `password` holds the bcrypt hash and never leaves
/// the server; clients get a [`UserView`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
}

impl User {
    pub fn view(&self) -> UserView {
        UserView {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct UserView {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct LinkUploadRequest {
    pub link: String,
}

/// Listing fields as sent by the client on create and update.
#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaceInput {
    pub title: String,
    pub address: String,
    pub added_photos: Vec<String>,
    pub description: String,
    pub perks: Vec<String>,
    pub extra_info: String,
    pub check_in: String,
    pub check_out: String,
    pub max_guests: u32,
    pub price: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct PlaceUpdateRequest {
    pub id: String,
    #[serde(flatten)]
    pub fields: PlaceInput,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub id: String,
    pub owner: String,
    pub title: String,
    pub address: String,
    pub photos: Vec<String>,
    pub description: String,
    #[schema(value_type = Vec<String>)]
    pub perks: BTreeSet<String>,
    pub extra_info: String,
    /// Time of day, as entered by the host.
    pub check_in: String,
    pub check_out: String,
    pub max_guests: u32,
    pub price: f64,
}

impl Place {
    pub fn new(owner: &str, input: PlaceInput) -> Self {
        let mut place = Self {
            id: new_id(),
            owner: owner.to_string(),
            title: String::new(),
            address: String::new(),
            photos: Vec::new(),
            description: String::new(),
            perks: BTreeSet::new(),
            extra_info: String::new(),
            check_in: String::new(),
            check_out: String::new(),
            max_guests: 0,
            price: 0.0,
        };
        place.apply(input);
        place
    }

    /// Replaces every mutable field; `id` and `owner` are untouched.
    pub fn apply(&mut self, input: PlaceInput) {
        self.title = input.title;
        self.address = input.address;
        self.photos = input.added_photos;
        self.description = input.description;
        self.perks = input.perks.into_iter().collect();
        self.extra_info = input.extra_info;
        self.check_in = input.check_in;
        self.check_out = input.check_out;
        self.max_guests = input.max_guests;
        self.price = input.price;
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_guests == 0 {
            return Err("maxGuests must be a positive integer".to_string());
        }
        if !(self.price.is_finite() && self.price > 0.0) {
            return Err("price must be a positive number".to_string());
        }
        Ok(())
    }
}

/// Reservation fields as sent by the client. Any `user` sent along is
/// dropped; the author always comes from the session.
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookingInput {
    pub place: String,
    #[schema(value_type = String, format = Date)]
    pub check_in: NaiveDate,
    #[schema(value_type = String, format = Date)]
    pub check_out: NaiveDate,
    pub number_of_guests: u32,
    pub name: String,
    pub phone: String,
    pub price: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub place: String,
    pub user: String,
    #[schema(value_type = String, format = Date)]
    pub check_in: NaiveDate,
    #[schema(value_type = String, format = Date)]
    pub check_out: NaiveDate,
    pub number_of_guests: u32,
    pub name: String,
    pub phone: String,
    pub price: f64,
}

impl Booking {
    pub fn new(user: &str, input: BookingInput) -> Self {
        Self {
            id: new_id(),
            place: input.place,
            user: user.to_string(),
            check_in: input.check_in,
            check_out: input.check_out,
            number_of_guests: input.number_of_guests,
            name: input.name,
            phone: input.phone,
            price: input.price,
        }
    }

    // Date order, overlap and price against the listing are not checked.
    pub fn validate(&self) -> Result<(), String> {
        if self.place.trim().is_empty() {
            return Err("place is required".to_string());
        }
        if self.number_of_guests == 0 {
            return Err("numberOfGuests must be a positive integer".to_string());
        }
        if !self.price.is_finite() {
            return Err("price must be a number".to_string());
        }
        Ok(())
    }

    pub fn expand(self, place: Option<Place>) -> BookingView {
        BookingView {
            id: self.id,
            place,
            user: self.user,
            check_in: self.check_in,
            check_out: self.check_out,
            number_of_guests: self.number_of_guests,
            name: self.name,
            phone: self.phone,
            price: self.price,
        }
    }
}

/// A booking with its `place` reference replaced by the current listing
/// (`null` if the listing no longer exists).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: String,
    pub place: Option<Place>,
    pub user: String,
    #[schema(value_type = String, format = Date)]
    pub check_in: NaiveDate,
    #[schema(value_type = String, format = Date)]
    pub check_out: NaiveDate,
    pub number_of_guests: u32,
    pub name: String,
    pub phone: String,
    pub price: f64,
}
