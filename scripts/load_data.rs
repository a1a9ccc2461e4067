//! Load data script for house_app
//!
//! Seeds the store at DATABASE_PATH with two users, three places and one
//! booking so the API has something to show.
//! Run: cargo run --bin load_data
//! Re-running is fine: existing users are reused, new places are added.

use chrono::NaiveDate;
use house_app::auth::PasswordHasher;
use house_app::models::{new_id, Booking, BookingInput, Place, PlaceInput, User};
use house_app::storage::{Storage, StoreError};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let path = std::env::var("DATABASE_PATH").unwrap_or_else(|_| "house_data".to_string());
    let storage = Storage::open(&path)?;
    let hasher = PasswordHasher::new(10);

    let ann = ensure_user(&storage, &hasher, "Ann", "ann@x.com", "pw1")?;
    let bob = ensure_user(&storage, &hasher, "Bob", "bob@x.com", "pw2")?;

    let samples = [
        (&ann, "Harbour loft", "12 Quay St, Lisbon", 4, 95.0, vec!["wifi", "tv"]),
        (&ann, "Garden cottage", "3 Mill Ln, Bath", 2, 70.0, vec!["parking", "pets"]),
        (&bob, "Mountain cabin", "Alpine Rd 8, Chamonix", 6, 180.0, vec!["wifi", "parking", "entrance"]),
    ];

    let mut places = Vec::new();
    for (owner, title, address, max_guests, price, perks) in samples {
        let place = storage.create_place(Place::new(
            &owner.id,
            PlaceInput {
                title: title.to_string(),
                address: address.to_string(),
                description: format!("{title}, sample listing"),
                perks: perks.into_iter().map(String::from).collect(),
                check_in: "14".to_string(),
                check_out: "11".to_string(),
                max_guests,
                price,
                ..Default::default()
            },
        ))?;
        println!("✅ place {} ({}) owned by {}", place.title, place.id, owner.email);
        places.push(place);
    }

    // Bob books Ann's loft
    let booking = storage.create_booking(Booking::new(
        &bob.id,
        BookingInput {
            place: places[0].id.clone(),
            check_in: NaiveDate::from_ymd_opt(2026, 7, 1).ok_or("bad date")?,
            check_out: NaiveDate::from_ymd_opt(2026, 7, 5).ok_or("bad date")?,
            number_of_guests: 2,
            name: bob.name.clone(),
            phone: "+44 20 7946 0000".to_string(),
            price: places[0].price * 4.0,
        },
    ))?;
    println!("✅ booking {} by {}", booking.id, bob.email);

    storage.flush()?;
    println!("✅ Seeded {path} (login as ann@x.com / pw1 or bob@x.com / pw2)");
    Ok(())
}

fn ensure_user(
    storage: &Storage,
    hasher: &PasswordHasher,
    name: &str,
    email: &str,
    password: &str,
) -> Result<User, Box<dyn std::error::Error>> {
    let user = User {
        id: new_id(),
        name: name.to_string(),
        email: email.to_string(),
        password: hasher.hash(password)?,
    };
    match storage.create_user(user) {
        Ok(user) => {
            println!("✅ user {email}");
            Ok(user)
        }
        Err(StoreError::Validation(_)) => {
            println!("ℹ️  user {email} already exists, reusing");
            storage
                .find_user_by_email(email)?
                .ok_or_else(|| format!("user {email} vanished").into())
        }
        Err(e) => Err(e.into()),
    }
}
